// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Full multi-party rounds over an in-memory synchronous bus: a handful of
//! servers and clients exchange real signed wire messages, the key shuffle
//! is simulated deterministically, and the six canonical failure and
//! lifecycle scenarios are driven end to end.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use ed25519_dalek::SigningKey;
use rand_chacha::ChaCha20Rng;

use blogdrop::Parameters;
use bulk::message::{self, ClientMasterPacket, SignedClientPacket};
use bulk::{
    BulkRound, Directory, Envelope, LocalIdentity, MessageType, Network, PeerId, PeerInfo,
    RoundId, RoundSession, ShuffleRound,
};
use group::SeedableRng;

struct BusCore {
    queue: VecDeque<(PeerId, PeerId, Vec<u8>)>,
    members: Vec<PeerId>,
    servers: Vec<PeerId>,
    upstream: BTreeMap<PeerId, PeerId>,
    connected: BTreeSet<PeerId>,
    outboxes: BTreeMap<PeerId, VecDeque<Vec<u8>>>,
    sinks: BTreeMap<PeerId, Vec<(usize, Vec<u8>)>>,
    shuffle_inputs: BTreeMap<PeerId, Vec<u8>>,
    window_requests: Vec<(PeerId, u64)>,
}

type SharedCore = Arc<Mutex<BusCore>>;

struct BusNetwork {
    core: SharedCore,
    local: PeerId,
}

impl Network for BusNetwork {
    fn send(&mut self, to: &PeerId, payload: Vec<u8>) {
        self.core
            .lock()
            .unwrap()
            .queue
            .push_back((self.local, *to, payload));
    }

    fn broadcast(&mut self, payload: Vec<u8>) {
        let mut core = self.core.lock().unwrap();
        let members = core.members.clone();
        for member in members {
            if member != self.local {
                core.queue.push_back((self.local, member, payload.clone()));
            }
        }
    }

    fn broadcast_to_servers(&mut self, payload: Vec<u8>) {
        let mut core = self.core.lock().unwrap();
        let servers = core.servers.clone();
        for server in servers {
            if server != self.local {
                core.queue.push_back((self.local, server, payload.clone()));
            }
        }
    }

    fn broadcast_to_clients(&mut self, payload: Vec<u8>) {
        let mut core = self.core.lock().unwrap();
        let targets: Vec<PeerId> = core
            .upstream
            .iter()
            .filter(|(client, server)| {
                **server == self.local && core.connected.contains(*client)
            })
            .map(|(client, _)| *client)
            .collect();
        for client in targets {
            core.queue.push_back((self.local, client, payload.clone()));
        }
    }
}

struct BusSession {
    core: SharedCore,
    local: PeerId,
}

impl RoundSession for BusSession {
    fn get_data(&mut self, max: usize) -> (Vec<u8>, bool) {
        let mut core = self.core.lock().unwrap();
        let outbox = core.outboxes.get_mut(&self.local).unwrap();
        let message = match outbox.front() {
            Some(front) if front.len() <= max => outbox.pop_front().unwrap(),
            _ => Vec::new(),
        };
        let more = !outbox.is_empty();

        (message, more)
    }

    fn push_data(&mut self, slot: usize, payload: &[u8]) {
        self.core
            .lock()
            .unwrap()
            .sinks
            .get_mut(&self.local)
            .unwrap()
            .push((slot, payload.to_vec()));
    }

    fn connected_clients(&self) -> Vec<PeerId> {
        let core = self.core.lock().unwrap();
        core.upstream
            .iter()
            .filter(|(client, server)| {
                **server == self.local && core.connected.contains(*client)
            })
            .map(|(client, _)| *client)
            .collect()
    }

    fn upstream_server(&self) -> Option<PeerId> {
        self.core.lock().unwrap().upstream.get(&self.local).copied()
    }

    fn schedule_client_window(&mut self, phase: u64) {
        self.core
            .lock()
            .unwrap()
            .window_requests
            .push((self.local, phase));
    }
}

struct BusShuffle {
    core: SharedCore,
    local: PeerId,
}

impl ShuffleRound for BusShuffle {
    fn start(&mut self, input: Vec<u8>) -> bulk::Result<()> {
        self.core
            .lock()
            .unwrap()
            .shuffle_inputs
            .insert(self.local, input);

        Ok(())
    }
}

type Tamper = Box<dyn FnMut(&PeerId, &PeerId, &[u8]) -> Option<Vec<u8>>>;

struct Harness {
    core: SharedCore,
    rounds: BTreeMap<PeerId, BulkRound>,
    signing_keys: BTreeMap<PeerId, SigningKey>,
    servers: Vec<PeerId>,
    clients: Vec<PeerId>,
    tamper: Option<Tamper>,
}

impl Harness {
    fn new(params: Parameters, n_servers: usize, n_clients: usize) -> Self {
        let mut members = Vec::new();
        let mut signing_keys = BTreeMap::new();
        let mut infos = Vec::new();
        for index in 0..(n_servers + n_clients) {
            let id = PeerId::new([index as u8 + 1; 16]);
            let signing_key = SigningKey::from_bytes(&[index as u8 + 42; 32]);
            infos.push(PeerInfo {
                id,
                verifying_key: signing_key.verifying_key(),
            });
            signing_keys.insert(id, signing_key);
            members.push(id);
        }

        let servers: Vec<PeerId> = members[..n_servers].to_vec();
        let clients: Vec<PeerId> = members[n_servers..].to_vec();
        let upstream: BTreeMap<PeerId, PeerId> = clients
            .iter()
            .enumerate()
            .map(|(index, client)| (*client, servers[index % n_servers]))
            .collect();

        let core = Arc::new(Mutex::new(BusCore {
            queue: VecDeque::new(),
            members: members.clone(),
            servers: servers.clone(),
            upstream,
            connected: members.iter().copied().collect(),
            outboxes: members.iter().map(|id| (*id, VecDeque::new())).collect(),
            sinks: members.iter().map(|id| (*id, Vec::new())).collect(),
            shuffle_inputs: BTreeMap::new(),
            window_requests: Vec::new(),
        }));

        let directory = Directory::new(infos, servers.clone()).unwrap();
        let round_id = RoundId([0x5au8; 32]);

        let mut rounds = BTreeMap::new();
        for (index, id) in members.iter().enumerate() {
            let round = BulkRound::new(
                params.clone(),
                directory.clone(),
                LocalIdentity {
                    id: *id,
                    signing_key: signing_keys[id].clone(),
                },
                round_id,
                Box::new(BusNetwork {
                    core: core.clone(),
                    local: *id,
                }),
                Box::new(BusSession {
                    core: core.clone(),
                    local: *id,
                }),
                Box::new(BusShuffle {
                    core: core.clone(),
                    local: *id,
                }),
                Box::new(ChaCha20Rng::seed_from_u64(9_000 + index as u64)),
            )
            .unwrap();
            rounds.insert(*id, round);
        }

        Self {
            core,
            rounds,
            signing_keys,
            servers,
            clients,
            tamper: None,
        }
    }

    fn enqueue_data(&self, id: &PeerId, data: Vec<u8>) {
        self.core
            .lock()
            .unwrap()
            .outboxes
            .get_mut(id)
            .unwrap()
            .push_back(data);
    }

    fn sink(&self, id: &PeerId) -> Vec<(usize, Vec<u8>)> {
        self.core.lock().unwrap().sinks[id].clone()
    }

    fn start(&mut self) {
        for round in self.rounds.values_mut() {
            round.start().unwrap();
        }

        // Deterministic stand-in for the key shuffle: deliver everyone's
        // slot key, ordered lexicographically, to every participant.
        let mut keys: Vec<Vec<u8>> = self
            .core
            .lock()
            .unwrap()
            .shuffle_inputs
            .values()
            .cloned()
            .collect();
        keys.sort();
        for round in self.rounds.values_mut() {
            round.shuffle_complete(Ok(keys.clone()));
        }
    }

    /// Deliver one queued message. Returns false once the bus is idle.
    fn step(&mut self) -> bool {
        let item = self.core.lock().unwrap().queue.pop_front();
        let Some((from, to, payload)) = item else {
            return false;
        };

        let payload = match self.tamper.as_mut().and_then(|t| t(&from, &to, &payload)) {
            Some(replacement) => replacement,
            None => payload,
        };

        if let Some(round) = self.rounds.get_mut(&to) {
            round.process_message(from, &payload);
        }

        true
    }

    fn live_min_phase(&self) -> Option<u64> {
        self.rounds
            .values()
            .filter(|round| round.stopped().is_none())
            .map(|round| round.phase())
            .min()
    }

    /// Pump the bus until every live round has reached `target`.
    fn run_until_phase(&mut self, target: u64) {
        for _ in 0..500_000 {
            match self.live_min_phase() {
                Some(phase) if phase < target => {
                    if !self.step() {
                        panic!("bus went idle before phase {target}");
                    }
                }
                _ => return,
            }
        }
        panic!("phase {target} not reached within the step budget");
    }

    /// Pump the bus until one specific round reaches `target`. Rounds do
    /// not share a clock, so phase-exact assertions key on one participant.
    fn run_until_round_phase(&mut self, id: &PeerId, target: u64) {
        for _ in 0..500_000 {
            if self.rounds[id].phase() >= target {
                return;
            }
            if !self.step() {
                panic!("bus went idle before {id:?} reached phase {target}");
            }
        }
        panic!("{id:?} did not reach phase {target} within the step budget");
    }

    /// Pump until the bus is idle.
    fn run_to_idle(&mut self) {
        for _ in 0..500_000 {
            if !self.step() {
                return;
            }
        }
        panic!("bus did not go idle within the step budget");
    }

    fn disconnect(&mut self, victim: &PeerId) {
        self.rounds.remove(victim);
        self.core.lock().unwrap().connected.remove(victim);
        for round in self.rounds.values_mut() {
            round.handle_disconnect(victim);
        }
    }

    fn assert_nobody_stopped(&self) {
        for (id, round) in &self.rounds {
            assert!(
                round.stopped().is_none(),
                "round {id:?} stopped: {:?}",
                round.stopped()
            );
        }
    }
}

/// Re-sign a sealed envelope after mutating it.
fn reseal(
    payload: &[u8],
    signing_key: &SigningKey,
    mutate: impl FnOnce(&mut Envelope),
) -> Vec<u8> {
    let mut envelope = message::open(payload, &signing_key.verifying_key()).unwrap();
    mutate(&mut envelope);

    message::seal(&envelope, signing_key).unwrap()
}

#[test]
fn a_single_message_reaches_every_sink_exactly_once() {
    let mut harness = Harness::new(Parameters::xor_testing(Vec::new()), 3, 5);
    let author = harness.clients[0];
    harness.enqueue_data(&author, b"hello".to_vec());

    harness.start();
    harness.run_until_phase(3);
    harness.assert_nobody_stopped();

    let author_slot = harness.rounds[&author].my_slot().unwrap();
    for (id, _) in &harness.rounds {
        let deliveries = harness.sink(id);
        assert_eq!(
            deliveries,
            vec![(author_slot, b"hello".to_vec())],
            "sink of {id:?}"
        );
    }
}

#[test]
fn idle_slots_close_and_the_rotation_keeps_one_open() {
    let mut harness = Harness::new(Parameters::xor_testing(Vec::new()), 3, 5);
    let author = harness.clients[0];
    harness.enqueue_data(&author, b"hello".to_vec());

    harness.start();
    harness.run_until_phase(12);
    harness.assert_nobody_stopped();

    // Exactly one delivery ever, despite the many phases.
    for (id, _) in &harness.rounds {
        assert_eq!(harness.sink(id).len(), 1, "sink of {id:?}");
    }

    // Every idle author advertised a close; the rotation now walks the
    // closed slots, forcing exactly one open per phase. Participants whose
    // clocks agree must agree on the whole slot state.
    let mut by_phase: BTreeMap<u64, (Vec<bool>, usize)> = BTreeMap::new();
    for (id, round) in &harness.rounds {
        let open = round.open_slots().unwrap();
        let always = round.always_open_slot().unwrap();

        assert_eq!(
            open.iter().filter(|open| **open).count(),
            1,
            "open count of {id:?}"
        );
        assert!(open[always], "rotation invariant of {id:?}");

        match by_phase.entry(round.phase()) {
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert((open, always));
            }
            std::collections::btree_map::Entry::Occupied(entry) => {
                assert_eq!(entry.get(), &(open, always), "slot state of {id:?}");
            }
        }
    }
}

#[test]
fn slot_lengths_grow_and_shrink_with_the_traffic() {
    let mut harness = Harness::new(Parameters::xor_testing(Vec::new()), 2, 3);
    let author = harness.clients[0];
    let big: Vec<u8> = (0..800u32).map(|i| i as u8).collect();
    let small = vec![0x77u8; 200];
    harness.enqueue_data(&author, big.clone());
    harness.enqueue_data(&author, small.clone());

    harness.start();

    // The 800-byte message was fetched during phase 0, so phase 1 runs at
    // the advertised element count that accommodates it: ⌈804/30⌉ = 27.
    let observer = harness.servers[0];
    harness.run_until_round_phase(&observer, 1);
    let author_slot = harness.rounds[&author].my_slot().unwrap();
    assert_eq!(harness.rounds[&observer].slot_elements(author_slot), Some(27));

    // The 200-byte follow-up shrinks the slot to ⌈204/30⌉ = 7.
    harness.run_until_round_phase(&observer, 2);
    assert_eq!(harness.rounds[&observer].slot_elements(author_slot), Some(7));

    // With the queue drained the slot falls back to the one-element floor.
    harness.run_until_round_phase(&observer, 3);
    assert_eq!(harness.rounds[&observer].slot_elements(author_slot), Some(1));
    harness.run_until_phase(3);
    harness.assert_nobody_stopped();

    // Both payloads arrived intact, in order.
    let deliveries = harness.sink(&observer);
    let payloads: Vec<&[u8]> = deliveries
        .iter()
        .filter(|(slot, _)| *slot == author_slot)
        .map(|(_, payload)| payload.as_slice())
        .collect();
    assert_eq!(payloads, vec![big.as_slice(), small.as_slice()]);
}

#[test]
fn an_invalid_client_ciphertext_proof_stops_the_round_with_blame() {
    let mut harness = Harness::new(Parameters::integer_elgamal_testing(), 2, 2);
    let malicious = harness.clients[0];
    let malicious_key = harness.signing_keys[&malicious].clone();

    harness.tamper = Some(Box::new(move |from, _to, payload| {
        if *from != malicious {
            return None;
        }
        let envelope = message::open(payload, &malicious_key.verifying_key()).ok()?;
        if envelope.message_type != MessageType::ClientCiphertext {
            return None;
        }

        // Corrupt the tail of the ciphertext list: the last bytes are the
        // proof responses, so the disjunction fails verification while the
        // wire format stays parseable.
        Some(reseal(payload, &malicious_key, |envelope| {
            let last = envelope.body.len() - 1;
            envelope.body[last] ^= 0x01;
        }))
    }));

    harness.start();
    harness.run_to_idle();

    let upstream = harness.core.lock().unwrap().upstream[&malicious];
    let stopped = harness.rounds[&upstream]
        .stopped()
        .expect("the receiving server must stop")
        .clone();
    assert!(
        stopped.reason.contains("proof failed verification"),
        "unexpected reason: {}",
        stopped.reason
    );
    assert_eq!(stopped.bad_members, vec![malicious]);
    assert!(!stopped.interrupted);
}

#[test]
fn an_invalid_server_ciphertext_stops_every_other_server() {
    let mut harness = Harness::new(Parameters::integer_elgamal_testing(), 2, 2);
    let dishonest = harness.servers[0];
    let dishonest_key = harness.signing_keys[&dishonest].clone();

    harness.tamper = Some(Box::new(move |from, _to, payload| {
        if *from != dishonest {
            return None;
        }
        let envelope = message::open(payload, &dishonest_key.verifying_key()).ok()?;
        if envelope.message_type != MessageType::ServerCiphertext {
            return None;
        }

        Some(reseal(payload, &dishonest_key, |envelope| {
            let last = envelope.body.len() - 1;
            envelope.body[last] ^= 0x01;
        }))
    }));

    harness.start();
    harness.run_to_idle();

    let honest = harness.servers[1];
    let stopped = harness.rounds[&honest]
        .stopped()
        .expect("the honest server must stop")
        .clone();
    assert!(
        stopped.reason.contains("invalid server ciphertext"),
        "unexpected reason: {}",
        stopped.reason
    );
    assert_eq!(stopped.bad_members, vec![dishonest]);
}

#[test]
fn a_disconnected_client_is_dropped_and_the_round_continues() {
    let mut harness = Harness::new(Parameters::xor_testing(Vec::new()), 2, 3);
    harness.start();
    harness.run_until_phase(2);

    let victim = harness.clients[2];
    let victim_slot = harness.rounds[&victim].my_slot().unwrap();
    harness.disconnect(&victim);

    let speaker = harness.clients[0];
    harness.enqueue_data(&speaker, b"after the drop".to_vec());
    harness.run_until_phase(6);
    harness.assert_nobody_stopped();

    // Traffic still flows for the survivors...
    let observer = harness.servers[0];
    assert!(harness
        .sink(&observer)
        .iter()
        .any(|(_, payload)| payload == b"after the drop"));

    // ...while the dropped member's slot goes quiet (its pre-disconnect
    // phases may have delivered empty idle payloads only).
    for (_, payload) in harness
        .sink(&observer)
        .iter()
        .filter(|(slot, _)| *slot == victim_slot)
    {
        assert!(payload.is_empty());
    }
}

#[test]
fn mismatched_master_commits_abort_naming_the_pair() {
    let mut harness = Harness::new(Parameters::integer_hashing_testing(), 2, 2);
    let malicious = harness.clients[0];
    let malicious_key = harness.signing_keys[&malicious].clone();

    harness.tamper = Some(Box::new(move |from, _to, payload| {
        if *from != malicious {
            return None;
        }
        let envelope = message::open(payload, &malicious_key.verifying_key()).ok()?;
        if envelope.message_type != MessageType::ClientMasterPublicKey {
            return None;
        }

        // Swap two commit cells: both stay valid group elements and the
        // row product is unchanged, so only the per-cell cross-check can
        // catch it.
        Some(reseal(payload, &malicious_key, |envelope| {
            let signed: SignedClientPacket = bincode::deserialize(&envelope.body).unwrap();
            let mut packet: ClientMasterPacket = bincode::deserialize(&signed.packet).unwrap();
            packet.commits.swap(0, 1);

            let bytes = bincode::serialize(&packet).unwrap();
            let resigned = SignedClientPacket::sign(bytes, &malicious_key);
            envelope.body = bincode::serialize(&resigned).unwrap();
        }))
    }));

    harness.start();
    harness.run_to_idle();

    for (id, round) in &harness.rounds {
        if *id == malicious {
            continue;
        }
        let stopped = round
            .stopped()
            .unwrap_or_else(|| panic!("round {id:?} should have stopped"));
        assert!(
            stopped.reason.contains("commit matrix mismatch"),
            "unexpected reason on {id:?}: {}",
            stopped.reason
        );
        assert!(stopped.bad_members.contains(&malicious));
    }
}

#[test]
fn an_altered_cleartext_fails_the_signature_binding() {
    let mut harness = Harness::new(Parameters::xor_testing(Vec::new()), 2, 2);
    let forger = harness.servers[0];
    let forger_key = harness.signing_keys[&forger].clone();
    let target = harness.clients[0];

    harness.tamper = Some(Box::new(move |from, to, payload| {
        if *from != forger || *to != target {
            return None;
        }
        let envelope = message::open(payload, &forger_key.verifying_key()).ok()?;
        if envelope.message_type != MessageType::ServerCleartext {
            return None;
        }

        // The transport signature can be re-created, but the embedded
        // per-server cleartext signatures cannot.
        Some(reseal(payload, &forger_key, |envelope| {
            let mut body: message::ServerCleartextBody =
                bincode::deserialize(&envelope.body).unwrap();
            let last = body.cleartext.len() - 1;
            body.cleartext[last] ^= 0x01;
            envelope.body = bincode::serialize(&body).unwrap();
        }))
    }));

    harness.start();
    harness.run_to_idle();

    let stopped = harness.rounds[&target]
        .stopped()
        .expect("the client must reject the altered cleartext")
        .clone();
    assert!(
        stopped.reason.contains("cleartext signature"),
        "unexpected reason: {}",
        stopped.reason
    );
}
