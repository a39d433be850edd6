// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! The bulk-round orchestrator. One [`BulkRound`] instance drives a single
//! round for one participant: the key-exchange sub-phase, the optional
//! master-key sub-phase under the hashing-generator variant, and the
//! repeating ciphertext-exchange cycle. The instance is the only mutator of
//! its per-round state; the session layer feeds it whole messages, shuffle
//! results, timer expiries and disconnects through the public methods.

use std::collections::{BTreeMap, BTreeSet};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use tracing::{debug, info, warn};

use blogdrop::master::{self, MasterCell};
use blogdrop::{
    Author, BinServer, CoverClient, Parameters, PrivateKey, PublicKey, PublicKeySet, SlotKeys,
};
use group::CsRng;

use crate::identity::{Directory, PeerId};
use crate::message::{
    self, CiphertextList, ClientKeyPacket, ClientMasterPacket, Envelope, MessageType, RoundId,
    ServerCleartextBody, ServerClientListBody, ServerMasterKeyBody, ServerPublicKeyBody,
    SignedClientPacket,
};
use crate::session::{Network, RoundSession, ShuffleRound};
use crate::slots::{self, SlotLifecycle};
use crate::state::{Flow, State, StateMachine};
use crate::{Error, Result};

/// The local peer's credentials.
pub struct LocalIdentity {
    pub id: PeerId,
    pub signing_key: SigningKey,
}

/// Outcome of the external shuffle collaborator.
#[derive(Clone, Debug)]
pub struct ShuffleFailure {
    pub reason: String,
    pub bad_members: Vec<PeerId>,
    pub interrupted: bool,
}

/// Why and how the round ended.
#[derive(Clone, Debug)]
pub struct StopInfo {
    pub reason: String,
    pub interrupted: bool,
    pub bad_members: Vec<PeerId>,
}

/// Handler outcome: drop the offending message and continue, or stop the
/// round, possibly attributing blame.
enum Fault {
    Drop(String),
    Stop {
        reason: String,
        bad_members: Vec<PeerId>,
    },
}

type HandlerResult = std::result::Result<Flow, Fault>;

impl Fault {
    fn stop(reason: impl Into<String>) -> Self {
        Fault::Stop {
            reason: reason.into(),
            bad_members: Vec::new(),
        }
    }

    fn blame(reason: impl Into<String>, member: PeerId) -> Self {
        Fault::Stop {
            reason: reason.into(),
            bad_members: vec![member],
        }
    }
}

/// Per-round state every participant holds.
struct RoundState {
    params: Parameters,
    anonymous_private: PrivateKey,
    anonymous_public: PublicKey,
    client_private: PrivateKey,
    client_public: PublicKey,
    shuffle_input: Vec<u8>,
    shuffle_output: Option<Vec<Vec<u8>>>,
    slot_public_keys: Vec<PublicKey>,
    my_slot: Option<usize>,
    my_server: PeerId,
    server_public_keys: BTreeMap<usize, PublicKey>,
    client_public_keys: BTreeMap<PeerId, PublicKey>,
    // Hashing-generator variant only.
    own_master_cells: Vec<MasterCell>,
    master_private: Option<PrivateKey>,
    master_public: Option<PublicKey>,
    client_master_rows: BTreeMap<PeerId, Vec<Vec<u8>>>,
    server_master_columns: BTreeMap<usize, Vec<Vec<u8>>>,
    server_master_public_keys: BTreeMap<usize, PublicKey>,
    client_master_public_keys: BTreeMap<PeerId, PublicKey>,
    // Bulk cycle.
    cover_clients: Vec<Option<CoverClient>>,
    author: Option<Author>,
    lifecycle: Option<SlotLifecycle>,
    cleartext: Vec<u8>,
    pending_message: Vec<u8>,
    phases_since_transmission: u64,
}

/// Additional state held by servers.
struct ServerState {
    server_private: PrivateKey,
    server_public: PublicKey,
    master_pair: Option<(PrivateKey, PublicKey)>,
    column_cells: Vec<MasterCell>,
    allowed_clients: BTreeSet<PeerId>,
    client_key_packets: BTreeMap<PeerId, SignedClientPacket>,
    client_master_packets: BTreeMap<PeerId, SignedClientPacket>,
    bins: Vec<BinServer>,
    client_ciphertexts: BTreeMap<PeerId, Vec<u8>>,
    handled_servers: BTreeSet<PeerId>,
    server_ciphertexts: BTreeMap<usize, Vec<u8>>,
    validation_signatures: BTreeMap<u32, Vec<u8>>,
}

pub struct BulkRound {
    directory: Directory,
    local: LocalIdentity,
    round_id: RoundId,
    machine: StateMachine,
    network: Box<dyn Network>,
    session: Box<dyn RoundSession>,
    shuffle: Box<dyn ShuffleRound>,
    rng: Box<dyn CsRng>,
    state: RoundState,
    server_state: Option<ServerState>,
    stop_info: Option<StopInfo>,
}

impl BulkRound {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut params: Parameters,
        directory: Directory,
        local: LocalIdentity,
        round_id: RoundId,
        network: Box<dyn Network>,
        session: Box<dyn RoundSession>,
        shuffle: Box<dyn ShuffleRound>,
        mut rng: Box<dyn CsRng>,
    ) -> Result<Self> {
        params.set_round_nonce(round_id.as_bytes().to_vec());

        if !directory.contains(&local.id) {
            return Err(Error::InvalidConfiguration(
                "local peer is not a group member".into(),
            ));
        }
        let is_server = directory.is_server(&local.id);

        let client_key_group = params.client_key_group();
        let anonymous_private = PrivateKey::generate(client_key_group, &mut rng);
        let anonymous_public = PublicKey::from_private(client_key_group, &anonymous_private);
        let client_private = PrivateKey::generate(client_key_group, &mut rng);
        let client_public = PublicKey::from_private(client_key_group, &client_private);
        let shuffle_input = anonymous_public.to_bytes(client_key_group);

        let my_server = if is_server {
            local.id
        } else {
            session.upstream_server().ok_or_else(|| {
                Error::InvalidConfiguration("client has no upstream server".into())
            })?
        };

        let server_state = if is_server {
            let key_group = params.key_group();
            let server_private = PrivateKey::generate(key_group, &mut rng);
            let server_public = PublicKey::from_private(key_group, &server_private);

            Some(ServerState {
                server_private,
                server_public,
                master_pair: None,
                column_cells: Vec::new(),
                allowed_clients: BTreeSet::new(),
                client_key_packets: BTreeMap::new(),
                client_master_packets: BTreeMap::new(),
                bins: Vec::new(),
                client_ciphertexts: BTreeMap::new(),
                handled_servers: BTreeSet::new(),
                server_ciphertexts: BTreeMap::new(),
                validation_signatures: BTreeMap::new(),
            })
        } else {
            None
        };

        let machine = if is_server {
            Self::server_machine(&params)
        } else {
            Self::client_machine(&params)
        };

        let state = RoundState {
            params,
            anonymous_private,
            anonymous_public,
            client_private,
            client_public,
            shuffle_input,
            shuffle_output: None,
            slot_public_keys: Vec::new(),
            my_slot: None,
            my_server,
            server_public_keys: BTreeMap::new(),
            client_public_keys: BTreeMap::new(),
            own_master_cells: Vec::new(),
            master_private: None,
            master_public: None,
            client_master_rows: BTreeMap::new(),
            server_master_columns: BTreeMap::new(),
            server_master_public_keys: BTreeMap::new(),
            client_master_public_keys: BTreeMap::new(),
            cover_clients: Vec::new(),
            author: None,
            lifecycle: None,
            cleartext: Vec::new(),
            pending_message: Vec::new(),
            phases_since_transmission: 0,
        };

        Ok(Self {
            directory,
            local,
            round_id,
            machine,
            network,
            session,
            shuffle,
            rng,
            state,
            server_state,
            stop_info: None,
        })
    }

    fn server_machine(params: &Parameters) -> StateMachine {
        let mut machine = StateMachine::new();
        machine.add_state(State::Offline, None, Some(State::Shuffling));
        machine.add_state(State::Shuffling, None, Some(State::ProcessDataShuffle));
        machine.add_state(
            State::ProcessDataShuffle,
            None,
            Some(State::ServerWaitForClientPublicKeys),
        );
        machine.add_state(
            State::ServerWaitForClientPublicKeys,
            Some(MessageType::ClientPublicKey),
            Some(State::WaitForServerPublicKeys),
        );
        if params.uses_master_keys() {
            machine.add_state(
                State::WaitForServerPublicKeys,
                Some(MessageType::ServerPublicKey),
                Some(State::ServerWaitForClientMasterPublicKeys),
            );
            machine.add_state(
                State::ServerWaitForClientMasterPublicKeys,
                Some(MessageType::ClientMasterPublicKey),
                Some(State::WaitForServerMasterPublicKeys),
            );
            machine.add_state(
                State::WaitForServerMasterPublicKeys,
                Some(MessageType::ServerMasterPublicKey),
                Some(State::PrepareForBulk),
            );
        } else {
            machine.add_state(
                State::WaitForServerPublicKeys,
                Some(MessageType::ServerPublicKey),
                Some(State::PrepareForBulk),
            );
        }
        machine.add_state(
            State::PrepareForBulk,
            None,
            Some(State::ServerWaitForClientCiphertext),
        );
        machine.add_state(
            State::ServerWaitForClientCiphertext,
            Some(MessageType::ClientCiphertext),
            Some(State::ServerWaitForClientLists),
        );
        machine.add_state(
            State::ServerWaitForClientLists,
            Some(MessageType::ServerClientList),
            Some(State::ServerWaitForServerCiphertext),
        );
        machine.add_state(
            State::ServerWaitForServerCiphertext,
            Some(MessageType::ServerCiphertext),
            Some(State::ServerWaitForServerValidation),
        );
        machine.add_state(
            State::ServerWaitForServerValidation,
            Some(MessageType::ServerValidation),
            Some(State::ServerPushCleartext),
        );
        machine.add_state(
            State::ServerPushCleartext,
            None,
            Some(State::ServerWaitForClientCiphertext),
        );
        machine.add_state(State::Finished, None, None);
        machine.set_cycle_state(State::ServerWaitForClientCiphertext);

        machine
    }

    fn client_machine(params: &Parameters) -> StateMachine {
        let mut machine = StateMachine::new();
        machine.add_state(State::Offline, None, Some(State::Shuffling));
        machine.add_state(State::Shuffling, None, Some(State::ProcessDataShuffle));
        machine.add_state(
            State::ProcessDataShuffle,
            None,
            Some(State::WaitForServerPublicKeys),
        );
        if params.uses_master_keys() {
            machine.add_state(
                State::WaitForServerPublicKeys,
                Some(MessageType::ServerPublicKey),
                Some(State::WaitForServerMasterPublicKeys),
            );
            machine.add_state(
                State::WaitForServerMasterPublicKeys,
                Some(MessageType::ServerMasterPublicKey),
                Some(State::PrepareForBulk),
            );
        } else {
            machine.add_state(
                State::WaitForServerPublicKeys,
                Some(MessageType::ServerPublicKey),
                Some(State::PrepareForBulk),
            );
        }
        machine.add_state(
            State::PrepareForBulk,
            None,
            Some(State::ClientWaitForCleartext),
        );
        machine.add_state(
            State::ClientWaitForCleartext,
            Some(MessageType::ServerCleartext),
            Some(State::ClientWaitForCleartext),
        );
        machine.add_state(State::Finished, None, None);
        machine.set_cycle_state(State::ClientWaitForCleartext);

        machine
    }

    pub fn is_server(&self) -> bool {
        self.server_state.is_some()
    }

    pub fn state(&self) -> State {
        self.machine.current()
    }

    pub fn phase(&self) -> u64 {
        self.machine.phase()
    }

    pub fn stopped(&self) -> Option<&StopInfo> {
        self.stop_info.as_ref()
    }

    /// The anonymity slot owned by this participant, known once the shuffle
    /// has been processed.
    pub fn my_slot(&self) -> Option<usize> {
        self.state.my_slot
    }

    /// Current open/closed flags, one per slot, once the bulk cycle runs.
    pub fn open_slots(&self) -> Option<Vec<bool>> {
        self.state.lifecycle.as_ref().map(|lifecycle| {
            (0..self.directory.count())
                .map(|slot| lifecycle.is_open(slot))
                .collect()
        })
    }

    /// The per-slot element count for the current phase.
    pub fn slot_elements(&self, slot: usize) -> Option<usize> {
        self.state
            .lifecycle
            .as_ref()
            .map(|lifecycle| lifecycle.elements_for_slot(slot))
    }

    /// The slot currently forced open by the rotation.
    pub fn always_open_slot(&self) -> Option<usize> {
        self.state
            .lifecycle
            .as_ref()
            .map(|lifecycle| lifecycle.always_open())
    }

    /// Start the round: enter the shuffle.
    pub fn start(&mut self) -> Result<()> {
        info!(round = ?self.round_id, server = self.is_server(), "starting bulk round");

        self.advance_and_enter();
        Ok(())
    }

    /// Feed one inbound, already-reassembled payload into the round.
    pub fn process_message(&mut self, from: PeerId, payload: &[u8]) {
        if self.stop_info.is_some() {
            return;
        }

        let Some(verifying_key) = self.directory.verifying_key(&from) else {
            warn!(?from, "message from a peer outside the group; dropping");
            return;
        };

        let envelope = match message::open(payload, verifying_key) {
            Ok(envelope) => envelope,
            Err(_) => {
                self.apply_fault(Fault::blame("message signature verification failed", from));
                return;
            }
        };

        if envelope.round_id != self.round_id {
            warn!(?from, "message for a different round; dropping");
            return;
        }
        if self.machine.is_stale(&envelope) {
            debug!(?from, phase = envelope.phase, "stale message; dropping");
            return;
        }
        if !self.machine.matches_current(&envelope) {
            debug!(
                ?from,
                state = ?self.machine.current(),
                message = ?envelope.message_type,
                "message queued for a later state"
            );
            self.machine.queue(from, envelope);
            return;
        }

        match self.dispatch(from, envelope) {
            Err(fault) => self.apply_fault(fault),
            Ok(Flow::Complete) => self.advance_and_enter(),
            Ok(Flow::Pending) => {}
        }
    }

    /// The shuffle collaborator finished.
    pub fn shuffle_complete(
        &mut self,
        result: std::result::Result<Vec<Vec<u8>>, ShuffleFailure>,
    ) {
        if self.stop_info.is_some() || self.machine.current() != State::Shuffling {
            warn!("shuffle result outside the shuffling state; ignoring");
            return;
        }

        match result {
            Err(failure) => {
                self.stop_with(&failure.reason, failure.interrupted, failure.bad_members);
            }
            Ok(keys) => {
                self.state.shuffle_output = Some(keys);
                self.advance_and_enter();
            }
        }
    }

    /// The client-submission window elapsed: proceed with whatever arrived.
    pub fn client_window_expired(&mut self, phase: u64) {
        if self.stop_info.is_some()
            || self.machine.current() != State::ServerWaitForClientCiphertext
            || self.machine.phase() != phase
        {
            return;
        }

        let server = self.server_state.as_mut().expect("server-only state");
        let missing: Vec<PeerId> = server
            .allowed_clients
            .iter()
            .filter(|id| !server.client_ciphertexts.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            warn!(?missing, phase, "client window closed; dropping late clients");
            for id in &missing {
                server.allowed_clients.remove(id);
            }
        }

        self.advance_and_enter();
    }

    /// A transport-level disconnect. Server disconnects are fatal; client
    /// disconnects only shrink the allowed set.
    pub fn handle_disconnect(&mut self, id: &PeerId) {
        if self.stop_info.is_some() || !self.directory.contains(id) {
            return;
        }

        if self.directory.is_server(id) {
            self.stop_with(&format!("server {id:?} disconnected"), true, Vec::new());
            return;
        }

        if let Some(server) = self.server_state.as_mut() {
            server.allowed_clients.remove(id);
            if self.machine.current() == State::ServerWaitForClientCiphertext
                && self.client_ciphertexts_complete()
            {
                self.advance_and_enter();
            }
        }
    }

    /// Externally stop the round.
    pub fn stop(&mut self, reason: &str) {
        self.stop_with(reason, false, Vec::new());
    }

    fn stop_with(&mut self, reason: &str, interrupted: bool, bad_members: Vec<PeerId>) {
        if self.stop_info.is_some() {
            return;
        }

        info!(reason, interrupted, ?bad_members, "bulk round stopped");
        self.machine.set_state(State::Finished);
        self.stop_info = Some(StopInfo {
            reason: reason.to_string(),
            interrupted,
            bad_members: bad_members.clone(),
        });
        self.session.round_stopped(reason, interrupted, &bad_members);
    }

    fn apply_fault(&mut self, fault: Fault) {
        match fault {
            Fault::Drop(reason) => warn!(%reason, "dropping message"),
            Fault::Stop {
                reason,
                bad_members,
            } => self.stop_with(&reason, false, bad_members),
        }
    }

    /// Advance out of the current state and run entry callbacks until the
    /// round blocks on inbound messages (or stops).
    fn advance_and_enter(&mut self) {
        loop {
            if self.stop_info.is_some() {
                return;
            }

            let cycled = self.machine.advance();
            self.before_transition();
            if cycled {
                if let Err(fault) = self.cycle_complete() {
                    self.apply_fault(fault);
                    return;
                }
            }

            debug!(state = ?self.machine.current(), phase = self.machine.phase(), "entering state");

            match self.enter_state() {
                Err(fault) => {
                    self.apply_fault(fault);
                    return;
                }
                Ok(Flow::Complete) => continue,
                Ok(Flow::Pending) => match self.replay_queued() {
                    Err(fault) => {
                        self.apply_fault(fault);
                        return;
                    }
                    Ok(Flow::Complete) => continue,
                    Ok(Flow::Pending) => return,
                },
            }
        }
    }

    /// Re-dispatch messages queued for the state just entered.
    fn replay_queued(&mut self) -> HandlerResult {
        for (from, envelope) in self.machine.drain_current() {
            match self.dispatch(from, envelope) {
                Err(Fault::Drop(reason)) => warn!(%reason, "dropping queued message"),
                Err(fault) => return Err(fault),
                Ok(Flow::Complete) => return Ok(Flow::Complete),
                Ok(Flow::Pending) => {}
            }
        }

        Ok(Flow::Pending)
    }

    /// Transient per-step bookkeeping dies at every transition.
    fn before_transition(&mut self) {
        if let Some(server) = self.server_state.as_mut() {
            server.handled_servers.clear();
        }
    }

    /// Phase conclusion: clear the per-phase dictionaries and advance every
    /// slot engine into the next phase at its new element count.
    fn cycle_complete(&mut self) -> std::result::Result<(), Fault> {
        let lifecycle = self
            .state
            .lifecycle
            .as_ref()
            .ok_or_else(|| Fault::stop("cycle completed before bulk setup"))?;
        let slot_elements: Vec<usize> = (0..self.directory.count())
            .map(|slot| lifecycle.elements_for_slot(slot))
            .collect();

        for (slot, cover) in self.state.cover_clients.iter_mut().enumerate() {
            if let Some(cover) = cover {
                cover.next_phase();
                cover.set_n_elements(slot_elements[slot]);
            }
        }
        if let Some(author) = self.state.author.as_mut() {
            let slot = self.state.my_slot.expect("author implies a slot");
            author.next_phase();
            author.set_n_elements(slot_elements[slot]);
        }

        if let Some(server) = self.server_state.as_mut() {
            server.client_ciphertexts.clear();
            server.server_ciphertexts.clear();
            server.validation_signatures.clear();
            for (slot, bin) in server.bins.iter_mut().enumerate() {
                bin.clear_bin();
                bin.next_phase();
                bin.set_n_elements(slot_elements[slot]);
            }
        }

        Ok(())
    }

    fn dispatch(&mut self, from: PeerId, envelope: Envelope) -> HandlerResult {
        debug!(?from, message = ?envelope.message_type, phase = envelope.phase, "handling message");

        match envelope.message_type {
            MessageType::ClientPublicKey => self.handle_client_public_key(from, &envelope.body),
            MessageType::ServerPublicKey => self.handle_server_public_key(from, &envelope.body),
            MessageType::ClientMasterPublicKey => {
                self.handle_client_master_public_key(from, &envelope.body)
            }
            MessageType::ServerMasterPublicKey => {
                self.handle_server_master_public_key(from, &envelope.body)
            }
            MessageType::ClientCiphertext => self.handle_client_ciphertext(from, &envelope.body),
            MessageType::ServerClientList => self.handle_server_client_list(from, &envelope.body),
            MessageType::ServerCiphertext => self.handle_server_ciphertext(from, &envelope.body),
            MessageType::ServerValidation => self.handle_server_validation(from, &envelope.body),
            MessageType::ServerCleartext => self.handle_server_cleartext(from, &envelope.body),
        }
    }

    fn enter_state(&mut self) -> HandlerResult {
        match self.machine.current() {
            State::Shuffling => self.start_shuffle(),
            State::ProcessDataShuffle => self.process_data_shuffle(),
            State::ServerWaitForClientPublicKeys => self.collect_client_public_keys(),
            State::WaitForServerPublicKeys => self.submit_public_keys(),
            State::ServerWaitForClientMasterPublicKeys => self.collect_client_master_keys(),
            State::WaitForServerMasterPublicKeys => self.submit_master_keys(),
            State::PrepareForBulk => self.prepare_for_bulk(),
            State::ClientWaitForCleartext => self.submit_client_ciphertext(),
            State::ServerWaitForClientCiphertext => self.set_online_clients(),
            State::ServerWaitForClientLists => self.submit_client_list(),
            State::ServerWaitForServerCiphertext => self.submit_server_ciphertext(),
            State::ServerWaitForServerValidation => self.submit_validation(),
            State::ServerPushCleartext => self.push_cleartext(),
            State::Offline | State::Finished => Ok(Flow::Pending),
        }
    }

    // ------------------------------------------------------------------
    // Wire helpers
    // ------------------------------------------------------------------

    fn sealed(&self, message_type: MessageType, body: Vec<u8>) -> std::result::Result<Vec<u8>, Fault> {
        let envelope = Envelope {
            message_type,
            round_id: self.round_id,
            phase: self.machine.phase(),
            body,
        };

        message::seal(&envelope, &self.local.signing_key)
            .map_err(|e| Fault::stop(format!("failed to seal outbound message: {e}")))
    }

    /// The transcript context binding proofs to this round.
    fn proof_context(&self) -> Vec<u8> {
        self.state.params.to_bytes()
    }

    fn own_client_key_packet(&mut self) -> std::result::Result<SignedClientPacket, Fault> {
        let group = self.state.params.client_key_group().clone();
        let proof = self.state.client_public.prove_knowledge(
            &group,
            &self.state.client_private,
            &self.proof_context(),
            &mut self.rng,
        );
        let packet = ClientKeyPacket {
            round_id: self.round_id,
            proof,
            public_key: self.state.client_public.to_bytes(&group),
        };
        let bytes = bincode::serialize(&packet)
            .map_err(|e| Fault::stop(format!("failed to serialize key packet: {e}")))?;

        Ok(SignedClientPacket::sign(bytes, &self.local.signing_key))
    }

    /// Derive this participant's commit-matrix row (one cell per server).
    fn ensure_own_cells(&mut self) -> std::result::Result<(), Fault> {
        if !self.state.own_master_cells.is_empty() {
            return Ok(());
        }

        let mut cells = Vec::with_capacity(self.directory.server_count());
        for index in 0..self.directory.server_count() {
            let server_public = self
                .state
                .server_public_keys
                .get(&index)
                .ok_or_else(|| Fault::stop("master cells requested before key exchange"))?;
            cells.push(MasterCell::derive(
                &self.state.params,
                &self.state.client_private,
                server_public,
            ));
        }

        let (master_private, master_public) = master::master_key_pair(&self.state.params, &cells);
        self.state.own_master_cells = cells;
        self.state.master_private = Some(master_private);
        self.state.master_public = Some(master_public);

        Ok(())
    }

    fn own_master_packet(&mut self) -> std::result::Result<SignedClientPacket, Fault> {
        self.ensure_own_cells()?;

        let group = self.state.params.key_group();
        let packet = ClientMasterPacket {
            round_id: self.round_id,
            commits: self
                .state
                .own_master_cells
                .iter()
                .map(|cell| cell.commit_bytes(group))
                .collect(),
        };
        let bytes = bincode::serialize(&packet)
            .map_err(|e| Fault::stop(format!("failed to serialize master packet: {e}")))?;

        Ok(SignedClientPacket::sign(bytes, &self.local.signing_key))
    }

    // ------------------------------------------------------------------
    // State-entry callbacks
    // ------------------------------------------------------------------

    fn start_shuffle(&mut self) -> HandlerResult {
        let input = self.state.shuffle_input.clone();
        self.shuffle
            .start(input)
            .map_err(|e| Fault::stop(format!("shuffle failed to start: {e}")))?;

        Ok(Flow::Pending)
    }

    /// Ingest the ordered slot keys produced by the shuffle and locate our
    /// own slot by byte equality with the key we submitted.
    fn process_data_shuffle(&mut self) -> HandlerResult {
        let keys = self
            .state
            .shuffle_output
            .take()
            .ok_or_else(|| Fault::stop("entered shuffle processing without a shuffle result"))?;

        if keys.len() != self.directory.count() {
            return Err(Fault::stop(format!(
                "shuffle produced {} keys for {} members",
                keys.len(),
                self.directory.count()
            )));
        }

        let group = self.state.params.client_key_group();
        let mut slot_keys = Vec::with_capacity(keys.len());
        for (index, bytes) in keys.iter().enumerate() {
            let key = PublicKey::from_bytes(group, bytes)
                .map_err(|_| Fault::stop(format!("invalid key at shuffle slot {index}")))?;
            if *bytes == self.state.shuffle_input {
                self.state.my_slot = Some(index);
            }
            slot_keys.push(key);
        }

        if self.state.my_slot.is_none() {
            return Err(Fault::stop("own anonymous key missing from the shuffle"));
        }
        self.state.slot_public_keys = slot_keys;

        debug!(slot = self.state.my_slot, "shuffle processed");

        Ok(Flow::Complete)
    }

    fn collect_client_public_keys(&mut self) -> HandlerResult {
        let connected = self.session.connected_clients();
        let own_packet = self.own_client_key_packet()?;

        let server = self.server_state.as_mut().expect("server-only state");
        server.allowed_clients = connected
            .into_iter()
            .filter(|id| {
                self.directory.contains(id) && !self.directory.is_server(id)
            })
            .collect();
        server.client_key_packets.insert(self.local.id, own_packet);

        debug!(
            allowed = server.allowed_clients.len(),
            "collecting client public keys"
        );

        Ok(self.client_key_packets_flow())
    }

    fn client_key_packets_flow(&self) -> Flow {
        let server = self.server_state.as_ref().expect("server-only state");
        if server.client_key_packets.len() == server.allowed_clients.len() + 1 {
            Flow::Complete
        } else {
            Flow::Pending
        }
    }

    fn submit_public_keys(&mut self) -> HandlerResult {
        if let Some(server) = self.server_state.as_mut() {
            let client_packets = std::mem::take(&mut server.client_key_packets);
            let group = self.state.params.key_group().clone();
            let proof = server.server_public.prove_knowledge(
                &group,
                &server.server_private,
                &self.state.params.to_bytes(),
                &mut self.rng,
            );
            let body = ServerPublicKeyBody {
                public_key: server.server_public.to_bytes(&group),
                proof,
                client_packets,
            };
            let bytes = bincode::serialize(&body)
                .map_err(|e| Fault::stop(format!("failed to serialize key body: {e}")))?;

            let payload = self.sealed(MessageType::ServerPublicKey, bytes)?;
            self.network.broadcast(payload);

            // Account for our own broadcast directly; the network does not
            // loop it back.
            self.process_server_public_key_body(self.local.id, body)?;

            Ok(self.server_public_keys_flow())
        } else {
            let packet = self.own_client_key_packet()?;
            let bytes = bincode::serialize(&packet)
                .map_err(|e| Fault::stop(format!("failed to serialize key packet: {e}")))?;
            let payload = self.sealed(MessageType::ClientPublicKey, bytes)?;
            let to = self.state.my_server;
            self.network.send(&to, payload);

            Ok(Flow::Pending)
        }
    }

    fn server_public_keys_flow(&self) -> Flow {
        if self.state.server_public_keys.len() == self.directory.server_count() {
            Flow::Complete
        } else {
            Flow::Pending
        }
    }

    fn collect_client_master_keys(&mut self) -> HandlerResult {
        let own_packet = self.own_master_packet()?;
        let server = self.server_state.as_mut().expect("server-only state");
        server
            .client_master_packets
            .insert(self.local.id, own_packet);

        Ok(self.client_master_packets_flow())
    }

    fn client_master_packets_flow(&self) -> Flow {
        let server = self.server_state.as_ref().expect("server-only state");
        if server.client_master_packets.len() == server.allowed_clients.len() + 1 {
            Flow::Complete
        } else {
            Flow::Pending
        }
    }

    fn submit_master_keys(&mut self) -> HandlerResult {
        if self.server_state.is_some() {
            self.ensure_own_cells()?;

            // Derive this server's commit-matrix column (one cell per
            // member) and its master key pair.
            let params = self.state.params.clone();
            let mut column = Vec::with_capacity(self.directory.count());
            for info in self.directory.members() {
                let client_public =
                    self.state.client_public_keys.get(&info.id).ok_or_else(|| {
                        Fault::stop("missing client key during master derivation")
                    })?;
                let server = self.server_state.as_ref().expect("server-only state");
                column.push(MasterCell::derive(
                    &params,
                    &server.server_private,
                    client_public,
                ));
            }
            let master_pair = master::master_key_pair(&params, &column);

            let group = params.key_group();
            let body = {
                let server = self.server_state.as_mut().expect("server-only state");
                server.column_cells = column;
                server.master_pair = Some(master_pair.clone());

                ServerMasterKeyBody {
                    master_public_key: master_pair.1.to_bytes(group),
                    commits: server
                        .column_cells
                        .iter()
                        .map(|cell| cell.commit_bytes(group))
                        .collect(),
                    client_packets: std::mem::take(&mut server.client_master_packets),
                }
            };
            let bytes = bincode::serialize(&body)
                .map_err(|e| Fault::stop(format!("failed to serialize master body: {e}")))?;

            let payload = self.sealed(MessageType::ServerMasterPublicKey, bytes)?;
            self.network.broadcast(payload);
            self.process_server_master_body(self.local.id, body)?;

            self.server_master_flow()
        } else {
            let packet = self.own_master_packet()?;
            let bytes = bincode::serialize(&packet)
                .map_err(|e| Fault::stop(format!("failed to serialize master packet: {e}")))?;
            let payload = self.sealed(MessageType::ClientMasterPublicKey, bytes)?;
            let to = self.state.my_server;
            self.network.send(&to, payload);

            Ok(Flow::Pending)
        }
    }

    fn server_master_flow(&mut self) -> HandlerResult {
        if self.state.server_master_columns.len() != self.directory.server_count() {
            return Ok(Flow::Pending);
        }

        self.cross_check_master_commits()?;

        Ok(Flow::Complete)
    }

    /// Both sides of every commit-matrix cell must agree, or the round
    /// aborts naming the pair.
    fn cross_check_master_commits(&mut self) -> std::result::Result<(), Fault> {
        let params = &self.state.params;

        for (client_id, row) in &self.state.client_master_rows {
            let client_index = self
                .directory
                .index_of(client_id)
                .ok_or_else(|| Fault::stop("commit row from a non-member"))?;

            for (server_index, cell) in row.iter().enumerate() {
                let column = self
                    .state
                    .server_master_columns
                    .get(&server_index)
                    .ok_or_else(|| Fault::stop("missing commit column"))?;
                if column.get(client_index) != Some(cell) {
                    return Err(Fault::Stop {
                        reason: format!(
                            "commit matrix mismatch between client {client_index} and server {server_index}"
                        ),
                        bad_members: vec![
                            *client_id,
                            *self
                                .directory
                                .server_at(server_index)
                                .expect("validated server index"),
                        ],
                    });
                }
            }

            // The client's master public key is the product of its row.
            let commits = master::commits_from_bytes(params, row)
                .map_err(|_| Fault::blame("invalid commit cell", *client_id))?;
            self.state
                .client_master_public_keys
                .insert(*client_id, master::master_public_key(params, &commits));
        }

        // Every member must have published a commit row.
        for info in self.directory.members() {
            if !self.state.client_master_rows.contains_key(&info.id) {
                return Err(Fault::stop(format!(
                    "no commit row from member {:?}",
                    info.id
                )));
            }
        }

        Ok(())
    }

    /// Instantiate the per-slot engines: one cover client per foreign slot,
    /// the author on our own slot, and (on servers) one bin per slot.
    fn prepare_for_bulk(&mut self) -> HandlerResult {
        let n_slots = self.directory.count();
        let my_slot = self
            .state
            .my_slot
            .ok_or_else(|| Fault::stop("bulk setup without a slot assignment"))?;

        let mut covers = Vec::with_capacity(n_slots);
        for slot in 0..n_slots {
            if slot == my_slot {
                covers.push(None);
                continue;
            }
            let keys = self.slot_keys(slot, false)?;
            covers.push(Some(CoverClient::new(&self.state.params, slot, keys)));
        }
        self.state.cover_clients = covers;
        self.state.author = Some(Author::new(
            &self.state.params,
            my_slot,
            self.slot_keys(my_slot, false)?,
        ));

        if self.server_state.is_some() {
            let mut bins = Vec::with_capacity(n_slots);
            for slot in 0..n_slots {
                let keys = self.slot_keys(slot, true)?;
                bins.push(BinServer::new(&self.state.params, slot, keys));
            }
            self.server_state
                .as_mut()
                .expect("server-only state")
                .bins = bins;
        }

        self.state.lifecycle = Some(SlotLifecycle::new(
            n_slots,
            self.state.params.n_elements(),
        ));

        info!(slots = n_slots, "bulk setup complete");

        Ok(Flow::Complete)
    }

    /// Assemble the engine key material for one slot, selecting ephemeral
    /// or master keys by proof variant.
    fn slot_keys(&self, slot: usize, server_role: bool) -> std::result::Result<SlotKeys, Fault> {
        let params = &self.state.params;
        let uses_master = params.uses_master_keys();

        let (client_private, client_public) = if uses_master {
            (
                self.state
                    .master_private
                    .clone()
                    .ok_or_else(|| Fault::stop("master keys missing at bulk setup"))?,
                self.state
                    .master_public
                    .clone()
                    .ok_or_else(|| Fault::stop("master keys missing at bulk setup"))?,
            )
        } else {
            (
                self.state.client_private.clone(),
                self.state.client_public.clone(),
            )
        };

        let server_map = if uses_master {
            &self.state.server_master_public_keys
        } else {
            &self.state.server_public_keys
        };
        let server_list: Vec<PublicKey> = (0..self.directory.server_count())
            .map(|index| {
                server_map
                    .get(&index)
                    .cloned()
                    .ok_or_else(|| Fault::stop("missing server key at bulk setup"))
            })
            .collect::<std::result::Result<_, _>>()?;
        let server_keys = PublicKeySet::new(params.key_group(), server_list.iter());

        let (server_private, server_public) = if server_role {
            let server = self.server_state.as_ref().expect("server-only state");
            if uses_master {
                let (private, public) = server
                    .master_pair
                    .clone()
                    .ok_or_else(|| Fault::stop("server master pair missing at bulk setup"))?;
                (Some(private), Some(public))
            } else {
                (
                    Some(server.server_private.clone()),
                    Some(server.server_public.clone()),
                )
            }
        } else {
            (None, None)
        };

        Ok(SlotKeys {
            client_private,
            client_public,
            slot_public: self.state.slot_public_keys[slot].clone(),
            author_private: (Some(slot) == self.state.my_slot)
                .then(|| self.state.anonymous_private.clone()),
            server_private,
            server_public,
            server_keys,
            server_list,
        })
    }

    fn submit_client_ciphertext(&mut self) -> HandlerResult {
        let body = self.generate_client_ciphertext()?;
        let bytes = bincode::serialize(&body)
            .map_err(|e| Fault::stop(format!("failed to serialize ciphertext list: {e}")))?;
        let payload = self.sealed(MessageType::ClientCiphertext, bytes)?;
        let to = self.state.my_server;
        self.network.send(&to, payload);

        debug!(phase = self.machine.phase(), "client ciphertext submitted");

        Ok(Flow::Pending)
    }

    fn set_online_clients(&mut self) -> HandlerResult {
        let connected = self.session.connected_clients();
        let server = self.server_state.as_mut().expect("server-only state");
        server.allowed_clients = connected
            .into_iter()
            .filter(|id| self.directory.contains(id) && !self.directory.is_server(id))
            .collect();

        debug!(
            allowed = server.allowed_clients.len(),
            phase = self.machine.phase(),
            "collecting client ciphertexts"
        );

        if server.allowed_clients.is_empty() {
            return Ok(Flow::Complete);
        }

        let phase = self.machine.phase();
        self.session.schedule_client_window(phase);

        Ok(Flow::Pending)
    }

    fn submit_client_list(&mut self) -> HandlerResult {
        let own = self.generate_client_ciphertext()?;
        let own_bytes = bincode::serialize(&own)
            .map_err(|e| Fault::stop(format!("failed to serialize ciphertext list: {e}")))?;

        let server = self.server_state.as_mut().expect("server-only state");
        server.client_ciphertexts.insert(self.local.id, own_bytes);
        server.handled_servers.insert(self.local.id);
        let body = ServerClientListBody {
            ciphertexts: server.client_ciphertexts.clone(),
        };

        let bytes = bincode::serialize(&body)
            .map_err(|e| Fault::stop(format!("failed to serialize client list: {e}")))?;
        let payload = self.sealed(MessageType::ServerClientList, bytes)?;
        self.network.broadcast_to_servers(payload);

        Ok(self.handled_servers_flow())
    }

    fn handled_servers_flow(&self) -> Flow {
        let server = self.server_state.as_ref().expect("server-only state");
        if server.handled_servers.len() == self.directory.server_count() {
            Flow::Complete
        } else {
            Flow::Pending
        }
    }

    /// Ingest every collected client ciphertext into the slot bins, close
    /// the bins and broadcast our server ciphertext.
    fn submit_server_ciphertext(&mut self) -> HandlerResult {
        self.ingest_client_ciphertexts()?;

        let own = self.close_bins()?;
        let bytes = bincode::serialize(&own)
            .map_err(|e| Fault::stop(format!("failed to serialize server ciphertext: {e}")))?;
        let payload = self.sealed(MessageType::ServerCiphertext, bytes.clone())?;
        self.network.broadcast_to_servers(payload);

        let own_index = self
            .directory
            .server_index_of(&self.local.id)
            .expect("local peer is a server");
        let server = self.server_state.as_mut().expect("server-only state");
        server.server_ciphertexts.insert(own_index, bytes);
        server.handled_servers.insert(self.local.id);

        Ok(self.handled_servers_flow())
    }

    fn ingest_client_ciphertexts(&mut self) -> std::result::Result<(), Fault> {
        let n_slots = self.directory.count();
        let ciphertexts = self
            .server_state
            .as_ref()
            .expect("server-only state")
            .client_ciphertexts
            .clone();

        for (client_id, body) in ciphertexts {
            let list: CiphertextList = bincode::deserialize(&body).map_err(|_| {
                Fault::blame("unparseable client ciphertext list", client_id)
            })?;
            if list.len() != n_slots {
                return Err(Fault::blame(
                    "client ciphertext list has the wrong length",
                    client_id,
                ));
            }

            let public_key = self
                .client_key_for(&client_id)
                .ok_or_else(|| Fault::blame("ciphertext from an unkeyed client", client_id))?
                .clone();

            let lifecycle = self
                .state
                .lifecycle
                .as_ref()
                .expect("bulk setup precedes ingestion");
            let open: Vec<bool> = (0..n_slots).map(|slot| lifecycle.is_open(slot)).collect();

            let server = self.server_state.as_mut().expect("server-only state");
            for (slot, ciphertext) in list.iter().enumerate() {
                if !open[slot] {
                    if !ciphertext.is_empty() {
                        return Err(Fault::blame(
                            "ciphertext submitted for a closed slot",
                            client_id,
                        ));
                    }
                    continue;
                }
                server.bins[slot]
                    .add_client_ciphertext(ciphertext, &public_key)
                    .map_err(|e| {
                        Fault::blame(format!("invalid client ciphertext: {e}"), client_id)
                    })?;
            }
        }

        Ok(())
    }

    /// Close every open bin, verifying the accumulated client proofs. The
    /// per-slot work is the round's modular-exponentiation hot spot and
    /// runs on the worker pool when the `parallel` feature is enabled.
    fn close_bins(&mut self) -> std::result::Result<CiphertextList, Fault> {
        let n_slots = self.directory.count();
        let lifecycle = self
            .state
            .lifecycle
            .as_ref()
            .expect("bulk setup precedes closing");
        let open: Vec<bool> = (0..n_slots).map(|slot| lifecycle.is_open(slot)).collect();
        let submitters: Vec<PeerId> = self
            .server_state
            .as_ref()
            .expect("server-only state")
            .client_ciphertexts
            .keys()
            .copied()
            .collect();

        let server = self.server_state.as_mut().expect("server-only state");
        let results: Vec<blogdrop::Result<Vec<u8>>> = {
            #[cfg(feature = "parallel")]
            {
                use rayon::prelude::*;

                server
                    .bins
                    .par_iter_mut()
                    .enumerate()
                    .map(|(slot, bin)| {
                        if open[slot] {
                            bin.close_bin(&mut group::OsRng)
                        } else {
                            Ok(Vec::new())
                        }
                    })
                    .collect()
            }
            #[cfg(not(feature = "parallel"))]
            {
                let rng = &mut self.rng;
                server
                    .bins
                    .iter_mut()
                    .enumerate()
                    .map(|(slot, bin)| {
                        if open[slot] {
                            bin.close_bin(rng.as_mut())
                        } else {
                            Ok(Vec::new())
                        }
                    })
                    .collect()
            }
        };

        let mut out = Vec::with_capacity(n_slots);
        for (slot, result) in results.into_iter().enumerate() {
            match result {
                Ok(ciphertext) => out.push(ciphertext),
                Err(blogdrop::Error::InvalidClientProof { index }) => {
                    let bad = submitters.get(index).copied();
                    return Err(Fault::Stop {
                        reason: format!(
                            "client ciphertext proof failed verification in slot {slot}"
                        ),
                        bad_members: bad.into_iter().collect(),
                    });
                }
                Err(e) => {
                    return Err(Fault::stop(format!("failed to close bin {slot}: {e}")));
                }
            }
        }

        Ok(out)
    }

    /// Verify every server ciphertext, reveal the per-slot plaintexts and
    /// broadcast our signature over the canonical cleartext.
    fn submit_validation(&mut self) -> HandlerResult {
        let n_slots = self.directory.count();
        let lifecycle = self
            .state
            .lifecycle
            .as_ref()
            .expect("bulk setup precedes validation");
        let open: Vec<bool> = (0..n_slots).map(|slot| lifecycle.is_open(slot)).collect();

        let server_ciphertexts = self
            .server_state
            .as_ref()
            .expect("server-only state")
            .server_ciphertexts
            .clone();

        for server_index in 0..self.directory.server_count() {
            let peer = *self
                .directory
                .server_at(server_index)
                .expect("validated server index");
            let body = server_ciphertexts.get(&server_index).ok_or_else(|| {
                Fault::blame("missing server ciphertext", peer)
            })?;
            let list: CiphertextList = bincode::deserialize(body)
                .map_err(|_| Fault::blame("unparseable server ciphertext list", peer))?;
            if list.len() != n_slots {
                return Err(Fault::blame(
                    "server ciphertext list has the wrong length",
                    peer,
                ));
            }

            let public_key = self
                .server_key_for(server_index)
                .ok_or_else(|| Fault::stop("missing server key during validation"))?
                .clone();

            let server = self.server_state.as_mut().expect("server-only state");
            for (slot, ciphertext) in list.iter().enumerate() {
                if !open[slot] {
                    if !ciphertext.is_empty() {
                        return Err(Fault::blame(
                            "server ciphertext for a closed slot",
                            peer,
                        ));
                    }
                    continue;
                }
                server.bins[slot]
                    .add_server_ciphertext(ciphertext, &public_key)
                    .map_err(|e| {
                        Fault::blame(format!("invalid server ciphertext: {e}"), peer)
                    })?;
            }
        }

        // Reveal the plaintexts and assemble the canonical cleartext.
        let server = self.server_state.as_ref().expect("server-only state");
        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(n_slots);
        for slot in 0..n_slots {
            if !open[slot] {
                payloads.push(Vec::new());
                continue;
            }
            let payload = server.bins[slot].reveal_plaintext().map_err(|e| {
                Fault::stop(format!(
                    "failed to reveal slot {slot}: {e}; possibly a dishonest anonymous author"
                ))
            })?;
            payloads.push(payload);
        }

        self.state.cleartext = bincode::serialize(&payloads)
            .map_err(|e| Fault::stop(format!("failed to serialize cleartext: {e}")))?;

        let signature = self
            .local
            .signing_key
            .sign(&self.state.cleartext)
            .to_bytes()
            .to_vec();
        let payload = self.sealed(MessageType::ServerValidation, signature.clone())?;
        self.network.broadcast_to_servers(payload);

        let own_index = self
            .directory
            .server_index_of(&self.local.id)
            .expect("local peer is a server") as u32;
        let server = self.server_state.as_mut().expect("server-only state");
        server.validation_signatures.insert(own_index, signature);
        server.handled_servers.insert(self.local.id);

        Ok(self.handled_servers_flow())
    }

    /// Broadcast the signed cleartext to the clients and apply it locally.
    fn push_cleartext(&mut self) -> HandlerResult {
        let server = self.server_state.as_ref().expect("server-only state");
        let body = ServerCleartextBody {
            signatures: server.validation_signatures.clone(),
            cleartext: self.state.cleartext.clone(),
        };
        let bytes = bincode::serialize(&body)
            .map_err(|e| Fault::stop(format!("failed to serialize cleartext body: {e}")))?;
        let payload = self.sealed(MessageType::ServerCleartext, bytes)?;
        self.network.broadcast_to_clients(payload);

        self.process_cleartext()?;

        info!(phase = self.machine.phase(), "cleartext pushed");

        Ok(Flow::Complete)
    }

    // ------------------------------------------------------------------
    // Message handlers
    // ------------------------------------------------------------------

    fn handle_client_public_key(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        let Some(server) = self.server_state.as_mut() else {
            return Err(Fault::Drop("client public key sent to a client".into()));
        };
        if !server.allowed_clients.contains(&from) {
            return Err(Fault::Drop(format!(
                "{from:?} is not allowed to submit a public key"
            )));
        }
        if server.client_key_packets.contains_key(&from) {
            return Err(Fault::Drop(format!("duplicate public key from {from:?}")));
        }

        let packet: SignedClientPacket = bincode::deserialize(body)
            .map_err(|_| Fault::blame("unparseable client key packet", from))?;
        server.client_key_packets.insert(from, packet);

        debug!(
            ?from,
            have = server.client_key_packets.len(),
            expecting = server.allowed_clients.len() + 1,
            "received client public key"
        );

        Ok(self.client_key_packets_flow())
    }

    fn handle_server_public_key(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        if !self.directory.is_server(&from) {
            return Err(Fault::Drop(format!(
                "server public key from non-server {from:?}"
            )));
        }

        let body: ServerPublicKeyBody = bincode::deserialize(body)
            .map_err(|_| Fault::blame("unparseable server key body", from))?;
        self.process_server_public_key_body(from, body)?;

        debug!(
            ?from,
            have = self.state.server_public_keys.len(),
            expecting = self.directory.server_count(),
            "received server public key"
        );

        Ok(self.server_public_keys_flow())
    }

    fn process_server_public_key_body(
        &mut self,
        from: PeerId,
        body: ServerPublicKeyBody,
    ) -> std::result::Result<(), Fault> {
        let server_index = self
            .directory
            .server_index_of(&from)
            .expect("checked server membership");
        if self.state.server_public_keys.contains_key(&server_index) {
            return Err(Fault::Drop(format!("duplicate server key from {from:?}")));
        }

        let context = self.proof_context();
        let key_group = self.state.params.key_group();
        let public_key = PublicKey::from_bytes(key_group, &body.public_key)
            .map_err(|_| Fault::blame("invalid server public key", from))?;
        public_key
            .verify_knowledge(key_group, &body.proof, &context)
            .map_err(|_| {
                Fault::blame("server failed to prove knowledge of its secret key", from)
            })?;

        let client_group = self.state.params.client_key_group();
        for (client_id, packet) in &body.client_packets {
            let verifying_key = self
                .directory
                .verifying_key(client_id)
                .ok_or_else(|| Fault::blame("relayed key for a non-member", *client_id))?;
            packet
                .verify(verifying_key)
                .map_err(|_| Fault::blame("client key packet signature invalid", *client_id))?;

            let inner: ClientKeyPacket = bincode::deserialize(&packet.packet)
                .map_err(|_| Fault::blame("unparseable client key packet", *client_id))?;
            if inner.round_id != self.round_id {
                return Err(Fault::blame("client key packet for a different round", *client_id));
            }

            let client_key = PublicKey::from_bytes(client_group, &inner.public_key)
                .map_err(|_| Fault::blame("invalid client public key", *client_id))?;
            client_key
                .verify_knowledge(client_group, &inner.proof, &context)
                .map_err(|_| {
                    Fault::blame("client failed to prove knowledge of its secret key", *client_id)
                })?;

            if self.state.client_public_keys.contains_key(client_id) {
                return Err(Fault::blame(
                    "client public key relayed by two servers",
                    *client_id,
                ));
            }
            self.state.client_public_keys.insert(*client_id, client_key);
        }

        self.state.server_public_keys.insert(server_index, public_key);

        Ok(())
    }

    fn handle_client_master_public_key(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        let Some(server) = self.server_state.as_mut() else {
            return Err(Fault::Drop("client master key sent to a client".into()));
        };
        if !server.allowed_clients.contains(&from) {
            return Err(Fault::Drop(format!(
                "{from:?} is not allowed to submit a master key"
            )));
        }
        if server.client_master_packets.contains_key(&from) {
            return Err(Fault::Drop(format!(
                "duplicate master key packet from {from:?}"
            )));
        }

        let packet: SignedClientPacket = bincode::deserialize(body)
            .map_err(|_| Fault::blame("unparseable master key packet", from))?;
        server.client_master_packets.insert(from, packet);

        Ok(self.client_master_packets_flow())
    }

    fn handle_server_master_public_key(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        if !self.directory.is_server(&from) {
            return Err(Fault::Drop(format!(
                "server master key from non-server {from:?}"
            )));
        }

        let body: ServerMasterKeyBody = bincode::deserialize(body)
            .map_err(|_| Fault::blame("unparseable server master body", from))?;
        self.process_server_master_body(from, body)?;

        self.server_master_flow()
    }

    fn process_server_master_body(
        &mut self,
        from: PeerId,
        body: ServerMasterKeyBody,
    ) -> std::result::Result<(), Fault> {
        let server_index = self
            .directory
            .server_index_of(&from)
            .expect("checked server membership");
        if self.state.server_master_columns.contains_key(&server_index) {
            return Err(Fault::Drop(format!(
                "duplicate server master body from {from:?}"
            )));
        }

        if body.commits.len() != self.directory.count() {
            return Err(Fault::blame("commit column has the wrong length", from));
        }

        // The claimed master key must be the product of the column.
        let params = &self.state.params;
        let commits = master::commits_from_bytes(params, &body.commits)
            .map_err(|_| Fault::blame("invalid commit cell", from))?;
        let derived = master::master_public_key(params, &commits);
        let claimed = PublicKey::from_bytes(params.key_group(), &body.master_public_key)
            .map_err(|_| Fault::blame("invalid server master key", from))?;
        if claimed != derived {
            return Err(Fault::blame(
                "server master key does not match its commit column",
                from,
            ));
        }

        for (client_id, packet) in &body.client_packets {
            let verifying_key = self
                .directory
                .verifying_key(client_id)
                .ok_or_else(|| Fault::blame("relayed master row for a non-member", *client_id))?;
            packet
                .verify(verifying_key)
                .map_err(|_| Fault::blame("master packet signature invalid", *client_id))?;

            let inner: ClientMasterPacket = bincode::deserialize(&packet.packet)
                .map_err(|_| Fault::blame("unparseable master packet", *client_id))?;
            if inner.round_id != self.round_id {
                return Err(Fault::blame(
                    "master packet for a different round",
                    *client_id,
                ));
            }
            if inner.commits.len() != self.directory.server_count() {
                return Err(Fault::blame("commit row has the wrong length", *client_id));
            }

            if self.state.client_master_rows.contains_key(client_id) {
                return Err(Fault::blame(
                    "master row relayed by two servers",
                    *client_id,
                ));
            }
            self.state
                .client_master_rows
                .insert(*client_id, inner.commits);
        }

        self.state
            .server_master_columns
            .insert(server_index, body.commits);
        self.state
            .server_master_public_keys
            .insert(server_index, claimed);

        Ok(())
    }

    fn handle_client_ciphertext(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        let Some(server) = self.server_state.as_mut() else {
            return Err(Fault::Drop("client ciphertext sent to a client".into()));
        };
        if !server.allowed_clients.contains(&from) {
            return Err(Fault::Drop(format!(
                "{from:?} is not allowed to submit a ciphertext"
            )));
        }
        if server.client_ciphertexts.contains_key(&from) {
            return Err(Fault::Drop(format!("duplicate ciphertext from {from:?}")));
        }

        server.client_ciphertexts.insert(from, body.to_vec());

        debug!(
            ?from,
            have = server.client_ciphertexts.len(),
            expecting = server.allowed_clients.len(),
            "received client ciphertext"
        );

        if self.client_ciphertexts_complete() {
            Ok(Flow::Complete)
        } else {
            Ok(Flow::Pending)
        }
    }

    fn client_ciphertexts_complete(&self) -> bool {
        let server = self.server_state.as_ref().expect("server-only state");

        server
            .allowed_clients
            .iter()
            .all(|id| server.client_ciphertexts.contains_key(id))
    }

    fn handle_server_client_list(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        if !self.directory.is_server(&from) {
            return Err(Fault::Drop(format!("client list from non-server {from:?}")));
        }
        let server = self.server_state.as_mut().expect("server-only state");
        if server.handled_servers.contains(&from) {
            return Err(Fault::Drop(format!("duplicate client list from {from:?}")));
        }

        let body: ServerClientListBody = bincode::deserialize(body)
            .map_err(|_| Fault::blame("unparseable client list", from))?;
        server.handled_servers.insert(from);

        // A client may submit to exactly one server.
        let overlap: Vec<PeerId> = body
            .ciphertexts
            .keys()
            .filter(|id| server.client_ciphertexts.contains_key(*id))
            .copied()
            .collect();
        if !overlap.is_empty() {
            return Err(Fault::Stop {
                reason: "client submitted ciphertexts to multiple servers".into(),
                bad_members: overlap,
            });
        }
        server.client_ciphertexts.extend(body.ciphertexts);

        debug!(
            ?from,
            have = server.handled_servers.len(),
            expecting = self.directory.server_count(),
            "received server client list"
        );

        Ok(self.handled_servers_flow())
    }

    fn handle_server_ciphertext(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        if !self.directory.is_server(&from) {
            return Err(Fault::Drop(format!(
                "server ciphertext from non-server {from:?}"
            )));
        }
        let server_index = self
            .directory
            .server_index_of(&from)
            .expect("checked server membership");
        let server = self.server_state.as_mut().expect("server-only state");
        if server.handled_servers.contains(&from) {
            return Err(Fault::Drop(format!(
                "duplicate server ciphertext from {from:?}"
            )));
        }

        server.handled_servers.insert(from);
        server.server_ciphertexts.insert(server_index, body.to_vec());

        debug!(
            ?from,
            have = server.handled_servers.len(),
            expecting = self.directory.server_count(),
            "received server ciphertext"
        );

        Ok(self.handled_servers_flow())
    }

    fn handle_server_validation(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        if !self.directory.is_server(&from) {
            return Err(Fault::Drop(format!("validation from non-server {from:?}")));
        }
        let server_index = self
            .directory
            .server_index_of(&from)
            .expect("checked server membership");
        {
            let server = self.server_state.as_ref().expect("server-only state");
            if server.handled_servers.contains(&from) {
                return Err(Fault::Drop(format!("duplicate validation from {from:?}")));
            }
        }

        let verifying_key = self
            .directory
            .verifying_key(&from)
            .expect("checked membership");
        let signature =
            Signature::from_slice(body).map_err(|_| Fault::blame("malformed signature", from))?;
        verifying_key
            .verify(&self.state.cleartext, &signature)
            .map_err(|_| Fault::blame("cleartext signature does not match", from))?;

        let server = self.server_state.as_mut().expect("server-only state");
        server.handled_servers.insert(from);
        server
            .validation_signatures
            .insert(server_index as u32, body.to_vec());

        debug!(
            ?from,
            have = server.handled_servers.len(),
            expecting = self.directory.server_count(),
            "received validation"
        );

        Ok(self.handled_servers_flow())
    }

    fn handle_server_cleartext(&mut self, from: PeerId, body: &[u8]) -> HandlerResult {
        if self.server_state.is_some() {
            return Err(Fault::Drop("cleartext sent to a server".into()));
        }
        if from != self.state.my_server {
            return Err(Fault::Drop(format!(
                "cleartext from {from:?}, which is not our server"
            )));
        }

        let body: ServerCleartextBody = bincode::deserialize(body)
            .map_err(|_| Fault::blame("unparseable cleartext body", from))?;

        // Every server must have signed the exact cleartext bytes.
        for server_index in 0..self.directory.server_count() {
            let peer = self
                .directory
                .server_at(server_index)
                .expect("validated server index");
            let verifying_key = self
                .directory
                .verifying_key(peer)
                .expect("servers are members");
            let signature_bytes = body
                .signatures
                .get(&(server_index as u32))
                .ok_or_else(|| Fault::stop("cleartext is missing a server signature"))?;
            let signature = Signature::from_slice(signature_bytes)
                .map_err(|_| Fault::stop("malformed cleartext signature"))?;
            verifying_key
                .verify(&body.cleartext, &signature)
                .map_err(|_| Fault::stop("cleartext signature verification failed"))?;
        }

        self.state.cleartext = body.cleartext;
        self.process_cleartext()?;

        Ok(Flow::Complete)
    }

    // ------------------------------------------------------------------
    // Bulk-cycle internals
    // ------------------------------------------------------------------

    /// Decode the cleartext: push payloads to the sink and feed the length
    /// advertisements into the slot lifecycle.
    fn process_cleartext(&mut self) -> std::result::Result<(), Fault> {
        let payloads: Vec<Vec<u8>> = bincode::deserialize(&self.state.cleartext)
            .map_err(|_| Fault::stop("unparseable cleartext"))?;
        if payloads.len() != self.directory.count() {
            return Err(Fault::stop("cleartext has the wrong slot count"));
        }

        let mut advertisements = Vec::with_capacity(payloads.len());
        for (slot, payload) in payloads.iter().enumerate() {
            if payload.is_empty() {
                advertisements.push(None);
                continue;
            }
            match slots::decode_header(payload) {
                Some((elements, rest)) => {
                    if !rest.is_empty() {
                        debug!(slot, len = rest.len(), "pushing slot payload");
                        self.session.push_data(slot, rest);
                    }
                    advertisements.push(Some(elements));
                }
                None => {
                    // An author fully controls its slot content; a headerless
                    // payload only wastes its own slot.
                    warn!(slot, "slot payload too short for a length header");
                    advertisements.push(None);
                }
            }
        }

        self.state
            .lifecycle
            .as_mut()
            .expect("bulk setup precedes cleartexts")
            .phase_boundary(&advertisements);

        Ok(())
    }

    /// One ciphertext per slot: the author engine on our own slot, covers
    /// elsewhere, empty placeholders for closed slots.
    fn generate_client_ciphertext(&mut self) -> std::result::Result<CiphertextList, Fault> {
        let n_slots = self.directory.count();
        let my_slot = self.state.my_slot.expect("bulk setup precedes ciphertexts");
        let lifecycle = self
            .state
            .lifecycle
            .as_ref()
            .expect("bulk setup precedes ciphertexts");
        let open: Vec<bool> = (0..n_slots).map(|slot| lifecycle.is_open(slot)).collect();
        let elements: Vec<usize> = (0..n_slots)
            .map(|slot| lifecycle.elements_for_slot(slot))
            .collect();

        // The author payload consumes application data, so build it before
        // touching the engines.
        let own_payload = if open[my_slot] {
            Some(self.build_own_payload(elements[my_slot])?)
        } else {
            None
        };

        let mut out: Vec<Option<Vec<u8>>> = vec![None; n_slots];

        if let Some(payload) = own_payload {
            let author = self.state.author.as_mut().expect("bulk setup sets the author");
            author.set_n_elements(elements[my_slot]);
            let ciphertext = author
                .gen_ciphertext(&payload, self.rng.as_mut())
                .map_err(|e| Fault::stop(format!("failed to generate author ciphertext: {e}")))?;
            out[my_slot] = Some(ciphertext);
        }

        for slot in 0..n_slots {
            if slot == my_slot || !open[slot] {
                continue;
            }
            if let Some(cover) = self.state.cover_clients[slot].as_mut() {
                cover.set_n_elements(elements[slot]);
            }
        }

        // Cover generation is the client-side modular-exponentiation hot
        // spot; it fans out to the worker pool when `parallel` is enabled.
        let covers = &self.state.cover_clients;
        let cover_results: Vec<(usize, blogdrop::Result<Vec<u8>>)> = {
            #[cfg(feature = "parallel")]
            {
                use rayon::prelude::*;

                covers
                    .par_iter()
                    .enumerate()
                    .filter(|(slot, cover)| *slot != my_slot && open[*slot] && cover.is_some())
                    .map(|(slot, cover)| {
                        let cover = cover.as_ref().expect("filtered above");
                        (slot, cover.gen_ciphertext(&mut group::OsRng))
                    })
                    .collect()
            }
            #[cfg(not(feature = "parallel"))]
            {
                let rng = &mut self.rng;
                covers
                    .iter()
                    .enumerate()
                    .filter(|(slot, cover)| *slot != my_slot && open[*slot] && cover.is_some())
                    .map(|(slot, cover)| {
                        let cover = cover.as_ref().expect("filtered above");
                        (slot, cover.gen_ciphertext(rng.as_mut()))
                    })
                    .collect()
            }
        };

        for (slot, result) in cover_results {
            let ciphertext = result
                .map_err(|e| Fault::stop(format!("failed to generate cover ciphertext: {e}")))?;
            out[slot] = Some(ciphertext);
        }

        Ok(out
            .into_iter()
            .map(|ciphertext| ciphertext.unwrap_or_default())
            .collect())
    }

    /// Assemble our slot's payload for the current phase: the advertisement
    /// header for the next phase followed by the message buffered last
    /// phase.
    fn build_own_payload(&mut self, current_elements: usize) -> std::result::Result<Vec<u8>, Fault> {
        let bytes_per_element = self.state.params.msg_group().bytes_per_element();
        let transmitting = std::mem::take(&mut self.state.pending_message);

        let max_fetch = slots::MAX_ELEMENTS * bytes_per_element - slots::HEADER_LEN;
        let (next_message, _more_pending) = self.session.get_data(max_fetch);

        let next_elements = if !next_message.is_empty() {
            self.state.phases_since_transmission = 0;
            slots::elements_for(next_message.len(), bytes_per_element) as u32
        } else {
            self.state.phases_since_transmission += 1;
            if self.state.phases_since_transmission > slots::IDLE_CLOSE_THRESHOLD {
                0
            } else {
                1
            }
        };
        self.state.pending_message = next_message;

        let mut payload = slots::encode_header(next_elements).to_vec();
        payload.extend_from_slice(&transmitting);

        debug_assert!(payload.len() <= current_elements * bytes_per_element);

        Ok(payload)
    }

    /// The public key a client's ciphertexts verify against (master keys
    /// under the hashing-generator variant).
    fn client_key_for(&self, id: &PeerId) -> Option<&PublicKey> {
        if self.state.params.uses_master_keys() {
            self.state.client_master_public_keys.get(id)
        } else {
            self.state.client_public_keys.get(id)
        }
    }

    fn server_key_for(&self, index: usize) -> Option<&PublicKey> {
        if self.state.params.uses_master_keys() {
            self.state.server_master_public_keys.get(&index)
        } else {
            self.state.server_public_keys.get(&index)
        }
    }
}
