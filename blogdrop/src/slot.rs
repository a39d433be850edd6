// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Per-slot cryptographic engines.
//!
//! Three cooperating roles share one anonymity slot: the author (owner of
//! the slot secret, transmitting real messages), cover clients (whose
//! contributions cancel under the server reveal) and bin servers (which
//! accumulate ciphertexts, verify proofs and reveal the slot plaintext).
//! All three delegate to a [`SlotCrypto`] engine selected once, at round
//! construction, by the proof variant carried on [`Parameters`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use group::{CsRng, Element};

use crate::sigma::{self, DisjunctiveProof, KnownBranch, SchnorrProof, Statement};
use crate::{Error, Parameters, Plaintext, PrivateKey, ProofVariant, PublicKey, PublicKeySet, Result};

/// The key material one participant holds for one slot.
#[derive(Clone, Debug)]
pub struct SlotKeys {
    /// Own ephemeral (or, under the hashing-generator variant, master)
    /// client secret.
    pub client_private: PrivateKey,
    pub client_public: PublicKey,
    /// The anonymous public key owning this slot, as delivered by the
    /// shuffle.
    pub slot_public: PublicKey,
    /// The slot secret; present only on the engine of the slot's author.
    pub author_private: Option<PrivateKey>,
    /// Server-role key pair; present only on bin-server engines.
    pub server_private: Option<PrivateKey>,
    pub server_public: Option<PublicKey>,
    /// Product of all server public keys.
    pub server_keys: PublicKeySet,
    /// The individual server public keys in subgroup order. Only the XOR
    /// engine reads these.
    pub server_list: Vec<PublicKey>,
}

/// One slot engine. `gen_*` produce client-side ciphertext bytes; the `add`,
/// `close_bin` and `reveal_plaintext` family drives the server-side bin.
/// Engines are `Sync` so per-slot generation and verification can fan out
/// to a worker pool with borrowed inputs.
pub trait SlotCrypto: Send + Sync {
    /// A ciphertext contributing zero to the decoded sum.
    fn gen_cover(&self, rng: &mut dyn CsRng) -> Result<Vec<u8>>;

    /// A ciphertext carrying `message`; requires the slot secret.
    fn gen_author(&self, message: &[u8], rng: &mut dyn CsRng) -> Result<Vec<u8>>;

    /// Check a client ciphertext proof against the submitting client's key.
    fn verify_client(&self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()>;

    /// Accumulate a client ciphertext. Verification is deferred to
    /// [`Self::close_bin`] so it can run over the whole batch.
    fn add_client_ct(&mut self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()>;

    /// Verify and accumulate another server's ciphertext. Only valid once
    /// the bin is closed.
    fn add_server_ct(&mut self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()>;

    /// Verify every accumulated client proof, fold the bin and emit this
    /// server's own ciphertext.
    fn close_bin(&mut self, rng: &mut dyn CsRng) -> Result<Vec<u8>>;

    /// Fold every contribution and decode the slot plaintext.
    fn reveal_plaintext(&self) -> Result<Vec<u8>>;

    fn next_phase(&mut self);

    fn clear_bin(&mut self);

    fn set_n_elements(&mut self, n: usize);

    fn n_elements(&self) -> usize;

    /// The maximum message length [`Self::gen_author`] accepts.
    fn max_plaintext_len(&self) -> usize;
}

/// Select the engine for `params`' proof variant.
pub fn new_slot_crypto(
    params: &Parameters,
    slot_index: usize,
    keys: SlotKeys,
) -> Box<dyn SlotCrypto> {
    match params.variant() {
        ProofVariant::ElGamal | ProofVariant::Pairing | ProofVariant::HashingGenerator => {
            Box::new(DiscreteLogSlot::new(params.clone(), slot_index, keys))
        }
        ProofVariant::XorTesting => Box::new(XorSlot::new(params.clone(), slot_index, keys)),
    }
}

#[derive(Serialize, Deserialize)]
struct WireClientCiphertext {
    elements: Vec<Vec<u8>>,
    proof: [Vec<u8>; 4],
}

#[derive(Serialize, Deserialize)]
struct WireServerCiphertext {
    elements: Vec<Vec<u8>>,
    challenge: Vec<u8>,
    response: Vec<u8>,
}

struct ClientEntry {
    elements: Vec<Element>,
    proof: DisjunctiveProof,
    public_key: PublicKey,
}

#[derive(Default)]
struct Bin {
    clients: Vec<ClientEntry>,
    server_elements: Vec<Vec<Element>>,
    closed: bool,
}

/// The discrete-log engine, shared by the elgamal, pairing and
/// hashing-generator variants: the three differ only in which groups and
/// key pairs feed the same ciphertext and proof equations.
struct DiscreteLogSlot {
    params: Parameters,
    slot_index: usize,
    phase: u64,
    keys: SlotKeys,
    bin: Bin,
}

impl DiscreteLogSlot {
    fn new(params: Parameters, slot_index: usize, keys: SlotKeys) -> Self {
        Self {
            params,
            slot_index,
            phase: 0,
            keys,
            bin: Bin::default(),
        }
    }

    /// Transcript context tying proofs to the parameter set, slot and phase.
    fn context(&self) -> Vec<u8> {
        let mut context = self.params.to_bytes();
        context.extend_from_slice(&(self.slot_index as u32).to_le_bytes());
        context.extend_from_slice(&self.phase.to_le_bytes());

        context
    }

    /// The message-group base a client exponentiates: the server-key product
    /// itself, or its pairing with the client-side generator under the
    /// pairing variant.
    fn client_element_base(&self) -> Element {
        match self.params.variant() {
            ProofVariant::Pairing => self
                .params
                .apply_pairing(
                    self.keys.server_keys.element(),
                    &self.params.client_key_group().generator(),
                )
                .expect("the pairing variant pairs G1 keys with the G2 generator"),
            _ => self.keys.server_keys.element().clone(),
        }
    }

    /// The message-group base a server exponentiates: the inverse of the
    /// accepted-client key product (paired into Gₜ under the pairing
    /// variant).
    fn server_element_base(&self, client_product: &Element) -> Element {
        let msg_group = self.params.msg_group();
        match self.params.variant() {
            ProofVariant::Pairing => {
                let paired = self
                    .params
                    .apply_pairing(&self.params.key_group().generator(), client_product)
                    .expect("the pairing variant pairs the G1 generator with G2 keys");

                msg_group.inv(&paired)
            }
            _ => msg_group.inv(client_product),
        }
    }

    /// Product of the public keys whose ciphertexts were accepted into the
    /// bin.
    fn client_product(&self) -> Element {
        let group = self.params.client_key_group();

        self.bin
            .clients
            .iter()
            .fold(group.identity(), |product, entry| {
                group.mul(&product, entry.public_key.element())
            })
    }

    fn cover_statements<'a>(
        &'a self,
        public_key: &PublicKey,
        elements: &[Element],
        base: &Element,
    ) -> Vec<Statement<'a>> {
        let client_group = self.params.client_key_group();
        let mut statements = vec![Statement {
            group: client_group,
            base: client_group.generator(),
            target: public_key.element().clone(),
        }];
        statements.extend(elements.iter().map(|element| Statement {
            group: self.params.msg_group(),
            base: base.clone(),
            target: element.clone(),
        }));

        statements
    }

    fn author_statements(&self) -> Vec<Statement<'_>> {
        let client_group = self.params.client_key_group();

        vec![Statement {
            group: client_group,
            base: client_group.generator(),
            target: self.keys.slot_public.element().clone(),
        }]
    }

    fn parse_client(&self, ciphertext: &[u8]) -> Result<(Vec<Element>, DisjunctiveProof)> {
        let wire: WireClientCiphertext = bincode::deserialize(ciphertext)?;
        if wire.elements.len() != self.params.n_elements() {
            return Err(Error::MalformedCiphertext(format!(
                "expected {} elements, got {}",
                self.params.n_elements(),
                wire.elements.len()
            )));
        }

        let msg_group = self.params.msg_group();
        let elements = wire
            .elements
            .iter()
            .map(|bytes| {
                let element = msg_group.element_from_bytes(bytes)?;
                if !msg_group.is_element(&element) {
                    return Err(group::Error::InvalidElement);
                }
                Ok(element)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let proof = DisjunctiveProof::from_bytes([
            &wire.proof[0],
            &wire.proof[1],
            &wire.proof[2],
            &wire.proof[3],
        ])?;

        Ok((elements, proof))
    }

    fn verify_entry(&self, entry: &ClientEntry) -> Result<()> {
        let base = self.client_element_base();
        let cover = self.cover_statements(&entry.public_key, &entry.elements, &base);
        let author = self.author_statements();

        sigma::verify_disjunctive(
            b"client ciphertext",
            &self.context(),
            &cover,
            &author,
            &entry.proof,
            &self.params.group_order(),
        )
    }

    fn serialize_client(&self, elements: &[Element], proof: &DisjunctiveProof) -> Result<Vec<u8>> {
        let msg_group = self.params.msg_group();
        let wire = WireClientCiphertext {
            elements: elements
                .iter()
                .map(|element| msg_group.element_to_bytes(element))
                .collect(),
            proof: proof.to_bytes(self.params.exponent_width()),
        };

        Ok(bincode::serialize(&wire)?)
    }
}

impl SlotCrypto for DiscreteLogSlot {
    fn gen_cover(&self, rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        let mut rng = rng;
        let base = self.client_element_base();
        let value = self
            .params
            .msg_group()
            .exp(&base, self.keys.client_private.scalar());
        let elements = vec![value; self.params.n_elements()];

        let proof = sigma::prove_disjunctive(
            b"client ciphertext",
            &self.context(),
            &self.cover_statements(&self.keys.client_public, &elements, &base),
            &self.author_statements(),
            KnownBranch::First,
            self.keys.client_private.scalar(),
            &self.params.group_order(),
            &mut rng,
        );

        self.serialize_client(&elements, &proof)
    }

    fn gen_author(&self, message: &[u8], rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        let author_private = self
            .keys
            .author_private
            .as_ref()
            .ok_or(Error::MissingSecret("gen_author"))?;

        let capacity = self.max_plaintext_len();
        if message.len() > capacity {
            return Err(Error::MessageTooLong {
                got: message.len(),
                capacity,
            });
        }

        let msg_group = self.params.msg_group();
        let base = self.client_element_base();
        let mask = msg_group.exp(&base, self.keys.client_private.scalar());

        let (plaintext, _) = Plaintext::encode(&self.params, message)?;
        let elements: Vec<Element> = plaintext
            .elements()
            .iter()
            .map(|m| msg_group.mul(&mask, m))
            .collect();

        // The author branch is the real one; the cover branch, which these
        // elements deliberately violate, is simulated.
        let mut rng = rng;
        let proof = sigma::prove_disjunctive(
            b"client ciphertext",
            &self.context(),
            &self.cover_statements(&self.keys.client_public, &elements, &base),
            &self.author_statements(),
            KnownBranch::Second,
            author_private.scalar(),
            &self.params.group_order(),
            &mut rng,
        );

        self.serialize_client(&elements, &proof)
    }

    fn verify_client(&self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()> {
        let (elements, proof) = self.parse_client(ciphertext)?;

        self.verify_entry(&ClientEntry {
            elements,
            proof,
            public_key: public_key.clone(),
        })
    }

    fn add_client_ct(&mut self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()> {
        if self.bin.closed {
            return Err(Error::BinClosed);
        }

        let (elements, proof) = self.parse_client(ciphertext)?;
        self.bin.clients.push(ClientEntry {
            elements,
            proof,
            public_key: public_key.clone(),
        });

        Ok(())
    }

    fn add_server_ct(&mut self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()> {
        if !self.bin.closed {
            return Err(Error::MalformedCiphertext(
                "server ciphertexts are only accepted on a closed bin".into(),
            ));
        }

        let wire: WireServerCiphertext = bincode::deserialize(ciphertext)?;
        if wire.elements.len() != 1 {
            return Err(Error::MalformedCiphertext(format!(
                "expected a single server element, got {}",
                wire.elements.len()
            )));
        }

        let msg_group = self.params.msg_group();
        let element = msg_group.element_from_bytes(&wire.elements[0])?;
        if !msg_group.is_element(&element) {
            return Err(Error::Group(group::Error::InvalidElement));
        }

        let base = self.server_element_base(&self.client_product());
        let key_group = self.params.key_group();
        let statements = [
            Statement {
                group: key_group,
                base: key_group.generator(),
                target: public_key.element().clone(),
            },
            Statement {
                group: msg_group,
                base,
                target: element.clone(),
            },
        ];

        sigma::verify_schnorr(
            b"server ciphertext",
            &self.context(),
            &statements,
            &SchnorrProof::from_bytes(&wire.challenge, &wire.response)?,
            &self.params.group_order(),
        )?;

        self.bin.server_elements.push(vec![element]);

        Ok(())
    }

    fn close_bin(&mut self, rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        if self.bin.closed {
            return Err(Error::BinClosed);
        }

        let failures = verify_client_batch(&self.bin.clients, |entry| self.verify_entry(entry));
        if let Some(index) = failures.into_iter().next() {
            return Err(Error::InvalidClientProof { index });
        }

        let server_private = self
            .keys
            .server_private
            .as_ref()
            .ok_or(Error::MissingSecret("close_bin"))?;
        let server_public = self
            .keys
            .server_public
            .as_ref()
            .ok_or(Error::MissingSecret("close_bin"))?;

        let msg_group = self.params.msg_group();
        let base = self.server_element_base(&self.client_product());
        let element = msg_group.exp(&base, server_private.scalar());

        let key_group = self.params.key_group();
        let statements = [
            Statement {
                group: key_group,
                base: key_group.generator(),
                target: server_public.element().clone(),
            },
            Statement {
                group: msg_group,
                base,
                target: element.clone(),
            },
        ];
        let mut rng = rng;
        let proof = sigma::prove_schnorr(
            b"server ciphertext",
            &self.context(),
            &statements,
            server_private.scalar(),
            &self.params.group_order(),
            &mut rng,
        );

        self.bin.closed = true;

        let width = self.params.exponent_width();
        let (challenge, response) = proof.to_bytes(width);
        Ok(bincode::serialize(&WireServerCiphertext {
            elements: vec![msg_group.element_to_bytes(&element)],
            challenge,
            response,
        })?)
    }

    fn reveal_plaintext(&self) -> Result<Vec<u8>> {
        if !self.bin.closed {
            return Err(Error::MalformedCiphertext(
                "reveal requires a closed bin".into(),
            ));
        }

        let msg_group = self.params.msg_group();
        let mut combined: Vec<Element> = vec![msg_group.identity(); self.params.n_elements()];

        for entry in &self.bin.clients {
            for (slot, element) in combined.iter_mut().zip(&entry.elements) {
                *slot = msg_group.mul(slot, element);
            }
        }
        for server in &self.bin.server_elements {
            for (index, slot) in combined.iter_mut().enumerate() {
                let element = server.get(index).unwrap_or(&server[0]);
                *slot = msg_group.mul(slot, element);
            }
        }

        // A slot whose author never submitted folds to the identity: the
        // covers and server contributions cancel and nothing remains. That
        // is an empty payload, not a decode failure.
        if combined.iter().all(|element| *element == msg_group.identity()) {
            return Ok(Vec::new());
        }

        Plaintext::from_elements(&self.params, combined)
            .decode()
            .map_err(|_| Error::NoValidMessage)
    }

    fn next_phase(&mut self) {
        self.phase += 1;
    }

    fn clear_bin(&mut self) {
        self.bin = Bin::default();
    }

    fn set_n_elements(&mut self, n: usize) {
        self.params.set_n_elements(n);
    }

    fn n_elements(&self) -> usize {
        self.params.n_elements()
    }

    fn max_plaintext_len(&self) -> usize {
        Plaintext::can_fit(&self.params)
    }
}

/// Verify client entries, in parallel when the `parallel` feature is on.
/// Returns the indices of entries whose proofs failed, in order.
fn verify_client_batch<F>(entries: &[ClientEntry], verify: F) -> BTreeSet<usize>
where
    F: Fn(&ClientEntry) -> Result<()> + Sync,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        entries
            .par_iter()
            .enumerate()
            .filter(|(_, entry)| verify(entry).is_err())
            .map(|(index, _)| index)
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| verify(entry).is_err())
            .map(|(index, _)| index)
            .collect()
    }
}

/// The XOR engine: pairwise PRF streams over publicly derivable seeds.
/// Matches the DC-net bookkeeping of the real engines at XOR speed, with
/// vacuous proofs. Testing only.
struct XorSlot {
    params: Parameters,
    slot_index: usize,
    phase: u64,
    keys: SlotKeys,
    bin: Bin,
}

impl XorSlot {
    fn new(params: Parameters, slot_index: usize, keys: SlotKeys) -> Self {
        Self {
            params,
            slot_index,
            phase: 0,
            keys,
            bin: Bin::default(),
        }
    }

    fn width(&self) -> usize {
        self.params.msg_group().bytes_per_element() + 2
    }

    /// The PRF stream shared by one (client, server) pair for one element.
    /// Seeds are derived from the two public keys, which is exactly why
    /// this variant is insecure.
    fn pair_stream(&self, client: &PublicKey, server: &PublicKey, element_index: usize) -> Vec<u8> {
        let group = self.params.key_group();
        let width = self.width();

        let mut out = Vec::with_capacity(width);
        let mut counter = 0u32;
        while out.len() < width {
            let mut hasher = Sha256::new();
            hasher.update(b"xor pair stream");
            hasher.update(self.params.round_nonce());
            hasher.update(client.to_bytes(group));
            hasher.update(server.to_bytes(group));
            hasher.update(self.phase.to_le_bytes());
            hasher.update((self.slot_index as u32).to_le_bytes());
            hasher.update((element_index as u32).to_le_bytes());
            hasher.update(counter.to_le_bytes());
            out.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        out.truncate(width);

        out
    }

    fn xor_into(accumulator: &mut [u8], stream: &[u8]) {
        for (a, s) in accumulator.iter_mut().zip(stream) {
            *a ^= s;
        }
    }

    fn cover_elements(&self) -> Vec<Vec<u8>> {
        (0..self.params.n_elements())
            .map(|element_index| {
                let mut acc = vec![0u8; self.width()];
                for server in &self.keys.server_list {
                    Self::xor_into(
                        &mut acc,
                        &self.pair_stream(&self.keys.client_public, server, element_index),
                    );
                }
                acc
            })
            .collect()
    }

    fn serialize(&self, elements: Vec<Vec<u8>>) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&WireClientCiphertext {
            elements,
            proof: [Vec::new(), Vec::new(), Vec::new(), Vec::new()],
        })?)
    }

    fn parse(&self, ciphertext: &[u8]) -> Result<Vec<Vec<u8>>> {
        let wire: WireClientCiphertext = bincode::deserialize(ciphertext)?;
        if wire.elements.len() != self.params.n_elements()
            || wire.elements.iter().any(|e| e.len() != self.width())
        {
            return Err(Error::MalformedCiphertext(
                "wrong element count or width".into(),
            ));
        }

        Ok(wire.elements)
    }
}

impl SlotCrypto for XorSlot {
    fn gen_cover(&self, _rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        self.serialize(self.cover_elements())
    }

    fn gen_author(&self, message: &[u8], _rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        if self.keys.author_private.is_none() {
            return Err(Error::MissingSecret("gen_author"));
        }

        let capacity = self.max_plaintext_len();
        if message.len() > capacity {
            return Err(Error::MessageTooLong {
                got: message.len(),
                capacity,
            });
        }

        let (plaintext, _) = Plaintext::encode(&self.params, message)?;
        let msg_group = self.params.msg_group();

        let mut elements = self.cover_elements();
        for (acc, encoded) in elements.iter_mut().zip(plaintext.elements()) {
            Self::xor_into(acc, &msg_group.element_to_bytes(encoded));
        }

        self.serialize(elements)
    }

    fn verify_client(&self, ciphertext: &[u8], _public_key: &PublicKey) -> Result<()> {
        self.parse(ciphertext).map(|_| ())
    }

    fn add_client_ct(&mut self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()> {
        if self.bin.closed {
            return Err(Error::BinClosed);
        }

        let elements = self
            .parse(ciphertext)?
            .into_iter()
            .map(Element::Xor)
            .collect();
        self.bin.clients.push(ClientEntry {
            elements,
            proof: DisjunctiveProof::from_bytes([&[], &[], &[], &[]])?,
            public_key: public_key.clone(),
        });

        Ok(())
    }

    fn add_server_ct(&mut self, ciphertext: &[u8], _public_key: &PublicKey) -> Result<()> {
        if !self.bin.closed {
            return Err(Error::MalformedCiphertext(
                "server ciphertexts are only accepted on a closed bin".into(),
            ));
        }

        let wire: WireServerCiphertext = bincode::deserialize(ciphertext)?;
        if wire.elements.len() != self.params.n_elements()
            || wire.elements.iter().any(|e| e.len() != self.width())
        {
            return Err(Error::MalformedCiphertext(
                "wrong element count or width".into(),
            ));
        }

        self.bin
            .server_elements
            .push(wire.elements.into_iter().map(Element::Xor).collect());

        Ok(())
    }

    fn close_bin(&mut self, _rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        if self.bin.closed {
            return Err(Error::BinClosed);
        }

        let server_public = self
            .keys
            .server_public
            .as_ref()
            .ok_or(Error::MissingSecret("close_bin"))?;

        // Cancel this server's pair streams for every accepted client.
        let elements: Vec<Vec<u8>> = (0..self.params.n_elements())
            .map(|element_index| {
                let mut acc = vec![0u8; self.width()];
                for entry in &self.bin.clients {
                    Self::xor_into(
                        &mut acc,
                        &self.pair_stream(&entry.public_key, server_public, element_index),
                    );
                }
                acc
            })
            .collect();

        self.bin.closed = true;

        Ok(bincode::serialize(&WireServerCiphertext {
            elements,
            challenge: Vec::new(),
            response: Vec::new(),
        })?)
    }

    fn reveal_plaintext(&self) -> Result<Vec<u8>> {
        if !self.bin.closed {
            return Err(Error::MalformedCiphertext(
                "reveal requires a closed bin".into(),
            ));
        }

        let width = self.width();
        let mut combined = vec![vec![0u8; width]; self.params.n_elements()];

        for contribution in self
            .bin
            .clients
            .iter()
            .map(|entry| &entry.elements)
            .chain(self.bin.server_elements.iter())
        {
            for (acc, element) in combined.iter_mut().zip(contribution) {
                match element {
                    Element::Xor(bytes) => Self::xor_into(acc, bytes),
                    _ => unreachable!("xor bins only hold xor elements"),
                }
            }
        }

        // An authorless slot folds to all zeros; report it as empty.
        if combined.iter().all(|acc| acc.iter().all(|&b| b == 0)) {
            return Ok(Vec::new());
        }

        Plaintext::from_elements(
            &self.params,
            combined.into_iter().map(Element::Xor).collect(),
        )
        .decode()
        .map_err(|_| Error::NoValidMessage)
    }

    fn next_phase(&mut self) {
        self.phase += 1;
    }

    fn clear_bin(&mut self) {
        self.bin = Bin::default();
    }

    fn set_n_elements(&mut self, n: usize) {
        self.params.set_n_elements(n);
    }

    fn n_elements(&self) -> usize {
        self.params.n_elements()
    }

    fn max_plaintext_len(&self) -> usize {
        Plaintext::can_fit(&self.params)
    }
}

/// Client-role wrapper emitting cover ciphertexts for one slot.
pub struct CoverClient {
    engine: Box<dyn SlotCrypto>,
}

impl CoverClient {
    pub fn new(params: &Parameters, slot_index: usize, keys: SlotKeys) -> Self {
        Self {
            engine: new_slot_crypto(params, slot_index, keys),
        }
    }

    pub fn gen_ciphertext(&self, rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        self.engine.gen_cover(rng)
    }

    pub fn next_phase(&mut self) {
        self.engine.next_phase();
    }

    pub fn set_n_elements(&mut self, n: usize) {
        self.engine.set_n_elements(n);
    }

    pub fn n_elements(&self) -> usize {
        self.engine.n_elements()
    }
}

/// The slot owner: emits real ciphertexts for chosen messages.
pub struct Author {
    engine: Box<dyn SlotCrypto>,
}

impl Author {
    /// `keys.author_private` must hold the slot secret.
    pub fn new(params: &Parameters, slot_index: usize, keys: SlotKeys) -> Self {
        debug_assert!(keys.author_private.is_some());

        Self {
            engine: new_slot_crypto(params, slot_index, keys),
        }
    }

    pub fn gen_ciphertext(&self, message: &[u8], rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        self.engine.gen_author(message, rng)
    }

    pub fn max_plaintext_len(&self) -> usize {
        self.engine.max_plaintext_len()
    }

    pub fn next_phase(&mut self) {
        self.engine.next_phase();
    }

    pub fn set_n_elements(&mut self, n: usize) {
        self.engine.set_n_elements(n);
    }

    pub fn n_elements(&self) -> usize {
        self.engine.n_elements()
    }
}

/// Server-role wrapper accumulating one slot's bin.
pub struct BinServer {
    engine: Box<dyn SlotCrypto>,
}

impl BinServer {
    /// `keys.server_private` must hold the server secret.
    pub fn new(params: &Parameters, slot_index: usize, keys: SlotKeys) -> Self {
        debug_assert!(keys.server_private.is_some());

        Self {
            engine: new_slot_crypto(params, slot_index, keys),
        }
    }

    pub fn verify_client(&self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()> {
        self.engine.verify_client(ciphertext, public_key)
    }

    pub fn add_client_ciphertext(&mut self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()> {
        self.engine.add_client_ct(ciphertext, public_key)
    }

    pub fn add_server_ciphertext(&mut self, ciphertext: &[u8], public_key: &PublicKey) -> Result<()> {
        self.engine.add_server_ct(ciphertext, public_key)
    }

    pub fn close_bin(&mut self, rng: &mut dyn CsRng) -> Result<Vec<u8>> {
        self.engine.close_bin(rng)
    }

    pub fn reveal_plaintext(&self) -> Result<Vec<u8>> {
        self.engine.reveal_plaintext()
    }

    pub fn next_phase(&mut self) {
        self.engine.next_phase();
    }

    pub fn clear_bin(&mut self) {
        self.engine.clear_bin();
    }

    pub fn set_n_elements(&mut self, n: usize) {
        self.engine.set_n_elements(n);
    }

    pub fn n_elements(&self) -> usize {
        self.engine.n_elements()
    }
}
