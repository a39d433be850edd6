// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use group::{EcGroup, Element, G1Group, G2Group, Group, GtGroup, IntegerGroup, XorGroup, U2048};

use crate::Result;

/// Which ciphertext/proof construction a round runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProofVariant {
    /// DDH-style disjunction proofs in one shared group.
    ElGamal,
    /// The same structure lifted into BLS12-381, with ciphertexts in Gₜ.
    Pairing,
    /// ElGamal over per-pair master keys derived after a commit exchange.
    HashingGenerator,
    /// XOR streams with vacuous proofs. Testing only.
    XorTesting,
}

/// Round-level configuration: proof variant, round nonce, the key and
/// message groups, and the per-ciphertext element count.
///
/// Everything but the element count is immutable for the lifetime of a
/// round; the element count is a per-slot, per-phase quantity, which is why
/// every slot engine owns its own clone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameters {
    variant: ProofVariant,
    round_nonce: Vec<u8>,
    key_group: Group,
    client_key_group: Group,
    msg_group: Group,
    n_elements: usize,
}

impl Parameters {
    /// 512-bit integer group, disjunction proofs; for tests.
    pub fn integer_elgamal_testing() -> Self {
        let group = Group::Integer(IntegerGroup::testing_512());

        Self::new(ProofVariant::ElGamal, Vec::new(), group.clone(), group.clone(), group, 2)
    }

    /// RFC 3526 2048-bit integer group, disjunction proofs.
    pub fn integer_elgamal_production(round_nonce: Vec<u8>) -> Self {
        let group = Group::Integer(IntegerGroup::production_2048());

        Self::new(ProofVariant::ElGamal, round_nonce, group.clone(), group.clone(), group, 1)
    }

    /// 512-bit integer group with the master-key exchange; for tests.
    pub fn integer_hashing_testing() -> Self {
        let group = Group::Integer(IntegerGroup::testing_512());

        Self::new(
            ProofVariant::HashingGenerator,
            Vec::new(),
            group.clone(),
            group.clone(),
            group,
            2,
        )
    }

    /// RFC 3526 2048-bit integer group with the master-key exchange.
    pub fn integer_hashing_production(round_nonce: Vec<u8>) -> Self {
        let group = Group::Integer(IntegerGroup::production_2048());

        Self::new(
            ProofVariant::HashingGenerator,
            round_nonce,
            group.clone(),
            group.clone(),
            group,
            1,
        )
    }

    /// P-256, disjunction proofs.
    pub fn p256_elgamal_production(round_nonce: Vec<u8>) -> Self {
        let group = Group::P256(EcGroup::new());

        Self::new(ProofVariant::ElGamal, round_nonce, group.clone(), group.clone(), group, 8)
    }

    /// P-256 with the master-key exchange.
    pub fn p256_hashing_production(round_nonce: Vec<u8>) -> Self {
        let group = Group::P256(EcGroup::new());

        Self::new(
            ProofVariant::HashingGenerator,
            round_nonce,
            group.clone(),
            group.clone(),
            group,
            8,
        )
    }

    /// BLS12-381: server keys in G₁, client keys in G₂, ciphertexts in Gₜ.
    pub fn pairing_production(round_nonce: Vec<u8>) -> Self {
        Self::new(
            ProofVariant::Pairing,
            round_nonce,
            Group::PairingG1(G1Group::new()),
            Group::PairingG2(G2Group::new()),
            Group::PairingGt(GtGroup::new()),
            4,
        )
    }

    /// Insecure XOR message scheme over real key-exchange keys; testing and
    /// benchmarking only. The DC-net streams run at XOR speed while the key
    /// exchange keeps its ordinary knowledge proofs.
    pub fn xor_testing(round_nonce: Vec<u8>) -> Self {
        let key_group = Group::Integer(IntegerGroup::testing_512());

        Self::new(
            ProofVariant::XorTesting,
            round_nonce,
            key_group.clone(),
            key_group,
            Group::Xor(XorGroup::new(32)),
            2,
        )
    }

    fn new(
        variant: ProofVariant,
        round_nonce: Vec<u8>,
        key_group: Group,
        client_key_group: Group,
        msg_group: Group,
        n_elements: usize,
    ) -> Self {
        Self {
            variant,
            round_nonce,
            key_group,
            client_key_group,
            msg_group,
            n_elements,
        }
    }

    pub fn variant(&self) -> ProofVariant {
        self.variant
    }

    pub fn uses_pairing(&self) -> bool {
        self.variant == ProofVariant::Pairing
    }

    /// Whether the round runs the master-key exchange sub-phase.
    pub fn uses_master_keys(&self) -> bool {
        self.variant == ProofVariant::HashingGenerator
    }

    pub fn round_nonce(&self) -> &[u8] {
        &self.round_nonce
    }

    pub fn set_round_nonce(&mut self, round_nonce: Vec<u8>) {
        self.round_nonce = round_nonce;
    }

    /// The group containing server public keys.
    pub fn key_group(&self) -> &Group {
        &self.key_group
    }

    /// The group containing client public keys and the anonymous slot keys.
    /// Identical to [`Self::key_group`] except under the pairing variant.
    pub fn client_key_group(&self) -> &Group {
        &self.client_key_group
    }

    /// The group containing ciphertext and plaintext elements.
    pub fn msg_group(&self) -> &Group {
        &self.msg_group
    }

    pub fn n_elements(&self) -> usize {
        self.n_elements
    }

    pub fn set_n_elements(&mut self, n_elements: usize) {
        self.n_elements = n_elements;
    }

    /// The common order of the key and message groups. The proofs rely on
    /// the groups sharing it; the XOR variant runs no proofs over its
    /// message group and is exempt.
    pub fn group_order(&self) -> U2048 {
        if self.variant != ProofVariant::XorTesting {
            debug_assert_eq!(self.key_group.order(), self.msg_group.order());
            debug_assert_eq!(self.client_key_group.order(), self.msg_group.order());
        }

        self.key_group.order()
    }

    /// Byte width of a serialized exponent.
    pub fn exponent_width(&self) -> usize {
        let bits: usize = self.group_order().bits();

        (bits + 7) / 8
    }

    pub fn apply_pairing(&self, a: &Element, b: &Element) -> Result<Element> {
        Ok(self.msg_group.apply_pairing(a, b)?)
    }

    /// Stable byte descriptor binding transcripts to this parameter set.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.round_nonce.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.round_nonce);
        out.push(match self.variant {
            ProofVariant::ElGamal => 0,
            ProofVariant::Pairing => 1,
            ProofVariant::HashingGenerator => 2,
            ProofVariant::XorTesting => 3,
        });
        for group in [&self.key_group, &self.client_key_group, &self.msg_group] {
            let descriptor = group.describe();
            out.extend_from_slice(&(descriptor.len() as u32).to_le_bytes());
            out.extend_from_slice(&descriptor);
        }
        out.extend_from_slice(&(self.n_elements as u32).to_le_bytes());

        out
    }
}
