// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Wire envelopes and message bodies. Every payload is a bincode-encoded
//! [`Envelope`] with the sender's long-term signature appended; maps are
//! `BTreeMap` keyed by peer id or server index so that serialization is
//! deterministic on every participant.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use blogdrop::KnowledgeProof;

use crate::identity::PeerId;
use crate::{Error, Result};

/// The round nonce; doubles as the replay-protection context for every
/// proof and signature of the round.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct RoundId(pub [u8; 32]);

impl RoundId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum MessageType {
    ClientPublicKey,
    ClientMasterPublicKey,
    ServerPublicKey,
    ServerMasterPublicKey,
    ClientCiphertext,
    ServerClientList,
    ServerCiphertext,
    ServerValidation,
    ServerCleartext,
}

/// `(message_type, round_id, phase, body)`, the prefix of every payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub message_type: MessageType,
    pub round_id: RoundId,
    pub phase: u64,
    pub body: Vec<u8>,
}

const SIGNATURE_LENGTH: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// Serialize and sign an envelope for the wire.
pub fn seal(envelope: &Envelope, signing_key: &SigningKey) -> Result<Vec<u8>> {
    let mut payload = bincode::serialize(envelope)?;
    let signature = signing_key.sign(&payload);
    payload.extend_from_slice(&signature.to_bytes());

    Ok(payload)
}

/// Verify a sealed payload against the claimed sender's key and return the
/// envelope.
pub fn open(payload: &[u8], verifying_key: &VerifyingKey) -> Result<Envelope> {
    if payload.len() < SIGNATURE_LENGTH {
        return Err(Error::InvalidSignature);
    }
    let (body, signature_bytes) = payload.split_at(payload.len() - SIGNATURE_LENGTH);

    let signature =
        Signature::from_slice(signature_bytes).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(body, &signature)
        .map_err(|_| Error::InvalidSignature)?;

    Ok(bincode::deserialize(body)?)
}

/// A packet signed by a client's long-term key and relayed verbatim by its
/// server, so every participant can check provenance end-to-end.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedClientPacket {
    pub packet: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedClientPacket {
    pub fn sign(packet: Vec<u8>, signing_key: &SigningKey) -> Self {
        let signature = signing_key.sign(&packet).to_bytes().to_vec();

        Self { packet, signature }
    }

    pub fn verify(&self, verifying_key: &VerifyingKey) -> Result<()> {
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| Error::InvalidSignature)?;

        verifying_key
            .verify(&self.packet, &signature)
            .map_err(|_| Error::InvalidSignature)
    }
}

/// Inner payload of a `CLIENT_PUBLIC_KEY` packet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientKeyPacket {
    pub round_id: RoundId,
    pub proof: KnowledgeProof,
    pub public_key: Vec<u8>,
}

/// Body of `SERVER_PUBLIC_KEY`: the server's own key with its knowledge
/// proof, plus every client packet it collected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerPublicKeyBody {
    pub public_key: Vec<u8>,
    pub proof: KnowledgeProof,
    pub client_packets: BTreeMap<PeerId, SignedClientPacket>,
}

/// Inner payload of a `CLIENT_MASTER_PUBLIC_KEY` packet: the client's
/// commit-matrix row, one cell per server in subgroup order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientMasterPacket {
    pub round_id: RoundId,
    pub commits: Vec<Vec<u8>>,
}

/// Body of `SERVER_MASTER_PUBLIC_KEY`: the server's derived master key and
/// commit-matrix column, plus the client master packets it collected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerMasterKeyBody {
    pub master_public_key: Vec<u8>,
    pub commits: Vec<Vec<u8>>,
    pub client_packets: BTreeMap<PeerId, SignedClientPacket>,
}

/// Body of `CLIENT_CIPHERTEXT` and `SERVER_CIPHERTEXT`: one ciphertext per
/// slot, empty placeholders for closed slots.
pub type CiphertextList = Vec<Vec<u8>>;

/// Body of `SERVER_CLIENT_LIST`: every client ciphertext body this server
/// collected during the phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerClientListBody {
    pub ciphertexts: BTreeMap<PeerId, Vec<u8>>,
}

/// Body of `SERVER_CLEARTEXT`: the canonical cleartext with every server's
/// signature over it, keyed by server index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerCleartextBody {
    pub signatures: BTreeMap<u32, Vec<u8>>,
    pub cleartext: Vec<u8>,
}
