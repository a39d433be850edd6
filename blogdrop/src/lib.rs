// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

pub use keys::{KnowledgeProof, PrivateKey, PublicKey, PublicKeySet};
pub use parameters::{Parameters, ProofVariant};
pub use plaintext::Plaintext;
pub use slot::{new_slot_crypto, Author, BinServer, CoverClient, SlotCrypto, SlotKeys};

pub mod keys;
pub mod master;
pub mod parameters;
pub mod plaintext;
pub(crate) mod sigma;
pub mod slot;

/// BlogDrop error.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("group error")]
    Group(#[from] group::Error),
    #[error("invalid proof: did not satisfy the verification equation")]
    ProofVerification,
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
    #[error("message of {got} bytes exceeds the {capacity}-byte plaintext capacity")]
    MessageTooLong { got: usize, capacity: usize },
    #[error("accumulated elements do not decode to a valid message")]
    NoValidMessage,
    #[error("client ciphertext at position {index} failed proof verification")]
    InvalidClientProof { index: usize },
    #[error("ciphertext submitted to a closed bin")]
    BinClosed,
    #[error("this engine does not hold the secret required for `{0}`")]
    MissingSecret(&'static str),
    #[error("serialization/deserialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// BlogDrop result.
pub type Result<T> = std::result::Result<T, Error>;
