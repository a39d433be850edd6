// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

pub use identity::{Directory, PeerId, PeerInfo};
pub use message::{Envelope, MessageType, RoundId};
pub use round::{BulkRound, LocalIdentity, ShuffleFailure, StopInfo};
pub use session::{Network, RoundSession, ShuffleRound};
pub use state::State;

pub mod identity;
pub mod message;
pub mod round;
pub mod session;
pub(crate) mod slots;
pub(crate) mod state;

/// Bulk-round error.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("group error")]
    Group(#[from] group::Error),
    #[error("blogdrop error")]
    BlogDrop(#[from] blogdrop::Error),
    #[error("serialization/deserialization error: {0}")]
    Serialization(String),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("sender is not a member of this round's group")]
    UnknownSender,
    #[error("the round has already finished")]
    Finished,
    #[error("invalid round configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Bulk-round result.
pub type Result<T> = std::result::Result<T, Error>;
