// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Collaborator interfaces. The round holds these as one-way trait objects
//! supplied at construction and never hands out a reference to itself; the
//! outer session drives the round through its public methods instead.

use crate::identity::PeerId;
use crate::Result;

/// Message transport. Payloads are already sealed (signed) by the round;
/// implementations only move bytes.
///
/// Broadcast methods exclude the local peer: the round accounts for its own
/// contributions directly, without a loopback delivery.
pub trait Network: Send {
    fn send(&mut self, to: &PeerId, payload: Vec<u8>);

    /// Deliver to every other group member.
    fn broadcast(&mut self, payload: Vec<u8>);

    /// Deliver to every other member of the server subgroup.
    fn broadcast_to_servers(&mut self, payload: Vec<u8>);

    /// Deliver to every connected non-server member.
    fn broadcast_to_clients(&mut self, payload: Vec<u8>);
}

/// The application half of the round: local data in, decoded payloads out,
/// plus the connection and timer facts only the session layer knows.
pub trait RoundSession: Send {
    /// Fetch up to `max` bytes of application data to transmit anonymously.
    /// The second component signals more data is pending.
    fn get_data(&mut self, max: usize) -> (Vec<u8>, bool);

    /// A decoded slot payload, delivered once per slot per phase.
    fn push_data(&mut self, slot: usize, payload: &[u8]);

    /// The non-server members currently connected to this peer. Meaningful
    /// on servers only.
    fn connected_clients(&self) -> Vec<PeerId>;

    /// The server this client submits through. Meaningful on clients only.
    fn upstream_server(&self) -> Option<PeerId>;

    /// Ask the session to call
    /// [`crate::BulkRound::client_window_expired`] with `phase` once the
    /// client-submission window elapses.
    fn schedule_client_window(&mut self, phase: u64);

    /// The round finished, successfully or not.
    fn round_stopped(&mut self, _reason: &str, _interrupted: bool, _bad_members: &[PeerId]) {}
}

/// The external key-shuffle collaborator. The round feeds its anonymous
/// slot key in through [`ShuffleRound::start`]; the session delivers the
/// permuted key list back via [`crate::BulkRound::shuffle_complete`].
pub trait ShuffleRound: Send {
    fn start(&mut self, input: Vec<u8>) -> Result<()>;
}
