// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! The labeled-state driver. The machine itself is passive data: the round
//! registers one spec per state (expected inbound message type and successor
//! edge), and drives transitions through [`StateMachine::advance`]. Inbound
//! messages that do not match the current state's expectation are queued
//! here and re-dispatched once the matching state and phase are entered.

use std::collections::HashMap;

use crate::identity::PeerId;
use crate::message::{Envelope, MessageType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Offline,
    Shuffling,
    ProcessDataShuffle,
    ServerWaitForClientPublicKeys,
    WaitForServerPublicKeys,
    ServerWaitForClientMasterPublicKeys,
    WaitForServerMasterPublicKeys,
    PrepareForBulk,
    ClientWaitForCleartext,
    ServerWaitForClientCiphertext,
    ServerWaitForClientLists,
    ServerWaitForServerCiphertext,
    ServerWaitForServerValidation,
    ServerPushCleartext,
    Finished,
}

/// What a handler or state-entry callback reports back to the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Stay in the current state and keep collecting.
    Pending,
    /// The state finished its work; advance.
    Complete,
}

struct StateSpec {
    expected: Option<MessageType>,
    next: Option<State>,
}

pub(crate) struct StateMachine {
    table: HashMap<State, StateSpec>,
    current: State,
    phase: u64,
    cycle_state: Option<State>,
    cycle_started: bool,
    queued: Vec<(PeerId, Envelope)>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            current: State::Offline,
            phase: 0,
            cycle_state: None,
            cycle_started: false,
            queued: Vec::new(),
        }
    }

    pub fn add_state(&mut self, state: State, expected: Option<MessageType>, next: Option<State>) {
        self.table.insert(state, StateSpec { expected, next });
    }

    /// The state re-entered at the start of every phase after the first.
    pub fn set_cycle_state(&mut self, state: State) {
        self.cycle_state = Some(state);
    }

    pub fn current(&self) -> State {
        self.current
    }

    pub fn phase(&self) -> u64 {
        self.phase
    }

    pub fn set_state(&mut self, state: State) {
        self.current = state;
    }

    /// Whether `envelope` is what the current state is waiting for.
    pub fn matches_current(&self, envelope: &Envelope) -> bool {
        envelope.phase == self.phase
            && self
                .table
                .get(&self.current)
                .and_then(|spec| spec.expected)
                == Some(envelope.message_type)
    }

    /// Whether the message can still become relevant (queue it) or is
    /// stale (drop it).
    pub fn is_stale(&self, envelope: &Envelope) -> bool {
        envelope.phase < self.phase
    }

    pub fn queue(&mut self, from: PeerId, envelope: Envelope) {
        self.queued.push((from, envelope));
    }

    /// Remove and return the queued messages matching the current state and
    /// phase.
    pub fn drain_current(&mut self) -> Vec<(PeerId, Envelope)> {
        let mut matching = Vec::new();
        let mut remaining = Vec::new();
        for (from, envelope) in self.queued.drain(..) {
            if self.phase == envelope.phase
                && self.table.get(&self.current).and_then(|spec| spec.expected)
                    == Some(envelope.message_type)
            {
                matching.push((from, envelope));
            } else {
                remaining.push((from, envelope));
            }
        }
        self.queued = remaining;

        matching
    }

    /// Step to the successor state. Returns `true` when this transition
    /// re-enters the cycle state, i.e. concludes a phase.
    pub fn advance(&mut self) -> bool {
        let next = self
            .table
            .get(&self.current)
            .and_then(|spec| spec.next)
            .unwrap_or(State::Finished);

        let cycled = if Some(next) == self.cycle_state {
            let first_entry = !self.cycle_started;
            self.cycle_started = true;
            if !first_entry {
                self.phase += 1;
            }
            !first_entry
        } else {
            false
        };

        self.current = next;

        cycled
    }
}
