// Author: dWallet Labs, Ltd.
// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use std::collections::BTreeMap;
use std::fmt;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A stable peer identifier. Ordering is lexicographic on the raw bytes,
/// which is also the canonical ordering for every wire map.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 16]);

impl PeerId {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…)")
    }
}

/// A member's identity: its id and long-term verification key.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub id: PeerId,
    pub verifying_key: VerifyingKey,
}

/// The immutable, ordered roster of one round: every member, with the
/// server committee as a distinguished subset. Every participant holds an
/// identical copy before the round starts.
#[derive(Clone, Debug)]
pub struct Directory {
    members: Vec<PeerInfo>,
    indices: BTreeMap<PeerId, usize>,
    servers: Vec<PeerId>,
    server_indices: BTreeMap<PeerId, usize>,
}

impl Directory {
    pub fn new(members: Vec<PeerInfo>, servers: Vec<PeerId>) -> Result<Self> {
        let indices: BTreeMap<PeerId, usize> = members
            .iter()
            .enumerate()
            .map(|(index, info)| (info.id, index))
            .collect();
        if indices.len() != members.len() {
            return Err(Error::InvalidConfiguration("duplicate member id".into()));
        }

        let server_indices: BTreeMap<PeerId, usize> = servers
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index))
            .collect();
        if server_indices.len() != servers.len() {
            return Err(Error::InvalidConfiguration("duplicate server id".into()));
        }
        if servers.is_empty() {
            return Err(Error::InvalidConfiguration("no servers".into()));
        }
        if servers.iter().any(|id| !indices.contains_key(id)) {
            return Err(Error::InvalidConfiguration(
                "server is not a group member".into(),
            ));
        }

        Ok(Self {
            members,
            indices,
            servers,
            server_indices,
        })
    }

    /// Total member count. Every member owns one anonymity slot.
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.indices.contains_key(id)
    }

    pub fn is_server(&self, id: &PeerId) -> bool {
        self.server_indices.contains_key(id)
    }

    pub fn index_of(&self, id: &PeerId) -> Option<usize> {
        self.indices.get(id).copied()
    }

    pub fn server_index_of(&self, id: &PeerId) -> Option<usize> {
        self.server_indices.get(id).copied()
    }

    pub fn server_at(&self, index: usize) -> Option<&PeerId> {
        self.servers.get(index)
    }

    pub fn servers(&self) -> &[PeerId] {
        &self.servers
    }

    pub fn members(&self) -> &[PeerInfo] {
        &self.members
    }

    pub fn verifying_key(&self, id: &PeerId) -> Option<&VerifyingKey> {
        self.indices
            .get(id)
            .map(|&index| &self.members[index].verifying_key)
    }
}
