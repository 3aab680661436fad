//! Replication group identifiers.
//!
//! The cluster runs `1 + slot_count` replication groups: group 0 carries the
//! cluster configuration ("peer" group), groups `1..=slot_count` carry the
//! per-slot channel logs. Not every slot group runs on every node.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one replication group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupId {
    /// The cluster-configuration group (peers, slot assignments, leaders).
    Peer,
    /// The replicated log of one slot.
    Slot(u32),
}

impl GroupId {
    /// Stable numeric encoding used on the wire and in storage prefixes:
    /// peer group = 0, slot `n` = `n + 1`.
    pub fn as_u64(&self) -> u64 {
        match self {
            GroupId::Peer => 0,
            GroupId::Slot(slot) => 1 + *slot as u64,
        }
    }

    pub fn from_u64(id: u64) -> Option<GroupId> {
        match id {
            0 => Some(GroupId::Peer),
            n if n <= u32::MAX as u64 => Some(GroupId::Slot((n - 1) as u32)),
            _ => None,
        }
    }

    pub fn is_peer(&self) -> bool {
        matches!(self, GroupId::Peer)
    }

    pub fn slot_id(&self) -> Option<u32> {
        match self {
            GroupId::Peer => None,
            GroupId::Slot(slot) => Some(*slot),
        }
    }

    /// Storage partition prefix for this group's raft state.
    pub fn partition_prefix(&self) -> String {
        match self {
            GroupId::Peer => "raft_peer".to_string(),
            GroupId::Slot(slot) => format!("raft_slot_{:04}", slot),
        }
    }

    /// All group ids for a cluster with the given slot count, peer group
    /// first.
    pub fn all_groups(slot_count: u32) -> Vec<GroupId> {
        let mut groups = Vec::with_capacity(1 + slot_count as usize);
        groups.push(GroupId::Peer);
        for slot in 0..slot_count {
            groups.push(GroupId::Slot(slot));
        }
        groups
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::Peer => write!(f, "peer"),
            GroupId::Slot(slot) => write!(f, "slot:{:04}", slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_roundtrip() {
        for id in [0u64, 1, 2, 65, 1024] {
            let group = GroupId::from_u64(id).unwrap();
            assert_eq!(group.as_u64(), id);
        }
    }

    #[test]
    fn group_id_display() {
        assert_eq!(GroupId::Peer.to_string(), "peer");
        assert_eq!(GroupId::Slot(5).to_string(), "slot:0005");
    }

    #[test]
    fn all_groups_count() {
        let groups = GroupId::all_groups(64);
        assert_eq!(groups.len(), 65);
        assert_eq!(groups[0], GroupId::Peer);
        assert_eq!(groups[64], GroupId::Slot(63));
    }

    #[test]
    fn partition_prefix() {
        assert_eq!(GroupId::Peer.partition_prefix(), "raft_peer");
        assert_eq!(GroupId::Slot(5).partition_prefix(), "raft_slot_0005");
    }
}
