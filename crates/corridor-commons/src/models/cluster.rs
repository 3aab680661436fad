//! The replicated cluster-configuration document.
//!
//! This is the state carried by the peer replication group: the member
//! list, the slot→replica assignments, and the observed slot leaders. A
//! JSON copy is written to `${data_dir}/cluster/${peer_id}/cluster.json`
//! after every applied change for warm starts; the replicated log remains
//! the source of truth.

use serde::{Deserialize, Serialize};

use super::Peer;

/// One shard of the channel keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Slot {
    pub slot_id: u32,
    /// Peers hosting replicas of this slot, in allocation order.
    pub peers: Vec<u64>,
    /// Current leader, 0 = unknown.
    #[serde(default)]
    pub leader_peer_id: u64,
    #[serde(default)]
    pub term: u64,
}

impl Slot {
    pub fn hosts(&self, peer_id: u64) -> bool {
        self.peers.contains(&peer_id)
    }
}

/// The full replicated configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterDocument {
    pub peers: Vec<Peer>,
    pub slots: Vec<Slot>,
    pub slot_count: u32,
    pub replica_count: u32,
}

impl ClusterDocument {
    pub fn get_peer(&self, peer_id: u64) -> Option<&Peer> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }

    pub fn get_slot(&self, slot_id: u32) -> Option<&Slot> {
        self.slots.iter().find(|s| s.slot_id == slot_id)
    }
}

/// A proposed slot→replica assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateSlot {
    pub slot_id: u32,
    pub peers: Vec<u64>,
}

/// A batch of slot assignments proposed together.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocateSlotSet {
    pub allocate_slots: Vec<AllocateSlot>,
}

/// An observed slot leader, proposed for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLeaderRelation {
    pub slot_id: u32,
    pub leader_peer_id: u64,
    pub term: u64,
}

/// A batch of observed leader changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotLeaderRelationSet {
    pub relations: Vec<SlotLeaderRelation>,
}
