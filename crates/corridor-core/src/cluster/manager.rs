//! The cluster configuration manager.
//!
//! Owns the canonical [`ClusterDocument`] — peers, slot assignments, slot
//! leaders — and reconciles desired against observed state. All durable
//! mutations arrive through the peer-group apply path (`apply_*`); the
//! manager itself never writes the document except there, so reads can
//! never observe an assignment that was not committed in the peer log.
//!
//! A JSON copy is written after every applied change for warm starts.

use std::path::PathBuf;

use corridor_commons::models::{
    AllocateSlot, AllocateSlotSet, ClusterDocument, Peer, Slot, SlotLeaderRelation,
    SlotLeaderRelationSet,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct ClusterManagerOptions {
    pub peer_id: u64,
    pub slot_count: u32,
    pub replica_count: u32,
    /// Warm-start file: `${data_dir}/cluster/${peer_id}/cluster.json`.
    pub config_path: PathBuf,
    /// This node's advertised addresses, announced via `UpdatePeerConfig`.
    pub server_addr: String,
    pub grpc_addr: String,
    pub api_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotActionKind {
    /// The slot's replication group should run on this node.
    Start,
}

#[derive(Debug, Clone)]
pub struct SlotAction {
    pub slot_id: u32,
    pub action: SlotActionKind,
}

/// One batch of reconciliation work emitted to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ClusterReady {
    pub allocate_slot_set: Option<AllocateSlotSet>,
    pub slot_actions: Vec<SlotAction>,
    pub update_peer: Option<Peer>,
    pub slot_leader_relation_set: Option<SlotLeaderRelationSet>,
}

impl ClusterReady {
    pub fn is_empty(&self) -> bool {
        self.allocate_slot_set.is_none()
            && self.slot_actions.is_empty()
            && self.update_peer.is_none()
            && self.slot_leader_relation_set.is_none()
    }
}

pub struct ClusterManager {
    opts: ClusterManagerOptions,
    state: RwLock<ClusterDocument>,
    /// Current peer-group leader (0 = unknown).
    leader_id: AtomicU64,
    /// Leaders observed from raft metrics, pending persistence:
    /// slot → (leader, term).
    observed_leaders: DashMap<u32, (u64, u64)>,
    /// Leaders as last committed through the peer log. Observations are
    /// reflected in reads at once but only count as persisted when they
    /// come back through the apply path.
    persisted_leaders: DashMap<u32, (u64, u64)>,
}

impl ClusterManager {
    pub fn new(opts: ClusterManagerOptions) -> Self {
        Self {
            opts,
            state: RwLock::new(ClusterDocument::default()),
            leader_id: AtomicU64::new(0),
            observed_leaders: DashMap::new(),
            persisted_leaders: DashMap::new(),
        }
    }

    pub fn options(&self) -> &ClusterManagerOptions {
        &self.opts
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    pub fn get_peer(&self, peer_id: u64) -> Option<Peer> {
        self.state.read().get_peer(peer_id).cloned()
    }

    pub fn get_peers(&self) -> Vec<Peer> {
        self.state.read().peers.clone()
    }

    pub fn get_slot(&self, slot_id: u32) -> Option<Slot> {
        self.state.read().get_slot(slot_id).cloned()
    }

    /// The slot's current leader peer, if elected and known.
    pub fn get_leader_peer(&self, slot_id: u32) -> Option<Peer> {
        let state = self.state.read();
        let slot = state.get_slot(slot_id)?;
        if slot.leader_peer_id == 0 {
            return None;
        }
        state.get_peer(slot.leader_peer_id).cloned()
    }

    pub fn slot_count(&self) -> u32 {
        let configured = self.state.read().slot_count;
        if configured > 0 {
            configured
        } else {
            self.opts.slot_count
        }
    }

    /// True once a committed cluster configuration exists.
    pub fn initialized(&self) -> bool {
        !self.state.read().peers.is_empty()
    }

    pub fn is_replica_of(&self, slot_id: u32) -> bool {
        self.get_slot(slot_id)
            .map(|s| s.hosts(self.opts.peer_id))
            .unwrap_or(false)
    }

    pub fn leader_id(&self) -> u64 {
        self.leader_id.load(Ordering::SeqCst)
    }

    pub fn is_peer_leader(&self) -> bool {
        self.leader_id() == self.opts.peer_id
    }

    // ─── Observations ───────────────────────────────────────────────────

    pub fn set_leader_id(&self, leader_id: u64) {
        self.leader_id.store(leader_id, Ordering::SeqCst);
    }

    /// Records an observed slot leader. Takes effect for reads at once;
    /// durability follows when the peer leader proposes the relation set.
    pub fn set_slot_leader(&self, slot_id: u32, leader_peer_id: u64, term: u64) {
        self.observed_leaders.insert(slot_id, (leader_peer_id, term));
        let mut state = self.state.write();
        if let Some(slot) = state.slots.iter_mut().find(|s| s.slot_id == slot_id) {
            slot.leader_peer_id = leader_peer_id;
            if term > slot.term {
                slot.term = term;
            }
        }
    }

    // ─── Reconciliation ─────────────────────────────────────────────────

    /// Computes the next batch of reconciliation work. `slot_started`
    /// reports whether a slot's replica is already running locally.
    pub fn tick(&self, slot_started: &dyn Fn(u32) -> bool) -> ClusterReady {
        let mut ready = ClusterReady::default();
        let state = self.state.read();

        if state.peers.is_empty() {
            return ready;
        }

        // Peer-leader duties: allocate unassigned slots, persist observed
        // slot leaders.
        if self.is_peer_leader() {
            let allocate = self.build_allocations(&state);
            if !allocate.allocate_slots.is_empty() {
                ready.allocate_slot_set = Some(allocate);
            }

            let mut relations = Vec::new();
            for entry in self.observed_leaders.iter() {
                let (slot_id, (leader, term)) = (*entry.key(), *entry.value());
                if leader == 0 {
                    continue;
                }
                let persisted = self
                    .persisted_leaders
                    .get(&slot_id)
                    .map(|v| *v)
                    .unwrap_or((0, 0));
                if persisted != (leader, term) {
                    relations.push(SlotLeaderRelation {
                        slot_id,
                        leader_peer_id: leader,
                        term,
                    });
                }
            }
            if !relations.is_empty() {
                ready.slot_leader_relation_set = Some(SlotLeaderRelationSet { relations });
            }
        }

        // Local duties: start replicas assigned to this node, announce
        // changed addresses.
        for slot in &state.slots {
            if slot.hosts(self.opts.peer_id) && !slot_started(slot.slot_id) {
                ready.slot_actions.push(SlotAction {
                    slot_id: slot.slot_id,
                    action: SlotActionKind::Start,
                });
            }
        }

        if let Some(me) = state.get_peer(self.opts.peer_id) {
            if me.api_addr != self.opts.api_addr || me.grpc_addr != self.opts.grpc_addr {
                let mut updated = me.clone();
                updated.api_addr = self.opts.api_addr.clone();
                updated.grpc_addr = self.opts.grpc_addr.clone();
                ready.update_peer = Some(updated);
            }
        }

        ready
    }

    /// Round-robin assignment of every unallocated slot across the peer
    /// list. Replica sets rotate so each peer hosts
    /// ⌈slots·replicas/peers⌉ or ⌊slots·replicas/peers⌋ slots.
    fn build_allocations(&self, state: &ClusterDocument) -> AllocateSlotSet {
        let mut peer_ids: Vec<u64> = state.peers.iter().map(|p| p.peer_id).collect();
        peer_ids.sort_unstable();
        let replica_count = (self.opts.replica_count as usize).min(peer_ids.len()).max(1);

        let slot_count = if state.slot_count > 0 {
            state.slot_count
        } else {
            self.opts.slot_count
        };

        let mut allocations = Vec::new();
        for slot_id in 0..slot_count {
            if state.get_slot(slot_id).is_some() {
                continue;
            }
            let peers = (0..replica_count)
                .map(|k| peer_ids[(slot_id as usize + k) % peer_ids.len()])
                .collect();
            allocations.push(AllocateSlot { slot_id, peers });
        }
        AllocateSlotSet {
            allocate_slots: allocations,
        }
    }

    // ─── Apply path (peer-group state machine only) ─────────────────────

    pub fn apply_cluster_config(&self, doc: ClusterDocument) {
        self.persisted_leaders.clear();
        for slot in &doc.slots {
            if slot.leader_peer_id != 0 {
                self.persisted_leaders
                    .insert(slot.slot_id, (slot.leader_peer_id, slot.term));
            }
        }
        {
            let mut state = self.state.write();
            *state = doc;
        }
        self.save();
    }

    pub fn apply_update_peer(&self, peer: Peer) {
        {
            let mut state = self.state.write();
            match state.peers.iter_mut().find(|p| p.peer_id == peer.peer_id) {
                Some(existing) => *existing = peer,
                None => state.peers.push(peer),
            }
        }
        self.save();
    }

    pub fn apply_allocate_slots(&self, set: &AllocateSlotSet) {
        {
            let mut state = self.state.write();
            for allocation in &set.allocate_slots {
                if state.get_slot(allocation.slot_id).is_some() {
                    continue;
                }
                state.slots.push(Slot {
                    slot_id: allocation.slot_id,
                    peers: allocation.peers.clone(),
                    leader_peer_id: 0,
                    term: 0,
                });
            }
            state.slots.sort_by_key(|s| s.slot_id);
        }
        self.save();
    }

    pub fn apply_slot_leader_relations(&self, set: &SlotLeaderRelationSet) {
        {
            let mut state = self.state.write();
            for relation in &set.relations {
                self.persisted_leaders.insert(
                    relation.slot_id,
                    (relation.leader_peer_id, relation.term),
                );
                if let Some(slot) = state
                    .slots
                    .iter_mut()
                    .find(|s| s.slot_id == relation.slot_id)
                {
                    slot.leader_peer_id = relation.leader_peer_id;
                    slot.term = relation.term;
                }
            }
        }
        self.save();
    }

    // ─── Snapshot / warm start ──────────────────────────────────────────

    pub fn snapshot_document(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&*self.state.read())
            .map_err(|e| CoreError::Internal(format!("cluster snapshot encode: {}", e)))
    }

    pub fn restore_document(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let doc: ClusterDocument = serde_json::from_slice(data)
            .map_err(|e| CoreError::Internal(format!("cluster snapshot decode: {}", e)))?;
        self.apply_cluster_config(doc);
        Ok(())
    }

    /// Loads the warm-start copy if present. The peer log remains the
    /// source of truth; replayed entries overwrite whatever this loads.
    pub fn load(&self) -> Result<()> {
        if !self.opts.config_path.exists() {
            return Ok(());
        }
        let bytes = std::fs::read(&self.opts.config_path)
            .map_err(|e| CoreError::Internal(format!("read cluster config: {}", e)))?;
        let doc: ClusterDocument = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Internal(format!("parse cluster config: {}", e)))?;
        let mut state = self.state.write();
        *state = doc;
        Ok(())
    }

    fn save(&self) {
        let state = self.state.read();
        if let Some(parent) = self.opts.config_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create cluster config dir: {}", e);
                return;
            }
        }
        match serde_json::to_vec_pretty(&*state) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.opts.config_path, bytes) {
                    log::error!(
                        "Failed to write {}: {}",
                        self.opts.config_path.display(),
                        e
                    );
                }
            }
            Err(e) => log::error!("Failed to encode cluster config: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(peer_id: u64, slot_count: u32, replica_count: u32) -> ClusterManagerOptions {
        let dir = tempfile::tempdir().unwrap();
        ClusterManagerOptions {
            peer_id,
            slot_count,
            replica_count,
            config_path: dir.into_path().join("cluster.json"),
            server_addr: format!("127.0.0.1:1111{}", peer_id),
            grpc_addr: format!("127.0.0.1:1112{}", peer_id),
            api_addr: format!("http://127.0.0.1:500{}", peer_id),
        }
    }

    fn seeded(manager: &ClusterManager, peer_count: u64) {
        let peers = (1..=peer_count)
            .map(|id| {
                let mut p = Peer::new(id, format!("10.0.0.{}:1", id), format!("10.0.0.{}:2", id));
                p.api_addr = format!("http://10.0.0.{}:5001", id);
                p
            })
            .collect();
        manager.apply_cluster_config(ClusterDocument {
            peers,
            slots: vec![],
            slot_count: manager.opts.slot_count,
            replica_count: manager.opts.replica_count,
        });
    }

    #[test]
    fn allocation_is_balanced() {
        let manager = ClusterManager::new(options(1, 64, 1));
        manager.set_leader_id(1);
        seeded(&manager, 3);

        let ready = manager.tick(&|_| false);
        let set = ready.allocate_slot_set.expect("allocations expected");
        assert_eq!(set.allocate_slots.len(), 64);

        let mut per_peer = std::collections::HashMap::new();
        for allocation in &set.allocate_slots {
            assert_eq!(allocation.peers.len(), 1);
            *per_peer.entry(allocation.peers[0]).or_insert(0usize) += 1;
        }
        // 64 slots over 3 peers: 22 or 21 each.
        for count in per_peer.values() {
            assert!(*count == 21 || *count == 22, "unbalanced: {:?}", per_peer);
        }
    }

    #[test]
    fn replica_count_is_capped_by_peer_count() {
        let manager = ClusterManager::new(options(1, 4, 3));
        manager.set_leader_id(1);
        seeded(&manager, 2);

        let ready = manager.tick(&|_| false);
        let set = ready.allocate_slot_set.unwrap();
        assert!(set.allocate_slots.iter().all(|a| a.peers.len() == 2));
    }

    #[test]
    fn follower_does_not_allocate() {
        let manager = ClusterManager::new(options(2, 8, 1));
        manager.set_leader_id(1);
        seeded(&manager, 3);

        let ready = manager.tick(&|_| false);
        assert!(ready.allocate_slot_set.is_none());
    }

    #[test]
    fn local_slots_get_start_actions() {
        let manager = ClusterManager::new(options(1, 4, 1));
        manager.set_leader_id(1);
        seeded(&manager, 1);
        manager.apply_allocate_slots(&AllocateSlotSet {
            allocate_slots: (0..4)
                .map(|slot_id| AllocateSlot {
                    slot_id,
                    peers: vec![1],
                })
                .collect(),
        });

        let ready = manager.tick(&|slot| slot < 2);
        let to_start: Vec<u32> = ready.slot_actions.iter().map(|a| a.slot_id).collect();
        assert_eq!(to_start, vec![2, 3]);
    }

    #[test]
    fn observed_leaders_are_persisted_by_the_peer_leader() {
        let manager = ClusterManager::new(options(1, 2, 1));
        manager.set_leader_id(1);
        seeded(&manager, 1);
        manager.apply_allocate_slots(&AllocateSlotSet {
            allocate_slots: vec![AllocateSlot {
                slot_id: 0,
                peers: vec![1],
            }],
        });

        manager.set_slot_leader(0, 1, 3);
        // Reads see the observation immediately.
        assert_eq!(manager.get_leader_peer(0).unwrap().peer_id, 1);

        // Not yet committed through the peer log, so the leader proposes it.
        let ready = manager.tick(&|_| true);
        let set = ready.slot_leader_relation_set.expect("relation expected");
        assert_eq!(set.relations[0].leader_peer_id, 1);
        assert_eq!(set.relations[0].term, 3);

        // Once applied, the observation is persisted and stops recurring.
        manager.apply_slot_leader_relations(&set);
        let ready = manager.tick(&|_| true);
        assert!(ready.slot_leader_relation_set.is_none());
    }

    #[test]
    fn warm_start_roundtrip() {
        let opts = options(1, 4, 1);
        let path = opts.config_path.clone();
        {
            let manager = ClusterManager::new(opts.clone());
            seeded(&manager, 2);
        }
        let manager = ClusterManager::new(opts);
        manager.load().unwrap();
        assert!(manager.initialized());
        assert_eq!(manager.get_peers().len(), 2);
        assert!(path.exists());
    }
}
