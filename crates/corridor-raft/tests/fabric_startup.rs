//! Integration tests for fabric startup on a single node.
//!
//! Demonstrates:
//! - Peer-group bootstrap and election
//! - Slot group startup on demand
//! - Command proposal through commit + apply

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corridor_raft::fabric::{FabricConfig, RaftFabric};
use corridor_raft::group::GroupRaftConfig;
use corridor_raft::state_machine::{ApplyResult, GroupStateMachine, StateMachineSnapshot};
use corridor_raft::{GroupId, PeerNode, RaftError};
use parking_lot::Mutex;

/// Appends every applied entry to a shared journal.
struct JournalStateMachine {
    group_id: GroupId,
    journal: Arc<Mutex<Vec<Vec<u8>>>>,
    last_applied: AtomicU64,
}

impl JournalStateMachine {
    fn new(group_id: GroupId, journal: Arc<Mutex<Vec<Vec<u8>>>>) -> Self {
        Self {
            group_id,
            journal,
            last_applied: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl GroupStateMachine for JournalStateMachine {
    fn group_id(&self) -> GroupId {
        self.group_id
    }

    async fn apply(&self, index: u64, _term: u64, entry: &[u8]) -> Result<ApplyResult, RaftError> {
        if index <= self.last_applied.load(Ordering::SeqCst) {
            return Ok(ApplyResult::NoOp);
        }
        self.journal.lock().push(entry.to_vec());
        self.last_applied.store(index, Ordering::SeqCst);
        Ok(ApplyResult::ok_with_data(entry.to_vec()))
    }

    fn last_applied_index(&self) -> u64 {
        self.last_applied.load(Ordering::SeqCst)
    }

    fn last_applied_term(&self) -> u64 {
        0
    }

    async fn snapshot(&self) -> Result<StateMachineSnapshot, RaftError> {
        Ok(StateMachineSnapshot {
            group_id: self.group_id,
            last_applied_index: self.last_applied_index(),
            last_applied_term: 0,
            data: Vec::new(),
        })
    }

    async fn restore(&self, snapshot: StateMachineSnapshot) -> Result<(), RaftError> {
        self.last_applied
            .store(snapshot.last_applied_index, Ordering::SeqCst);
        Ok(())
    }
}

fn single_node_fabric(
    journal: Arc<Mutex<Vec<Vec<u8>>>>,
) -> Arc<RaftFabric> {
    let peer_sm: Arc<dyn GroupStateMachine> = Arc::new(JournalStateMachine::new(
        GroupId::Peer,
        journal.clone(),
    ));
    let slot_journal = journal;
    Arc::new(RaftFabric::new(
        FabricConfig {
            peer_id: 1,
            listen_addr: "127.0.0.1:0".to_string(),
            grpc_listen_addr: "127.0.0.1:0".to_string(),
            api_addr: "http://127.0.0.1:5001".to_string(),
            slot_count: 4,
            raft: GroupRaftConfig {
                single_node: true,
                ..Default::default()
            },
            rpc_timeout: Duration::from_secs(5),
        },
        peer_sm,
        Box::new(move |slot_id| -> Arc<dyn GroupStateMachine> {
            Arc::new(JournalStateMachine::new(
                GroupId::Slot(slot_id),
                slot_journal.clone(),
            ))
        }),
    ))
}

async fn wait_for_leader(fabric: &Arc<RaftFabric>, group: GroupId) {
    for _ in 0..100 {
        if fabric.is_leader(group) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no leader elected for {}", group);
}

#[tokio::test]
async fn single_node_peer_group_elects_and_applies() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let fabric = single_node_fabric(journal.clone());

    assert!(!fabric.is_started());
    fabric.start().await.expect("fabric start");
    assert!(fabric.is_started());

    let mut members = BTreeMap::new();
    members.insert(1, PeerNode::new("127.0.0.1:0", "http://127.0.0.1:5001"));
    fabric
        .initialize_peer_group(members)
        .await
        .expect("initialize peer group");

    wait_for_leader(&fabric, GroupId::Peer).await;
    assert_eq!(fabric.current_leader(GroupId::Peer), Some(1));

    let result = fabric
        .sync_propose_to_peer(b"hello".to_vec())
        .await
        .expect("proposal");
    assert_eq!(result, b"hello".to_vec());
    assert_eq!(journal.lock().len(), 1);

    fabric.shutdown().await;
}

#[tokio::test]
async fn slot_groups_start_on_demand() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let fabric = single_node_fabric(journal.clone());
    fabric.start().await.unwrap();

    assert!(!fabric.is_slot_started(2));

    let mut members = BTreeMap::new();
    members.insert(1, PeerNode::new("127.0.0.1:0", "http://127.0.0.1:5001"));
    fabric
        .start_slot(2, members, true)
        .await
        .expect("start slot");
    assert!(fabric.is_slot_started(2));

    wait_for_leader(&fabric, GroupId::Slot(2)).await;

    let result = fabric
        .sync_propose_to_slot(2, b"m1".to_vec())
        .await
        .expect("slot proposal");
    assert_eq!(result, b"m1".to_vec());

    // An unknown slot is rejected, an unstarted one reports NotStarted.
    assert!(matches!(
        fabric.sync_propose_to_slot(99, b"x".to_vec()).await,
        Err(RaftError::GroupNotFound(_))
    ));
    assert!(matches!(
        fabric.sync_propose_to_slot(3, b"x".to_vec()).await,
        Err(RaftError::NotStarted(_))
    ));

    fabric.shutdown().await;
}

#[tokio::test]
async fn leader_changes_are_observed() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let fabric = single_node_fabric(journal);

    let observed: Arc<Mutex<Vec<(GroupId, Option<u64>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    fabric.set_on_leader_changed(Arc::new(move |group, leader| {
        sink.lock().push((group, leader));
    }));

    fabric.start().await.unwrap();
    let mut members = BTreeMap::new();
    members.insert(1, PeerNode::new("127.0.0.1:0", "http://127.0.0.1:5001"));
    fabric.initialize_peer_group(members).await.unwrap();
    wait_for_leader(&fabric, GroupId::Peer).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let events = observed.lock();
    assert!(
        events
            .iter()
            .any(|(group, leader)| *group == GroupId::Peer && *leader == Some(1)),
        "expected a peer-group leader event, got {:?}",
        *events
    );

    fabric.shutdown().await;
}

#[tokio::test]
async fn fabric_slot_count_is_enforced() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let fabric = single_node_fabric(journal);
    fabric.start().await.unwrap();

    let err = fabric
        .start_slot(99, BTreeMap::new(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, RaftError::GroupNotFound(_)));

    fabric.shutdown().await;
}
