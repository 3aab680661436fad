//! Command execution: one interface whether the node is clustered or
//! standalone.
//!
//! Channel-scoped commands always flow through [`CommandExecutor`]. In
//! cluster mode that means encode → propose on the channel's slot →
//! decode the apply result; standalone mode applies straight to the FSM,
//! keeping a single code path above this seam.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use corridor_commons::models::{ChannelKey, Peer};
use corridor_raft::commands::{encode_command, Command, CommandResult};
use corridor_sharding::SlotRouter;

use crate::cluster::Cluster;
use crate::error::{CoreError, Result};
use crate::fsm::Fsm;

/// Where a channel's writes must land.
#[derive(Debug, Clone)]
pub enum LeaderLocation {
    Local,
    Remote(Peer),
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs a channel-scoped command through the replicated log (or the
    /// local FSM in standalone mode) and returns its apply result.
    async fn execute_channel(&self, channel: &ChannelKey, command: Command)
        -> Result<CommandResult>;

    /// Resolves the write leader for a channel.
    fn leader_location(&self, channel: &ChannelKey) -> Result<LeaderLocation>;
}

fn reject_apply_error(result: CommandResult) -> Result<CommandResult> {
    match result {
        CommandResult::Error(msg) => Err(CoreError::InvalidInput(msg)),
        other => Ok(other),
    }
}

/// Standalone-mode executor: applies to the FSM without replication.
pub struct DirectExecutor {
    fsm: Arc<Fsm>,
}

impl DirectExecutor {
    pub fn new(fsm: Arc<Fsm>) -> Self {
        Self { fsm }
    }
}

#[async_trait]
impl CommandExecutor for DirectExecutor {
    async fn execute_channel(
        &self,
        _channel: &ChannelKey,
        command: Command,
    ) -> Result<CommandResult> {
        self.fsm.apply(&command)
    }

    fn leader_location(&self, _channel: &ChannelKey) -> Result<LeaderLocation> {
        Ok(LeaderLocation::Local)
    }
}

/// Cluster-mode executor: routes commands to the channel's slot.
pub struct ClusterExecutor {
    cluster: Arc<Cluster>,
    router: SlotRouter,
    request_ids: AtomicU64,
}

impl ClusterExecutor {
    pub fn new(cluster: Arc<Cluster>, router: SlotRouter) -> Self {
        Self {
            cluster,
            router,
            request_ids: AtomicU64::new(0),
        }
    }

    pub fn slot_of(&self, channel: &ChannelKey) -> u32 {
        self.router.slot_of_key(channel)
    }
}

#[async_trait]
impl CommandExecutor for ClusterExecutor {
    async fn execute_channel(
        &self,
        channel: &ChannelKey,
        command: Command,
    ) -> Result<CommandResult> {
        let slot_id = self.slot_of(channel);
        let request_id = self.request_ids.fetch_add(1, Ordering::SeqCst) + 1;
        let bytes = encode_command(request_id, Some(slot_id), &command).map_err(CoreError::from)?;
        let result = self.cluster.sync_propose_to_slot(slot_id, bytes).await?;
        let result = CommandResult::decode_from(&result).map_err(CoreError::from)?;
        reject_apply_error(result)
    }

    fn leader_location(&self, channel: &ChannelKey) -> Result<LeaderLocation> {
        let slot_id = self.slot_of(channel);
        let leader = self
            .cluster
            .manager()
            .get_leader_peer(slot_id)
            .ok_or(CoreError::NotInitialized)?;
        if leader.peer_id == self.cluster.peer_id() {
            Ok(LeaderLocation::Local)
        } else {
            Ok(LeaderLocation::Remote(leader))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_commons::models::CHANNEL_TYPE_GROUP;
    use corridor_raft::commands::MembersParam;
    use corridor_store::{MemoryBackend, MessageStore};

    #[tokio::test]
    async fn direct_executor_applies_to_the_fsm() {
        let store = Arc::new(MessageStore::open(Arc::new(MemoryBackend::new())).unwrap());
        let executor = DirectExecutor::new(Arc::new(Fsm::new(store.clone())));

        let channel = ChannelKey::new("g1", CHANNEL_TYPE_GROUP);
        let result = executor
            .execute_channel(
                &channel,
                Command::AddSubscribers(MembersParam {
                    channel: channel.clone(),
                    uids: vec!["u1".to_string()],
                }),
            )
            .await
            .unwrap();
        assert_eq!(result, CommandResult::None);
        assert_eq!(store.get_subscribers(&channel).unwrap(), vec!["u1".to_string()]);
    }

    #[test]
    fn apply_errors_become_invalid_input() {
        let err = reject_apply_error(CommandResult::Error("bad".to_string())).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
