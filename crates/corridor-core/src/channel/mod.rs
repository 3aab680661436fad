//! The channel pipeline: per-channel ordering, authorisation, sequencing
//! and fan-out.
//!
//! The reactor is sharded into subs; a channel always lands on the same
//! sub, whose single mailbox consumer gives per-channel program order for
//! sends submitted by one client. Channel info and the materialised
//! receiver set are cached per channel and invalidated from the apply path
//! — including for mutations that were committed on another node and only
//! arrived here through the log.

use std::sync::Arc;

use corridor_commons::models::{ChannelInfo, ChannelKey, Message};
use corridor_raft::commands::{AppendMessagesParam, Command, CommandResult};
use corridor_sharding::channel_hash;
use corridor_store::MessageStore;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::delivery::DeliveryManager;
use crate::error::{CoreError, Result};
use crate::executor::CommandExecutor;
use crate::fsm::ApplyHook;
use crate::idgen::MessageIdGenerator;
use crate::types::{SendRequest, SendResult};

/// Hard cap on a single message payload.
pub const MAX_PAYLOAD_BYTES: usize = 1 << 20;

const MAILBOX_CAPACITY: usize = 1024;

struct SendTask {
    request: SendRequest,
    result: oneshot::Sender<Result<SendResult>>,
}

#[derive(Default)]
struct ChannelState {
    info: Option<ChannelInfo>,
    receiver_tag: Option<Arc<Vec<String>>>,
}

struct ReactorSub {
    channels: DashMap<String, ChannelState>,
    mailbox: mpsc::Sender<SendTask>,
}

/// Shared dependencies of every sub.
struct ReactorShared {
    store: Arc<MessageStore>,
    executor: Arc<dyn CommandExecutor>,
    delivery: Arc<DeliveryManager>,
    idgen: Arc<MessageIdGenerator>,
}

pub struct ChannelReactor {
    subs: Vec<Arc<ReactorSub>>,
    shared: Arc<ReactorShared>,
}

impl ChannelReactor {
    pub fn new(
        sub_count: usize,
        store: Arc<MessageStore>,
        executor: Arc<dyn CommandExecutor>,
        delivery: Arc<DeliveryManager>,
        idgen: Arc<MessageIdGenerator>,
    ) -> Arc<Self> {
        let shared = Arc::new(ReactorShared {
            store,
            executor,
            delivery,
            idgen,
        });

        let subs = (0..sub_count.max(1))
            .map(|_| {
                let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
                let sub = Arc::new(ReactorSub {
                    channels: DashMap::new(),
                    mailbox: tx,
                });
                Self::spawn_worker(sub.clone(), shared.clone(), rx);
                sub
            })
            .collect();

        Arc::new(Self { subs, shared })
    }

    fn sub_of(&self, channel: &ChannelKey) -> &Arc<ReactorSub> {
        let index =
            channel_hash(&channel.channel_id, channel.channel_type) as usize % self.subs.len();
        &self.subs[index]
    }

    /// Accepts a send on the leader path. Validation happens before
    /// queueing; everything stateful runs on the channel's sub.
    pub async fn send(&self, request: SendRequest) -> Result<SendResult> {
        if request.channel_id.trim().is_empty() {
            return Err(CoreError::InvalidInput("channel_id must not be empty".to_string()));
        }
        if request.from_uid.trim().is_empty() {
            return Err(CoreError::InvalidInput("from_uid must not be empty".to_string()));
        }
        if request.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(CoreError::InvalidInput(format!(
                "payload exceeds {} bytes",
                MAX_PAYLOAD_BYTES
            )));
        }

        let sub = self.sub_of(&request.channel_key());
        let (result_tx, result_rx) = oneshot::channel();
        sub.mailbox
            .try_send(SendTask {
                request,
                result: result_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    CoreError::Backpressure("channel mailbox full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    CoreError::Internal("channel reactor stopped".to_string())
                }
            })?;

        result_rx
            .await
            .map_err(|_| CoreError::Internal("send task dropped".to_string()))?
    }

    /// Drops cached channel state; the next send reloads from storage.
    pub fn invalidate(&self, channel: &ChannelKey) {
        self.sub_of(channel).channels.remove(&channel.to_string());
    }

    /// Rebuilds (and caches) the materialised recipient set for a channel.
    pub fn make_receiver_tag(&self, channel: &ChannelKey) -> Result<Arc<Vec<String>>> {
        let sub = self.sub_of(channel);
        let channel_str = channel.to_string();
        sub.channels.remove(&channel_str);
        Self::receiver_tag(sub, &self.shared, channel, &channel_str)
    }

    fn spawn_worker(
        sub: Arc<ReactorSub>,
        shared: Arc<ReactorShared>,
        mut rx: mpsc::Receiver<SendTask>,
    ) {
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let result = Self::process_send(&sub, &shared, task.request).await;
                let _ = task.result.send(result);
            }
        });
    }

    async fn process_send(
        sub: &Arc<ReactorSub>,
        shared: &Arc<ReactorShared>,
        request: SendRequest,
    ) -> Result<SendResult> {
        let channel = request.channel_key();
        let channel_str = channel.to_string();

        let info = {
            let cached = sub
                .channels
                .get(&channel_str)
                .and_then(|state| state.info.clone());
            match cached {
                Some(info) => info,
                None => {
                    // Channels are created implicitly on first write.
                    let info = shared
                        .store
                        .get_channel(&channel)?
                        .unwrap_or_else(|| {
                            ChannelInfo::new(channel.channel_id.clone(), channel.channel_type)
                        });
                    sub.channels
                        .entry(channel_str.clone())
                        .or_default()
                        .info = Some(info.clone());
                    info
                }
            }
        };

        Self::authorize(shared, &channel, &info, &request.from_uid)?;

        let message = Message {
            message_id: shared.idgen.next(),
            message_seq: 0,
            from_uid: request.from_uid.clone(),
            channel_id: channel.channel_id.clone(),
            channel_type: channel.channel_type,
            payload: request.payload.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            expire_at: request.expire_at,
        };

        let command = Command::AppendMessages(AppendMessagesParam {
            channel: channel.clone(),
            messages: vec![message.clone()],
        });
        let result = shared.executor.execute_channel(&channel, command).await?;
        let seq = match result {
            CommandResult::AppendMessages { seqs } if !seqs.is_empty() => seqs[0],
            other => {
                return Err(CoreError::Internal(format!(
                    "unexpected append result: {:?}",
                    other
                )))
            }
        };
        let mut committed = message;
        committed.message_seq = seq;

        let recipients = Self::receiver_tag(sub, shared, &channel, &channel_str)?;
        if let Err(e) = shared.delivery.deliver(&committed, &recipients) {
            // The message is committed; delivery retries own the rest.
            log::warn!("Fan-out for {} hit backpressure: {}", channel_str, e);
        }

        Ok(SendResult {
            message_id: committed.message_id,
            message_seq: seq,
        })
    }

    fn authorize(
        shared: &Arc<ReactorShared>,
        channel: &ChannelKey,
        info: &ChannelInfo,
        from_uid: &str,
    ) -> Result<()> {
        if info.ban {
            return Err(CoreError::Unauthorized("channel is banned".to_string()));
        }
        let denylist = shared.store.get_denylist(channel)?;
        if denylist.iter().any(|uid| uid == from_uid) {
            return Err(CoreError::Unauthorized("sender is denylisted".to_string()));
        }
        let allowlist = shared.store.get_allowlist(channel)?;
        if !allowlist.is_empty() && !allowlist.iter().any(|uid| uid == from_uid) {
            return Err(CoreError::Unauthorized(
                "sender is not on the allowlist".to_string(),
            ));
        }
        Ok(())
    }

    /// The materialised recipient set: subscribers minus denylist, built
    /// once and reused until a membership mutation invalidates it.
    fn receiver_tag(
        sub: &Arc<ReactorSub>,
        shared: &Arc<ReactorShared>,
        channel: &ChannelKey,
        channel_str: &str,
    ) -> Result<Arc<Vec<String>>> {
        if let Some(state) = sub.channels.get(channel_str) {
            if let Some(tag) = &state.receiver_tag {
                return Ok(tag.clone());
            }
        }

        let denylist = shared.store.get_denylist(channel)?;
        let recipients: Vec<String> = shared
            .store
            .get_subscribers(channel)?
            .into_iter()
            .filter(|uid| !denylist.contains(uid))
            .collect();
        let tag = Arc::new(recipients);
        sub.channels
            .entry(channel_str.to_string())
            .or_default()
            .receiver_tag = Some(tag.clone());
        Ok(tag)
    }
}

impl ApplyHook for ChannelReactor {
    fn on_channel_mutated(&self, channel: &ChannelKey) {
        self.invalidate(channel);
    }
}

impl std::fmt::Debug for ChannelReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReactor")
            .field("subs", &self.subs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::ConnManager;
    use crate::delivery::RetryQueue;
    use crate::executor::DirectExecutor;
    use crate::fsm::Fsm;
    use crate::timing_wheel::TimingWheel;
    use corridor_commons::models::CHANNEL_TYPE_GROUP;
    use corridor_store::MemoryBackend;
    use std::time::Duration;

    struct Fixture {
        reactor: Arc<ChannelReactor>,
        store: Arc<MessageStore>,
        conns: Arc<ConnManager>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MessageStore::open(Arc::new(MemoryBackend::new())).unwrap());
        let fsm = Arc::new(Fsm::new(store.clone()));
        let wheel = TimingWheel::new(Duration::from_millis(20), 32);
        wheel.start();
        let conns = Arc::new(ConnManager::new());
        let retry = RetryQueue::new(wheel, conns.clone(), Default::default());
        let delivery = Arc::new(DeliveryManager::new(conns.clone(), retry, None, None));
        let reactor = ChannelReactor::new(
            2,
            store.clone(),
            Arc::new(DirectExecutor::new(fsm.clone())),
            delivery,
            Arc::new(MessageIdGenerator::new(1)),
        );
        fsm.set_apply_hook(reactor.clone());
        Fixture {
            reactor,
            store,
            conns,
        }
    }

    fn send_req(from: &str) -> SendRequest {
        SendRequest {
            client_msg_no: String::new(),
            from_uid: from.to_string(),
            channel_id: "g1".to_string(),
            channel_type: CHANNEL_TYPE_GROUP,
            payload: b"hello".to_vec(),
            expire_at: 0,
        }
    }

    fn channel() -> ChannelKey {
        ChannelKey::new("g1", CHANNEL_TYPE_GROUP)
    }

    #[tokio::test]
    async fn send_assigns_seq_and_fans_out() {
        let f = fixture();
        f.store
            .add_subscribers(&channel(), &["u1".to_string(), "u2".to_string()])
            .unwrap();
        let (_h1, mut rx1) = f.conns.register("u1");
        let (_h2, mut rx2) = f.conns.register("u2");

        let result = f.reactor.send(send_req("u1")).await.unwrap();
        assert_eq!(result.message_seq, 1);

        let got = rx2.try_recv().unwrap();
        assert_eq!(got.message_seq, 1);
        assert_eq!(got.from_uid, "u1");
        // Sender's own connection receives it too (multi-device).
        assert!(rx1.try_recv().is_ok());

        let stored = f.store.load_last_msgs(&channel(), 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message_seq, 1);
    }

    #[tokio::test]
    async fn denylisted_sender_is_rejected() {
        let f = fixture();
        f.store
            .add_denylist(&channel(), &["u2".to_string()])
            .unwrap();

        let err = f.reactor.send(send_req("u2")).await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));
        assert_eq!(f.store.get_last_msg_seq(&channel()).unwrap(), 0);
    }

    #[tokio::test]
    async fn allowlist_excludes_outsiders() {
        let f = fixture();
        f.store
            .add_allowlist(&channel(), &["u1".to_string()])
            .unwrap();

        let err = f.reactor.send(send_req("u2")).await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));
        assert_eq!(f.store.get_last_msg_seq(&channel()).unwrap(), 0);

        let ok = f.reactor.send(send_req("u1")).await.unwrap();
        assert_eq!(ok.message_seq, 1);
    }

    #[tokio::test]
    async fn membership_change_invalidates_receiver_tag() {
        let f = fixture();
        f.store
            .add_subscribers(&channel(), &["u1".to_string()])
            .unwrap();
        let (_h1, mut rx1) = f.conns.register("u1");
        let (_h3, mut rx3) = f.conns.register("u3");

        f.reactor.send(send_req("u1")).await.unwrap();
        assert!(rx1.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());

        // Mutation applied through the command path invalidates the cache.
        f.reactor
            .shared
            .executor
            .execute_channel(
                &channel(),
                Command::AddSubscribers(corridor_raft::commands::MembersParam {
                    channel: channel(),
                    uids: vec!["u3".to_string()],
                }),
            )
            .await
            .unwrap();

        f.reactor.send(send_req("u1")).await.unwrap();
        assert!(rx3.try_recv().is_ok(), "new subscriber receives after invalidation");
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let f = fixture();
        let mut req = send_req("u1");
        req.payload = vec![0u8; MAX_PAYLOAD_BYTES + 1];
        let err = f.reactor.send(req).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn banned_channel_rejects_sends() {
        let f = fixture();
        let mut info = ChannelInfo::new("g1", CHANNEL_TYPE_GROUP);
        info.ban = true;
        f.store.add_or_update_channel(&info).unwrap();

        let err = f.reactor.send(send_req("u1")).await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));
    }
}
