//! Redelivery of messages written to local client connections.
//!
//! Each write to a connection is tracked until the client sends a
//! receive-ack for `(conn, message_id)`. Un-acked messages are rewritten on
//! a timing-wheel deadline until the attempt budget runs out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corridor_commons::models::Message;
use dashmap::DashMap;

use crate::conn::ConnManager;
use crate::timing_wheel::TimingWheel;

#[derive(Debug, Clone)]
pub struct RetryQueueConfig {
    pub base_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            base_timeout: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct ClientInFlight {
    no: u64,
    uid: String,
    conn_id: u64,
    message: Message,
    attempts: u32,
}

/// Tracks local deliveries awaiting client receive-acks.
pub struct RetryQueue {
    entries: DashMap<u64, ClientInFlight>,
    /// `(conn_id, message_id)` → entry no, for ack lookup.
    index: DashMap<(u64, u64), u64>,
    wheel_handles: DashMap<u64, u64>,
    wheel: Arc<TimingWheel>,
    conns: Arc<ConnManager>,
    config: RetryQueueConfig,
    next_no: AtomicU64,
}

impl RetryQueue {
    pub fn new(
        wheel: Arc<TimingWheel>,
        conns: Arc<ConnManager>,
        config: RetryQueueConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            index: DashMap::new(),
            wheel_handles: DashMap::new(),
            wheel,
            conns,
            config,
            next_no: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts tracking a message already written to `conn_id`.
    pub fn track(self: &Arc<Self>, uid: &str, conn_id: u64, message: Message) {
        let no = self.next_no.fetch_add(1, Ordering::SeqCst) + 1;
        self.index.insert((conn_id, message.message_id), no);
        self.entries.insert(
            no,
            ClientInFlight {
                no,
                uid: uid.to_string(),
                conn_id,
                message,
                attempts: 0,
            },
        );
        self.arm(no);
    }

    /// Client acknowledged receipt; returns false for unknown acks.
    pub fn ack(&self, conn_id: u64, message_id: u64) -> bool {
        let Some((_, no)) = self.index.remove(&(conn_id, message_id)) else {
            return false;
        };
        self.entries.remove(&no);
        if let Some((_, handle)) = self.wheel_handles.remove(&no) {
            self.wheel.cancel(handle);
        }
        true
    }

    fn arm(self: &Arc<Self>, no: u64) {
        let attempts = match self.entries.get(&no) {
            Some(entry) => entry.attempts,
            None => return,
        };
        let deadline = self.config.base_timeout * 2u32.saturating_pow(attempts);
        let queue = self.clone();
        let handle = self.wheel.insert(deadline, move || {
            queue.on_timeout(no);
        });
        self.wheel_handles.insert(no, handle);
    }

    fn on_timeout(self: &Arc<Self>, no: u64) {
        let entry = {
            let Some(mut entry) = self.entries.get_mut(&no) else {
                return;
            };
            entry.attempts += 1;
            entry.clone()
        };

        if entry.attempts >= self.config.max_attempts {
            self.drop_entry(&entry);
            log::warn!(
                "Dropping redelivery to uid={} conn={} message_id={} after {} attempts",
                entry.uid,
                entry.conn_id,
                entry.message.message_id,
                entry.attempts
            );
            return;
        }

        // Rewrite to the exact connection; a gone connection ends tracking.
        let conn = self
            .conns
            .conns_of(&entry.uid)
            .into_iter()
            .find(|c| c.conn_id == entry.conn_id);
        match conn {
            Some(conn) if conn.send(entry.message.clone()) => {
                self.arm(no);
            }
            _ => {
                self.drop_entry(&entry);
            }
        }
    }

    fn drop_entry(&self, entry: &ClientInFlight) {
        self.entries.remove(&entry.no);
        self.index.remove(&(entry.conn_id, entry.message.message_id));
        self.wheel_handles.remove(&entry.no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u64) -> Message {
        Message {
            message_id: id,
            from_uid: "u1".to_string(),
            channel_id: "g1".to_string(),
            channel_type: 2,
            payload: b"x".to_vec(),
            ..Default::default()
        }
    }

    fn wheel() -> Arc<TimingWheel> {
        let wheel = TimingWheel::new(Duration::from_millis(10), 32);
        wheel.start();
        wheel
    }

    #[tokio::test]
    async fn ack_stops_redelivery() {
        let conns = Arc::new(ConnManager::new());
        let (handle, mut rx) = conns.register("u1");
        let queue = RetryQueue::new(
            wheel(),
            conns,
            RetryQueueConfig {
                base_timeout: Duration::from_millis(30),
                max_attempts: 5,
            },
        );

        queue.track("u1", handle.conn_id, msg(1));
        assert!(queue.ack(handle.conn_id, 1));
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(120)).await;
        // Nothing was redelivered.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unacked_message_is_redelivered() {
        let conns = Arc::new(ConnManager::new());
        let (handle, mut rx) = conns.register("u1");
        let queue = RetryQueue::new(
            wheel(),
            conns,
            RetryQueueConfig {
                base_timeout: Duration::from_millis(30),
                max_attempts: 5,
            },
        );

        queue.track("u1", handle.conn_id, msg(7));
        tokio::time::sleep(Duration::from_millis(120)).await;
        let redelivered = rx.try_recv().expect("expected a redelivery");
        assert_eq!(redelivered.message_id, 7);
    }

    #[tokio::test]
    async fn closed_connection_ends_tracking() {
        let conns = Arc::new(ConnManager::new());
        let (handle, rx) = conns.register("u1");
        let queue = RetryQueue::new(
            wheel(),
            conns.clone(),
            RetryQueueConfig {
                base_timeout: Duration::from_millis(20),
                max_attempts: 10,
            },
        );

        queue.track("u1", handle.conn_id, msg(3));
        drop(rx);
        conns.unregister("u1", handle.conn_id);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(queue.is_empty());
    }
}
