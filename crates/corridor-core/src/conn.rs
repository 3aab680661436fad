//! Connection registry and local fan-out.
//!
//! The wire protocol is external; a connection here is just an id plus a
//! channel the protocol layer drains. Per-uid dedup by message id makes
//! redelivered messages (at-least-once upstream) invisible to clients.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use corridor_commons::models::Message;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// How many recent message ids are remembered per uid for dedup.
const SEEN_CAPACITY: usize = 1024;

/// A registered client connection.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub conn_id: u64,
    pub uid: String,
    sender: mpsc::UnboundedSender<Message>,
}

impl ConnHandle {
    pub fn send(&self, message: Message) -> bool {
        self.sender.send(message).is_ok()
    }
}

#[derive(Default)]
struct SeenIds {
    order: VecDeque<u64>,
    set: HashSet<u64>,
}

impl SeenIds {
    /// Returns true when the id was already recorded.
    fn check_and_insert(&mut self, message_id: u64) -> bool {
        if self.set.contains(&message_id) {
            return true;
        }
        self.set.insert(message_id);
        self.order.push_back(message_id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        false
    }
}

/// Registry of online connections, keyed by uid.
#[derive(Default)]
pub struct ConnManager {
    conns: DashMap<String, Vec<ConnHandle>>,
    seen: DashMap<String, SeenIds>,
    next_conn_id: AtomicU64,
}

impl ConnManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `uid`; the receiver is drained by the
    /// protocol layer (or a test).
    pub fn register(&self, uid: &str) -> (ConnHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnHandle {
            conn_id: self.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1,
            uid: uid.to_string(),
            sender: tx,
        };
        self.conns
            .entry(uid.to_string())
            .or_default()
            .push(handle.clone());
        (handle, rx)
    }

    pub fn unregister(&self, uid: &str, conn_id: u64) {
        if let Some(mut conns) = self.conns.get_mut(uid) {
            conns.retain(|c| c.conn_id != conn_id);
        }
        self.conns.remove_if(uid, |_, conns| conns.is_empty());
    }

    pub fn is_online(&self, uid: &str) -> bool {
        self.conns.get(uid).map(|c| !c.is_empty()).unwrap_or(false)
    }

    pub fn conns_of(&self, uid: &str) -> Vec<ConnHandle> {
        self.conns.get(uid).map(|c| c.clone()).unwrap_or_default()
    }

    pub fn conn_count(&self) -> usize {
        self.conns.iter().map(|e| e.value().len()).sum()
    }

    /// Delivers to every connection of `uid`, deduplicating by message id:
    /// a redelivered message reaches each uid at most once. Returns the
    /// connections written to (empty when offline or duplicate).
    pub fn deliver_local(&self, uid: &str, message: &Message) -> Vec<ConnHandle> {
        let conns = self.conns_of(uid);
        if conns.is_empty() {
            return Vec::new();
        }
        let duplicate = self
            .seen
            .entry(uid.to_string())
            .or_default()
            .check_and_insert(message.message_id);
        if duplicate {
            return Vec::new();
        }

        let mut written = Vec::with_capacity(conns.len());
        for conn in conns {
            if conn.send(message.clone()) {
                written.push(conn);
            }
        }
        written
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

    #[test]
    fn register_and_deliver() {
        let manager = ConnManager::new();
        let (_handle, mut rx) = manager.register("u1");
        assert!(manager.is_online("u1"));

        let written = manager.deliver_local("u1", &msg(1));
        assert_eq!(written.len(), 1);
        assert_eq!(rx.try_recv().unwrap().message_id, 1);
    }

    #[test]
    fn duplicate_message_id_is_dropped() {
        let manager = ConnManager::new();
        let (_handle, mut rx) = manager.register("u1");

        assert_eq!(manager.deliver_local("u1", &msg(5)).len(), 1);
        assert!(manager.deliver_local("u1", &msg(5)).is_empty());
        assert_eq!(rx.try_recv().unwrap().message_id, 5);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregister_goes_offline() {
        let manager = ConnManager::new();
        let (handle, _rx) = manager.register("u1");
        manager.unregister("u1", handle.conn_id);
        assert!(!manager.is_online("u1"));
        assert!(manager.deliver_local("u1", &msg(2)).is_empty());
    }
}
