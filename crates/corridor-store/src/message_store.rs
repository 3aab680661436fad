//! The storage facade: channel log, channel metadata, membership sets,
//! and the global IP blocklist.

use std::sync::Arc;

use bincode::config::standard;
use corridor_commons::models::{ChannelInfo, ChannelKey, Message};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::key_encoding::{
    channel_prefix, last_seq_key, member_key, member_uid_from_key, message_id_hw_key, message_key,
    ALL_PARTITIONS, IP_BLOCKLIST_KEY, PARTITION_ALLOWLIST, PARTITION_CHANNELS, PARTITION_DENYLIST,
    PARTITION_META, PARTITION_MESSAGES, PARTITION_SUBSCRIBERS,
};
use crate::storage_trait::{Operation, Partition, StorageBackend};

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, standard())?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, standard())?;
    Ok(value)
}

/// Storage facade over a pluggable [`StorageBackend`].
///
/// All mutating channel operations are driven from the state-machine apply
/// path; replicas replaying the same committed commands produce identical
/// state, including the per-channel sequence counters.
pub struct MessageStore {
    backend: Arc<dyn StorageBackend>,
}

impl MessageStore {
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        for name in ALL_PARTITIONS {
            backend.create_partition(&Partition::new(name))?;
        }
        Ok(Self { backend })
    }

    fn partition(name: &str) -> Partition {
        Partition::new(name)
    }

    // ─── Message log ────────────────────────────────────────────────────

    /// Appends messages to a channel's log, assigning dense sequences.
    ///
    /// Sequences continue from the channel's high-water mark and are written
    /// atomically with the records, so a replayed command cannot interleave
    /// with a concurrent writer. Returns the assigned sequences in input
    /// order.
    pub fn append_messages(
        &self,
        channel: &ChannelKey,
        messages: &mut [Message],
    ) -> Result<Vec<u64>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let last_seq = self.get_last_msg_seq(channel)?;
        let mut ops = Vec::with_capacity(messages.len() + 1);
        let mut assigned = Vec::with_capacity(messages.len());
        for (i, message) in messages.iter_mut().enumerate() {
            let seq = last_seq + 1 + i as u64;
            message.message_seq = seq;
            assigned.push(seq);
            ops.push(Operation::Put {
                partition: Self::partition(PARTITION_MESSAGES),
                key: message_key(channel, seq),
                value: encode(message)?,
            });
        }
        ops.push(Operation::Put {
            partition: Self::partition(PARTITION_META),
            key: last_seq_key(channel),
            value: (*assigned.last().expect("non-empty")).to_be_bytes().to_vec(),
        });
        self.backend.batch(ops)?;
        Ok(assigned)
    }

    /// The most recent `limit` messages, oldest first (newest last).
    pub fn load_last_msgs(&self, channel: &ChannelKey, limit: usize) -> Result<Vec<Message>> {
        let rows = self.backend.scan_rev(
            &Self::partition(PARTITION_MESSAGES),
            &channel_prefix(channel),
            None,
            Some(limit),
        )?;
        let mut messages = rows
            .iter()
            .map(|(_, v)| decode::<Message>(v))
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Ascending range: sequences in `[start_seq, end_seq)`, or unbounded
    /// above when `end_seq == 0`.
    pub fn load_next_range_msgs(
        &self,
        channel: &ChannelKey,
        start_seq: u64,
        end_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let prefix = channel_prefix(channel);
        let start_key = message_key(channel, start_seq);
        let rows = self.backend.scan(
            &Self::partition(PARTITION_MESSAGES),
            &prefix,
            Some(&start_key),
            Some(limit),
        )?;
        let mut messages = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let message: Message = decode(&value)?;
            if end_seq > 0 && message.message_seq >= end_seq {
                break;
            }
            messages.push(message);
        }
        Ok(messages)
    }

    /// Descending range: sequences in `(start_seq, end_seq]`, newest first,
    /// or starting from the channel's newest message when `end_seq == 0`.
    pub fn load_prev_range_msgs(
        &self,
        channel: &ChannelKey,
        start_seq: u64,
        end_seq: u64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let prefix = channel_prefix(channel);
        let start_key = if end_seq > 0 {
            Some(message_key(channel, end_seq))
        } else {
            None
        };
        let rows = self.backend.scan_rev(
            &Self::partition(PARTITION_MESSAGES),
            &prefix,
            start_key.as_deref(),
            Some(limit),
        )?;
        let mut messages = Vec::with_capacity(rows.len());
        for (_, value) in rows {
            let message: Message = decode(&value)?;
            if message.message_seq <= start_seq {
                break;
            }
            messages.push(message);
        }
        Ok(messages)
    }

    /// Highest assigned sequence for the channel, 0 when none.
    pub fn get_last_msg_seq(&self, channel: &ChannelKey) -> Result<u64> {
        let value = self
            .backend
            .get(&Self::partition(PARTITION_META), &last_seq_key(channel))?;
        match value {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(buf))
            }
            Some(_) => Err(StoreError::Serialization(
                "malformed last-seq record".to_string(),
            )),
            None => Ok(0),
        }
    }

    // ─── Channel metadata ───────────────────────────────────────────────

    pub fn add_or_update_channel(&self, info: &ChannelInfo) -> Result<()> {
        self.backend.put(
            &Self::partition(PARTITION_CHANNELS),
            &channel_prefix(&info.key()),
            &encode(info)?,
        )
    }

    pub fn get_channel(&self, channel: &ChannelKey) -> Result<Option<ChannelInfo>> {
        let value = self
            .backend
            .get(&Self::partition(PARTITION_CHANNELS), &channel_prefix(channel))?;
        value.map(|v| decode(&v)).transpose()
    }

    pub fn exist_channel(&self, channel: &ChannelKey) -> Result<bool> {
        Ok(self.get_channel(channel)?.is_some())
    }

    /// Removes the channel record, all membership sets, the message log and
    /// the sequence counter. Idempotent: deleting a missing channel
    /// succeeds.
    pub fn delete_channel_and_clear_messages(&self, channel: &ChannelKey) -> Result<()> {
        let prefix = channel_prefix(channel);
        let mut ops = vec![
            Operation::Delete {
                partition: Self::partition(PARTITION_CHANNELS),
                key: prefix.clone(),
            },
            Operation::Delete {
                partition: Self::partition(PARTITION_META),
                key: last_seq_key(channel),
            },
        ];
        for partition in [
            PARTITION_MESSAGES,
            PARTITION_SUBSCRIBERS,
            PARTITION_DENYLIST,
            PARTITION_ALLOWLIST,
        ] {
            let rows = self
                .backend
                .scan(&Self::partition(partition), &prefix, None, None)?;
            for (key, _) in rows {
                ops.push(Operation::Delete {
                    partition: Self::partition(partition),
                    key,
                });
            }
        }
        self.backend.batch(ops)
    }

    // ─── Membership sets ────────────────────────────────────────────────

    fn add_members(&self, partition: &str, channel: &ChannelKey, uids: &[String]) -> Result<()> {
        let ops = uids
            .iter()
            .filter(|uid| !uid.trim().is_empty())
            .map(|uid| Operation::Put {
                partition: Self::partition(partition),
                key: member_key(channel, uid),
                value: Vec::new(),
            })
            .collect();
        self.backend.batch(ops)
    }

    fn remove_members(&self, partition: &str, channel: &ChannelKey, uids: &[String]) -> Result<()> {
        let ops = uids
            .iter()
            .map(|uid| Operation::Delete {
                partition: Self::partition(partition),
                key: member_key(channel, uid),
            })
            .collect();
        self.backend.batch(ops)
    }

    fn remove_all_members(&self, partition: &str, channel: &ChannelKey) -> Result<()> {
        let rows = self.backend.scan(
            &Self::partition(partition),
            &channel_prefix(channel),
            None,
            None,
        )?;
        let ops = rows
            .into_iter()
            .map(|(key, _)| Operation::Delete {
                partition: Self::partition(partition),
                key,
            })
            .collect();
        self.backend.batch(ops)
    }

    fn get_members(&self, partition: &str, channel: &ChannelKey) -> Result<Vec<String>> {
        let rows = self.backend.scan(
            &Self::partition(partition),
            &channel_prefix(channel),
            None,
            None,
        )?;
        Ok(rows
            .iter()
            .filter_map(|(key, _)| member_uid_from_key(channel, key))
            .collect())
    }

    pub fn add_subscribers(&self, channel: &ChannelKey, uids: &[String]) -> Result<()> {
        self.add_members(PARTITION_SUBSCRIBERS, channel, uids)
    }

    pub fn remove_subscribers(&self, channel: &ChannelKey, uids: &[String]) -> Result<()> {
        self.remove_members(PARTITION_SUBSCRIBERS, channel, uids)
    }

    pub fn remove_all_subscribers(&self, channel: &ChannelKey) -> Result<()> {
        self.remove_all_members(PARTITION_SUBSCRIBERS, channel)
    }

    pub fn get_subscribers(&self, channel: &ChannelKey) -> Result<Vec<String>> {
        self.get_members(PARTITION_SUBSCRIBERS, channel)
    }

    pub fn add_denylist(&self, channel: &ChannelKey, uids: &[String]) -> Result<()> {
        self.add_members(PARTITION_DENYLIST, channel, uids)
    }

    pub fn remove_denylist(&self, channel: &ChannelKey, uids: &[String]) -> Result<()> {
        self.remove_members(PARTITION_DENYLIST, channel, uids)
    }

    pub fn remove_all_denylist(&self, channel: &ChannelKey) -> Result<()> {
        self.remove_all_members(PARTITION_DENYLIST, channel)
    }

    pub fn get_denylist(&self, channel: &ChannelKey) -> Result<Vec<String>> {
        self.get_members(PARTITION_DENYLIST, channel)
    }

    pub fn add_allowlist(&self, channel: &ChannelKey, uids: &[String]) -> Result<()> {
        self.add_members(PARTITION_ALLOWLIST, channel, uids)
    }

    pub fn remove_allowlist(&self, channel: &ChannelKey, uids: &[String]) -> Result<()> {
        self.remove_members(PARTITION_ALLOWLIST, channel, uids)
    }

    pub fn remove_all_allowlist(&self, channel: &ChannelKey) -> Result<()> {
        self.remove_all_members(PARTITION_ALLOWLIST, channel)
    }

    pub fn get_allowlist(&self, channel: &ChannelKey) -> Result<Vec<String>> {
        self.get_members(PARTITION_ALLOWLIST, channel)
    }

    // ─── Node-local counters ────────────────────────────────────────────

    /// Message-id counter high-water mark persisted at shutdown so ids are
    /// never reused across restarts.
    pub fn get_message_id_high_water(&self, peer_id: u64) -> Result<u64> {
        let value = self.backend.get(
            &Self::partition(PARTITION_META),
            &message_id_hw_key(peer_id),
        )?;
        match value {
            Some(bytes) if bytes.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(buf))
            }
            Some(_) => Err(StoreError::Serialization(
                "malformed message-id high-water record".to_string(),
            )),
            None => Ok(0),
        }
    }

    pub fn set_message_id_high_water(&self, peer_id: u64, high_water: u64) -> Result<()> {
        self.backend.put(
            &Self::partition(PARTITION_META),
            &message_id_hw_key(peer_id),
            &high_water.to_be_bytes(),
        )
    }

    // ─── IP blocklist ───────────────────────────────────────────────────

    pub fn get_ip_blocklist(&self) -> Result<Vec<String>> {
        let value = self
            .backend
            .get(&Self::partition(PARTITION_META), IP_BLOCKLIST_KEY)?;
        match value {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    pub fn set_ip_blocklist(&self, ips: &[String]) -> Result<()> {
        self.backend.put(
            &Self::partition(PARTITION_META),
            IP_BLOCKLIST_KEY,
            &encode(&ips.to_vec())?,
        )
    }

    pub fn add_ip_blocklist(&self, ips: &[String]) -> Result<()> {
        let mut current = self.get_ip_blocklist()?;
        for ip in ips {
            if !current.contains(ip) {
                current.push(ip.clone());
            }
        }
        self.set_ip_blocklist(&current)
    }

    pub fn remove_ip_blocklist(&self, ips: &[String]) -> Result<()> {
        let current = self
            .get_ip_blocklist()?
            .into_iter()
            .filter(|ip| !ips.contains(ip))
            .collect::<Vec<_>>();
        self.set_ip_blocklist(&current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use corridor_commons::models::CHANNEL_TYPE_GROUP;

    fn store() -> MessageStore {
        MessageStore::open(Arc::new(MemoryBackend::new())).unwrap()
    }

    fn channel() -> ChannelKey {
        ChannelKey::new("g1", CHANNEL_TYPE_GROUP)
    }

    fn msg(from: &str) -> Message {
        Message {
            message_id: 1,
            from_uid: from.to_string(),
            channel_id: "g1".to_string(),
            channel_type: CHANNEL_TYPE_GROUP,
            payload: b"hello".to_vec(),
            timestamp: 1_700_000_000_000,
            ..Default::default()
        }
    }

    #[test]
    fn append_assigns_dense_seqs_from_one() {
        let store = store();
        let ch = channel();
        let mut batch = vec![msg("u1"), msg("u2")];
        let seqs = store.append_messages(&ch, &mut batch).unwrap();
        assert_eq!(seqs, vec![1, 2]);

        let mut batch = vec![msg("u3")];
        let seqs = store.append_messages(&ch, &mut batch).unwrap();
        assert_eq!(seqs, vec![3]);
        assert_eq!(store.get_last_msg_seq(&ch).unwrap(), 3);
    }

    #[test]
    fn load_last_msgs_newest_last() {
        let store = store();
        let ch = channel();
        let mut batch: Vec<Message> = (0..5).map(|_| msg("u1")).collect();
        store.append_messages(&ch, &mut batch).unwrap();

        let loaded = store.load_last_msgs(&ch, 3).unwrap();
        let seqs: Vec<u64> = loaded.iter().map(|m| m.message_seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn range_loads_match_pull_windows() {
        let store = store();
        let ch = channel();
        let mut batch: Vec<Message> = (0..10).map(|_| msg("u1")).collect();
        store.append_messages(&ch, &mut batch).unwrap();

        let up = store.load_next_range_msgs(&ch, 3, 7, 10).unwrap();
        let seqs: Vec<u64> = up.iter().map(|m| m.message_seq).collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);

        let down = store.load_prev_range_msgs(&ch, 3, 7, 10).unwrap();
        let seqs: Vec<u64> = down.iter().map(|m| m.message_seq).collect();
        assert_eq!(seqs, vec![7, 6, 5, 4]);
    }

    #[test]
    fn prev_range_without_end_starts_at_newest() {
        let store = store();
        let ch = channel();
        let mut batch: Vec<Message> = (0..5).map(|_| msg("u1")).collect();
        store.append_messages(&ch, &mut batch).unwrap();

        let down = store.load_prev_range_msgs(&ch, 2, 0, 10).unwrap();
        let seqs: Vec<u64> = down.iter().map(|m| m.message_seq).collect();
        assert_eq!(seqs, vec![5, 4, 3]);
    }

    #[test]
    fn subscriber_add_is_idempotent() {
        let store = store();
        let ch = channel();
        store
            .add_subscribers(&ch, &["u1".to_string(), "u2".to_string()])
            .unwrap();
        store.add_subscribers(&ch, &["u1".to_string()]).unwrap();
        let mut subs = store.get_subscribers(&ch).unwrap();
        subs.sort();
        assert_eq!(subs, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[test]
    fn delete_channel_is_idempotent_and_clears_everything() {
        let store = store();
        let ch = channel();
        store.add_or_update_channel(&ChannelInfo::new("g1", CHANNEL_TYPE_GROUP)).unwrap();
        store.add_subscribers(&ch, &["u1".to_string()]).unwrap();
        let mut batch = vec![msg("u1")];
        store.append_messages(&ch, &mut batch).unwrap();

        store.delete_channel_and_clear_messages(&ch).unwrap();
        assert!(!store.exist_channel(&ch).unwrap());
        assert!(store.get_subscribers(&ch).unwrap().is_empty());
        assert_eq!(store.get_last_msg_seq(&ch).unwrap(), 0);
        assert!(store.load_last_msgs(&ch, 10).unwrap().is_empty());

        // Second delete succeeds on the already-missing channel.
        store.delete_channel_and_clear_messages(&ch).unwrap();
    }

    #[test]
    fn message_id_high_water_roundtrip() {
        let store = store();
        assert_eq!(store.get_message_id_high_water(1).unwrap(), 0);
        store.set_message_id_high_water(1, 42).unwrap();
        assert_eq!(store.get_message_id_high_water(1).unwrap(), 42);
        // Per-peer records are independent.
        assert_eq!(store.get_message_id_high_water(2).unwrap(), 0);
    }

    #[test]
    fn ip_blocklist_set_is_last_writer_wins() {
        let store = store();
        store
            .add_ip_blocklist(&["10.0.0.1".to_string(), "10.0.0.2".to_string()])
            .unwrap();
        store.set_ip_blocklist(&["10.0.0.9".to_string()]).unwrap();
        assert_eq!(store.get_ip_blocklist().unwrap(), vec!["10.0.0.9".to_string()]);
        store.remove_ip_blocklist(&["10.0.0.9".to_string()]).unwrap();
        assert!(store.get_ip_blocklist().unwrap().is_empty());
    }
}
