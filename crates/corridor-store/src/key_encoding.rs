//! Key layout for the message log and channel metadata.
//!
//! Channel-scoped keys start with an unambiguous channel prefix:
//!
//! ```text
//! [channel_type: u8][id_len: u32 BE][channel_id bytes]
//! ```
//!
//! The length field keeps prefix scans exact — an id that happens to extend
//! another id can never fall inside the shorter channel's range. Message
//! keys append the sequence as 8 big-endian bytes so byte order equals
//! numeric order; membership keys append the member uid.

use corridor_commons::models::ChannelKey;

/// Channel info records.
pub const PARTITION_CHANNELS: &str = "channels";
/// Message log.
pub const PARTITION_MESSAGES: &str = "messages";
/// Subscriber set.
pub const PARTITION_SUBSCRIBERS: &str = "subscribers";
/// Denylist set.
pub const PARTITION_DENYLIST: &str = "denylist";
/// Allowlist set.
pub const PARTITION_ALLOWLIST: &str = "allowlist";
/// Singleton metadata: per-channel last sequence, IP blocklist.
pub const PARTITION_META: &str = "meta";

pub const ALL_PARTITIONS: [&str; 6] = [
    PARTITION_CHANNELS,
    PARTITION_MESSAGES,
    PARTITION_SUBSCRIBERS,
    PARTITION_DENYLIST,
    PARTITION_ALLOWLIST,
    PARTITION_META,
];

pub const IP_BLOCKLIST_KEY: &[u8] = b"ip_blocklist";

/// Node-local message-id counter high-water mark.
pub fn message_id_hw_key(peer_id: u64) -> Vec<u8> {
    let mut key = b"msgid_hw:".to_vec();
    key.extend_from_slice(&peer_id.to_be_bytes());
    key
}

pub fn channel_prefix(channel: &ChannelKey) -> Vec<u8> {
    let id = channel.channel_id.as_bytes();
    let mut key = Vec::with_capacity(1 + 4 + id.len());
    key.push(channel.channel_type);
    key.extend_from_slice(&(id.len() as u32).to_be_bytes());
    key.extend_from_slice(id);
    key
}

pub fn message_key(channel: &ChannelKey, seq: u64) -> Vec<u8> {
    let mut key = channel_prefix(channel);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Sequence component of a message key produced by [`message_key`].
pub fn message_seq_from_key(key: &[u8]) -> Option<u64> {
    if key.len() < 8 {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&key[key.len() - 8..]);
    Some(u64::from_be_bytes(buf))
}

pub fn member_key(channel: &ChannelKey, uid: &str) -> Vec<u8> {
    let mut key = channel_prefix(channel);
    key.extend_from_slice(uid.as_bytes());
    key
}

/// Uid component of a key produced by [`member_key`].
pub fn member_uid_from_key(channel: &ChannelKey, key: &[u8]) -> Option<String> {
    let prefix_len = channel_prefix(channel).len();
    if key.len() < prefix_len {
        return None;
    }
    String::from_utf8(key[prefix_len..].to_vec()).ok()
}

pub fn last_seq_key(channel: &ChannelKey) -> Vec<u8> {
    let mut key = b"last_seq:".to_vec();
    key.extend_from_slice(&channel_prefix(channel));
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_commons::models::CHANNEL_TYPE_GROUP;

    #[test]
    fn message_keys_order_by_seq() {
        let ch = ChannelKey::new("g1", CHANNEL_TYPE_GROUP);
        let k1 = message_key(&ch, 1);
        let k256 = message_key(&ch, 256);
        assert!(k1 < k256);
        assert_eq!(message_seq_from_key(&k256), Some(256));
    }

    #[test]
    fn extending_ids_do_not_share_a_prefix_range() {
        let short = channel_prefix(&ChannelKey::new("ab", CHANNEL_TYPE_GROUP));
        let long = channel_prefix(&ChannelKey::new("ab/cd", CHANNEL_TYPE_GROUP));
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn member_uid_roundtrip() {
        let ch = ChannelKey::new("g1", CHANNEL_TYPE_GROUP);
        let key = member_key(&ch, "u42");
        assert_eq!(member_uid_from_key(&ch, &key).as_deref(), Some("u42"));
    }
}
