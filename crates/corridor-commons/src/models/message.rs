//! The append-only message record.

use serde::{Deserialize, Serialize};

use super::ChannelKey;

/// A committed channel message.
///
/// `message_id` is globally unique (assigned by the slot leader before
/// proposing); `message_seq` is per-channel, dense and strictly increasing
/// from 1, assigned at apply time. Records are immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    pub message_id: u64,
    pub message_seq: u64,
    pub from_uid: String,
    pub channel_id: String,
    pub channel_type: u8,
    pub payload: Vec<u8>,
    /// Milliseconds since the epoch, stamped by the accepting node.
    pub timestamp: i64,
    /// Optional expiry (milliseconds since the epoch); 0 = never.
    #[serde(default)]
    pub expire_at: i64,
}

impl Message {
    pub fn channel_key(&self) -> ChannelKey {
        ChannelKey::new(self.channel_id.clone(), self.channel_type)
    }
}
