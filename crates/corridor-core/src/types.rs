//! Payload types exchanged between nodes and between pipeline stages.
//!
//! These cross the peer RPC boundary as encoded bytes inside the transport
//! messages, so they are serde types with stable field names.

use corridor_commons::models::{ChannelKey, Message};
use serde::{Deserialize, Serialize};

/// A client send, as accepted by the channel pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Client-chosen number for client-side dedup of the response.
    #[serde(default)]
    pub client_msg_no: String,
    pub from_uid: String,
    pub channel_id: String,
    pub channel_type: u8,
    pub payload: Vec<u8>,
    /// Optional expiry in milliseconds since the epoch; 0 = never.
    #[serde(default)]
    pub expire_at: i64,
}

impl SendRequest {
    pub fn channel_key(&self) -> ChannelKey {
        ChannelKey::new(self.channel_id.clone(), self.channel_type)
    }
}

/// Outcome of an accepted send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendResult {
    pub message_id: u64,
    pub message_seq: u64,
}

/// One message bound for one subscriber on a remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerDelivery {
    pub uid: String,
    pub message: Message,
}

/// The unit handed to the in-flight queue: everything in a batch targets
/// the same destination peer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PeerDeliveryBatch {
    pub deliveries: Vec<PeerDelivery>,
}

/// A subscriber acknowledging receipt of a message on some connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecvAck {
    pub uid: String,
    pub conn_id: u64,
    pub message_id: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecvAckBatch {
    pub acks: Vec<RecvAck>,
}
