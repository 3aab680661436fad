//! Request/response DTOs for the HTTP surface.

use corridor_commons::models::{
    ChannelInfo, ChannelKey, Message, CHANNEL_TYPE_GROUP, CHANNEL_TYPE_PERSON,
};
use corridor_core::CoreError;
use serde::{Deserialize, Serialize};

fn normalized_type(channel_type: u8) -> u8 {
    if channel_type == 0 {
        CHANNEL_TYPE_GROUP
    } else {
        channel_type
    }
}

/// Shared validation for channel-addressed requests.
pub fn check_channel(channel_id: &str, channel_type: u8) -> Result<ChannelKey, CoreError> {
    if channel_id.trim().is_empty() {
        return Err(CoreError::InvalidInput(
            "channel_id must not be empty".to_string(),
        ));
    }
    let channel_type = normalized_type(channel_type);
    if channel_type != CHANNEL_TYPE_PERSON && channel_type != CHANNEL_TYPE_GROUP {
        return Err(CoreError::InvalidInput(format!(
            "unsupported channel_type: {}",
            channel_type
        )));
    }
    Ok(ChannelKey::new(channel_id.to_string(), channel_type))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelCreateReq {
    #[serde(rename = "channel_id")]
    pub channel_id: String,
    #[serde(rename = "channel_type", default)]
    pub channel_type: u8,
    #[serde(default)]
    pub ban: u8,
    #[serde(default)]
    pub large: u8,
    #[serde(default)]
    pub subscribers: Vec<String>,
}

impl ChannelCreateReq {
    pub fn to_channel_info(&self) -> ChannelInfo {
        ChannelInfo {
            channel_id: self.channel_id.clone(),
            channel_type: normalized_type(self.channel_type),
            ban: self.ban == 1,
            large: self.large == 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDeleteReq {
    pub channel_id: String,
    #[serde(default)]
    pub channel_type: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberAddReq {
    pub channel_id: String,
    #[serde(default)]
    pub channel_type: u8,
    #[serde(default)]
    pub reset: u8,
    #[serde(default)]
    pub subscribers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberRemoveReq {
    pub channel_id: String,
    #[serde(default)]
    pub channel_type: u8,
    #[serde(default)]
    pub subscribers: Vec<String>,
}

/// Blacklist / whitelist mutations share one shape.
#[derive(Debug, Clone, Deserialize)]
pub struct UidsReq {
    pub channel_id: String,
    #[serde(default)]
    pub channel_type: u8,
    #[serde(default)]
    pub uids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(from = "u8", into = "u8")]
pub enum PullMode {
    #[default]
    Down,
    Up,
}

impl From<u8> for PullMode {
    fn from(v: u8) -> Self {
        if v == 1 {
            PullMode::Up
        } else {
            PullMode::Down
        }
    }
}

impl From<PullMode> for u8 {
    fn from(mode: PullMode) -> u8 {
        match mode {
            PullMode::Down => 0,
            PullMode::Up => 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncMessagesReq {
    #[serde(default)]
    pub login_uid: String,
    pub channel_id: String,
    #[serde(default)]
    pub channel_type: u8,
    #[serde(default)]
    pub start_message_seq: u64,
    #[serde(default)]
    pub end_message_seq: u64,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub pull_mode: PullMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResp {
    pub message_id: u64,
    pub message_seq: u64,
    pub from_uid: String,
    pub channel_id: String,
    pub channel_type: u8,
    pub payload: Vec<u8>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub expire_at: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl From<&Message> for MessageResp {
    fn from(m: &Message) -> Self {
        Self {
            message_id: m.message_id,
            message_seq: m.message_seq,
            from_uid: m.from_uid.clone(),
            channel_id: m.channel_id.clone(),
            channel_type: m.channel_type,
            payload: m.payload.clone(),
            timestamp: m.timestamp,
            expire_at: m.expire_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncMessagesResp {
    pub start_message_seq: u64,
    pub end_message_seq: u64,
    pub more: u8,
    pub messages: Vec<MessageResp>,
}

impl SyncMessagesResp {
    pub fn empty(req: &SyncMessagesReq) -> Self {
        Self {
            start_message_seq: req.start_message_seq,
            end_message_seq: req.end_message_seq,
            more: 0,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendReq {
    #[serde(default)]
    pub client_msg_no: String,
    pub from_uid: String,
    pub channel_id: String,
    #[serde(default)]
    pub channel_type: u8,
    pub payload: Vec<u8>,
    #[serde(default)]
    pub expire_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResp {
    pub client_msg_no: String,
    pub message_id: u64,
    pub message_seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaxSeqResp {
    pub message_seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_type_defaults_to_group() {
        let key = check_channel("g1", 0).unwrap();
        assert_eq!(key.channel_type, CHANNEL_TYPE_GROUP);
    }

    #[test]
    fn empty_channel_id_rejected() {
        assert!(check_channel("  ", 2).is_err());
    }

    #[test]
    fn unknown_channel_type_rejected() {
        assert!(check_channel("g1", 9).is_err());
    }

    #[test]
    fn pull_mode_parses_from_numbers() {
        let req: SyncMessagesReq = serde_json::from_str(
            r#"{"channel_id":"g1","pull_mode":1}"#,
        )
        .unwrap();
        assert_eq!(req.pull_mode, PullMode::Up);
        let req: SyncMessagesReq = serde_json::from_str(r#"{"channel_id":"g1"}"#).unwrap();
        assert_eq!(req.pull_mode, PullMode::Down);
    }
}
