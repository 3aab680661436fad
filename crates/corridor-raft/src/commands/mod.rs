//! Commands replicated through the raft groups.
//!
//! Every mutation in the system is a [`Command`] carried in a [`CmdRequest`]
//! envelope. The envelope is a prost message with stable field numbers and
//! the command kind as a stable numeric code, so log entries written today
//! decode forever. Params are plain serde structs encoded with the codec in
//! [`crate::codec`].
//!
//! Channel and message commands travel on slot groups; config commands only
//! ever travel on the peer group.

use corridor_commons::models::{
    AllocateSlotSet, ChannelInfo, ChannelKey, ClusterDocument, Message, Peer,
    SlotLeaderRelationSet,
};
use prost::Message as ProstMessage;
use serde::{Deserialize, Serialize};

use crate::codec::{decode, encode};
use crate::error::{RaftError, Result};

// Wire-stable command codes. Append only; never renumber.
pub const CMD_ADD_OR_UPDATE_CHANNEL: u32 = 1;
pub const CMD_DELETE_CHANNEL: u32 = 2;
pub const CMD_ADD_SUBSCRIBERS: u32 = 3;
pub const CMD_REMOVE_SUBSCRIBERS: u32 = 4;
pub const CMD_REMOVE_ALL_SUBSCRIBERS: u32 = 5;
pub const CMD_ADD_DENYLIST: u32 = 6;
pub const CMD_REMOVE_DENYLIST: u32 = 7;
pub const CMD_REMOVE_ALL_DENYLIST: u32 = 8;
pub const CMD_ADD_ALLOWLIST: u32 = 9;
pub const CMD_REMOVE_ALLOWLIST: u32 = 10;
pub const CMD_REMOVE_ALL_ALLOWLIST: u32 = 11;
pub const CMD_APPEND_MESSAGES: u32 = 12;
pub const CMD_UPDATE_PEER_CONFIG: u32 = 20;
pub const CMD_UPDATE_CLUSTER_CONFIG: u32 = 21;
pub const CMD_ALLOCATE_SLOT: u32 = 22;
pub const CMD_UPDATE_SLOT_LEADER_RELATION_SET: u32 = 23;
pub const CMD_ADD_IP_BLOCKLIST: u32 = 30;
pub const CMD_REMOVE_IP_BLOCKLIST: u32 = 31;

/// The replicated command envelope.
#[derive(Clone, PartialEq, ProstMessage)]
pub struct CmdRequest {
    /// Request id, for idempotency checks and tracing.
    #[prost(uint64, tag = "1")]
    pub id: u64,

    /// One of the `CMD_*` codes.
    #[prost(uint32, tag = "2")]
    pub cmd_type: u32,

    /// Target slot for slot-group commands; unset on the peer group.
    #[prost(uint32, optional, tag = "3")]
    pub slot_id: Option<u32>,

    /// Encoded command param.
    #[prost(bytes = "vec", tag = "4")]
    pub param: Vec<u8>,
}

/// A command addressed to a channel without further arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParam {
    pub channel: ChannelKey,
}

/// Membership mutation: add or remove uids in one of a channel's sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembersParam {
    pub channel: ChannelKey,
    pub uids: Vec<String>,
}

/// Append a batch of messages to a channel's log. Message ids, sender and
/// timestamps are stamped by the leader before proposing; sequences are
/// assigned at apply time on every replica identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendMessagesParam {
    pub channel: ChannelKey,
    pub messages: Vec<Message>,
}

/// IP blocklist mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpListParam {
    pub ips: Vec<String>,
}

/// The typed command taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    // Channel commands (slot groups)
    AddOrUpdateChannel(ChannelInfo),
    DeleteChannel(ChannelParam),
    AddSubscribers(MembersParam),
    RemoveSubscribers(MembersParam),
    RemoveAllSubscribers(ChannelParam),
    AddDenylist(MembersParam),
    RemoveDenylist(MembersParam),
    RemoveAllDenylist(ChannelParam),
    AddAllowlist(MembersParam),
    RemoveAllowlist(MembersParam),
    RemoveAllAllowlist(ChannelParam),
    AppendMessages(AppendMessagesParam),

    // Config commands (peer group only)
    UpdatePeerConfig(Peer),
    UpdateClusterConfig(ClusterDocument),
    AllocateSlot(AllocateSlotSet),
    UpdateSlotLeaderRelationSet(SlotLeaderRelationSet),

    // IP blocklist (slot group 0 carries the global list)
    AddIpBlocklist(IpListParam),
    RemoveIpBlocklist(IpListParam),
}

impl Command {
    pub fn cmd_type(&self) -> u32 {
        match self {
            Command::AddOrUpdateChannel(_) => CMD_ADD_OR_UPDATE_CHANNEL,
            Command::DeleteChannel(_) => CMD_DELETE_CHANNEL,
            Command::AddSubscribers(_) => CMD_ADD_SUBSCRIBERS,
            Command::RemoveSubscribers(_) => CMD_REMOVE_SUBSCRIBERS,
            Command::RemoveAllSubscribers(_) => CMD_REMOVE_ALL_SUBSCRIBERS,
            Command::AddDenylist(_) => CMD_ADD_DENYLIST,
            Command::RemoveDenylist(_) => CMD_REMOVE_DENYLIST,
            Command::RemoveAllDenylist(_) => CMD_REMOVE_ALL_DENYLIST,
            Command::AddAllowlist(_) => CMD_ADD_ALLOWLIST,
            Command::RemoveAllowlist(_) => CMD_REMOVE_ALLOWLIST,
            Command::RemoveAllAllowlist(_) => CMD_REMOVE_ALL_ALLOWLIST,
            Command::AppendMessages(_) => CMD_APPEND_MESSAGES,
            Command::UpdatePeerConfig(_) => CMD_UPDATE_PEER_CONFIG,
            Command::UpdateClusterConfig(_) => CMD_UPDATE_CLUSTER_CONFIG,
            Command::AllocateSlot(_) => CMD_ALLOCATE_SLOT,
            Command::UpdateSlotLeaderRelationSet(_) => CMD_UPDATE_SLOT_LEADER_RELATION_SET,
            Command::AddIpBlocklist(_) => CMD_ADD_IP_BLOCKLIST,
            Command::RemoveIpBlocklist(_) => CMD_REMOVE_IP_BLOCKLIST,
        }
    }

    /// True for commands that may only travel on the peer group.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Command::UpdatePeerConfig(_)
                | Command::UpdateClusterConfig(_)
                | Command::AllocateSlot(_)
                | Command::UpdateSlotLeaderRelationSet(_)
        )
    }

    fn encode_param(&self) -> Result<Vec<u8>> {
        match self {
            Command::AddOrUpdateChannel(p) => encode(p),
            Command::DeleteChannel(p)
            | Command::RemoveAllSubscribers(p)
            | Command::RemoveAllDenylist(p)
            | Command::RemoveAllAllowlist(p) => encode(p),
            Command::AddSubscribers(p)
            | Command::RemoveSubscribers(p)
            | Command::AddDenylist(p)
            | Command::RemoveDenylist(p)
            | Command::AddAllowlist(p)
            | Command::RemoveAllowlist(p) => encode(p),
            Command::AppendMessages(p) => encode(p),
            Command::UpdatePeerConfig(p) => encode(p),
            Command::UpdateClusterConfig(p) => encode(p),
            Command::AllocateSlot(p) => encode(p),
            Command::UpdateSlotLeaderRelationSet(p) => encode(p),
            Command::AddIpBlocklist(p) | Command::RemoveIpBlocklist(p) => encode(p),
        }
    }

    fn decode_param(cmd_type: u32, param: &[u8]) -> Result<Command> {
        let command = match cmd_type {
            CMD_ADD_OR_UPDATE_CHANNEL => Command::AddOrUpdateChannel(decode(param)?),
            CMD_DELETE_CHANNEL => Command::DeleteChannel(decode(param)?),
            CMD_ADD_SUBSCRIBERS => Command::AddSubscribers(decode(param)?),
            CMD_REMOVE_SUBSCRIBERS => Command::RemoveSubscribers(decode(param)?),
            CMD_REMOVE_ALL_SUBSCRIBERS => Command::RemoveAllSubscribers(decode(param)?),
            CMD_ADD_DENYLIST => Command::AddDenylist(decode(param)?),
            CMD_REMOVE_DENYLIST => Command::RemoveDenylist(decode(param)?),
            CMD_REMOVE_ALL_DENYLIST => Command::RemoveAllDenylist(decode(param)?),
            CMD_ADD_ALLOWLIST => Command::AddAllowlist(decode(param)?),
            CMD_REMOVE_ALLOWLIST => Command::RemoveAllowlist(decode(param)?),
            CMD_REMOVE_ALL_ALLOWLIST => Command::RemoveAllAllowlist(decode(param)?),
            CMD_APPEND_MESSAGES => Command::AppendMessages(decode(param)?),
            CMD_UPDATE_PEER_CONFIG => Command::UpdatePeerConfig(decode(param)?),
            CMD_UPDATE_CLUSTER_CONFIG => Command::UpdateClusterConfig(decode(param)?),
            CMD_ALLOCATE_SLOT => Command::AllocateSlot(decode(param)?),
            CMD_UPDATE_SLOT_LEADER_RELATION_SET => {
                Command::UpdateSlotLeaderRelationSet(decode(param)?)
            }
            CMD_ADD_IP_BLOCKLIST => Command::AddIpBlocklist(decode(param)?),
            CMD_REMOVE_IP_BLOCKLIST => Command::RemoveIpBlocklist(decode(param)?),
            other => {
                return Err(RaftError::Serialization(format!(
                    "unknown command type: {}",
                    other
                )))
            }
        };
        Ok(command)
    }
}

/// Builds the wire bytes for a command.
pub fn encode_command(id: u64, slot_id: Option<u32>, command: &Command) -> Result<Vec<u8>> {
    let request = CmdRequest {
        id,
        cmd_type: command.cmd_type(),
        slot_id,
        param: command.encode_param()?,
    };
    Ok(request.encode_to_vec())
}

/// Decodes wire bytes back into the envelope and the typed command.
pub fn decode_command(bytes: &[u8]) -> Result<(CmdRequest, Command)> {
    let request = CmdRequest::decode(bytes)?;
    let command = Command::decode_param(request.cmd_type, &request.param)?;
    Ok((request, command))
}

/// The apply result a proposer receives back for a committed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandResult {
    /// Applied, nothing to report.
    None,
    /// Applied and rejected deterministically (same on every replica).
    Error(String),
    /// Sequences assigned to an `AppendMessages` batch, in input order.
    AppendMessages { seqs: Vec<u64> },
}

impl CommandResult {
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn decode_from(bytes: &[u8]) -> Result<CommandResult> {
        if bytes.is_empty() {
            return Ok(CommandResult::None);
        }
        decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corridor_commons::models::{AllocateSlot, SlotLeaderRelation, CHANNEL_TYPE_GROUP};

    fn channel() -> ChannelKey {
        ChannelKey::new("g1", CHANNEL_TYPE_GROUP)
    }

    fn all_commands() -> Vec<Command> {
        let members = MembersParam {
            channel: channel(),
            uids: vec!["u1".to_string(), "u2".to_string()],
        };
        let by_channel = ChannelParam { channel: channel() };
        let ips = IpListParam {
            ips: vec!["10.0.0.1".to_string()],
        };
        vec![
            Command::AddOrUpdateChannel(ChannelInfo::new("g1", CHANNEL_TYPE_GROUP)),
            Command::DeleteChannel(by_channel.clone()),
            Command::AddSubscribers(members.clone()),
            Command::RemoveSubscribers(members.clone()),
            Command::RemoveAllSubscribers(by_channel.clone()),
            Command::AddDenylist(members.clone()),
            Command::RemoveDenylist(members.clone()),
            Command::RemoveAllDenylist(by_channel.clone()),
            Command::AddAllowlist(members.clone()),
            Command::RemoveAllowlist(members.clone()),
            Command::RemoveAllAllowlist(by_channel),
            Command::AppendMessages(AppendMessagesParam {
                channel: channel(),
                messages: vec![Message {
                    message_id: 77,
                    from_uid: "u1".to_string(),
                    channel_id: "g1".to_string(),
                    channel_type: CHANNEL_TYPE_GROUP,
                    payload: b"hi".to_vec(),
                    timestamp: 1_700_000_000_000,
                    ..Default::default()
                }],
            }),
            Command::UpdatePeerConfig(Peer::new(2, "10.0.0.2:11110", "10.0.0.2:11111")),
            Command::UpdateClusterConfig(ClusterDocument {
                peers: vec![Peer::new(1, "a:1", "a:2")],
                slots: vec![],
                slot_count: 4,
                replica_count: 1,
            }),
            Command::AllocateSlot(AllocateSlotSet {
                allocate_slots: vec![AllocateSlot {
                    slot_id: 0,
                    peers: vec![1, 2, 3],
                }],
            }),
            Command::UpdateSlotLeaderRelationSet(SlotLeaderRelationSet {
                relations: vec![SlotLeaderRelation {
                    slot_id: 0,
                    leader_peer_id: 2,
                    term: 3,
                }],
            }),
            Command::AddIpBlocklist(ips.clone()),
            Command::RemoveIpBlocklist(ips),
        ]
    }

    #[test]
    fn every_command_roundtrips() {
        for (i, command) in all_commands().into_iter().enumerate() {
            let bytes = encode_command(100 + i as u64, Some(3), &command).unwrap();
            let (request, decoded) = decode_command(&bytes).unwrap();
            assert_eq!(request.id, 100 + i as u64);
            assert_eq!(request.slot_id, Some(3));
            assert_eq!(request.cmd_type, command.cmd_type());
            assert_eq!(decoded, command);
        }
    }

    #[test]
    fn command_codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for command in all_commands() {
            assert!(seen.insert(command.cmd_type()), "duplicate command code");
        }
    }

    #[test]
    fn unknown_command_type_is_rejected() {
        let request = CmdRequest {
            id: 1,
            cmd_type: 9999,
            slot_id: None,
            param: Vec::new(),
        };
        let bytes = request.encode_to_vec();
        assert!(decode_command(&bytes).is_err());
    }

    #[test]
    fn command_result_roundtrip() {
        let result = CommandResult::AppendMessages { seqs: vec![1, 2, 3] };
        let bytes = result.encode().unwrap();
        assert_eq!(CommandResult::decode_from(&bytes).unwrap(), result);
        assert_eq!(
            CommandResult::decode_from(&[]).unwrap(),
            CommandResult::None
        );
    }
}
