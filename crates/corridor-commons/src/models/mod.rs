//! Core data model: peers, channels, messages.

mod channel;
mod cluster;
mod message;
mod peer;

pub use channel::{ChannelInfo, ChannelKey, CHANNEL_TYPE_GROUP, CHANNEL_TYPE_PERSON};
pub use cluster::{
    AllocateSlot, AllocateSlotSet, ClusterDocument, Slot, SlotLeaderRelation, SlotLeaderRelationSet,
};
pub use message::Message;
pub use peer::{Peer, PeerStatus};
