//! Channel identity and mutable channel configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Direct (one-to-one) conversation channel.
pub const CHANNEL_TYPE_PERSON: u8 = 1;
/// Group channel. The default when a request omits the type.
pub const CHANNEL_TYPE_GROUP: u8 = 2;

/// Identity of a channel: `(id, type)`.
///
/// The same string id may exist under different types; they are distinct
/// channels with independent logs and membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub channel_id: String,
    pub channel_type: u8,
}

impl ChannelKey {
    pub fn new(channel_id: impl Into<String>, channel_type: u8) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type,
        }
    }

    pub fn is_person(&self) -> bool {
        self.channel_type == CHANNEL_TYPE_PERSON
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.channel_id, self.channel_type)
    }
}

/// Mutable channel configuration, upserted via the channel command path.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub channel_type: u8,
    /// A banned channel rejects all sends.
    #[serde(default)]
    pub ban: bool,
    /// Large-group flag; fan-out may take cheaper paths for such channels.
    #[serde(default)]
    pub large: bool,
}

impl ChannelInfo {
    pub fn new(channel_id: impl Into<String>, channel_type: u8) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type,
            ban: false,
            large: false,
        }
    }

    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.channel_id.clone(), self.channel_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_display() {
        let key = ChannelKey::new("g1", CHANNEL_TYPE_GROUP);
        assert_eq!(key.to_string(), "g1@2");
    }

    #[test]
    fn channel_key_types_are_distinct() {
        let a = ChannelKey::new("x", CHANNEL_TYPE_PERSON);
        let b = ChannelKey::new("x", CHANNEL_TYPE_GROUP);
        assert_ne!(a, b);
    }
}
