//! Serialization helpers for raft entry payloads, command params, and
//! snapshots.
//!
//! JSON keeps the log human-debuggable and self-describing; the hot path
//! through here is small command params, not message bodies.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::RaftError;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RaftError> {
    serde_json::to_vec(value).map_err(|e| RaftError::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RaftError> {
    serde_json::from_slice(bytes).map_err(|e| RaftError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u64,
        name: String,
    }

    #[test]
    fn roundtrip() {
        let value = Sample {
            id: 42,
            name: "g1".to_string(),
        };
        let bytes = encode(&value).unwrap();
        let decoded: Sample = decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }
}
