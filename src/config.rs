// Configuration module
use std::fs;
use std::path::Path;

use corridor_commons::config::ClusterConfig;
use serde::{Deserialize, Serialize};

/// Main server configuration, parsed from config.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_handle_pool_size")]
    pub handle_pool_size: usize,

    pub server: ServerSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub timing_wheel: TimingWheelSettings,

    #[serde(default)]
    pub external: ExternalSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    /// Absent = standalone mode.
    #[serde(default)]
    pub cluster: Option<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// "rocksdb" (default) or "memory".
    #[serde(default = "default_storage_kind")]
    pub kind: String,
    /// Database path; empty = `${data_dir}/db`.
    #[serde(default)]
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: default_storage_kind(),
            path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file_path: String,
    #[serde(default = "default_true")]
    pub log_to_console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: default_log_file(),
            log_to_console: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingWheelSettings {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_wheel_size")]
    pub size: usize,
}

impl Default for TimingWheelSettings {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            size: default_wheel_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalSettings {
    /// Advertised HTTP address other peers forward to; empty =
    /// `http://{server.host}:{server.port}`.
    #[serde(default)]
    pub api_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default)]
    pub on: bool,
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Advertised API address, defaulting from the bind address.
    pub fn api_url(&self) -> String {
        if !self.external.api_url.is_empty() {
            return self.external.api_url.clone();
        }
        format!("http://{}:{}", self.server.host, self.server.port)
    }

    /// Database path, defaulting under the data dir.
    pub fn storage_path(&self) -> String {
        if !self.storage.path.is_empty() {
            return self.storage.path.clone();
        }
        format!("{}/db", self.data_dir)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            handle_pool_size: default_handle_pool_size(),
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 5001,
                workers: default_workers(),
            },
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
            timing_wheel: TimingWheelSettings::default(),
            external: ExternalSettings::default(),
            monitor: MonitorSettings::default(),
            cluster: None,
        }
    }
}

fn default_data_dir() -> String {
    "./corridor-data".to_string()
}

fn default_handle_pool_size() -> usize {
    4
}

fn default_workers() -> usize {
    0
}

fn default_storage_kind() -> String {
    "rocksdb".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "./logs/corridor.log".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tick_ms() -> u64 {
    100
}

fn default_wheel_size() -> usize {
    512
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 5001
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, "./corridor-data");
        assert_eq!(config.timing_wheel.tick_ms, 100);
        assert!(config.cluster.is_none());
        assert_eq!(config.api_url(), "http://127.0.0.1:5001");
        assert_eq!(config.storage_path(), "./corridor-data/db");
    }

    #[test]
    fn cluster_section_parses() {
        let config: ServerConfig = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 5001

            [cluster]
            peer_id = 1
            slot_count = 8
            replica_count = 1

            [[cluster.peers]]
            id = 2
            server_addr = "10.0.0.2:11110"
            "#,
        )
        .unwrap();
        let cluster = config.cluster.unwrap();
        assert!(cluster.on);
        assert_eq!(cluster.peer_id, 1);
        assert_eq!(cluster.slot_count, 8);
        assert_eq!(cluster.peers.len(), 1);
    }
}
