//! Configuration system for the HAVEN CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// HAVEN configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Coordinator configuration
    #[serde(default)]
    pub coordinator: CoordinatorSection,
    /// Home-node configuration
    #[serde(default)]
    pub node: NodeSection,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorSection {
    /// UDP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Identity key file (32-byte hex seed)
    #[serde(default = "default_coordinator_key_path")]
    pub identity_file: PathBuf,
    /// Maximum registered home-nodes
    #[serde(default = "default_max_servers")]
    pub max_servers: usize,
    /// Registration expiry after silence, seconds
    #[serde(default = "default_server_timeout")]
    pub server_timeout_secs: u64,
    /// HELLO replies per source address per minute
    #[serde(default = "default_hello_rate")]
    pub hello_rate_per_min: u32,
    /// Unanswered signaling session expiry, seconds
    #[serde(default = "default_signaling_timeout")]
    pub signaling_timeout_secs: u64,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            identity_file: default_coordinator_key_path(),
            max_servers: default_max_servers(),
            server_timeout_secs: default_server_timeout(),
            hello_rate_per_min: default_hello_rate(),
            signaling_timeout_secs: default_signaling_timeout(),
        }
    }
}

/// Home-node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Coordinator address to register with
    #[serde(default = "default_coordinator_addr")]
    pub coordinator_addr: String,
    /// Pinned coordinator public key (hex), optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator_public_key: Option<String>,
    /// Shared passphrase for challenge answers
    #[serde(default)]
    pub passphrase: String,
    /// Identity key file (32-byte hex seed)
    #[serde(default = "default_node_key_path")]
    pub identity_file: PathBuf,
    /// PING cadence, seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Challenge rotation cadence, seconds
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            coordinator_addr: default_coordinator_addr(),
            coordinator_public_key: None,
            passphrase: String::new(),
            identity_file: default_node_key_path(),
            keepalive_secs: default_keepalive(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values

fn haven_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".haven")
}

fn default_listen_addr() -> String {
    "0.0.0.0:7400".to_string()
}

fn default_coordinator_addr() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_coordinator_key_path() -> PathBuf {
    haven_dir().join("coordinator_key")
}

fn default_node_key_path() -> PathBuf {
    haven_dir().join("node_key")
}

fn default_max_servers() -> usize {
    1024
}

fn default_server_timeout() -> u64 {
    300
}

fn default_hello_rate() -> u32 {
    10
}

fn default_signaling_timeout() -> u64 {
    60
}

fn default_keepalive() -> u64 {
    30
}

fn default_heartbeat() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("haven/config.toml")
    }

    /// Load a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Load the default config file, or defaults if it does not exist.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the config to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.coordinator.listen_addr, "0.0.0.0:7400");
        assert_eq!(config.coordinator.max_servers, 1024);
        assert_eq!(config.coordinator.server_timeout_secs, 300);
        assert_eq!(config.node.keepalive_secs, 30);
        assert_eq!(config.node.heartbeat_secs, 600);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [node]
            coordinator_addr = "192.0.2.1:7400"
            passphrase = "swordfish"
            "#,
        )
        .unwrap();
        assert_eq!(config.node.coordinator_addr, "192.0.2.1:7400");
        assert_eq!(config.node.passphrase, "swordfish");
        assert_eq!(config.node.keepalive_secs, 30);
        assert_eq!(config.coordinator.listen_addr, "0.0.0.0:7400");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.node.passphrase = "roundtrip".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.node.passphrase, "roundtrip");
    }
}
