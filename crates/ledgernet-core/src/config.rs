//! Configuration system for Ledgernet.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LEDGERNET_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/ledgernet/config.toml
//!   3. ~/.config/ledgernet/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgernetConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub limits: LimitsConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Path to the hex-encoded Ed25519 seed. Generated on first run.
    pub keypair_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the request dispatcher binds.
    pub listen_addr: String,
    /// Address other nodes use to reach us. Echoed in vote messages.
    pub tcp_address: String,
    /// Our position in the validator list. Sent in every gossip packet.
    pub node_position: i64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Local HTTP status endpoint. Empty disables it.
    pub api_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest single transaction accepted.
    pub max_tx_size: usize,
    /// Largest transaction batch or pushed tx-body buffer accepted.
    pub max_tx_batch_size: usize,
    /// Largest single block body accepted during block collection.
    pub max_block_size: usize,
    /// Largest relayed private/sharded data payload accepted.
    pub max_relay_payload: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Node positions whose block announcements are ignored.
    pub banned_positions: Vec<i64>,
    /// Known validators.
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub position: i64,
    pub tcp_address: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keypair_path: config_dir().join("node.key"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7078".to_string(),
            tcp_address: "127.0.0.1:7078".to_string(),
            node_position: 0,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            api_addr: "127.0.0.1:9078".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tx_size: 1_048_576,           // 1 MB
            max_tx_batch_size: 33_554_432,    // 32 MB
            max_block_size: 67_108_864,       // 64 MB
            max_relay_payload: 67_108_864,    // 64 MB
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("ledgernet")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LedgernetConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            LedgernetConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LEDGERNET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&LedgernetConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply LEDGERNET_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LEDGERNET_NETWORK__LISTEN_ADDR") {
            self.network.listen_addr = v;
        }
        if let Ok(v) = std::env::var("LEDGERNET_NETWORK__TCP_ADDRESS") {
            self.network.tcp_address = v;
        }
        if let Ok(v) = std::env::var("LEDGERNET_NETWORK__NODE_POSITION") {
            if let Ok(p) = v.parse() {
                self.network.node_position = p;
            }
        }
        if let Ok(v) = std::env::var("LEDGERNET_NETWORK__API_ADDR") {
            self.network.api_addr = v;
        }
        if let Ok(v) = std::env::var("LEDGERNET_LIMITS__MAX_TX_SIZE") {
            if let Ok(n) = v.parse() {
                self.limits.max_tx_size = n;
            }
        }
    }
}
