//! # Node Configuration
//!
//! Loads the YAML node configuration file and the JSON genesis file it
//! points to. Configuration precedence is YAML file, then CLI flag
//! overrides layered on top in `main.rs` -- this module only knows how to
//! parse the file itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use podoru_chain::crypto::keys::{address_from_hex, Address};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default `max_peers` when the config file omits it.
pub const DEFAULT_MAX_PEERS: usize = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse genesis JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid authority address {0:?} in config")]
    InvalidAuthority(String),

    #[error("invalid block_time duration {0:?}: expected a number followed by 's' or 'ms'")]
    InvalidBlockTime(String),

    #[error("invalid base64 in genesis initial_state entry {key:?}: {source}")]
    InvalidGenesisValue { key: String, source: base64::DecodeError },
}

/// `node_type` field: whether this node is expected to produce blocks.
/// A `producer` node whose `address` isn't in `authorities` simply never
/// becomes eligible -- this field is a declared intent, not itself load
/// bearing for the PoA schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Producer,
    Full,
}

/// The on-disk YAML node configuration (spec field table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_type: NodeType,
    /// This node's own chain address, for sanity-checking against the
    /// address derived from `private_key`.
    pub address: Option<String>,
    /// Path to the hex-encoded secp256k1 private key file. Must be
    /// readable only by its owner (mode 0600) -- enforced at load time by
    /// the caller, not by this struct.
    pub private_key: PathBuf,
    pub p2p_port: u16,
    #[serde(default = "default_bind_addr")]
    pub p2p_bind_addr: String,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    pub data_dir: PathBuf,
    pub authorities: Vec<String>,
    #[serde(default = "default_block_time")]
    pub block_time: String,
    pub genesis_path: PathBuf,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

fn default_block_time() -> String {
    "5s".to_string()
}

impl NodeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Parsed `authorities` as chain addresses, in genesis/schedule order.
    pub fn authority_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.authorities
            .iter()
            .map(|s| address_from_hex(s).map_err(|_| ConfigError::InvalidAuthority(s.clone())))
            .collect()
    }

    /// Parses `block_time` (e.g. `"5s"`, `"500ms"`) into a `Duration`.
    pub fn block_time_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.block_time).ok_or_else(|| ConfigError::InvalidBlockTime(self.block_time.clone()))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.p2p_bind_addr, self.p2p_port)
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(digits) = s.strip_suffix("ms") {
        return digits.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(digits) = s.strip_suffix('s') {
        return digits.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Genesis file
// ---------------------------------------------------------------------------

/// The JSON genesis file pointed to by `NodeConfig::genesis_path`. Consumed
/// once, at startup, only when the chain has no existing head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisFile {
    pub timestamp: i64,
    pub authorities: Vec<String>,
    #[serde(default)]
    pub initial_state: std::collections::BTreeMap<String, String>,
}

impl GenesisFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn authority_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.authorities
            .iter()
            .map(|s| address_from_hex(s).map_err(|_| ConfigError::InvalidAuthority(s.clone())))
            .collect()
    }

    /// Decodes `initial_state`'s base64 values into the raw bytes
    /// `ChainEngine::open_with_genesis_state` expects.
    pub fn decoded_initial_state(&self) -> Result<Vec<(String, Vec<u8>)>, ConfigError> {
        use base64::Engine;
        self.initial_state
            .iter()
            .map(|(key, value)| {
                base64::engine::general_purpose::STANDARD
                    .decode(value)
                    .map(|bytes| (key.clone(), bytes))
                    .map_err(|source| ConfigError::InvalidGenesisValue { key: key.clone(), source })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_and_milliseconds() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("garbage"), None);
    }

    #[test]
    fn loads_minimal_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            r#"
node_type: producer
private_key: /tmp/key.hex
p2p_port: 7000
data_dir: /tmp/data
authorities:
  - "0x0000000000000000000000000000000000000a"
genesis_path: /tmp/genesis.json
"#,
        )
        .unwrap();

        let config = NodeConfig::load(&config_path).unwrap();
        assert_eq!(config.node_type, NodeType::Producer);
        assert_eq!(config.max_peers, DEFAULT_MAX_PEERS);
        assert_eq!(config.block_time, "5s");
        assert_eq!(config.listen_addr(), "0.0.0.0:7000");
    }

    #[test]
    fn rejects_malformed_authority_address() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(
            &config_path,
            r#"
node_type: full
private_key: /tmp/key.hex
p2p_port: 7000
data_dir: /tmp/data
authorities:
  - "not-an-address"
genesis_path: /tmp/genesis.json
"#,
        )
        .unwrap();
        let config = NodeConfig::load(&config_path).unwrap();
        assert!(config.authority_addresses().is_err());
    }

    #[test]
    fn genesis_file_decodes_base64_initial_state() {
        let dir = tempfile::tempdir().unwrap();
        let genesis_path = dir.path().join("genesis.json");
        std::fs::write(
            &genesis_path,
            r#"{
                "timestamp": 1700000000,
                "authorities": ["0x0000000000000000000000000000000000000a"],
                "initial_state": {"hello": "d29ybGQ="}
            }"#,
        )
        .unwrap();

        let genesis = GenesisFile::load(&genesis_path).unwrap();
        let decoded = genesis.decoded_initial_state().unwrap();
        assert_eq!(decoded, vec![("hello".to_string(), b"world".to_vec())]);
    }
}
