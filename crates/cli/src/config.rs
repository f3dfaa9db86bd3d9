//! Node configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerType {
    Ram,
    Sled,
}

/// Settings for one orderer node, read from a JSON file.
///
/// Every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Where the sled ledger lives.
    pub data_dir: PathBuf,
    pub ledger_type: LedgerType,
    /// Recent blocks kept per channel by the RAM ledger. The latest config
    /// block is kept as well.
    pub ram_ledger_max_size: usize,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Bootstrap block written to an empty ledger.
    pub genesis_block: Option<PathBuf>,
    /// Channel id used when bootstrapping without a genesis block.
    pub system_channel_id: String,
    /// Hex-encoded ed25519 private key of the node. A fresh key is used when
    /// unset.
    pub signer_key: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./orderer_data"),
            ledger_type: LedgerType::Sled,
            ram_ledger_max_size: 1000,
            log_level: "info".to_string(),
            genesis_block: None,
            system_channel_id: "system-channel".to_string(),
            signer_key: None,
        }
    }
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }
}

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over
/// `default_level`.
pub fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
