//! Channel configuration for the orderer.
//!
//! A channel's configuration is committed to its ledger as a `Config`
//! transaction and loaded into an immutable [`Bundle`]:
//! - **Config model**: orderer, application, consortium sections and policies
//! - **Capabilities**: declared feature sets checked against this node
//! - **Policies**: signature policies over signed config updates
//! - **Validator**: proposes the next config from a signed update
//!
//! # Example
//!
//! ```rust,no_run
//! use orderer_channelconfig::{genesis, Bundle};
//!
//! let config = genesis::system_channel_config("solo", vec![]);
//! let block = genesis::genesis_block("system-channel", config).unwrap();
//! let bundle = Bundle::from_config_tx(&block.data[0]).unwrap();
//! assert!(bundle.is_system_channel());
//! ```

pub mod bundle;
pub mod capabilities;
pub mod config;
pub mod configtx;
pub mod genesis;
pub mod policy;

use orderer_core::{BlockError, CryptoError, EnvelopeError, HeaderType};
use thiserror::Error;

pub use bundle::Bundle;
pub use capabilities::{Capabilities, UnsupportedCapabilities};
pub use config::{
    ApplicationConfig, BatchSize, Config, ConfigEnvelope, ConfigSignature, ConfigUpdate,
    ConfigUpdateEnvelope, ConsortiumConfig, OrdererConfig, Organization,
};
pub use configtx::Validator;
pub use policy::{Policy, PolicyError, PolicyManager, SignedData};

/// Errors produced while building or changing channel configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("expected header type {expected:?}, got {got:?}")]
    WrongHeaderType { expected: HeaderType, got: HeaderType },

    #[error("config update for channel {got} submitted to channel {expected}")]
    ChannelMismatch { expected: String, got: String },

    #[error("config update contains no changes")]
    EmptyUpdate,

    #[error("missing policy {0}")]
    MissingPolicy(String),

    #[error("config update not authorized by policy {policy}: {source}")]
    Unauthorized {
        policy: String,
        #[source]
        source: PolicyError,
    },

    #[error("config sequence mismatch (expected {expected}, got {got})")]
    SequenceMismatch { expected: u64, got: u64 },

    #[error("config envelope carries no last update")]
    MissingLastUpdate,

    #[error("config does not match the result of its last update")]
    ConfigMismatch,

    #[error("consortium mismatch (expected {expected}, got {got})")]
    ConsortiumMismatch { expected: String, got: String },

    #[error("consensus type cannot change from {from} to {to}")]
    ConsensusTypeChange { from: String, to: String },

    #[error("invalid orderer config: {0}")]
    InvalidOrdererConfig(String),

    #[error("invalid config structure: {0}")]
    InvalidStructure(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
