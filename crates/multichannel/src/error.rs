//! Error types for the registrar and chain support.

use crate::msgprocessor::MsgProcessorError;
use crate::resources::ResourcesError;
use orderer_channelconfig::ConfigError;
use orderer_consensus::ConsensusError;
use orderer_core::{BlockError, EnvelopeError, HeaderType};
use orderer_storage::LedgerError;
use thiserror::Error;

/// Errors the node cannot recover from. The host is expected to exit.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("no system channel found")]
    NoSystemChannel,

    #[error("there can be only one system channel, found {first} and {second}")]
    MultipleSystemChannels { first: String, second: String },

    #[error("corrupt ledger: {0}")]
    CorruptLedger(String),

    #[error("no consenter registered for consensus type {0}")]
    UnknownConsenter(String),

    #[error("registrar is already initialized")]
    AlreadyInitialized,

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid config for channel {channel}: {source}")]
    Config {
        channel: String,
        #[source]
        source: ConfigError,
    },

    #[error("block writer error: {0}")]
    Block(#[from] BlockError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),
}

/// Errors returned to callers of the registrar.
#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("message is of type {0:?}, which cannot be broadcast directly")]
    ConfigTypeRejected(HeaderType),

    #[error("registrar has not been initialized")]
    NotInitialized,

    #[error("system channel is not available")]
    NoSystemChannel,

    #[error("no channel id was specified")]
    MissingChannelId,

    #[error("mismatching channel ids: header has {header}, update has {update}")]
    ChannelIdMismatch { header: String, update: String },

    #[error("config update has no application section")]
    MissingApplication,

    #[error("consortium not specified")]
    MissingConsortium,

    #[error("unknown consortium name: {0}")]
    UnknownConsortium(String),

    #[error("attempted to include member {org} which is not in consortium {consortium}")]
    NotConsortiumMember { org: String, consortium: String },

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resources(#[from] ResourcesError),

    #[error(transparent)]
    MsgProcessor(#[from] MsgProcessorError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

pub type Result<T> = std::result::Result<T, RegistrarError>;
