//! Consensus plumbing for the orderer.
//!
//! A [`Consenter`] turns a channel's [`ConsenterSupport`] into a running
//! [`Chain`]. Consenters are registered by name and chosen per channel by the
//! `consensus_type` of its orderer config:
//! - **Block cutter**: groups ordered envelopes into batches
//! - **Solo**: single-node consenter with one worker thread per channel
//!
//! # Example
//!
//! ```rust,no_run
//! use orderer_consensus::{solo, ConsenterRegistry};
//! use std::sync::Arc;
//!
//! let mut consenters = ConsenterRegistry::new();
//! consenters.insert(solo::CONSENSUS_TYPE.to_string(), Arc::new(solo::Consenter::new()));
//! ```

pub mod blockcutter;
pub mod solo;

use orderer_channelconfig::Bundle;
use orderer_core::{Block, Envelope};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use blockcutter::Receiver;

/// Error type returned across the support boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("chain {0} is halted")]
    Halted(String),

    #[error("failed to start chain worker: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// A running consensus instance for one channel.
pub trait Chain: Send + Sync {
    /// Submit a normal message validated against config sequence `config_seq`.
    fn order(&self, envelope: Envelope, config_seq: u64) -> Result<()>;

    /// Submit a config message validated against config sequence `config_seq`.
    fn configure(&self, config: Envelope, config_seq: u64) -> Result<()>;

    /// Block until the chain can accept messages.
    fn wait_ready(&self) -> Result<()>;

    fn start(&self) -> Result<()>;

    /// Stop the chain. Later submissions fail with [`ConsensusError::Halted`].
    ///
    /// Once `halt` returns the chain writes no further blocks.
    fn halt(&self);

    fn is_halted(&self) -> bool;
}

/// Builds chains for one consensus type.
pub trait Consenter: Send + Sync {
    /// `metadata` is the `ORDERER` metadata of the channel's newest block.
    fn handle_chain(
        &self,
        support: Arc<dyn ConsenterSupport>,
        metadata: Option<Vec<u8>>,
    ) -> Result<Box<dyn Chain>>;
}

/// Consenters keyed by consensus type name.
pub type ConsenterRegistry = HashMap<String, Arc<dyn Consenter>>;

/// What a chain needs from the channel it orders for.
pub trait ConsenterSupport: Send + Sync {
    fn channel_id(&self) -> &str;

    fn block_cutter(&self) -> &Receiver;

    /// The current configuration snapshot.
    fn bundle(&self) -> Arc<Bundle>;

    /// Sequence of the current configuration.
    fn sequence(&self) -> u64;

    fn height(&self) -> u64;

    fn create_next_block(&self, messages: Vec<Envelope>) -> std::result::Result<Block, BoxError>;

    fn write_block(
        &self,
        block: Block,
        encoded_metadata: Option<Vec<u8>>,
    ) -> std::result::Result<(), BoxError>;

    fn write_config_block(
        &self,
        block: Block,
        encoded_metadata: Option<Vec<u8>>,
    ) -> std::result::Result<(), BoxError>;

    /// Revalidate a normal message, returning the config sequence it was
    /// checked against.
    fn process_normal_msg(&self, envelope: &Envelope) -> std::result::Result<u64, BoxError>;

    /// Revalidate a config message, returning the (possibly rebuilt) config
    /// envelope and the sequence it was checked against.
    fn process_config_msg(
        &self,
        envelope: &Envelope,
    ) -> std::result::Result<(Envelope, u64), BoxError>;
}
