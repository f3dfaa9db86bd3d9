//! Multi-channel orchestration for the orderer.
//!
//! The [`Registrar`] owns one [`ChainSupport`] per channel and routes
//! incoming messages to them:
//! - **Resources**: capability checks a config must pass before a chain runs
//! - **Locator**: recovers the latest config transaction from a ledger
//! - **Message processors**: validate messages for standard and system channels
//! - **Block writer**: stamps metadata on blocks and applies config blocks
//! - **Chain support**: ledger, config snapshot and consenter for one channel
//!
//! # Example
//!
//! ```rust,no_run
//! use orderer_channelconfig::genesis;
//! use orderer_consensus::{solo, ConsenterRegistry};
//! use orderer_core::Keypair;
//! use orderer_multichannel::Registrar;
//! use orderer_storage::{Factory, RamLedgerFactory, ReadWriter};
//! use std::sync::Arc;
//!
//! let factory = Arc::new(RamLedgerFactory::new(1000));
//! let config = genesis::system_channel_config("solo", vec![]);
//! let ledger = factory.get_or_create("system-channel").unwrap();
//! ledger.append(genesis::genesis_block("system-channel", config).unwrap()).unwrap();
//!
//! let registrar = Registrar::new(factory, Arc::new(Keypair::generate()));
//! let mut consenters = ConsenterRegistry::new();
//! consenters.insert(solo::CONSENSUS_TYPE.to_string(), Arc::new(solo::Consenter::new()));
//! registrar.initialize(consenters).unwrap();
//! ```

pub mod blockwriter;
pub mod chainsupport;
pub mod error;
pub mod locator;
pub mod msgprocessor;
pub mod registrar;
pub mod resources;

pub use blockwriter::{BlockWriter, BlockWriterError};
pub use chainsupport::{ChainSupport, ChannelSupport};
pub use error::{FatalError, RegistrarError, Result};
pub use msgprocessor::{Classification, MsgProcessorError, Processor};
pub use registrar::Registrar;
pub use resources::{check_resources, check_resources_or_panic, ResourcesError};
