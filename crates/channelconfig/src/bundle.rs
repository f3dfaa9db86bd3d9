//! The immutable configuration snapshot of a channel.

use crate::capabilities::Capabilities;
use crate::config::{ApplicationConfig, Config, ConfigEnvelope, ConsortiumConfig, OrdererConfig};
use crate::configtx::Validator;
use crate::policy::PolicyManager;
use crate::{ConfigError, Result};
use orderer_core::{Envelope, HeaderType};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A validated, immutable view of one channel configuration.
///
/// Bundles are never mutated. A committed config block produces a new bundle
/// which replaces the old one wholesale.
#[derive(Debug, Clone)]
pub struct Bundle {
    channel_id: String,
    config: Arc<Config>,
    policy_manager: PolicyManager,
}

impl Bundle {
    pub fn new(channel_id: impl Into<String>, config: Config) -> Result<Self> {
        config.validate()?;
        let policy_manager = PolicyManager::new(config.policies.clone());
        Ok(Self {
            channel_id: channel_id.into(),
            config: Arc::new(config),
            policy_manager,
        })
    }

    /// Build a bundle from a `Config` envelope, taking the channel id from
    /// its header.
    pub fn from_config_tx(envelope: &Envelope) -> Result<Self> {
        let channel_id = envelope.channel_header()?.channel_id;
        let config_envelope: ConfigEnvelope = envelope.decode_data_of(HeaderType::Config)?;
        Self::new(channel_id, config_envelope.config)
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn sequence(&self) -> u64 {
        self.config.sequence
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orderer_config(&self) -> Option<&OrdererConfig> {
        self.config.orderer.as_ref()
    }

    /// Channel-level capabilities.
    pub fn channel_capabilities(&self) -> &Capabilities {
        &self.config.capabilities
    }

    pub fn application_config(&self) -> Option<&ApplicationConfig> {
        self.config.application.as_ref()
    }

    /// Present only on the system channel.
    pub fn consortiums_config(&self) -> Option<&BTreeMap<String, ConsortiumConfig>> {
        self.config.consortiums.as_ref()
    }

    pub fn is_system_channel(&self) -> bool {
        self.config.consortiums.is_some()
    }

    pub fn policy_manager(&self) -> &PolicyManager {
        &self.policy_manager
    }

    pub fn configtx_validator(&self) -> Validator {
        Validator::new(
            self.channel_id.clone(),
            Arc::clone(&self.config),
            self.policy_manager.clone(),
        )
    }

    /// Check that `next` may replace this bundle.
    pub fn validate_new(&self, next: &Bundle) -> Result<()> {
        if next.channel_id != self.channel_id {
            return Err(ConfigError::ChannelMismatch {
                expected: self.channel_id.clone(),
                got: next.channel_id.clone(),
            });
        }
        if let (Some(current), Some(proposed)) = (self.orderer_config(), next.orderer_config()) {
            if current.consensus_type != proposed.consensus_type {
                return Err(ConfigError::ConsensusTypeChange {
                    from: current.consensus_type.clone(),
                    to: proposed.consensus_type.clone(),
                });
            }
        }
        Ok(())
    }
}
