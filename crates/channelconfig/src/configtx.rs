//! Validation of configuration updates against a channel's current config.

use crate::config::{Config, ConfigEnvelope, ConfigUpdateEnvelope};
use crate::policy::{PolicyManager, ADMINS};
use crate::{ConfigError, Result};
use orderer_core::{Envelope, HeaderType};
use std::sync::Arc;
use tracing::debug;

/// Proposes and validates configuration changes for one channel.
#[derive(Debug, Clone)]
pub struct Validator {
    channel_id: String,
    config: Arc<Config>,
    policies: PolicyManager,
}

impl Validator {
    pub(crate) fn new(channel_id: String, config: Arc<Config>, policies: PolicyManager) -> Self {
        Self {
            channel_id,
            config,
            policies,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Sequence of the config this validator checks updates against.
    pub fn sequence(&self) -> u64 {
        self.config.sequence
    }

    /// Turn a signed `ConfigUpdate` envelope into the next full config.
    ///
    /// The update must target this channel, change something, and be
    /// authorized by the channel's `Admins` policy.
    pub fn propose_config_update(&self, envelope: &Envelope) -> Result<ConfigEnvelope> {
        let payload = envelope.payload()?;
        let chdr = &payload.header.channel_header;
        if chdr.header_type != HeaderType::ConfigUpdate {
            return Err(ConfigError::WrongHeaderType {
                expected: HeaderType::ConfigUpdate,
                got: chdr.header_type,
            });
        }
        if chdr.channel_id != self.channel_id {
            return Err(ConfigError::ChannelMismatch {
                expected: self.channel_id.clone(),
                got: chdr.channel_id.clone(),
            });
        }

        let update_envelope: ConfigUpdateEnvelope = payload.decode_data()?;
        let update = update_envelope.update()?;
        if update.channel_id != self.channel_id {
            return Err(ConfigError::ChannelMismatch {
                expected: self.channel_id.clone(),
                got: update.channel_id,
            });
        }
        if update.is_empty() {
            return Err(ConfigError::EmptyUpdate);
        }

        self.authorize(&update_envelope)?;
        let config = self.config.apply(&update)?;
        debug!(
            channel = %self.channel_id,
            sequence = config.sequence,
            "proposed config update"
        );

        Ok(ConfigEnvelope {
            config,
            last_update: Some(envelope.clone()),
        })
    }

    /// Check that `config_envelope` is exactly what its embedded update
    /// produces on top of the current config.
    pub fn validate(&self, config_envelope: &ConfigEnvelope) -> Result<()> {
        let expected = self.config.sequence + 1;
        if config_envelope.config.sequence != expected {
            return Err(ConfigError::SequenceMismatch {
                expected,
                got: config_envelope.config.sequence,
            });
        }
        let last_update = config_envelope
            .last_update
            .as_ref()
            .ok_or(ConfigError::MissingLastUpdate)?;
        let proposed = self.propose_config_update(last_update)?;
        if proposed.config != config_envelope.config {
            return Err(ConfigError::ConfigMismatch);
        }
        Ok(())
    }

    fn authorize(&self, envelope: &ConfigUpdateEnvelope) -> Result<()> {
        let policy = self
            .policies
            .get_policy(ADMINS)
            .ok_or_else(|| ConfigError::MissingPolicy(ADMINS.to_string()))?;
        let signed = envelope.signed_data()?;
        policy.evaluate(&signed).map_err(|source| ConfigError::Unauthorized {
            policy: ADMINS.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use crate::config::ConfigUpdate;
    use crate::genesis;
    use orderer_core::{create_signed_envelope, Keypair, Signer};

    fn update_envelope(channel_id: &str, update: &ConfigUpdate, signer: &Keypair) -> Envelope {
        let mut cue = ConfigUpdateEnvelope::new(update).unwrap();
        cue.sign(signer).unwrap();
        create_signed_envelope(
            HeaderType::ConfigUpdate,
            channel_id,
            Some(signer as &dyn Signer),
            &cue,
            0,
            0,
        )
        .unwrap()
    }

    fn system_bundle(admin: &Keypair) -> Bundle {
        let config = genesis::system_channel_config("solo", vec![admin.public_key.clone()]);
        Bundle::new("system", config).unwrap()
    }

    fn batch_update(count: u32) -> ConfigUpdate {
        let mut orderer = genesis::sample_orderer_config("solo");
        orderer.batch_size.max_message_count = count;
        ConfigUpdate {
            channel_id: "system".into(),
            orderer: Some(orderer),
            ..Default::default()
        }
    }

    #[test]
    fn test_propose_and_validate() {
        let admin = Keypair::generate();
        let bundle = system_bundle(&admin);
        let env = update_envelope("system", &batch_update(42), &admin);

        let proposed = bundle.configtx_validator().propose_config_update(&env).unwrap();
        assert_eq!(proposed.config.sequence, 1);
        assert!(bundle.configtx_validator().validate(&proposed).is_ok());
    }

    #[test]
    fn test_unauthorized_signer() {
        let admin = Keypair::generate();
        let intruder = Keypair::generate();
        let bundle = system_bundle(&admin);
        let env = update_envelope("system", &batch_update(42), &intruder);

        assert!(matches!(
            bundle.configtx_validator().propose_config_update(&env),
            Err(ConfigError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_wrong_channel() {
        let admin = Keypair::generate();
        let bundle = system_bundle(&admin);
        let env = update_envelope("other", &batch_update(42), &admin);

        assert!(matches!(
            bundle.configtx_validator().propose_config_update(&env),
            Err(ConfigError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_tampered_config() {
        let admin = Keypair::generate();
        let bundle = system_bundle(&admin);
        let env = update_envelope("system", &batch_update(42), &admin);

        let mut proposed = bundle.configtx_validator().propose_config_update(&env).unwrap();
        proposed
            .config
            .orderer
            .as_mut()
            .unwrap()
            .batch_size
            .max_message_count = 7;
        assert!(matches!(
            bundle.configtx_validator().validate(&proposed),
            Err(ConfigError::ConfigMismatch)
        ));

        proposed.config.sequence = 5;
        assert!(matches!(
            bundle.configtx_validator().validate(&proposed),
            Err(ConfigError::SequenceMismatch { expected: 1, got: 5 })
        ));
    }
}
