//! Channel configuration data model.

use crate::capabilities::Capabilities;
use crate::policy::{Policy, SignedData};
use orderer_core::{Envelope, PublicKey, Signature, SignatureHeader, Signer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{ConfigError, Result};

/// Batch limits for the block cutter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSize {
    /// Cut a batch once it holds this many messages.
    pub max_message_count: u32,
    /// No batch may exceed this many bytes.
    pub absolute_max_bytes: u32,
    /// Batches are cut early once they exceed this many bytes.
    pub preferred_max_bytes: u32,
}

impl Default for BatchSize {
    fn default() -> Self {
        Self {
            max_message_count: 10,
            absolute_max_bytes: 10 * 1024 * 1024,
            preferred_max_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Orderer section of a channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdererConfig {
    /// Name of the consenter that runs this channel.
    pub consensus_type: String,
    pub batch_size: BatchSize,
    pub batch_timeout_ms: u64,
    /// Maximum number of channels the system channel may create; 0 is unlimited.
    pub max_channels: u64,
    pub capabilities: Capabilities,
}

impl OrdererConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let size = &self.batch_size;
        if size.max_message_count == 0 {
            return Err(ConfigError::InvalidOrdererConfig(
                "max_message_count must be greater than 0".into(),
            ));
        }
        if size.absolute_max_bytes == 0 {
            return Err(ConfigError::InvalidOrdererConfig(
                "absolute_max_bytes must be greater than 0".into(),
            ));
        }
        if size.preferred_max_bytes > size.absolute_max_bytes {
            return Err(ConfigError::InvalidOrdererConfig(format!(
                "preferred_max_bytes ({}) exceeds absolute_max_bytes ({})",
                size.preferred_max_bytes, size.absolute_max_bytes
            )));
        }
        if self.batch_timeout_ms == 0 {
            return Err(ConfigError::InvalidOrdererConfig(
                "batch_timeout must be greater than 0".into(),
            ));
        }
        if self.consensus_type.is_empty() {
            return Err(ConfigError::InvalidOrdererConfig(
                "consensus_type must be set".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    pub members: Vec<PublicKey>,
}

/// Application section of an ordinary channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub organizations: BTreeMap<String, Organization>,
    pub capabilities: Capabilities,
}

/// A consortium that may create channels through the system channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsortiumConfig {
    pub channel_creation_policy: Policy,
    pub organizations: BTreeMap<String, Organization>,
}

/// A complete channel configuration at one sequence number.
///
/// A configuration with a `consortiums` section belongs to the system channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub sequence: u64,
    pub capabilities: Capabilities,
    pub orderer: Option<OrdererConfig>,
    pub application: Option<ApplicationConfig>,
    pub consortiums: Option<BTreeMap<String, ConsortiumConfig>>,
    /// Consortium an ordinary channel was created from.
    pub consortium: Option<String>,
    pub policies: BTreeMap<String, Policy>,
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.consortiums.is_some() && self.application.is_some() {
            return Err(ConfigError::InvalidStructure(
                "config cannot carry both consortiums and application sections".into(),
            ));
        }
        if let Some(orderer) = &self.orderer {
            orderer.validate()?;
        }
        Ok(())
    }

    /// Apply `update` on top of this config, producing the next sequence.
    pub(crate) fn apply(&self, update: &ConfigUpdate) -> Result<Config> {
        let mut next = self.clone();
        next.sequence = self.sequence + 1;

        if let Some(consortium) = &update.consortium {
            if self.consortium.as_ref() != Some(consortium) {
                return Err(ConfigError::ConsortiumMismatch {
                    expected: self.consortium.clone().unwrap_or_default(),
                    got: consortium.clone(),
                });
            }
        }
        if let Some(capabilities) = &update.capabilities {
            next.capabilities = capabilities.clone();
        }
        if let Some(orderer) = &update.orderer {
            if let Some(current) = &self.orderer {
                if current.consensus_type != orderer.consensus_type {
                    return Err(ConfigError::ConsensusTypeChange {
                        from: current.consensus_type.clone(),
                        to: orderer.consensus_type.clone(),
                    });
                }
            }
            next.orderer = Some(orderer.clone());
        }
        if let Some(application) = &update.application {
            if self.consortiums.is_some() {
                return Err(ConfigError::InvalidStructure(
                    "system channel config cannot carry an application section".into(),
                ));
            }
            next.application = Some(application.clone());
        }
        for (name, policy) in &update.policies {
            next.policies.insert(name.clone(), policy.clone());
        }

        next.validate()?;
        Ok(next)
    }
}

/// Payload of a `Config` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEnvelope {
    pub config: Config,
    /// The signed update this config was produced from; absent for genesis.
    pub last_update: Option<Envelope>,
}

/// A proposed change to a channel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub channel_id: String,
    pub consortium: Option<String>,
    pub capabilities: Option<Capabilities>,
    pub orderer: Option<OrdererConfig>,
    pub application: Option<ApplicationConfig>,
    pub policies: BTreeMap<String, Policy>,
}

impl ConfigUpdate {
    /// True when the update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.consortium.is_none()
            && self.capabilities.is_none()
            && self.orderer.is_none()
            && self.application.is_none()
            && self.policies.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSignature {
    pub signature_header: SignatureHeader,
    pub signature: Signature,
}

/// Payload of a `ConfigUpdate` envelope: the encoded update plus signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdateEnvelope {
    pub config_update: Vec<u8>,
    pub signatures: Vec<ConfigSignature>,
}

impl ConfigUpdateEnvelope {
    pub fn new(update: &ConfigUpdate) -> Result<Self> {
        Ok(Self {
            config_update: bincode::serialize(update)?,
            signatures: Vec::new(),
        })
    }

    pub fn update(&self) -> Result<ConfigUpdate> {
        Ok(bincode::deserialize(&self.config_update)?)
    }

    /// Add a signature over the signature header followed by the update bytes.
    pub fn sign(&mut self, signer: &dyn Signer) -> Result<()> {
        let signature_header = SignatureHeader::for_signer(signer);
        let message = signed_bytes(&signature_header, &self.config_update)?;
        let signature = signer.sign(&message)?;
        self.signatures.push(ConfigSignature {
            signature_header,
            signature,
        });
        Ok(())
    }

    pub fn signed_data(&self) -> Result<Vec<SignedData>> {
        self.signatures
            .iter()
            .map(|sig| {
                Ok(SignedData {
                    data: signed_bytes(&sig.signature_header, &self.config_update)?,
                    identity: sig.signature_header.creator.clone(),
                    signature: sig.signature,
                })
            })
            .collect()
    }
}

fn signed_bytes(header: &SignatureHeader, config_update: &[u8]) -> Result<Vec<u8>> {
    let mut message = bincode::serialize(header)?;
    message.extend_from_slice(config_update);
    Ok(message)
}
