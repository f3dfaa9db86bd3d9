//! Sample configurations and genesis / channel-creation builders.
//!
//! These mirror the usual bootstrap profiles: a system channel with one
//! sample consortium, and application channels created from it.

use crate::capabilities::{Capabilities, V2_0};
use crate::config::{
    ApplicationConfig, BatchSize, Config, ConfigEnvelope, ConfigUpdate, ConfigUpdateEnvelope,
    ConsortiumConfig, OrdererConfig,
};
use crate::policy::{Policy, ADMINS, READERS, WRITERS};
use crate::Result;
use orderer_core::{create_signed_envelope, Block, Envelope, HeaderType, PublicKey, Signer};
use std::collections::BTreeMap;

pub const SAMPLE_CONSORTIUM: &str = "SampleConsortium";

pub const MSG_VERSION: i32 = 0;
pub const EPOCH: u64 = 0;

pub fn sample_orderer_config(consensus_type: &str) -> OrdererConfig {
    OrdererConfig {
        consensus_type: consensus_type.to_string(),
        batch_size: BatchSize::default(),
        batch_timeout_ms: 2000,
        max_channels: 0,
        capabilities: Capabilities::new([V2_0]),
    }
}

/// Admin policy for a set of admins. No admins means an insecure profile
/// that accepts any update.
fn admins_policy(admins: Vec<PublicKey>) -> Policy {
    if admins.is_empty() {
        Policy::AcceptAll
    } else {
        Policy::any_of(admins)
    }
}

/// Configuration for a system channel with a single sample consortium.
pub fn system_channel_config(consensus_type: &str, admins: Vec<PublicKey>) -> Config {
    let admins = admins_policy(admins);
    let mut consortiums = BTreeMap::new();
    consortiums.insert(
        SAMPLE_CONSORTIUM.to_string(),
        ConsortiumConfig {
            channel_creation_policy: admins.clone(),
            organizations: BTreeMap::new(),
        },
    );

    Config {
        sequence: 0,
        capabilities: Capabilities::new([V2_0]),
        orderer: Some(sample_orderer_config(consensus_type)),
        application: None,
        consortiums: Some(consortiums),
        consortium: None,
        policies: standard_policies(admins),
    }
}

/// Configuration for an ordinary (application) channel.
pub fn application_channel_config(consensus_type: &str, admins: Vec<PublicKey>) -> Config {
    Config {
        sequence: 0,
        capabilities: Capabilities::new([V2_0]),
        orderer: Some(sample_orderer_config(consensus_type)),
        application: Some(ApplicationConfig {
            organizations: BTreeMap::new(),
            capabilities: Capabilities::new([V2_0]),
        }),
        consortiums: None,
        consortium: Some(SAMPLE_CONSORTIUM.to_string()),
        policies: standard_policies(admins_policy(admins)),
    }
}

pub(crate) fn standard_policies(admins: Policy) -> BTreeMap<String, Policy> {
    let mut policies = BTreeMap::new();
    policies.insert(ADMINS.to_string(), admins);
    policies.insert(WRITERS.to_string(), Policy::AcceptAll);
    policies.insert(READERS.to_string(), Policy::AcceptAll);
    policies
}

/// The unsigned `Config` envelope carried by a genesis block.
pub fn genesis_config_tx(channel_id: &str, config: Config) -> Result<Envelope> {
    let config_envelope = ConfigEnvelope {
        config,
        last_update: None,
    };
    Ok(create_signed_envelope(
        HeaderType::Config,
        channel_id,
        None,
        &config_envelope,
        MSG_VERSION,
        EPOCH,
    )?)
}

pub fn genesis_block(channel_id: &str, config: Config) -> Result<Block> {
    Ok(Block::genesis(genesis_config_tx(channel_id, config)?)?)
}

/// A config update asking the system channel to create `channel_id`.
pub fn channel_creation_update(
    channel_id: &str,
    consortium: &str,
    application: ApplicationConfig,
) -> ConfigUpdate {
    ConfigUpdate {
        channel_id: channel_id.to_string(),
        consortium: Some(consortium.to_string()),
        application: Some(application),
        ..Default::default()
    }
}

/// Build a signed `ConfigUpdate` envelope requesting creation of `channel_id`.
pub fn make_channel_creation_transaction(
    channel_id: &str,
    consortium: &str,
    application: ApplicationConfig,
    signer: Option<&dyn Signer>,
) -> Result<Envelope> {
    let update = channel_creation_update(channel_id, consortium, application);
    let mut update_envelope = ConfigUpdateEnvelope::new(&update)?;
    if let Some(signer) = signer {
        update_envelope.sign(signer)?;
    }
    Ok(create_signed_envelope(
        HeaderType::ConfigUpdate,
        channel_id,
        signer,
        &update_envelope,
        MSG_VERSION,
        EPOCH,
    )?)
}
