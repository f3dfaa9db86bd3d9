//! Validation of incoming messages before they are ordered.
//!
//! Ordinary channels use [`StandardChannel`]; the system channel uses
//! [`SystemChannel`], which additionally turns config updates for unknown
//! channels into channel-creation transactions.

mod systemchannel;

pub use systemchannel::{ChainCreator, SystemChannel};

use crate::error::RegistrarError;
use orderer_channelconfig::{Bundle, ConfigEnvelope, ConfigError};
use orderer_core::{
    create_signed_envelope, ChannelHeader, Envelope, EnvelopeError, HeaderType, Signer,
};
use std::sync::Arc;
use thiserror::Error;

/// Message version and epoch stamped on envelopes the orderer creates.
pub(crate) const MSG_VERSION: i32 = 0;
pub(crate) const EPOCH: u64 = 0;

/// How a message travels through the orderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Ordered as-is.
    NormalMsg,
    /// A config update that must be turned into a config message.
    ConfigUpdateMsg,
    /// A config (or orderer transaction) message ready to be committed alone.
    ConfigMsg,
}

pub fn classify(chdr: &ChannelHeader) -> Classification {
    match chdr.header_type {
        HeaderType::ConfigUpdate => Classification::ConfigUpdateMsg,
        HeaderType::Config | HeaderType::OrdererTransaction => Classification::ConfigMsg,
        _ => Classification::NormalMsg,
    }
}

#[derive(Debug, Error)]
pub enum MsgProcessorError {
    #[error("message has an empty payload")]
    EmptyMessage,

    #[error("message payload is {size} bytes, exceeding the maximum of {max}")]
    MessageTooLarge { size: usize, max: u32 },

    #[error("message is for channel {got}, not {expected}")]
    ChannelMismatch { expected: String, got: String },

    #[error("channel has no orderer config")]
    MissingOrdererConfig,

    #[error("message of type {0:?} is not a config message")]
    NotConfigMessage(HeaderType),

    #[error("channel creation would exceed the maximum of {0} channels")]
    MaximumChannelsReached(u64),

    #[error("system channel is shutting down")]
    RegistrarGone,

    #[error("channel creation rejected: {0}")]
    ChannelCreation(#[source] Box<RegistrarError>),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, MsgProcessorError>;

/// Validates messages for one channel against its current config.
pub trait Processor: Send + Sync {
    fn classify_msg(&self, chdr: &ChannelHeader) -> Classification {
        classify(chdr)
    }

    /// Check a normal message and return the config sequence it was checked
    /// against.
    fn process_normal_msg(&self, bundle: &Bundle, envelope: &Envelope) -> Result<u64>;

    /// Turn a config update into a config message.
    fn process_config_update_msg(
        &self,
        bundle: &Bundle,
        envelope: &Envelope,
    ) -> Result<(Envelope, u64)>;

    /// Re-derive a config message against the current config.
    fn process_config_msg(&self, bundle: &Bundle, envelope: &Envelope) -> Result<(Envelope, u64)>;
}

/// Rules every message on a channel must pass.
pub(crate) fn apply_filters(bundle: &Bundle, envelope: &Envelope) -> Result<()> {
    if envelope.payload.is_empty() {
        return Err(MsgProcessorError::EmptyMessage);
    }

    let orderer = bundle
        .orderer_config()
        .ok_or(MsgProcessorError::MissingOrdererConfig)?;
    let max = orderer.batch_size.absolute_max_bytes;
    let size = envelope.size();
    if size > max as usize {
        return Err(MsgProcessorError::MessageTooLarge { size, max });
    }

    let chdr = envelope.channel_header()?;
    if chdr.channel_id != bundle.channel_id() {
        return Err(MsgProcessorError::ChannelMismatch {
            expected: bundle.channel_id().to_string(),
            got: chdr.channel_id,
        });
    }
    Ok(())
}

/// Processor for ordinary channels.
pub struct StandardChannel {
    signer: Arc<dyn Signer>,
}

impl StandardChannel {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }

    pub(crate) fn signer(&self) -> &dyn Signer {
        self.signer.as_ref()
    }
}

impl Processor for StandardChannel {
    fn process_normal_msg(&self, bundle: &Bundle, envelope: &Envelope) -> Result<u64> {
        let sequence = bundle.sequence();
        apply_filters(bundle, envelope)?;
        Ok(sequence)
    }

    fn process_config_update_msg(
        &self,
        bundle: &Bundle,
        envelope: &Envelope,
    ) -> Result<(Envelope, u64)> {
        let sequence = bundle.sequence();
        let config_envelope = bundle.configtx_validator().propose_config_update(envelope)?;
        let config = create_signed_envelope(
            HeaderType::Config,
            bundle.channel_id(),
            Some(self.signer()),
            &config_envelope,
            MSG_VERSION,
            EPOCH,
        )?;
        apply_filters(bundle, &config)?;
        Ok((config, sequence))
    }

    fn process_config_msg(&self, bundle: &Bundle, envelope: &Envelope) -> Result<(Envelope, u64)> {
        let header_type = envelope.channel_header()?.header_type;
        if header_type != HeaderType::Config {
            return Err(MsgProcessorError::NotConfigMessage(header_type));
        }
        let config_envelope: ConfigEnvelope = envelope.decode_data_of(HeaderType::Config)?;
        let last_update = config_envelope
            .last_update
            .ok_or(ConfigError::MissingLastUpdate)?;
        self.process_config_update_msg(bundle, &last_update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderer_channelconfig::{genesis, Capabilities, ConfigUpdate, ConfigUpdateEnvelope};
    use orderer_core::Keypair;

    const CHANNEL: &str = "testchannel";

    fn bundle() -> Bundle {
        let config = genesis::application_channel_config("solo", vec![]);
        Bundle::new(CHANNEL, config).unwrap()
    }

    fn processor() -> StandardChannel {
        StandardChannel::new(Arc::new(Keypair::generate()))
    }

    fn normal_tx(channel: &str, body: Vec<u8>) -> Envelope {
        create_signed_envelope(HeaderType::Message, channel, None, &body, 0, 0).unwrap()
    }

    fn config_update(channel: &str) -> Envelope {
        let update = ConfigUpdate {
            channel_id: channel.to_string(),
            capabilities: Some(Capabilities::new(["V1_3"])),
            ..Default::default()
        };
        let cue = ConfigUpdateEnvelope::new(&update).unwrap();
        create_signed_envelope(HeaderType::ConfigUpdate, channel, None, &cue, 0, 0).unwrap()
    }

    #[test]
    fn test_classify() {
        let chdr = |t| ChannelHeader::new(t, CHANNEL, 0, 0);
        assert_eq!(classify(&chdr(HeaderType::Message)), Classification::NormalMsg);
        assert_eq!(
            classify(&chdr(HeaderType::EndorserTransaction)),
            Classification::NormalMsg
        );
        assert_eq!(
            classify(&chdr(HeaderType::ConfigUpdate)),
            Classification::ConfigUpdateMsg
        );
        assert_eq!(classify(&chdr(HeaderType::Config)), Classification::ConfigMsg);
        assert_eq!(
            classify(&chdr(HeaderType::OrdererTransaction)),
            Classification::ConfigMsg
        );
    }

    #[test]
    fn test_normal_msg_filters() {
        let bundle = bundle();
        let processor = processor();

        let seq = processor
            .process_normal_msg(&bundle, &normal_tx(CHANNEL, vec![1, 2, 3]))
            .unwrap();
        assert_eq!(seq, 0);

        assert!(matches!(
            processor.process_normal_msg(&bundle, &Envelope::default()),
            Err(MsgProcessorError::EmptyMessage)
        ));
        assert!(matches!(
            processor.process_normal_msg(&bundle, &normal_tx("other", vec![])),
            Err(MsgProcessorError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn test_oversized_msg_rejected() {
        let mut config = genesis::application_channel_config("solo", vec![]);
        if let Some(orderer) = config.orderer.as_mut() {
            orderer.batch_size.absolute_max_bytes = 512;
            orderer.batch_size.preferred_max_bytes = 256;
        }
        let bundle = Bundle::new(CHANNEL, config).unwrap();

        assert!(matches!(
            processor().process_normal_msg(&bundle, &normal_tx(CHANNEL, vec![0u8; 1024])),
            Err(MsgProcessorError::MessageTooLarge { max: 512, .. })
        ));
    }

    #[test]
    fn test_config_update_becomes_config_msg() {
        let bundle = bundle();
        let processor = processor();

        let (config, seq) = processor
            .process_config_update_msg(&bundle, &config_update(CHANNEL))
            .unwrap();
        assert_eq!(seq, 0);
        assert_eq!(config.channel_header().unwrap().header_type, HeaderType::Config);
        config.verify_creator().unwrap();

        let config_envelope: ConfigEnvelope = config.decode_data_of(HeaderType::Config).unwrap();
        assert_eq!(config_envelope.config.sequence, 1);
        assert!(config_envelope.config.capabilities.contains("V1_3"));

        let (again, _) = processor.process_config_msg(&bundle, &config).unwrap();
        let reproposed: ConfigEnvelope = again.decode_data_of(HeaderType::Config).unwrap();
        assert_eq!(reproposed.config, config_envelope.config);
    }

    #[test]
    fn test_config_msg_requires_config_type() {
        assert!(matches!(
            processor().process_config_msg(&bundle(), &normal_tx(CHANNEL, vec![1])),
            Err(MsgProcessorError::NotConfigMessage(HeaderType::Message))
        ));
    }
}
