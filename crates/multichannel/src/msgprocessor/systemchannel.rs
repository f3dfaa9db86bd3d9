//! Processor for the system channel.

use super::{
    apply_filters, MsgProcessorError, Processor, Result, StandardChannel, EPOCH, MSG_VERSION,
};
use crate::error::RegistrarError;
use orderer_channelconfig::{Bundle, ConfigEnvelope, ConfigError};
use orderer_core::{create_signed_envelope, Envelope, HeaderType, Signer};
use std::sync::{Arc, Weak};
use tracing::debug;

/// What the system channel needs from the registrar to create channels.
pub trait ChainCreator: Send + Sync {
    /// Build the template configuration for a channel-creation request.
    fn new_channel_config(&self, envelope: &Envelope) -> std::result::Result<Bundle, RegistrarError>;

    /// Number of channels currently served, including the system channel.
    fn channels_count(&self) -> usize;
}

pub struct SystemChannel {
    standard: StandardChannel,
    creator: Weak<dyn ChainCreator>,
}

impl SystemChannel {
    pub fn new(signer: Arc<dyn Signer>, creator: Weak<dyn ChainCreator>) -> Self {
        Self {
            standard: StandardChannel::new(signer),
            creator,
        }
    }

    fn check_max_channels(&self, bundle: &Bundle, creator: &dyn ChainCreator) -> Result<()> {
        let max = bundle
            .orderer_config()
            .ok_or(MsgProcessorError::MissingOrdererConfig)?
            .max_channels;
        if max > 0 && creator.channels_count() as u64 > max {
            return Err(MsgProcessorError::MaximumChannelsReached(max));
        }
        Ok(())
    }
}

impl Processor for SystemChannel {
    fn process_normal_msg(&self, bundle: &Bundle, envelope: &Envelope) -> Result<u64> {
        self.standard.process_normal_msg(bundle, envelope)
    }

    /// Config updates for the system channel itself are handled as on any
    /// channel. Updates naming another channel request its creation and are
    /// wrapped into an orderer transaction on the system channel.
    fn process_config_update_msg(
        &self,
        bundle: &Bundle,
        envelope: &Envelope,
    ) -> Result<(Envelope, u64)> {
        let channel_id = envelope.channel_header()?.channel_id;
        if channel_id == bundle.channel_id() {
            return self.standard.process_config_update_msg(bundle, envelope);
        }

        debug!(channel = %channel_id, "processing channel creation request");
        let creator = self
            .creator
            .upgrade()
            .ok_or(MsgProcessorError::RegistrarGone)?;
        let sequence = bundle.sequence();

        let template = creator
            .new_channel_config(envelope)
            .map_err(|err| MsgProcessorError::ChannelCreation(Box::new(err)))?;
        let config_envelope = template
            .configtx_validator()
            .propose_config_update(envelope)?;

        let signer = self.standard.signer();
        let new_channel_config = create_signed_envelope(
            HeaderType::Config,
            &channel_id,
            Some(signer),
            &config_envelope,
            MSG_VERSION,
            EPOCH,
        )?;
        let wrapped = create_signed_envelope(
            HeaderType::OrdererTransaction,
            bundle.channel_id(),
            Some(signer),
            &new_channel_config,
            MSG_VERSION,
            EPOCH,
        )?;

        apply_filters(bundle, &wrapped)?;
        self.check_max_channels(bundle, creator.as_ref())?;
        Ok((wrapped, sequence))
    }

    fn process_config_msg(&self, bundle: &Bundle, envelope: &Envelope) -> Result<(Envelope, u64)> {
        let header_type = envelope.channel_header()?.header_type;
        match header_type {
            HeaderType::Config => self.standard.process_config_msg(bundle, envelope),
            HeaderType::OrdererTransaction => {
                let inner: Envelope = envelope.decode_data_of(HeaderType::OrdererTransaction)?;
                let config_envelope: ConfigEnvelope = inner.decode_data_of(HeaderType::Config)?;
                let last_update = config_envelope
                    .last_update
                    .ok_or(ConfigError::MissingLastUpdate)?;
                self.process_config_update_msg(bundle, &last_update)
            }
            other => Err(MsgProcessorError::NotConfigMessage(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderer_channelconfig::{genesis, ApplicationConfig};
    use orderer_core::Keypair;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SYSTEM: &str = "system";

    /// Builds templates straight from the system bundle and counts channels.
    struct FakeCreator {
        system: Bundle,
        channels: AtomicUsize,
    }

    impl ChainCreator for FakeCreator {
        fn new_channel_config(
            &self,
            envelope: &Envelope,
        ) -> std::result::Result<Bundle, RegistrarError> {
            let channel_id = envelope.channel_header()?.channel_id;
            let mut config = genesis::application_channel_config("solo", vec![]);
            config.orderer = self.system.orderer_config().cloned();
            Ok(Bundle::new(channel_id, config)?)
        }

        fn channels_count(&self) -> usize {
            self.channels.load(Ordering::SeqCst)
        }
    }

    fn system_bundle(max_channels: u64) -> Bundle {
        let mut config = genesis::system_channel_config("solo", vec![]);
        if let Some(orderer) = config.orderer.as_mut() {
            orderer.max_channels = max_channels;
        }
        Bundle::new(SYSTEM, config).unwrap()
    }

    fn setup(max_channels: u64, channels: usize) -> (Arc<FakeCreator>, SystemChannel, Bundle) {
        let bundle = system_bundle(max_channels);
        let creator = Arc::new(FakeCreator {
            system: bundle.clone(),
            channels: AtomicUsize::new(channels),
        });
        let weak = Arc::downgrade(&creator);
        let weak: Weak<dyn ChainCreator> = weak;
        let processor = SystemChannel::new(Arc::new(Keypair::generate()), weak);
        (creator, processor, bundle)
    }

    fn creation_tx(channel_id: &str) -> Envelope {
        genesis::make_channel_creation_transaction(
            channel_id,
            genesis::SAMPLE_CONSORTIUM,
            ApplicationConfig::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_creation_request_is_wrapped() {
        let (_creator, processor, bundle) = setup(0, 1);

        let (wrapped, seq) = processor
            .process_config_update_msg(&bundle, &creation_tx("foo"))
            .unwrap();
        assert_eq!(seq, 0);

        let chdr = wrapped.channel_header().unwrap();
        assert_eq!(chdr.header_type, HeaderType::OrdererTransaction);
        assert_eq!(chdr.channel_id, SYSTEM);

        let inner: Envelope = wrapped
            .decode_data_of(HeaderType::OrdererTransaction)
            .unwrap();
        assert_eq!(inner.channel_header().unwrap().channel_id, "foo");
        let config_envelope: ConfigEnvelope = inner.decode_data_of(HeaderType::Config).unwrap();
        assert_eq!(config_envelope.config.sequence, 1);

        let (again, _) = processor.process_config_msg(&bundle, &wrapped).unwrap();
        assert_eq!(
            again.channel_header().unwrap().header_type,
            HeaderType::OrdererTransaction
        );
    }

    #[test]
    fn test_max_channels() {
        let (creator, processor, bundle) = setup(1, 2);
        assert!(matches!(
            processor.process_config_update_msg(&bundle, &creation_tx("foo")),
            Err(MsgProcessorError::MaximumChannelsReached(1))
        ));

        creator.channels.store(1, Ordering::SeqCst);
        assert!(processor
            .process_config_update_msg(&bundle, &creation_tx("foo"))
            .is_ok());
    }

    #[test]
    fn test_registrar_gone() {
        let (creator, processor, bundle) = setup(0, 1);
        drop(creator);
        assert!(matches!(
            processor.process_config_update_msg(&bundle, &creation_tx("foo")),
            Err(MsgProcessorError::RegistrarGone)
        ));
    }
}
