//! Per-channel facade over configuration, ledger and consensus.

use crate::blockwriter::BlockWriter;
use crate::error::FatalError;
use crate::locator;
use crate::msgprocessor::{self, Classification, Processor};
use crate::registrar::Registrar;
use crate::resources::check_resources_or_panic;
use arc_swap::ArcSwap;
use orderer_channelconfig::Bundle;
use orderer_consensus::{
    BoxError, Chain, ConsensusError, ConsenterRegistry, ConsenterSupport, Receiver,
};
use orderer_core::{Block, ChannelHeader, Envelope, Signer};
use orderer_storage::{LedgerReader, ReadWriter};
use std::sync::{Arc, Weak};
use tracing::info;

/// Everything a consenter needs to order for one channel.
pub struct ChannelSupport {
    channel_id: String,
    ledger: Arc<dyn ReadWriter>,
    bundle: Arc<ArcSwap<Bundle>>,
    cutter: Receiver,
    writer: BlockWriter,
    processor: Box<dyn Processor>,
}

impl ConsenterSupport for ChannelSupport {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn block_cutter(&self) -> &Receiver {
        &self.cutter
    }

    fn bundle(&self) -> Arc<Bundle> {
        self.bundle.load_full()
    }

    fn sequence(&self) -> u64 {
        self.bundle.load().sequence()
    }

    fn height(&self) -> u64 {
        self.ledger.height()
    }

    fn create_next_block(&self, messages: Vec<Envelope>) -> Result<Block, BoxError> {
        Ok(self.writer.create_next_block(messages))
    }

    fn write_block(&self, block: Block, encoded_metadata: Option<Vec<u8>>) -> Result<(), BoxError> {
        self.writer
            .write_block(block, encoded_metadata)
            .map_err(BoxError::from)
    }

    fn write_config_block(
        &self,
        block: Block,
        encoded_metadata: Option<Vec<u8>>,
    ) -> Result<(), BoxError> {
        self.writer
            .write_config_block(block, encoded_metadata)
            .map_err(BoxError::from)
    }

    fn process_normal_msg(&self, envelope: &Envelope) -> Result<u64, BoxError> {
        self.processor
            .process_normal_msg(&self.bundle.load_full(), envelope)
            .map_err(BoxError::from)
    }

    fn process_config_msg(&self, envelope: &Envelope) -> Result<(Envelope, u64), BoxError> {
        self.processor
            .process_config_msg(&self.bundle.load_full(), envelope)
            .map_err(BoxError::from)
    }
}

/// A running channel: its support plus the consensus chain ordering for it.
///
/// Created when the registrar starts or a channel is created, and halted
/// when it is replaced or the node shuts down.
pub struct ChainSupport {
    support: Arc<ChannelSupport>,
    chain: Box<dyn Chain>,
}

impl ChainSupport {
    /// Build the facade for `channel_id` from what its ledger holds.
    pub(crate) fn new(
        channel_id: &str,
        ledger: Arc<dyn ReadWriter>,
        consenters: &ConsenterRegistry,
        signer: Arc<dyn Signer>,
        processor: Box<dyn Processor>,
        registrar: Weak<Registrar>,
    ) -> Result<Self, FatalError> {
        let config_tx = locator::config_tx(ledger.as_ref())?;
        let bundle = Bundle::from_config_tx(&config_tx).map_err(|source| FatalError::Config {
            channel: channel_id.to_string(),
            source,
        })?;
        if bundle.channel_id() != channel_id {
            return Err(FatalError::CorruptLedger(format!(
                "ledger {} holds config for channel {}",
                channel_id,
                bundle.channel_id()
            )));
        }
        check_resources_or_panic(&bundle);

        let consensus_type = bundle
            .orderer_config()
            .map(|orderer| orderer.consensus_type.clone())
            .unwrap_or_default();
        let consenter = consenters
            .get(&consensus_type)
            .ok_or_else(|| FatalError::UnknownConsenter(consensus_type.clone()))?;

        let sequence = bundle.sequence();
        let bundle = Arc::new(ArcSwap::from_pointee(bundle));
        let writer = BlockWriter::new(
            channel_id.to_string(),
            Arc::clone(&ledger),
            Arc::clone(&bundle),
            signer,
            registrar,
        )?;
        let metadata = writer.consenter_metadata();

        let support = Arc::new(ChannelSupport {
            channel_id: channel_id.to_string(),
            ledger,
            bundle,
            cutter: Receiver::new(),
            writer,
            processor,
        });
        let chain = consenter.handle_chain(
            Arc::clone(&support) as Arc<dyn ConsenterSupport>,
            metadata,
        )?;

        info!(
            channel = %channel_id,
            consensus = %consensus_type,
            sequence,
            height = support.ledger.height(),
            "created chain support"
        );
        Ok(Self { support, chain })
    }

    pub fn channel_id(&self) -> &str {
        &self.support.channel_id
    }

    /// Submit a normal message for ordering.
    pub fn order(&self, envelope: Envelope, config_seq: u64) -> Result<(), ConsensusError> {
        self.chain.order(envelope, config_seq)
    }

    /// Submit a config message for ordering.
    pub fn configure(&self, config: Envelope, config_seq: u64) -> Result<(), ConsensusError> {
        self.chain.configure(config, config_seq)
    }

    pub fn wait_ready(&self) -> Result<(), ConsensusError> {
        self.chain.wait_ready()
    }

    /// Read access to the channel's ledger.
    pub fn reader(&self) -> LedgerReader {
        LedgerReader::new(Arc::clone(&self.support.ledger))
    }

    pub fn height(&self) -> u64 {
        self.support.ledger.height()
    }

    /// Sequence of the current channel config.
    pub fn sequence(&self) -> u64 {
        self.support.sequence()
    }

    /// The current configuration snapshot.
    pub fn bundle(&self) -> Arc<Bundle> {
        self.support.bundle()
    }

    pub fn last_config_seq(&self) -> u64 {
        self.support.writer.last_config_seq()
    }

    pub fn last_config_block_number(&self) -> u64 {
        self.support.writer.last_config_block_number()
    }

    pub fn classify_msg(&self, chdr: &ChannelHeader) -> Classification {
        self.support.processor.classify_msg(chdr)
    }

    pub fn process_normal_msg(&self, envelope: &Envelope) -> msgprocessor::Result<u64> {
        self.support
            .processor
            .process_normal_msg(&self.bundle(), envelope)
    }

    pub fn process_config_update_msg(
        &self,
        envelope: &Envelope,
    ) -> msgprocessor::Result<(Envelope, u64)> {
        self.support
            .processor
            .process_config_update_msg(&self.bundle(), envelope)
    }

    pub fn process_config_msg(&self, envelope: &Envelope) -> msgprocessor::Result<(Envelope, u64)> {
        self.support
            .processor
            .process_config_msg(&self.bundle(), envelope)
    }

    pub(crate) fn start(&self) -> Result<(), ConsensusError> {
        self.chain.start()
    }

    pub fn halt(&self) {
        self.chain.halt();
    }

    pub fn is_halted(&self) -> bool {
        self.chain.is_halted()
    }
}
