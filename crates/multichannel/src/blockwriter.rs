//! Commits ordered blocks to a channel's ledger.
//!
//! Every committed block carries a `LAST_CONFIG` pointer and a `SIGNATURES`
//! entry signed by this node. Committing a config block also swaps in the new
//! configuration snapshot, or, for an orderer transaction on the system
//! channel, creates the channel it describes.

use crate::error::{FatalError, RegistrarError};
use crate::registrar::Registrar;
use crate::resources::check_resources_or_panic;
use arc_swap::ArcSwap;
use orderer_channelconfig::{Bundle, ConfigEnvelope, ConfigError};
use orderer_core::{
    Block, BlockError, BlockMetadataIndex, CryptoError, Envelope, EnvelopeError, HeaderType,
    LastConfig, Metadata, MetadataSignature, SignatureHeader, Signer,
};
use orderer_storage::{LedgerError, ReadWriter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BlockWriterError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("block error: {0}")]
    Block(#[from] BlockError),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("config block {number} holds {count} transactions, expected 1")]
    NotSingleTransaction { number: u64, count: usize },

    #[error("unexpected header type {0:?} in config block")]
    UnexpectedHeaderType(HeaderType),

    #[error("registrar is no longer available")]
    RegistrarGone,

    #[error("failed to create channel: {0}")]
    ChannelCreation(#[source] Box<RegistrarError>),
}

pub type Result<T> = std::result::Result<T, BlockWriterError>;

struct WriterState {
    last_block: Block,
    last_config_block_num: u64,
    last_config_seq: u64,
}

pub struct BlockWriter {
    channel_id: String,
    ledger: Arc<dyn ReadWriter>,
    bundle: Arc<ArcSwap<Bundle>>,
    signer: Arc<dyn Signer>,
    registrar: Weak<Registrar>,
    state: Mutex<WriterState>,
}

impl BlockWriter {
    /// Resume writing after the newest block of `ledger`.
    pub(crate) fn new(
        channel_id: String,
        ledger: Arc<dyn ReadWriter>,
        bundle: Arc<ArcSwap<Bundle>>,
        signer: Arc<dyn Signer>,
        registrar: Weak<Registrar>,
    ) -> std::result::Result<Self, FatalError> {
        let newest = ledger
            .height()
            .checked_sub(1)
            .ok_or_else(|| FatalError::CorruptLedger(format!("channel {} has no blocks", channel_id)))?;
        let last_block = ledger.block(newest)?.ok_or_else(|| {
            FatalError::CorruptLedger(format!("channel {} is missing block {}", channel_id, newest))
        })?;
        let last_config_block_num = last_block.last_config_index().map_err(|err| {
            FatalError::CorruptLedger(format!(
                "channel {} block {} has no last config: {}",
                channel_id, newest, err
            ))
        })?;
        let last_config_seq = bundle.load().sequence();

        Ok(Self {
            channel_id,
            ledger,
            bundle,
            signer,
            registrar,
            state: Mutex::new(WriterState {
                last_block,
                last_config_block_num,
                last_config_seq,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the block that follows the last one written.
    pub fn create_next_block(&self, messages: Vec<Envelope>) -> Block {
        let state = self.lock();
        Block::new(
            state.last_block.number() + 1,
            state.last_block.hash(),
            messages,
        )
    }

    pub fn write_block(&self, block: Block, encoded_metadata: Option<Vec<u8>>) -> Result<()> {
        let mut state = self.lock();
        self.commit_block(&mut state, block, encoded_metadata, None)
    }

    /// Apply and commit a block holding a single config or orderer
    /// transaction.
    pub fn write_config_block(&self, block: Block, encoded_metadata: Option<Vec<u8>>) -> Result<()> {
        let envelope = match block.data.as_slice() {
            [envelope] => envelope,
            data => {
                return Err(BlockWriterError::NotSingleTransaction {
                    number: block.number(),
                    count: data.len(),
                })
            }
        };

        let next = match envelope.channel_header()?.header_type {
            HeaderType::OrdererTransaction => {
                let inner: Envelope = envelope.decode_data_of(HeaderType::OrdererTransaction)?;
                let registrar = self
                    .registrar
                    .upgrade()
                    .ok_or(BlockWriterError::RegistrarGone)?;
                registrar
                    .new_chain(inner)
                    .map_err(|err| BlockWriterError::ChannelCreation(Box::new(err)))?;
                None
            }
            HeaderType::Config => {
                let config_envelope: ConfigEnvelope =
                    envelope.decode_data_of(HeaderType::Config)?;
                let current = self.bundle.load_full();
                current.configtx_validator().validate(&config_envelope)?;
                let next = Bundle::new(self.channel_id.clone(), config_envelope.config)?;
                current.validate_new(&next)?;
                check_resources_or_panic(&next);
                Some(next)
            }
            other => return Err(BlockWriterError::UnexpectedHeaderType(other)),
        };

        let mut state = self.lock();
        let number = block.number();
        self.commit_block(
            &mut state,
            block,
            encoded_metadata,
            next.as_ref().map(Bundle::sequence),
        )?;
        // The live config only moves once the ledger holds it.
        if let Some(next) = next {
            info!(
                channel = %self.channel_id,
                sequence = next.sequence(),
                block = number,
                "applied new channel config"
            );
            self.bundle.store(Arc::new(next));
        }
        Ok(())
    }

    fn commit_block(
        &self,
        state: &mut WriterState,
        mut block: Block,
        encoded_metadata: Option<Vec<u8>>,
        config_seq: Option<u64>,
    ) -> Result<()> {
        if let Some(metadata) = encoded_metadata {
            block.set_metadata(BlockMetadataIndex::Orderer, metadata);
        }
        // The pointer only moves for a block carrying a newer config.
        let sequence = config_seq.filter(|seq| *seq > state.last_config_seq);
        let advanced = sequence.is_some();
        let last_config = LastConfig {
            index: if advanced {
                block.number()
            } else {
                state.last_config_block_num
            },
        };
        block.set_metadata(
            BlockMetadataIndex::LastConfig,
            last_config.to_metadata_bytes(Vec::new())?,
        );
        let signatures = self.signatures_metadata(&block, last_config)?;
        block.set_metadata(BlockMetadataIndex::Signatures, signatures);

        self.ledger.append(block.clone())?;
        debug!(
            channel = %self.channel_id,
            block = block.number(),
            txs = block.tx_count(),
            "wrote block"
        );
        if let Some(sequence) = sequence {
            state.last_config_block_num = last_config.index;
            state.last_config_seq = sequence;
        }
        state.last_block = block;
        Ok(())
    }

    /// `SIGNATURES` slot: the node signs the slot value, its signature header
    /// and the encoded block header.
    fn signatures_metadata(&self, block: &Block, last_config: LastConfig) -> Result<Vec<u8>> {
        let value = bincode::serialize(&last_config)?;
        let signature_header = bincode::serialize(&SignatureHeader::for_signer(self.signer.as_ref()))?;

        let mut message = value.clone();
        message.extend_from_slice(&signature_header);
        message.extend_from_slice(&block.header.encode());
        let signature = self.signer.sign(&message)?;

        let metadata = Metadata {
            value,
            signatures: vec![MetadataSignature {
                signature_header,
                signature: signature.as_bytes().to_vec(),
            }],
        };
        Ok(bincode::serialize(&metadata)?)
    }

    pub fn last_config_block_number(&self) -> u64 {
        self.lock().last_config_block_num
    }

    pub fn last_config_seq(&self) -> u64 {
        self.lock().last_config_seq
    }

    /// `ORDERER` metadata of the last written block, handed to the consenter.
    pub(crate) fn consenter_metadata(&self) -> Option<Vec<u8>> {
        self.lock()
            .last_block
            .metadata_slot(BlockMetadataIndex::Orderer)
            .map(<[u8]>::to_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderer_channelconfig::{genesis, Capabilities, ConfigUpdate, ConfigUpdateEnvelope};
    use orderer_core::{create_signed_envelope, Keypair, PublicKey, Signature};
    use orderer_storage::{RamLedger, Reader};

    const CHANNEL: &str = "testchannel";

    struct Fixture {
        ledger: Arc<RamLedger>,
        bundle: Arc<ArcSwap<Bundle>>,
        signer: Arc<Keypair>,
        writer: BlockWriter,
    }

    fn fixture() -> Fixture {
        let config = genesis::application_channel_config("solo", vec![]);
        let ledger = Arc::new(RamLedger::new(100));
        ledger
            .append(genesis::genesis_block(CHANNEL, config.clone()).unwrap())
            .unwrap();
        let bundle = Arc::new(ArcSwap::from_pointee(Bundle::new(CHANNEL, config).unwrap()));
        let signer = Arc::new(Keypair::generate());
        let writer = BlockWriter::new(
            CHANNEL.to_string(),
            Arc::clone(&ledger) as Arc<dyn ReadWriter>,
            Arc::clone(&bundle),
            Arc::clone(&signer) as Arc<dyn Signer>,
            Weak::new(),
        )
        .unwrap();
        Fixture {
            ledger,
            bundle,
            signer,
            writer,
        }
    }

    fn normal_tx(n: u64) -> Envelope {
        create_signed_envelope(HeaderType::Message, CHANNEL, None, &n, 0, 0).unwrap()
    }

    fn config_tx(bundle: &Bundle) -> Envelope {
        let update = ConfigUpdate {
            channel_id: CHANNEL.to_string(),
            capabilities: Some(Capabilities::new(["V1_4_3"])),
            ..Default::default()
        };
        let cue = ConfigUpdateEnvelope::new(&update).unwrap();
        let update_env =
            create_signed_envelope(HeaderType::ConfigUpdate, CHANNEL, None, &cue, 0, 0).unwrap();
        let config_envelope = bundle
            .configtx_validator()
            .propose_config_update(&update_env)
            .unwrap();
        create_signed_envelope(HeaderType::Config, CHANNEL, None, &config_envelope, 0, 0).unwrap()
    }

    #[test]
    fn test_blocks_chain_and_carry_metadata() {
        let f = fixture();
        let block = f.writer.create_next_block(vec![normal_tx(1)]);
        assert_eq!(block.number(), 1);
        f.writer.write_block(block, Some(b"consenter".to_vec())).unwrap();

        let next = f.writer.create_next_block(vec![normal_tx(2)]);
        assert_eq!(next.number(), 2);
        f.writer.write_block(next, None).unwrap();
        assert_eq!(f.ledger.height(), 3);

        let written = f.ledger.block(1).unwrap().unwrap();
        assert_eq!(written.last_config_index().unwrap(), 0);
        assert_eq!(
            written.metadata_slot(BlockMetadataIndex::Orderer),
            Some(&b"consenter"[..])
        );

        let signatures = written
            .metadata_from_slot(BlockMetadataIndex::Signatures)
            .unwrap();
        let entry = &signatures.signatures[0];
        let header: SignatureHeader = bincode::deserialize(&entry.signature_header).unwrap();
        let key = PublicKey::from_bytes(&header.creator).unwrap();
        assert_eq!(key, f.signer.public_key);

        let mut message = signatures.value.clone();
        message.extend_from_slice(&entry.signature_header);
        message.extend_from_slice(&written.header.encode());
        let signature = Signature(entry.signature.as_slice().try_into().unwrap());
        key.verify(&message, &signature).unwrap();
    }

    #[test]
    fn test_config_block_swaps_bundle() {
        let f = fixture();
        f.writer.write_block(f.writer.create_next_block(vec![normal_tx(1)]), None).unwrap();

        let config = config_tx(&f.bundle.load());
        let block = f.writer.create_next_block(vec![config]);
        f.writer.write_config_block(block, None).unwrap();

        assert_eq!(f.bundle.load().sequence(), 1);
        assert!(f.bundle.load().channel_capabilities().contains("V1_4_3"));
        assert_eq!(f.writer.last_config_block_number(), 2);
        assert_eq!(f.writer.last_config_seq(), 1);

        f.writer.write_block(f.writer.create_next_block(vec![normal_tx(3)]), None).unwrap();
        let newest = f.ledger.block(3).unwrap().unwrap();
        assert_eq!(newest.last_config_index().unwrap(), 2);
    }

    #[test]
    fn test_failed_config_commit_keeps_config() {
        let f = fixture();
        // Another writer extends the ledger behind this writer's back.
        f.ledger
            .append(f.writer.create_next_block(vec![normal_tx(1)]))
            .unwrap();

        let config = config_tx(&f.bundle.load());
        let block = f.writer.create_next_block(vec![config]);
        assert!(matches!(
            f.writer.write_config_block(block, None),
            Err(BlockWriterError::Ledger(_))
        ));
        assert_eq!(f.bundle.load().sequence(), 0);
        assert!(!f.bundle.load().channel_capabilities().contains("V1_4_3"));
        assert_eq!(f.writer.last_config_seq(), 0);
        assert_eq!(f.writer.last_config_block_number(), 0);
        assert_eq!(f.ledger.height(), 2);
    }

    #[test]
    fn test_stale_config_rejected() {
        let f = fixture();
        let stale = config_tx(&f.bundle.load());
        let fresh = config_tx(&f.bundle.load());
        f.writer
            .write_config_block(f.writer.create_next_block(vec![fresh]), None)
            .unwrap();

        let err = f
            .writer
            .write_config_block(f.writer.create_next_block(vec![stale]), None)
            .unwrap_err();
        assert!(matches!(
            err,
            BlockWriterError::Config(ConfigError::SequenceMismatch { expected: 2, got: 1 })
        ));
        assert_eq!(f.ledger.height(), 2);
    }

    #[test]
    fn test_config_block_needs_single_config_tx() {
        let f = fixture();
        let block = f.writer.create_next_block(vec![normal_tx(1), normal_tx(2)]);
        assert!(matches!(
            f.writer.write_config_block(block, None),
            Err(BlockWriterError::NotSingleTransaction { count: 2, .. })
        ));

        let block = f.writer.create_next_block(vec![normal_tx(1)]);
        assert!(matches!(
            f.writer.write_config_block(block, None),
            Err(BlockWriterError::UnexpectedHeaderType(HeaderType::Message))
        ));
    }

    #[test]
    fn test_orderer_transaction_without_registrar() {
        let f = fixture();
        let inner = config_tx(&f.bundle.load());
        let wrapped =
            create_signed_envelope(HeaderType::OrdererTransaction, CHANNEL, None, &inner, 0, 0)
                .unwrap();
        let block = f.writer.create_next_block(vec![wrapped]);
        assert!(matches!(
            f.writer.write_config_block(block, None),
            Err(BlockWriterError::RegistrarGone)
        ));
    }
}
