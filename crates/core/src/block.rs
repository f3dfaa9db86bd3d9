//! Blocks, block headers, and the block metadata contract.
//!
//! Every committed block carries a fixed number of metadata slots. The
//! `LAST_CONFIG` slot holds an encoded [`Metadata`] whose `value` is itself an
//! encoded [`LastConfig`]; recovering the current configuration of a channel
//! depends on this two-level encoding being present and well formed.

use crate::envelope::Envelope;
use crate::hash::{hash, Hash};
use crate::merkle::merkle_root;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metadata slot indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BlockMetadataIndex {
    Signatures = 0,
    LastConfig = 1,
    TransactionsFilter = 2,
    Orderer = 3,
}

/// Number of metadata slots carried by every block.
pub const METADATA_SLOTS: usize = 4;

/// Errors raised while reading block metadata.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block {number} has no {slot:?} metadata")]
    MissingMetadata {
        number: u64,
        slot: BlockMetadataIndex,
    },

    #[error("malformed {slot:?} metadata in block {number}: {source}")]
    MalformedMetadata {
        number: u64,
        slot: BlockMetadataIndex,
        #[source]
        source: bincode::Error,
    },

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Signature over block metadata by an orderer identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataSignature {
    pub signature_header: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Outer metadata envelope stored in a metadata slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub value: Vec<u8>,
    pub signatures: Vec<MetadataSignature>,
}

/// Inner value of the `LAST_CONFIG` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LastConfig {
    pub index: u64,
}

impl LastConfig {
    /// Encode as slot bytes: `Metadata { value: LastConfig }`.
    pub fn to_metadata_bytes(self, signatures: Vec<MetadataSignature>) -> Result<Vec<u8>, BlockError> {
        let metadata = Metadata {
            value: bincode::serialize(&self)?,
            signatures,
        };
        Ok(bincode::serialize(&metadata)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub previous_hash: Hash,
    /// Merkle root of the envelope hashes.
    pub data_hash: Hash,
}

impl BlockHeader {
    /// Header hash chained into the next block's `previous_hash`.
    pub fn hash(&self) -> Hash {
        hash(&self.encode())
    }

    /// Fixed-width encoding: big-endian number, previous hash, data hash.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(72);
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(self.previous_hash.as_bytes());
        buf.extend_from_slice(self.data_hash.as_bytes());
        buf
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub data: Vec<Envelope>,
    pub metadata: Vec<Vec<u8>>,
}

impl Block {
    /// Create a block with empty metadata slots.
    pub fn new(number: u64, previous_hash: Hash, data: Vec<Envelope>) -> Self {
        let data_hash = data_hash(&data);
        Self {
            header: BlockHeader {
                number,
                previous_hash,
                data_hash,
            },
            data,
            metadata: vec![Vec::new(); METADATA_SLOTS],
        }
    }

    /// Create the genesis block of a channel from its initial config envelope.
    ///
    /// The last-config pointer of a genesis block always points at itself.
    pub fn genesis(config_tx: Envelope) -> Result<Self, BlockError> {
        let mut block = Self::new(0, Hash::ZERO, vec![config_tx]);
        block.set_metadata(
            BlockMetadataIndex::LastConfig,
            LastConfig { index: 0 }.to_metadata_bytes(Vec::new())?,
        );
        Ok(block)
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.number == 0 && self.header.previous_hash.is_zero()
    }

    pub fn tx_count(&self) -> usize {
        self.data.len()
    }

    pub fn set_metadata(&mut self, slot: BlockMetadataIndex, bytes: Vec<u8>) {
        let idx = slot as usize;
        if self.metadata.len() < METADATA_SLOTS {
            self.metadata.resize(METADATA_SLOTS, Vec::new());
        }
        self.metadata[idx] = bytes;
    }

    pub fn metadata_slot(&self, slot: BlockMetadataIndex) -> Option<&[u8]> {
        self.metadata
            .get(slot as usize)
            .map(Vec::as_slice)
            .filter(|bytes| !bytes.is_empty())
    }

    /// Decode the outer [`Metadata`] of a slot.
    pub fn metadata_from_slot(&self, slot: BlockMetadataIndex) -> Result<Metadata, BlockError> {
        let bytes = self.metadata_slot(slot).ok_or(BlockError::MissingMetadata {
            number: self.header.number,
            slot,
        })?;
        bincode::deserialize(bytes).map_err(|source| BlockError::MalformedMetadata {
            number: self.header.number,
            slot,
            source,
        })
    }

    /// Index of the most recent config block, read from the `LAST_CONFIG` slot.
    pub fn last_config_index(&self) -> Result<u64, BlockError> {
        let slot = BlockMetadataIndex::LastConfig;
        let metadata = self.metadata_from_slot(slot)?;
        let last_config: LastConfig =
            bincode::deserialize(&metadata.value).map_err(|source| BlockError::MalformedMetadata {
                number: self.header.number,
                slot,
                source,
            })?;
        Ok(last_config.index)
    }

    /// Verify the data hash matches the envelopes.
    pub fn verify_data_hash(&self) -> bool {
        data_hash(&self.data) == self.header.data_hash
    }
}

fn data_hash(data: &[Envelope]) -> Hash {
    let leaves: Vec<Hash> = data.iter().map(Envelope::hash).collect();
    merkle_root(&leaves)
}
