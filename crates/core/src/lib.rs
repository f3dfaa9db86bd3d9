//! Core ordering primitives.
//!
//! This crate provides the types shared by every other orderer crate:
//! - Blake3 hashes and the block data merkle root
//! - Ed25519 identities and the [`Signer`] seam
//! - Envelopes, payloads, and header types
//! - Blocks and the block metadata contract (last-config pointer)

pub mod block;
pub mod crypto;
pub mod envelope;
pub mod hash;
pub mod merkle;

// Re-export commonly used types at the crate root
pub use block::{
    Block, BlockError, BlockHeader, BlockMetadataIndex, LastConfig, Metadata, MetadataSignature,
    METADATA_SLOTS,
};
pub use crypto::{CryptoError, Keypair, PublicKey, Signature, Signer};
pub use envelope::{
    create_signed_envelope, ChannelHeader, Envelope, EnvelopeError, Header, HeaderType, Payload,
    SignatureHeader,
};
pub use hash::{hash, hash_concat, Hash};
pub use merkle::merkle_root;
