//! Envelopes: the signed unit submitted for ordering.
//!
//! An envelope carries an encoded [`Payload`] and a signature over those
//! bytes. The payload header says which channel the message targets and what
//! kind of message it is; the data is opaque to the orderer except for the
//! configuration header types.

use crate::crypto::{CryptoError, PublicKey, Signature, Signer};
use crate::hash::{hash, Hash};
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur while building or parsing envelopes.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("envelope has no payload")]
    EmptyPayload,

    #[error("expected header type {expected:?}, got {got:?}")]
    UnexpectedHeaderType { expected: HeaderType, got: HeaderType },
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Kind of message carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderType {
    /// Opaque application message.
    Message,
    /// A full, validated channel configuration.
    Config,
    /// A signed proposal to change a channel configuration.
    ConfigUpdate,
    /// A channel-creation transaction wrapped for the system channel.
    OrdererTransaction,
    /// A delivery seek request.
    DeliverSeekInfo,
    /// An endorsed application transaction.
    EndorserTransaction,
}

impl HeaderType {
    /// Types that may only enter the ledger through the configuration path.
    pub fn is_config_only(self) -> bool {
        matches!(self, HeaderType::Config | HeaderType::OrdererTransaction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHeader {
    pub header_type: HeaderType,
    pub version: i32,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub channel_id: String,
    pub tx_id: String,
    pub epoch: u64,
}

impl ChannelHeader {
    pub fn new(header_type: HeaderType, channel_id: impl Into<String>, version: i32, epoch: u64) -> Self {
        Self {
            header_type,
            version,
            timestamp: current_timestamp(),
            channel_id: channel_id.into(),
            tx_id: String::new(),
            epoch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignatureHeader {
    /// Serialized identity of the creator.
    pub creator: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl SignatureHeader {
    /// Build a signature header for `signer` with a fresh random nonce.
    pub fn for_signer(signer: &dyn Signer) -> Self {
        let mut nonce = vec![0u8; 24];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            creator: signer.serialize(),
            nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub channel_header: ChannelHeader,
    pub signature_header: SignatureHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub header: Header,
    pub data: Vec<u8>,
}

impl Payload {
    /// Decode the data section as `T`.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.data)?)
    }
}

/// A signed message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Encoded [`Payload`].
    pub payload: Vec<u8>,
    pub signature: Signature,
}

impl Envelope {
    /// Build an unsigned envelope from a payload.
    pub fn from_payload(payload: &Payload) -> Result<Self> {
        Ok(Self {
            payload: bincode::serialize(payload)?,
            signature: Signature::default(),
        })
    }

    /// Decode the payload.
    pub fn payload(&self) -> Result<Payload> {
        if self.payload.is_empty() {
            return Err(EnvelopeError::EmptyPayload);
        }
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// Decode only the channel header.
    pub fn channel_header(&self) -> Result<ChannelHeader> {
        Ok(self.payload()?.header.channel_header)
    }

    /// Decode the payload data of an envelope that must be of `expected` type.
    pub fn decode_data_of<T: DeserializeOwned>(&self, expected: HeaderType) -> Result<T> {
        let payload = self.payload()?;
        let got = payload.header.channel_header.header_type;
        if got != expected {
            return Err(EnvelopeError::UnexpectedHeaderType { expected, got });
        }
        payload.decode_data()
    }

    /// Check the envelope signature against the creator in its signature header.
    pub fn verify_creator(&self) -> Result<PublicKey> {
        let payload = self.payload()?;
        let key = PublicKey::from_bytes(&payload.header.signature_header.creator)?;
        key.verify(&self.payload, &self.signature)?;
        Ok(key)
    }

    /// Digest of the full encoded envelope.
    pub fn hash(&self) -> Hash {
        match bincode::serialize(self) {
            Ok(bytes) => hash(&bytes),
            Err(_) => hash(&self.payload),
        }
    }

    /// Encoded size in bytes, as counted by batch size limits.
    pub fn size(&self) -> usize {
        self.payload.len() + self.signature.as_bytes().len()
    }

    /// Encode the envelope for embedding in another payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Create an envelope of `header_type` on `channel_id` whose data is the
/// encoding of `data`, signed by `signer` when one is given.
pub fn create_signed_envelope<T: Serialize>(
    header_type: HeaderType,
    channel_id: &str,
    signer: Option<&dyn Signer>,
    data: &T,
    msg_version: i32,
    epoch: u64,
) -> Result<Envelope> {
    let mut channel_header = ChannelHeader::new(header_type, channel_id, msg_version, epoch);
    let signature_header = match signer {
        Some(signer) => SignatureHeader::for_signer(signer),
        None => SignatureHeader::default(),
    };
    channel_header.tx_id = compute_tx_id(&signature_header);

    let payload = Payload {
        header: Header {
            channel_header,
            signature_header,
        },
        data: bincode::serialize(data)?,
    };
    let mut envelope = Envelope::from_payload(&payload)?;
    if let Some(signer) = signer {
        envelope.signature = signer.sign(&envelope.payload)?;
    }
    Ok(envelope)
}

/// Transaction id derived from the nonce and creator.
pub fn compute_tx_id(header: &SignatureHeader) -> String {
    hash(&[header.nonce.as_slice(), header.creator.as_slice()].concat()).to_hex()
}

pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_signed_envelope_verifies() {
        let kp = Keypair::generate();
        let env = create_signed_envelope(HeaderType::Message, "mychannel", Some(&kp), &"hello", 0, 0)
            .unwrap();

        let chdr = env.channel_header().unwrap();
        assert_eq!(chdr.channel_id, "mychannel");
        assert_eq!(chdr.header_type, HeaderType::Message);
        assert!(!chdr.tx_id.is_empty());
        assert_eq!(env.verify_creator().unwrap(), kp.public_key);
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let kp = Keypair::generate();
        let mut env =
            create_signed_envelope(HeaderType::Message, "mychannel", Some(&kp), &7u64, 0, 0).unwrap();
        let last = env.payload.len() - 1;
        env.payload[last] ^= 0xFF;
        assert!(env.verify_creator().is_err());
    }

    #[test]
    fn test_decode_data_of_wrong_type() {
        let env = create_signed_envelope(HeaderType::Message, "c", None, &1u32, 0, 0).unwrap();
        let value: u32 = env.decode_data_of(HeaderType::Message).unwrap();
        assert_eq!(value, 1);
        assert!(matches!(
            env.decode_data_of::<u32>(HeaderType::Config),
            Err(EnvelopeError::UnexpectedHeaderType { .. })
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(Envelope::default().payload(), Err(EnvelopeError::EmptyPayload)));
    }

    #[test]
    fn test_config_only_types() {
        assert!(HeaderType::Config.is_config_only());
        assert!(HeaderType::OrdererTransaction.is_config_only());
        assert!(!HeaderType::ConfigUpdate.is_config_only());
        assert!(!HeaderType::Message.is_config_only());
    }
}
