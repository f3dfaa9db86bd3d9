//! Signature policies evaluated against signed configuration updates.

use orderer_core::{PublicKey, Signature};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Well-known policy names.
pub const ADMINS: &str = "Admins";
pub const WRITERS: &str = "Writers";
pub const READERS: &str = "Readers";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("policy rejects all requests")]
    RejectAll,

    #[error("signature set did not satisfy policy: {got} of {required} required identities signed")]
    NotSatisfied { required: usize, got: usize },
}

/// A policy over the identities that signed a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    AcceptAll,
    RejectAll,
    /// At least `threshold` distinct members of `identities` signed.
    SignedBy {
        threshold: usize,
        identities: Vec<PublicKey>,
    },
}

/// One signature over `data` by the identity in `identity`.
#[derive(Debug, Clone)]
pub struct SignedData {
    pub data: Vec<u8>,
    pub identity: Vec<u8>,
    pub signature: Signature,
}

impl SignedData {
    /// The signer's key, if the identity parses and the signature checks out.
    fn verified_key(&self) -> Option<PublicKey> {
        let key = PublicKey::from_bytes(&self.identity).ok()?;
        key.verify(&self.data, &self.signature).ok()?;
        Some(key)
    }
}

impl Policy {
    /// Shorthand for a 1-of-n signature policy.
    pub fn any_of(identities: Vec<PublicKey>) -> Self {
        Policy::SignedBy {
            threshold: 1,
            identities,
        }
    }

    pub fn evaluate(&self, signed: &[SignedData]) -> Result<(), PolicyError> {
        match self {
            Policy::AcceptAll => Ok(()),
            Policy::RejectAll => Err(PolicyError::RejectAll),
            Policy::SignedBy {
                threshold,
                identities,
            } => {
                let mut seen = HashSet::new();
                for data in signed {
                    let Some(key) = data.verified_key() else {
                        continue;
                    };
                    if identities.contains(&key) {
                        seen.insert(key.as_bytes());
                    }
                }
                if seen.len() >= *threshold {
                    Ok(())
                } else {
                    Err(PolicyError::NotSatisfied {
                        required: *threshold,
                        got: seen.len(),
                    })
                }
            }
        }
    }
}

/// Named policies of one channel configuration.
#[derive(Debug, Clone, Default)]
pub struct PolicyManager {
    policies: BTreeMap<String, Policy>,
}

impl PolicyManager {
    pub fn new(policies: BTreeMap<String, Policy>) -> Self {
        Self { policies }
    }

    pub fn get_policy(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}
