//! Declared capability sets and the node's supported capabilities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const V1_1: &str = "V1_1";
pub const V1_3: &str = "V1_3";
pub const V1_4_2: &str = "V1_4_2";
pub const V1_4_3: &str = "V1_4_3";
pub const V2_0: &str = "V2_0";

/// Orderer-level capabilities this node implements.
pub const SUPPORTED_ORDERER_CAPABILITIES: &[&str] = &[V1_1, V1_4_2, V2_0];

/// Channel-level capabilities this node implements.
pub const SUPPORTED_CHANNEL_CAPABILITIES: &[&str] = &[V1_1, V1_3, V1_4_2, V1_4_3, V2_0];

/// A set of named capabilities a configuration requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(BTreeSet<String>);

/// The capabilities of a set that this node does not implement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedCapabilities(pub Vec<String>);

impl fmt::Display for UnsupportedCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(", "))
    }
}

impl std::error::Error for UnsupportedCapabilities {}

impl Capabilities {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Check every declared capability is in `known`.
    pub fn supported(&self, known: &[&str]) -> Result<(), UnsupportedCapabilities> {
        let missing: Vec<String> = self
            .0
            .iter()
            .filter(|name| !known.contains(&name.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(UnsupportedCapabilities(missing))
        }
    }
}
