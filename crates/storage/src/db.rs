//! sled database wrapper with serialization helpers.

use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Key not found: {0}")]
    NotFound(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Prefix of the sled trees that hold channel ledgers.
const CHANNEL_TREE_PREFIX: &str = "channel:";

/// Wrapper around a sled database. Each channel ledger lives in its own tree.
#[derive(Clone)]
pub struct Storage {
    db: Db,
}

impl Storage {
    /// Open a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Open an in-memory database (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Open (creating if needed) the tree for a channel.
    pub fn channel_tree(&self, channel_id: &str) -> Result<Tree> {
        Ok(self.db.open_tree(Self::channel_tree_name(channel_id))?)
    }

    /// Ids of every channel that has a tree.
    pub fn channel_ids(&self) -> Vec<String> {
        self.db
            .tree_names()
            .into_iter()
            .filter_map(|name| {
                let name = String::from_utf8(name.to_vec()).ok()?;
                name.strip_prefix(CHANNEL_TREE_PREFIX).map(str::to_string)
            })
            .collect()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Key Construction Helpers
    // =========================================================================

    /// Tree name for a channel.
    /// Format: "channel:{channel_id}"
    pub fn channel_tree_name(channel_id: &str) -> String {
        format!("{}{}", CHANNEL_TREE_PREFIX, channel_id)
    }

    /// Key of a block within its channel tree.
    /// Format: "block:" + big-endian number, so keys sort by number.
    pub fn block_key(number: u64) -> Vec<u8> {
        let mut key = b"block:".to_vec();
        key.extend_from_slice(&number.to_be_bytes());
        key
    }
}

/// Store a serializable value in a tree.
pub fn put<K, V>(tree: &Tree, key: K, value: &V) -> Result<()>
where
    K: AsRef<[u8]>,
    V: serde::Serialize,
{
    let encoded = bincode::serialize(value)?;
    tree.insert(key.as_ref(), encoded)?;
    Ok(())
}

/// Retrieve and deserialize a value from a tree.
pub fn get<K, V>(tree: &Tree, key: K) -> Result<Option<V>>
where
    K: AsRef<[u8]>,
    V: serde::de::DeserializeOwned,
{
    match tree.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}
