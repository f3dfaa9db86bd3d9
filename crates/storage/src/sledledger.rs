//! Persistent ledger backed by sled.
//!
//! Each channel lives in its own tree:
//! - `block:{number}` → bincode-encoded block
//! - `ledger:height` → number of committed blocks

use crate::db::{self, Storage};
use crate::ledger::{
    check_extends, lock, BlockIterator, Factory, HeightSignal, ReadWriter, Reader, Result,
    SeekPosition, WaitingIterator,
};
use orderer_core::Block;
use sled::Tree;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

const HEIGHT_KEY: &[u8] = b"ledger:height";

/// A sled-backed ledger for one channel.
pub struct SledLedger {
    tree: Tree,
    signal: Arc<HeightSignal>,
    append_lock: Mutex<()>,
}

impl SledLedger {
    /// Open the ledger stored in `tree`, resuming at its persisted height.
    pub fn open(tree: Tree) -> Result<Self> {
        let height: u64 = db::get(&tree, HEIGHT_KEY)?.unwrap_or(0);
        Ok(Self {
            tree,
            signal: Arc::new(HeightSignal::new(height)),
            append_lock: Mutex::new(()),
        })
    }

    fn load(tree: &Tree, number: u64) -> Result<Option<Block>> {
        Ok(db::get(tree, Storage::block_key(number))?)
    }
}

impl Reader for SledLedger {
    fn iterator(&self, start: SeekPosition) -> Result<Box<dyn BlockIterator>> {
        let next = match start {
            SeekPosition::Oldest => 0,
            SeekPosition::Newest => self.signal.height().saturating_sub(1),
            SeekPosition::Specified(number) => number,
        };
        let tree = self.tree.clone();
        Ok(Box::new(WaitingIterator::new(
            next,
            Arc::clone(&self.signal),
            Box::new(move |number| Self::load(&tree, number)),
        )))
    }

    fn height(&self) -> u64 {
        self.signal.height()
    }

    fn block(&self, number: u64) -> Result<Option<Block>> {
        Self::load(&self.tree, number)
    }
}

impl ReadWriter for SledLedger {
    fn append(&self, block: Block) -> Result<()> {
        let _guard = lock(&self.append_lock);
        let height = self.signal.height();
        let head = match height.checked_sub(1) {
            Some(last) => Self::load(&self.tree, last)?.map(|b| b.hash()),
            None => None,
        };
        check_extends(height, head.as_ref(), &block)?;

        let number = block.number();
        let mut batch = sled::Batch::default();
        batch.insert(
            Storage::block_key(number),
            bincode::serialize(&block).map_err(db::StorageError::from)?,
        );
        batch.insert(
            HEIGHT_KEY,
            bincode::serialize(&(number + 1)).map_err(db::StorageError::from)?,
        );
        self.tree
            .apply_batch(batch)
            .map_err(db::StorageError::from)?;

        debug!(number, "appended block");
        self.signal.set(number + 1);
        Ok(())
    }
}

/// Factory handing out one [`SledLedger`] per channel tree.
pub struct SledLedgerFactory {
    storage: Storage,
    ledgers: Mutex<HashMap<String, Arc<SledLedger>>>,
}

impl SledLedgerFactory {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            ledgers: Mutex::new(HashMap::new()),
        }
    }
}

impl Factory for SledLedgerFactory {
    fn get_or_create(&self, channel_id: &str) -> Result<Arc<dyn ReadWriter>> {
        let mut ledgers = lock(&self.ledgers);
        if let Some(ledger) = ledgers.get(channel_id) {
            return Ok(Arc::clone(ledger) as Arc<dyn ReadWriter>);
        }
        let ledger = Arc::new(SledLedger::open(self.storage.channel_tree(channel_id)?)?);
        ledgers.insert(channel_id.to_string(), Arc::clone(&ledger));
        Ok(ledger as Arc<dyn ReadWriter>)
    }

    fn channel_ids(&self) -> Vec<String> {
        self.storage.channel_ids()
    }
}
