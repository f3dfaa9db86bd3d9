//! Ledger traits shared by the RAM and sled ledgers.

use crate::db::StorageError;
use orderer_core::{Block, Envelope, Hash};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("block {0} not found")]
    NotFound(u64),

    #[error("block number {got} does not extend ledger height {expected}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("block {number} previous hash does not match the ledger head")]
    PreviousHashMismatch { number: u64 },
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Where an iterator starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPosition {
    Oldest,
    Newest,
    Specified(u64),
}

/// Sequential reader over committed blocks.
pub trait BlockIterator: Send {
    /// Return the next block, blocking until it is committed.
    fn next(&mut self) -> Result<Block>;

    /// Like [`BlockIterator::next`] but gives up after `timeout`.
    fn next_timeout(&mut self, timeout: Duration) -> Result<Option<Block>>;
}

/// Read access to one channel's ledger.
pub trait Reader: Send + Sync {
    fn iterator(&self, start: SeekPosition) -> Result<Box<dyn BlockIterator>>;

    /// Number of blocks committed so far.
    fn height(&self) -> u64;

    /// Fetch a committed block without waiting.
    fn block(&self, number: u64) -> Result<Option<Block>>;
}

/// Read and append access to one channel's ledger.
pub trait ReadWriter: Reader {
    fn append(&self, block: Block) -> Result<()>;
}

/// Creates and enumerates channel ledgers.
pub trait Factory: Send + Sync {
    fn get_or_create(&self, channel_id: &str) -> Result<Arc<dyn ReadWriter>>;

    fn channel_ids(&self) -> Vec<String>;
}

/// Read-only view over a ledger handle.
#[derive(Clone)]
pub struct LedgerReader(Arc<dyn ReadWriter>);

impl LedgerReader {
    pub fn new(ledger: Arc<dyn ReadWriter>) -> Self {
        Self(ledger)
    }
}

impl Reader for LedgerReader {
    fn iterator(&self, start: SeekPosition) -> Result<Box<dyn BlockIterator>> {
        self.0.iterator(start)
    }

    fn height(&self) -> u64 {
        self.0.height()
    }

    fn block(&self, number: u64) -> Result<Option<Block>> {
        self.0.block(number)
    }
}

/// Build the block that would extend `reader` with `messages`.
pub fn create_next_block(reader: &dyn Reader, messages: Vec<Envelope>) -> Result<Block> {
    let height = reader.height();
    if height == 0 {
        return Ok(Block::new(0, Hash::ZERO, messages));
    }
    let previous = reader
        .block(height - 1)?
        .ok_or(LedgerError::NotFound(height - 1))?;
    Ok(Block::new(height, previous.hash(), messages))
}

/// Check that `block` is the next block after `head` for a ledger of `height`.
pub(crate) fn check_extends(height: u64, head: Option<&Hash>, block: &Block) -> Result<()> {
    if block.header.number != height {
        return Err(LedgerError::OutOfOrder {
            expected: height,
            got: block.header.number,
        });
    }
    if let Some(head) = head {
        if &block.header.previous_hash != head {
            return Err(LedgerError::PreviousHashMismatch {
                number: block.header.number,
            });
        }
    }
    Ok(())
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ledger height plus a condition variable iterators wait on.
#[derive(Debug, Default)]
pub(crate) struct HeightSignal {
    height: Mutex<u64>,
    appended: Condvar,
}

impl HeightSignal {
    pub(crate) fn new(height: u64) -> Self {
        Self {
            height: Mutex::new(height),
            appended: Condvar::new(),
        }
    }

    pub(crate) fn height(&self) -> u64 {
        *lock(&self.height)
    }

    pub(crate) fn set(&self, height: u64) {
        *lock(&self.height) = height;
        self.appended.notify_all();
    }

    /// Wait until block `number` exists. Returns false on timeout.
    fn wait_for(&self, number: u64, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut height = lock(&self.height);
        while *height <= number {
            match deadline {
                None => {
                    height = self
                        .appended
                        .wait(height)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    height = self
                        .appended
                        .wait_timeout(height, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        true
    }
}

type FetchFn = dyn Fn(u64) -> Result<Option<Block>> + Send;

/// Iterator shared by both ledger kinds: waits on the height signal, then
/// fetches by number.
pub(crate) struct WaitingIterator {
    next: u64,
    signal: Arc<HeightSignal>,
    fetch: Box<FetchFn>,
}

impl WaitingIterator {
    pub(crate) fn new(next: u64, signal: Arc<HeightSignal>, fetch: Box<FetchFn>) -> Self {
        Self {
            next,
            signal,
            fetch,
        }
    }

    fn take(&mut self) -> Result<Block> {
        let block = (self.fetch)(self.next)?.ok_or(LedgerError::NotFound(self.next))?;
        self.next += 1;
        Ok(block)
    }
}

impl BlockIterator for WaitingIterator {
    fn next(&mut self) -> Result<Block> {
        self.signal.wait_for(self.next, None);
        self.take()
    }

    fn next_timeout(&mut self, timeout: Duration) -> Result<Option<Block>> {
        if !self.signal.wait_for(self.next, Some(timeout)) {
            return Ok(None);
        }
        self.take().map(Some)
    }
}
