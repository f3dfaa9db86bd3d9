//! Per-channel block ledgers for the orderer.
//!
//! Every channel owns an append-only ledger of blocks. Two backends exist:
//! - **RAM**: bounded in-memory ledger, useful for tests and throwaway nodes
//! - **sled**: persistent ledger, one sled tree per channel
//!
//! Both are created through a [`Factory`] and read through [`Reader`]
//! iterators that block until the requested block is committed.
//!
//! # Example
//!
//! ```rust,no_run
//! use orderer_storage::{Factory, Reader, SledLedgerFactory, Storage};
//!
//! let storage = Storage::open("./orderer_data").unwrap();
//! let factory = SledLedgerFactory::new(storage);
//! let ledger = factory.get_or_create("mychannel").unwrap();
//! println!("height {}", ledger.height());
//! ```

pub mod db;
pub mod ledger;
pub mod ramledger;
pub mod sledledger;

pub use db::{Storage, StorageError};
pub use ledger::{
    create_next_block, BlockIterator, Factory, LedgerError, LedgerReader, ReadWriter, Reader,
    Result, SeekPosition,
};
pub use ramledger::{RamLedger, RamLedgerFactory};
pub use sledledger::{SledLedger, SledLedgerFactory};
