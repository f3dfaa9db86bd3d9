//! Bounded in-memory ledger.
//!
//! Keeps at most `max_size` of the most recent blocks per channel. Older
//! blocks are dropped; the height keeps counting. The block named by the
//! newest block's last-config pointer is always kept, so the channel config
//! can still be recovered after pruning.

use crate::ledger::{
    check_extends, lock, BlockIterator, Factory, HeightSignal, ReadWriter, Reader, Result,
    SeekPosition, WaitingIterator,
};
use orderer_core::Block;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

struct Blocks {
    retained: VecDeque<Block>,
    last_config: Option<Block>,
    max_size: usize,
    height: u64,
}

impl Blocks {
    fn oldest_number(&self) -> Option<u64> {
        self.retained.front().map(Block::number)
    }

    fn get(&self, number: u64) -> Option<Block> {
        self.get_retained(number).or_else(|| {
            self.last_config
                .as_ref()
                .filter(|block| block.number() == number)
                .cloned()
        })
    }

    fn get_retained(&self, number: u64) -> Option<Block> {
        let oldest = self.oldest_number()?;
        let offset = number.checked_sub(oldest)?;
        self.retained.get(offset as usize).cloned()
    }

    /// Pin the config block `newest` points at. Blocks without a pointer
    /// leave the pinned block unchanged.
    fn track_last_config(&mut self, newest: &Block) {
        let Ok(index) = newest.last_config_index() else {
            return;
        };
        if self.last_config.as_ref().map(Block::number) == Some(index) {
            return;
        }
        if let Some(block) = self.get_retained(index) {
            self.last_config = Some(block);
        }
    }
}

/// An in-memory ledger for one channel.
pub struct RamLedger {
    blocks: Arc<Mutex<Blocks>>,
    signal: Arc<HeightSignal>,
}

impl RamLedger {
    pub fn new(max_size: usize) -> Self {
        Self {
            blocks: Arc::new(Mutex::new(Blocks {
                retained: VecDeque::new(),
                last_config: None,
                max_size: max_size.max(1),
                height: 0,
            })),
            signal: Arc::new(HeightSignal::new(0)),
        }
    }
}

impl Reader for RamLedger {
    fn iterator(&self, start: SeekPosition) -> Result<Box<dyn BlockIterator>> {
        let height = self.signal.height();
        let next = match start {
            SeekPosition::Oldest => lock(&self.blocks).oldest_number().unwrap_or(0),
            SeekPosition::Newest => height.saturating_sub(1),
            SeekPosition::Specified(number) => number,
        };
        let blocks = Arc::clone(&self.blocks);
        Ok(Box::new(WaitingIterator::new(
            next,
            Arc::clone(&self.signal),
            Box::new(move |number| Ok(lock(&blocks).get(number))),
        )))
    }

    fn height(&self) -> u64 {
        self.signal.height()
    }

    fn block(&self, number: u64) -> Result<Option<Block>> {
        Ok(lock(&self.blocks).get(number))
    }
}

impl ReadWriter for RamLedger {
    fn append(&self, block: Block) -> Result<()> {
        let mut blocks = lock(&self.blocks);
        let head = blocks.retained.back().map(Block::hash);
        check_extends(blocks.height, head.as_ref(), &block)?;

        blocks.retained.push_back(block.clone());
        blocks.track_last_config(&block);
        while blocks.retained.len() > blocks.max_size {
            blocks.retained.pop_front();
        }
        blocks.height += 1;
        self.signal.set(blocks.height);
        Ok(())
    }
}

/// Factory handing out one [`RamLedger`] per channel.
pub struct RamLedgerFactory {
    max_size: usize,
    ledgers: Mutex<HashMap<String, Arc<RamLedger>>>,
}

impl RamLedgerFactory {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ledgers: Mutex::new(HashMap::new()),
        }
    }
}

impl Factory for RamLedgerFactory {
    fn get_or_create(&self, channel_id: &str) -> Result<Arc<dyn ReadWriter>> {
        let mut ledgers = lock(&self.ledgers);
        let ledger = ledgers
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(RamLedger::new(self.max_size)));
        Ok(Arc::clone(ledger) as Arc<dyn ReadWriter>)
    }

    fn channel_ids(&self) -> Vec<String> {
        lock(&self.ledgers).keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{create_next_block, LedgerError};
    use orderer_core::{
        create_signed_envelope, BlockMetadataIndex, Envelope, HeaderType, LastConfig,
    };
    use std::thread;
    use std::time::Duration;

    fn message(n: u64) -> Envelope {
        create_signed_envelope(HeaderType::Message, "testchannel", None, &n, 0, 0).unwrap()
    }

    fn append_messages(ledger: &RamLedger, count: u64) {
        for n in 0..count {
            let block = create_next_block(ledger, vec![message(n)]).unwrap();
            ledger.append(block).unwrap();
        }
    }

    #[test]
    fn test_append_and_read() {
        let ledger = RamLedger::new(10);
        append_messages(&ledger, 3);

        assert_eq!(ledger.height(), 3);
        let mut it = ledger.iterator(SeekPosition::Specified(1)).unwrap();
        let block = it.next().unwrap();
        assert_eq!(block.number(), 1);
        let value: u64 = block.data[0].decode_data_of(HeaderType::Message).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn test_rejects_gap_and_bad_parent() {
        let ledger = RamLedger::new(10);
        append_messages(&ledger, 1);

        let skipped = Block::new(5, ledger.block(0).unwrap().unwrap().hash(), vec![]);
        assert!(matches!(
            ledger.append(skipped),
            Err(LedgerError::OutOfOrder { expected: 1, got: 5 })
        ));

        let orphan = Block::new(1, orderer_core::Hash::ZERO, vec![]);
        assert!(matches!(
            ledger.append(orphan),
            Err(LedgerError::PreviousHashMismatch { .. })
        ));
    }

    #[test]
    fn test_prunes_beyond_max_size() {
        let ledger = RamLedger::new(2);
        append_messages(&ledger, 5);

        assert_eq!(ledger.height(), 5);
        assert!(ledger.block(2).unwrap().is_none());
        assert_eq!(ledger.block(4).unwrap().unwrap().number(), 4);

        let mut it = ledger.iterator(SeekPosition::Oldest).unwrap();
        assert_eq!(it.next().unwrap().number(), 3);
    }

    #[test]
    fn test_keeps_last_config_block() {
        let ledger = RamLedger::new(2);
        ledger.append(Block::genesis(message(0)).unwrap()).unwrap();
        for n in 1..5 {
            let mut block = create_next_block(&ledger, vec![message(n)]).unwrap();
            block.set_metadata(
                BlockMetadataIndex::LastConfig,
                LastConfig { index: 0 }.to_metadata_bytes(Vec::new()).unwrap(),
            );
            ledger.append(block).unwrap();
        }

        assert_eq!(ledger.height(), 5);
        assert_eq!(ledger.block(0).unwrap().unwrap().number(), 0);
        assert!(ledger.block(1).unwrap().is_none());
        assert!(ledger.block(2).unwrap().is_none());
        assert_eq!(ledger.block(4).unwrap().unwrap().number(), 4);
    }

    #[test]
    fn test_iterator_waits_for_append() {
        let ledger = Arc::new(RamLedger::new(10));
        append_messages(&ledger, 1);

        let mut it = ledger.iterator(SeekPosition::Specified(1)).unwrap();
        assert!(it.next_timeout(Duration::from_millis(20)).unwrap().is_none());

        let writer = {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let block = create_next_block(ledger.as_ref(), vec![message(9)]).unwrap();
                ledger.append(block).unwrap();
            })
        };
        let block = it.next_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(block.number(), 1);
        writer.join().unwrap();
    }

    #[test]
    fn test_factory_reuses_ledgers() {
        let factory = RamLedgerFactory::new(10);
        let a = factory.get_or_create("a").unwrap();
        a.append(Block::new(0, orderer_core::Hash::ZERO, vec![])).unwrap();

        let again = factory.get_or_create("a").unwrap();
        assert_eq!(again.height(), 1);
        factory.get_or_create("b").unwrap();

        let mut ids = factory.channel_ids();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
