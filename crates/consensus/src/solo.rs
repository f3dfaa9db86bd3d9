//! Single-node consenter.
//!
//! Each channel gets one worker thread that drains an unbounded queue in
//! submission order, feeds normal messages through the block cutter and
//! commits config messages in blocks of their own. A batch timer flushes
//! partially filled batches.

use crate::{Chain, ConsensusError, ConsenterSupport, Result};
use orderer_core::Envelope;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const CONSENSUS_TYPE: &str = "solo";

/// Builds [`SoloChain`]s.
#[derive(Debug, Default)]
pub struct Consenter;

impl Consenter {
    pub fn new() -> Self {
        Self
    }
}

impl crate::Consenter for Consenter {
    fn handle_chain(
        &self,
        support: Arc<dyn ConsenterSupport>,
        _metadata: Option<Vec<u8>>,
    ) -> Result<Box<dyn Chain>> {
        Ok(Box::new(SoloChain::new(support)))
    }
}

enum Message {
    Normal { envelope: Envelope, config_seq: u64 },
    Config { envelope: Envelope, config_seq: u64 },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SoloChain {
    channel_id: String,
    support: Arc<dyn ConsenterSupport>,
    sender: Mutex<Option<Sender<Message>>>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    halted: Arc<AtomicBool>,
}

impl SoloChain {
    pub fn new(support: Arc<dyn ConsenterSupport>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            channel_id: support.channel_id().to_string(),
            support,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn enqueue(&self, message: Message) -> Result<()> {
        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(tx) if !self.is_halted() => tx
                .send(message)
                .map_err(|_| ConsensusError::Halted(self.channel_id.clone())),
            _ => Err(ConsensusError::Halted(self.channel_id.clone())),
        }
    }
}

impl Chain for SoloChain {
    fn order(&self, envelope: Envelope, config_seq: u64) -> Result<()> {
        self.enqueue(Message::Normal {
            envelope,
            config_seq,
        })
    }

    fn configure(&self, config: Envelope, config_seq: u64) -> Result<()> {
        self.enqueue(Message::Config {
            envelope: config,
            config_seq,
        })
    }

    fn wait_ready(&self) -> Result<()> {
        if self.is_halted() {
            return Err(ConsensusError::Halted(self.channel_id.clone()));
        }
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let Some(receiver) = lock(&self.receiver).take() else {
            return Ok(());
        };
        let worker = Worker {
            channel_id: self.channel_id.clone(),
            support: Arc::clone(&self.support),
            receiver,
            halted: Arc::clone(&self.halted),
        };
        let handle = thread::Builder::new()
            .name(format!("solo-{}", self.channel_id))
            .spawn(move || worker.run())?;
        *lock(&self.worker) = Some(handle);
        debug!(channel = %self.channel_id, "started solo chain");
        Ok(())
    }

    fn halt(&self) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.sender).take();

        // The block being written, if any, lands before halt returns.
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!(channel = %self.channel_id, "solo worker panicked");
            }
        }
        info!(channel = %self.channel_id, "halted solo chain");
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

struct Worker {
    channel_id: String,
    support: Arc<dyn ConsenterSupport>,
    receiver: mpsc::Receiver<Message>,
    halted: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let mut timer: Option<Instant> = None;
        while !self.halted.load(Ordering::SeqCst) {
            let received = match timer {
                Some(deadline) => self
                    .receiver
                    .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => self
                    .receiver
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            if self.halted.load(Ordering::SeqCst) {
                break;
            }

            match received {
                Ok(Message::Normal {
                    envelope,
                    config_seq,
                }) => self.handle_normal(envelope, config_seq, &mut timer),
                Ok(Message::Config {
                    envelope,
                    config_seq,
                }) => {
                    self.handle_config(envelope, config_seq);
                    timer = None;
                }
                Err(RecvTimeoutError::Timeout) => {
                    timer = None;
                    let batch = self.support.block_cutter().cut();
                    if batch.is_empty() {
                        warn!(channel = %self.channel_id, "batch timer expired with no pending messages");
                    } else {
                        debug!(channel = %self.channel_id, "batch timer expired, cutting block");
                        self.write_batch(batch);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(channel = %self.channel_id, "solo worker exiting");
    }

    fn handle_normal(&self, envelope: Envelope, config_seq: u64, timer: &mut Option<Instant>) {
        if config_seq < self.support.sequence() {
            if let Err(err) = self.support.process_normal_msg(&envelope) {
                warn!(channel = %self.channel_id, error = %err, "discarding bad normal message");
                return;
            }
        }

        let bundle = self.support.bundle();
        let Some(orderer) = bundle.orderer_config() else {
            error!(channel = %self.channel_id, "no orderer config, dropping message");
            return;
        };

        let (batches, pending) = self
            .support
            .block_cutter()
            .ordered(envelope, &orderer.batch_size);
        for batch in batches {
            self.write_batch(batch);
        }

        match (timer.is_some(), pending) {
            (true, false) => *timer = None,
            (false, true) => *timer = Some(Instant::now() + orderer.batch_timeout()),
            _ => {}
        }
    }

    fn handle_config(&self, envelope: Envelope, config_seq: u64) {
        let envelope = if config_seq < self.support.sequence() {
            match self.support.process_config_msg(&envelope) {
                Ok((envelope, _)) => envelope,
                Err(err) => {
                    warn!(channel = %self.channel_id, error = %err, "discarding bad config message");
                    return;
                }
            }
        } else {
            envelope
        };

        let batch = self.support.block_cutter().cut();
        if !batch.is_empty() {
            self.write_batch(batch);
        }

        let written = self
            .support
            .create_next_block(vec![envelope])
            .and_then(|block| self.support.write_config_block(block, None));
        if let Err(err) = written {
            error!(channel = %self.channel_id, error = %err, "failed to write config block");
        }
    }

    fn write_batch(&self, batch: Vec<Envelope>) {
        let written = self
            .support
            .create_next_block(batch)
            .and_then(|block| self.support.write_block(block, None));
        if let Err(err) = written {
            error!(channel = %self.channel_id, error = %err, "failed to write block");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoxError, Consenter as _, Receiver};
    use orderer_channelconfig::{genesis, Bundle};
    use orderer_core::{create_signed_envelope, Block, Hash, HeaderType};
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    struct MockSupport {
        cutter: Receiver,
        bundle: Arc<Bundle>,
        sequence: AtomicU64,
        blocks: Mutex<Vec<Block>>,
        written: Mutex<mpsc::Sender<(Block, bool)>>,
    }

    impl MockSupport {
        fn new(max_message_count: u32, batch_timeout_ms: u64) -> (Arc<Self>, mpsc::Receiver<(Block, bool)>) {
            let mut config = genesis::application_channel_config(CONSENSUS_TYPE, vec![]);
            if let Some(orderer) = config.orderer.as_mut() {
                orderer.batch_size.max_message_count = max_message_count;
                orderer.batch_timeout_ms = batch_timeout_ms;
            }
            let (tx, rx) = mpsc::channel();
            let support = Self {
                cutter: Receiver::new(),
                bundle: Arc::new(Bundle::new("testchannel", config).unwrap()),
                sequence: AtomicU64::new(0),
                blocks: Mutex::new(Vec::new()),
                written: Mutex::new(tx),
            };
            (Arc::new(support), rx)
        }

        fn commit(&self, block: Block, config: bool) {
            lock(&self.blocks).push(block.clone());
            let _ = lock(&self.written).send((block, config));
        }
    }

    impl ConsenterSupport for MockSupport {
        fn channel_id(&self) -> &str {
            "testchannel"
        }

        fn block_cutter(&self) -> &Receiver {
            &self.cutter
        }

        fn bundle(&self) -> Arc<Bundle> {
            Arc::clone(&self.bundle)
        }

        fn sequence(&self) -> u64 {
            self.sequence.load(Ordering::SeqCst)
        }

        fn height(&self) -> u64 {
            lock(&self.blocks).len() as u64
        }

        fn create_next_block(&self, messages: Vec<Envelope>) -> std::result::Result<Block, BoxError> {
            let blocks = lock(&self.blocks);
            let previous = blocks.last().map(Block::hash).unwrap_or(Hash::ZERO);
            Ok(Block::new(blocks.len() as u64, previous, messages))
        }

        fn write_block(&self, block: Block, _: Option<Vec<u8>>) -> std::result::Result<(), BoxError> {
            self.commit(block, false);
            Ok(())
        }

        fn write_config_block(
            &self,
            block: Block,
            _: Option<Vec<u8>>,
        ) -> std::result::Result<(), BoxError> {
            self.commit(block, true);
            Ok(())
        }

        fn process_normal_msg(&self, envelope: &Envelope) -> std::result::Result<u64, BoxError> {
            let value: u64 = envelope.decode_data_of(HeaderType::Message)?;
            if value == 13 {
                return Err("unlucky message".into());
            }
            Ok(self.sequence())
        }

        fn process_config_msg(
            &self,
            envelope: &Envelope,
        ) -> std::result::Result<(Envelope, u64), BoxError> {
            Ok((envelope.clone(), self.sequence()))
        }
    }

    fn message(n: u64) -> Envelope {
        create_signed_envelope(HeaderType::Message, "testchannel", None, &n, 0, 0).unwrap()
    }

    fn values(block: &Block) -> Vec<u64> {
        block
            .data
            .iter()
            .map(|env| env.decode_data_of(HeaderType::Message).unwrap())
            .collect()
    }

    fn start_chain(support: Arc<MockSupport>) -> Box<dyn Chain> {
        let chain = Consenter::new().handle_chain(support, None).unwrap();
        chain.start().unwrap();
        chain
    }

    #[test]
    fn test_cuts_full_batch_in_order() {
        let (support, written) = MockSupport::new(3, 60_000);
        let chain = start_chain(Arc::clone(&support));

        for n in 0..3 {
            chain.order(message(n), 0).unwrap();
        }
        let (block, config) = written.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!config);
        assert_eq!(block.number(), 0);
        assert_eq!(values(&block), vec![0, 1, 2]);
        chain.halt();
    }

    #[test]
    fn test_batch_timer_flushes_pending() {
        let (support, written) = MockSupport::new(10, 20);
        let chain = start_chain(support);

        chain.order(message(7), 0).unwrap();
        let (block, _) = written.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(values(&block), vec![7]);
        chain.halt();
    }

    #[test]
    fn test_config_message_cuts_pending_batch() {
        let (support, written) = MockSupport::new(10, 60_000);
        let chain = start_chain(support);

        chain.order(message(1), 0).unwrap();
        let config = create_signed_envelope(HeaderType::Config, "testchannel", None, &0u64, 0, 0)
            .unwrap();
        chain.configure(config.clone(), 0).unwrap();

        let (first, is_config) = written.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!is_config);
        assert_eq!(values(&first), vec![1]);

        let (second, is_config) = written.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(is_config);
        assert_eq!(second.number(), 1);
        assert_eq!(second.data, vec![config]);
        chain.halt();
    }

    #[test]
    fn test_stale_message_revalidated() {
        let (support, written) = MockSupport::new(1, 60_000);
        support.sequence.store(1, Ordering::SeqCst);
        let chain = start_chain(support);

        chain.order(message(13), 0).unwrap();
        chain.order(message(14), 0).unwrap();
        let (block, _) = written.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(values(&block), vec![14]);
        chain.halt();
    }

    #[test]
    fn test_halt_rejects_submissions() {
        let (support, _written) = MockSupport::new(10, 60_000);
        let chain = start_chain(support);

        assert!(chain.wait_ready().is_ok());
        chain.halt();
        assert!(chain.is_halted());
        assert!(matches!(chain.order(message(1), 0), Err(ConsensusError::Halted(_))));
        assert!(matches!(chain.wait_ready(), Err(ConsensusError::Halted(_))));
    }

    #[test]
    fn test_halt_waits_for_worker() {
        let (support, written) = MockSupport::new(1, 60_000);
        let chain = start_chain(Arc::clone(&support));

        for n in 0..500 {
            chain.order(message(n), 0).unwrap();
        }
        written.recv_timeout(Duration::from_secs(5)).unwrap();
        chain.halt();

        let height = support.height();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(support.height(), height);
    }
}
