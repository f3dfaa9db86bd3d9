//! Groups ordered envelopes into batches.
//!
//! A batch is cut when it reaches `max_message_count` messages or when the
//! next message would push it past `preferred_max_bytes`. A message that is
//! larger than `preferred_max_bytes` on its own always travels alone.

use orderer_channelconfig::BatchSize;
use orderer_core::Envelope;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Default)]
struct Pending {
    batch: Vec<Envelope>,
    bytes: usize,
}

impl Pending {
    fn cut(&mut self) -> Vec<Envelope> {
        self.bytes = 0;
        std::mem::take(&mut self.batch)
    }
}

/// Accumulates envelopes for one channel.
#[derive(Default)]
pub struct Receiver {
    pending: Mutex<Pending>,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `message` under the limits in `batch_size`.
    ///
    /// Returns the batches that are now complete, and whether messages remain
    /// pending afterwards.
    pub fn ordered(&self, message: Envelope, batch_size: &BatchSize) -> (Vec<Vec<Envelope>>, bool) {
        let mut pending = self.lock();
        let mut batches = Vec::new();
        let size = message.size();
        let preferred = batch_size.preferred_max_bytes as usize;

        if size > preferred {
            debug!(size, preferred, "message is larger than the preferred batch size");
            if !pending.batch.is_empty() {
                batches.push(pending.cut());
            }
            batches.push(vec![message]);
            return (batches, false);
        }

        if pending.bytes + size > preferred {
            debug!("pending batch would overflow, cutting");
            batches.push(pending.cut());
        }

        pending.batch.push(message);
        pending.bytes += size;

        if pending.batch.len() >= batch_size.max_message_count as usize {
            batches.push(pending.cut());
        }

        let has_pending = !pending.batch.is_empty();
        (batches, has_pending)
    }

    /// Return whatever is pending and start over. May be empty.
    pub fn cut(&self) -> Vec<Envelope> {
        self.lock().cut()
    }
}
