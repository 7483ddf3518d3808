//! Bounded-memory fragment reassembly.
//!
//! One reassembler per connection. Three limits protect long-lived
//! processes from hostile or broken senders: a per-batch timeout, a cap
//! on concurrent batches (least-recently-touched eviction), and a cap on
//! total buffered bytes. Every eviction invokes the observer callback so
//! the owner can log it.

use crate::error::ReassemblyError;
use crate::fragment::{BatchId, FragmentPayload};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// Result of feeding one payload to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// A whole frame is ready.
    Complete(Vec<u8>),
    /// More fragments are needed.
    Pending,
}

/// Why a batch was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// No fragment arrived within the timeout.
    Timeout,
    /// Too many concurrent batches.
    BatchOverflow,
    /// Total buffered bytes exceeded the cap.
    MemoryOverflow,
}

/// Limits applied by the reassembler.
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Idle time after which a batch is evicted.
    pub batch_timeout: Duration,
    /// Maximum concurrent batches.
    pub max_batches: usize,
    /// Maximum bytes buffered across all batches.
    pub max_total_bytes: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_secs(10),
            max_batches: 32,
            max_total_bytes: 50 * 1024 * 1024,
        }
    }
}

type EvictCallback = Box<dyn FnMut(BatchId, EvictReason) + Send>;

#[derive(Debug, Default)]
struct Batch {
    /// Declared chunk count; `None` until the header arrives.
    count: Option<u32>,
    /// Declared total size; `None` until the header arrives.
    total_size: Option<u32>,
    chunks: HashMap<u32, Vec<u8>>,
    buffered: usize,
    last_touched: Option<Instant>,
}

impl Batch {
    fn is_complete(&self) -> bool {
        match self.count {
            Some(count) => self.chunks.len() as u32 == count,
            None => false,
        }
    }
}

/// Recomposes fragments into frames with bounded memory.
pub struct Reassembler {
    config: ReassemblyConfig,
    batches: HashMap<BatchId, Batch>,
    total_bytes: usize,
    on_evict: Option<EvictCallback>,
}

impl Reassembler {
    /// Creates a reassembler with the given limits.
    #[must_use]
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            config,
            batches: HashMap::new(),
            total_bytes: 0,
            on_evict: None,
        }
    }

    /// Registers the eviction observer.
    pub fn set_evict_callback(&mut self, cb: impl FnMut(BatchId, EvictReason) + Send + 'static) {
        self.on_evict = Some(Box::new(cb));
    }

    /// Bytes currently buffered across all in-flight batches.
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of in-flight batches.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Feeds one raw transport payload.
    pub fn accept(&mut self, bytes: &[u8]) -> Result<ReassemblyOutcome, ReassemblyError> {
        let payload = FragmentPayload::parse(bytes)?;
        self.accept_payload(payload)
    }

    /// Feeds one already-parsed payload.
    pub fn accept_payload(
        &mut self,
        payload: FragmentPayload,
    ) -> Result<ReassemblyOutcome, ReassemblyError> {
        self.sweep();

        match payload {
            FragmentPayload::Complete(frame) => Ok(ReassemblyOutcome::Complete(frame)),
            FragmentPayload::Header {
                batch_id,
                count,
                total_size,
            } => {
                self.reserve_batch_slot(&batch_id);
                let batch = self.batches.entry(batch_id).or_default();
                batch.count = Some(count);
                batch.total_size = Some(total_size);
                batch.last_touched = Some(Instant::now());

                // Chunks may have raced ahead of the header; re-validate.
                if batch.chunks.keys().any(|&index| index >= count) {
                    self.drop_batch(&batch_id);
                    return Err(ReassemblyError::InvalidIndex);
                }
                self.try_finish(batch_id)
            }
            FragmentPayload::Data {
                batch_id,
                index,
                chunk,
            } => {
                self.reserve_batch_slot(&batch_id);
                self.reserve_memory(&batch_id, chunk.len());

                let batch = self.batches.entry(batch_id).or_default();
                if let Some(count) = batch.count {
                    if index >= count {
                        return Err(ReassemblyError::InvalidIndex);
                    }
                }
                batch.last_touched = Some(Instant::now());
                if let Some(previous) = batch.chunks.insert(index, chunk) {
                    // Duplicate index: replace, keeping the byte count honest.
                    batch.buffered -= previous.len();
                    self.total_bytes -= previous.len();
                }
                let added = batch.chunks[&index].len();
                batch.buffered += added;
                self.total_bytes += added;

                self.try_finish(batch_id)
            }
        }
    }

    /// Evicts batches idle past the timeout. Called internally on every
    /// accept; owners with long quiet periods may also call it on a timer.
    pub fn sweep(&mut self) {
        let timeout = self.config.batch_timeout;
        let expired: Vec<BatchId> = self
            .batches
            .iter()
            .filter(|(_, b)| {
                b.last_touched
                    .is_some_and(|touched| touched.elapsed() >= timeout)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            warn!(batch = ?id, "reassembly batch timed out");
            self.evict(&id, EvictReason::Timeout);
        }
    }

    /// Releases every buffer and forgets all in-flight batches.
    pub fn dispose(&mut self) {
        self.batches.clear();
        self.total_bytes = 0;
    }

    fn try_finish(&mut self, batch_id: BatchId) -> Result<ReassemblyOutcome, ReassemblyError> {
        let Some(batch) = self.batches.get(&batch_id) else {
            return Ok(ReassemblyOutcome::Pending);
        };
        if !batch.is_complete() {
            return Ok(ReassemblyOutcome::Pending);
        }

        let Some(batch) = self.batches.remove(&batch_id) else {
            return Ok(ReassemblyOutcome::Pending);
        };
        self.total_bytes -= batch.buffered;

        let count = batch.count.unwrap_or(0);
        let declared = batch.total_size.unwrap_or(0) as usize;
        let mut frame = Vec::with_capacity(declared);
        for index in 0..count {
            match batch.chunks.get(&index) {
                Some(chunk) => frame.extend_from_slice(chunk),
                None => return Err(ReassemblyError::MissingFragments),
            }
        }
        if frame.len() != declared {
            return Err(ReassemblyError::SizeMismatch);
        }
        Ok(ReassemblyOutcome::Complete(frame))
    }

    /// Makes room for a new batch id, evicting the least-recently-touched
    /// batch when at capacity.
    fn reserve_batch_slot(&mut self, incoming: &BatchId) {
        if self.batches.contains_key(incoming) || self.batches.len() < self.config.max_batches {
            return;
        }
        if let Some(oldest) = self.least_recently_touched(Some(incoming)) {
            warn!(batch = ?oldest, "evicting reassembly batch: too many concurrent batches");
            self.evict(&oldest, EvictReason::BatchOverflow);
        }
    }

    /// Makes room for `additional` chunk bytes, evicting old batches.
    fn reserve_memory(&mut self, incoming: &BatchId, additional: usize) {
        while self.total_bytes + additional > self.config.max_total_bytes {
            let Some(oldest) = self.least_recently_touched(Some(incoming)) else {
                break;
            };
            warn!(batch = ?oldest, "evicting reassembly batch: memory cap reached");
            self.evict(&oldest, EvictReason::MemoryOverflow);
        }
    }

    fn least_recently_touched(&self, excluding: Option<&BatchId>) -> Option<BatchId> {
        self.batches
            .iter()
            .filter(|(id, _)| excluding != Some(*id))
            .min_by_key(|(_, b)| b.last_touched)
            .map(|(id, _)| *id)
    }

    fn drop_batch(&mut self, id: &BatchId) {
        if let Some(batch) = self.batches.remove(id) {
            self.total_bytes -= batch.buffered;
        }
    }

    fn evict(&mut self, id: &BatchId, reason: EvictReason) {
        self.drop_batch(id);
        if let Some(cb) = self.on_evict.as_mut() {
            cb(*id, reason);
        }
    }
}

impl Drop for Reassembler {
    fn drop(&mut self) {
        self.dispose();
    }
}
