//! Double buffer and the single-slot hand-off to the sink.
//!
//! Two fixed-capacity sample buffers live for the whole process. The
//! [`Producer`] (the acquisition loop) writes decoded samples into the
//! current buffer. When it fills up, or a new-file switch is pending at a
//! sweep boundary, the buffer is offered to the [`Consumer`] through a single
//! atomic hand-off cell and the producer continues in the other buffer.
//!
//! The hand-off cell holds either [`NO_HANDOFF`] or the index of the buffer
//! owned by the consumer. Only the producer moves it away from `NO_HANDOFF`
//! and only the consumer moves it back, so at most one hand-off is ever
//! outstanding and the producer never writes into a buffer under drain.
//!
//! The per-slot mutexes are only contended by the command server's
//! [`SweepReader`] snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use callisto_core::error::{Error, Result};

/// Hand-off cell value meaning "no buffer is being drained".
pub const NO_HANDOFF: usize = usize::MAX;

/// Producer poll interval while waiting for the consumer.
const HANDOFF_POLL: Duration = Duration::from_millis(1);

/// How long a producer waits before complaining about a slow consumer.
const HANDOFF_WARN_AFTER: Duration = Duration::from_secs(10);

/// One fixed-capacity sample buffer.
#[derive(Debug)]
struct SampleBuffer {
    data: Vec<u8>,
    size: usize,
    /// Wall-clock microseconds of the first sample; meaningful while
    /// `size > 0`.
    timestamp_us: i64,
}

impl SampleBuffer {
    fn allocate(capacity: usize) -> Result<SampleBuffer> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).map_err(|e| {
            Error::Startup(format!("cannot allocate {capacity} byte sample buffer: {e}"))
        })?;
        data.resize(capacity, 0);
        Ok(SampleBuffer {
            data,
            size: 0,
            timestamp_us: 0,
        })
    }
}

/// A filled buffer handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedBuffer {
    /// Valid samples, sweep after sweep.
    pub data: Vec<u8>,
    /// Wall-clock microseconds of the first sample.
    pub timestamp_us: i64,
    /// Channels per sweep.
    pub nchannels: usize,
}

impl CompletedBuffer {
    /// Number of complete sweeps in the buffer.
    pub fn sweeps(&self) -> usize {
        if self.nchannels == 0 {
            0
        } else {
            self.data.len() / self.nchannels
        }
    }

    /// Time of the first sample.
    pub fn started(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.timestamp_us).unwrap_or_default()
    }
}

/// The most recent complete sweep, as served by `get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sweep {
    /// Wall-clock microseconds of the sweep's first sample.
    pub timestamp_us: i64,
    /// One value per channel.
    pub values: Vec<u8>,
}

struct BufferPair {
    slots: [Mutex<SampleBuffer>; 2],
    handoff: AtomicUsize,
    active: AtomicUsize,
    capacity: usize,
    nchannels: usize,
    sweep_micros: i64,
}

impl BufferPair {
    fn slot(&self, index: usize) -> MutexGuard<'_, SampleBuffer> {
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn handoff_pending(&self) -> bool {
        self.handoff.load(Ordering::Acquire) != NO_HANDOFF
    }
}

/// Allocate the buffer pair and split it into its three views.
///
/// `capacity` is the number of samples per buffer (one output file) and
/// must be a multiple of `nchannels`. Producer-side waits give up early when
/// `cancel` fires, except for explicitly bounded waits.
pub fn buffer_pair(
    capacity: usize,
    nchannels: usize,
    sweep_micros: i64,
    cancel: CancellationToken,
) -> Result<(Producer, Consumer, SweepReader)> {
    if capacity == 0 || nchannels == 0 || capacity % nchannels != 0 {
        return Err(Error::Startup(format!(
            "buffer capacity {capacity} is not a positive multiple of {nchannels} channels"
        )));
    }
    let pair = Arc::new(BufferPair {
        slots: [
            Mutex::new(SampleBuffer::allocate(capacity)?),
            Mutex::new(SampleBuffer::allocate(capacity)?),
        ],
        handoff: AtomicUsize::new(NO_HANDOFF),
        active: AtomicUsize::new(0),
        capacity,
        nchannels,
        sweep_micros,
    });
    debug!(capacity, nchannels, "sample buffers allocated");
    Ok((
        Producer {
            pair: Arc::clone(&pair),
            current: 0,
            switch_requested: false,
            cancel,
        },
        Consumer {
            pair: Arc::clone(&pair),
        },
        SweepReader { pair },
    ))
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Write side, owned by the acquisition loop.
pub struct Producer {
    pair: Arc<BufferPair>,
    current: usize,
    switch_requested: bool,
    cancel: CancellationToken,
}

impl Producer {
    /// Index of the buffer currently written.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Fill size of the current buffer.
    pub fn size(&self) -> usize {
        self.pair.slot(self.current).size
    }

    /// Capacity of each buffer.
    pub fn capacity(&self) -> usize {
        self.pair.capacity
    }

    /// Whether a new-file switch is waiting for the next sweep boundary.
    pub fn switch_requested(&self) -> bool {
        self.switch_requested
    }

    /// Ask for a new output file at the next sweep boundary.
    pub fn request_switch(&mut self) {
        self.switch_requested = true;
    }

    /// Whether the consumer still owns a buffer.
    pub fn handoff_pending(&self) -> bool {
        self.pair.handoff_pending()
    }

    /// Append one sample. Returns `true` when the buffer must be swapped
    /// before the next sample.
    pub fn store(&mut self, sample: u8) -> bool {
        let nchannels = self.pair.nchannels;
        let mut buffer = self.pair.slot(self.current);
        if buffer.size >= self.pair.capacity {
            warn!(buffer = self.current, "sample buffer full, dropping sample");
            return true;
        }
        if buffer.size == 0 {
            buffer.timestamp_us = Utc::now().timestamp_micros();
        }
        let offset = buffer.size;
        buffer.data[offset] = sample;
        buffer.size += 1;
        buffer.size == self.pair.capacity
            || (self.switch_requested && buffer.size % nchannels == 0)
    }

    /// Wait until the consumer has released its buffer.
    ///
    /// With `limit` the wait is bounded; without it the wait only ends early
    /// on cancellation. Returns `false` if the hand-off is still pending.
    pub async fn wait_idle(&self, limit: Option<Duration>) -> bool {
        let started = Instant::now();
        let mut next_warning = HANDOFF_WARN_AFTER;
        loop {
            if !self.pair.handoff_pending() {
                return true;
            }
            let waited = started.elapsed();
            match limit {
                Some(limit) if waited >= limit => return false,
                None if self.cancel.is_cancelled() => return false,
                _ => {}
            }
            if waited >= next_warning {
                warn!(waited_secs = waited.as_secs(), "sink is still draining the previous buffer");
                next_warning += HANDOFF_WARN_AFTER;
            }
            tokio::time::sleep(HANDOFF_POLL).await;
        }
    }

    fn offer(&self, index: usize) -> bool {
        let offered = self
            .pair
            .handoff
            .compare_exchange(NO_HANDOFF, index, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if offered {
            debug!(buffer = index, "buffer handed off");
        } else {
            warn!(buffer = index, "hand-off already outstanding, buffer not offered");
        }
        offered
    }

    /// Hand off the current buffer and continue in the other one.
    ///
    /// If cancellation cuts the wait short the current buffer is kept as it
    /// is, with the switch still pending, so a bounded [`flush`](Self::flush)
    /// during shutdown can still deliver it.
    pub async fn swap(&mut self) {
        if !self.wait_idle(None).await {
            warn!(buffer = self.current, "hand-off still pending, keeping buffer for the final flush");
            self.switch_requested = true;
            return;
        }
        self.switch_requested = false;
        self.offer(self.current);
        self.current = 1 - self.current;
        self.pair.active.store(self.current, Ordering::Release);
        self.pair.slot(self.current).size = 0;
    }

    /// Hand off the current buffer even if it is partial, wait for the sink
    /// to finish with it and empty both buffers.
    ///
    /// Returns `false` if a wait ran out (bounded by `limit` or cut short by
    /// cancellation when unbounded).
    pub async fn flush(&mut self, limit: Option<Duration>) -> bool {
        if !self.wait_idle(limit).await {
            return false;
        }
        let size = self.size();
        if size > 0 && !self.offer(self.current) {
            return false;
        }
        let drained = self.wait_idle(limit).await;
        if drained {
            self.pair.slot(0).size = 0;
            self.pair.slot(1).size = 0;
        }
        drained
    }

    /// Empty both buffers and restart in buffer 0, after any outstanding
    /// hand-off has drained.
    pub async fn reset(&mut self) {
        if !self.wait_idle(None).await {
            warn!("resetting buffers while a hand-off is still pending");
        }
        self.pair.slot(0).size = 0;
        self.pair.slot(1).size = 0;
        self.current = 0;
        self.pair.active.store(0, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// Drain side, owned by the sink task.
pub struct Consumer {
    pair: Arc<BufferPair>,
}

impl Consumer {
    /// Copy out the buffer currently offered, if any. The buffer stays owned
    /// by the consumer until [`complete`](Self::complete).
    pub fn poll(&self) -> Option<CompletedBuffer> {
        let index = self.pair.handoff.load(Ordering::Acquire);
        if index == NO_HANDOFF {
            return None;
        }
        let buffer = self.pair.slot(index);
        Some(CompletedBuffer {
            data: buffer.data[..buffer.size].to_vec(),
            timestamp_us: buffer.timestamp_us,
            nchannels: self.pair.nchannels,
        })
    }

    /// Release the offered buffer back to the producer.
    pub fn complete(&self) {
        self.pair.handoff.store(NO_HANDOFF, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of the most recent complete sweep.
#[derive(Clone)]
pub struct SweepReader {
    pair: Arc<BufferPair>,
}

impl SweepReader {
    /// Channels per sweep.
    pub fn nchannels(&self) -> usize {
        self.pair.nchannels
    }

    /// The last complete sweep of the active buffer, falling back to the
    /// other buffer when the active one has none yet.
    pub fn latest(&self) -> Option<Sweep> {
        let n = self.pair.nchannels;
        let active = self.pair.active.load(Ordering::Acquire);
        [active, 1 - active].into_iter().find_map(|index| {
            let buffer = self.pair.slot(index);
            let whole = buffer.size - buffer.size % n;
            if whole == 0 {
                return None;
            }
            let sweep = (whole / n - 1) as i64;
            Some(Sweep {
                timestamp_us: buffer.timestamp_us + sweep * self.pair.sweep_micros,
                values: buffer.data[whole - n..whole].to_vec(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(capacity: usize, nchannels: usize) -> (Producer, Consumer, SweepReader) {
        buffer_pair(capacity, nchannels, 250_000, CancellationToken::new()).unwrap()
    }

    async fn fill(producer: &mut Producer, count: usize, value: u8) -> usize {
        let mut swaps = 0;
        for _ in 0..count {
            if producer.store(value) {
                producer.swap().await;
                swaps += 1;
            }
        }
        swaps
    }

    #[test]
    fn capacity_must_be_whole_sweeps() {
        let cancel = CancellationToken::new();
        assert!(buffer_pair(10, 4, 1, cancel.clone()).is_err());
        assert!(buffer_pair(0, 4, 1, cancel).is_err());
    }

    #[tokio::test]
    async fn full_buffer_hands_off_once() {
        let (mut producer, consumer, _) = pair(12, 4);
        assert_eq!(fill(&mut producer, 12, 7).await, 1);
        assert_eq!(producer.current(), 1);
        assert_eq!(producer.size(), 0);

        let done = consumer.poll().unwrap();
        assert_eq!(done.data, vec![7; 12]);
        assert_eq!(done.sweeps(), 3);
        assert!(done.timestamp_us > 0);
        consumer.complete();
        assert!(consumer.poll().is_none());
    }

    #[tokio::test]
    async fn switch_waits_for_sweep_boundary() {
        let (mut producer, consumer, _) = pair(40, 4);
        fill(&mut producer, 2, 1).await;
        producer.request_switch();
        // Finishing the first sweep triggers the swap, not the request.
        assert!(!producer.store(1));
        assert!(producer.store(1));
        producer.swap().await;
        assert!(!producer.switch_requested());
        assert_eq!(consumer.poll().unwrap().data.len(), 4);
    }

    #[tokio::test]
    async fn switch_at_boundary_requires_data() {
        let (mut producer, consumer, _) = pair(40, 4);
        producer.request_switch();
        assert!(!producer.store(0));
        fill(&mut producer, 2, 0).await;
        assert!(producer.store(0));
        producer.swap().await;
        assert_eq!(consumer.poll().unwrap().data.len(), 4);
    }

    #[tokio::test]
    async fn second_handoff_waits_for_consumer() {
        let (mut producer, consumer, _) = pair(4, 4);
        assert_eq!(fill(&mut producer, 4, 1).await, 1);
        for _ in 0..3 {
            assert!(!producer.store(2));
        }
        assert!(producer.store(2));

        {
            let swap = producer.swap();
            tokio::pin!(swap);
            assert!(
                tokio::time::timeout(Duration::from_millis(20), &mut swap)
                    .await
                    .is_err()
            );
            // The first buffer is untouched while the swap waits.
            assert_eq!(consumer.poll().unwrap().data, vec![1; 4]);
            consumer.complete();
            swap.await;
        }

        assert_eq!(consumer.poll().unwrap().data, vec![2; 4]);
        assert_eq!(producer.current(), 0);
    }

    #[tokio::test]
    async fn cancelled_swap_keeps_buffer_for_flush() {
        let cancel = CancellationToken::new();
        let (mut producer, consumer, _) = buffer_pair(4, 4, 1, cancel.clone()).unwrap();
        fill(&mut producer, 4, 1).await;
        fill(&mut producer, 3, 2).await;
        assert!(producer.store(2));
        cancel.cancel();
        producer.swap().await;
        assert_eq!(producer.current(), 1);
        assert_eq!(producer.size(), 4);
        assert!(producer.switch_requested());

        let drain = tokio::spawn(async move {
            let mut delivered = Vec::new();
            while delivered.len() < 2 {
                if let Some(done) = consumer.poll() {
                    delivered.push(done.data);
                    consumer.complete();
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            delivered
        });
        assert!(producer.flush(Some(Duration::from_secs(1))).await);
        assert_eq!(drain.await.unwrap(), vec![vec![1; 4], vec![2; 4]]);
        assert_eq!(producer.size(), 0);
    }

    #[tokio::test]
    async fn flush_hands_off_partial_buffer() {
        let (mut producer, consumer, _) = pair(40, 4);
        fill(&mut producer, 6, 3).await;

        let drain = tokio::spawn(async move {
            loop {
                if let Some(done) = consumer.poll() {
                    consumer.complete();
                    return done;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });
        assert!(producer.flush(None).await);
        assert_eq!(drain.await.unwrap().data, vec![3; 6]);
        assert_eq!(producer.size(), 0);
    }

    #[tokio::test]
    async fn bounded_flush_gives_up() {
        let (mut producer, _consumer, _) = pair(40, 4);
        fill(&mut producer, 4, 3).await;
        assert!(!producer.flush(Some(Duration::from_millis(10))).await);
        assert!(producer.handoff_pending());
    }

    #[tokio::test]
    async fn reset_returns_to_first_buffer() {
        let (mut producer, consumer, reader) = pair(4, 2);
        fill(&mut producer, 5, 9).await;
        assert_eq!(producer.current(), 1);
        consumer.complete();
        producer.reset().await;
        assert_eq!(producer.current(), 0);
        assert_eq!(producer.size(), 0);
        assert!(reader.latest().is_none());
    }

    #[tokio::test]
    async fn latest_sweep_falls_back_to_other_buffer() {
        let (mut producer, _consumer, reader) = pair(4, 2);
        assert!(reader.latest().is_none());
        for value in [1, 2, 3] {
            producer.store(value);
        }
        let sweep = reader.latest().unwrap();
        assert_eq!(sweep.values, vec![1, 2]);

        producer.store(4);
        producer.swap().await;
        let first = reader.latest().unwrap();
        assert_eq!(first.values, vec![3, 4]);
        assert_eq!(first.timestamp_us, sweep.timestamp_us + 250_000);
        assert_eq!(reader.nchannels(), 2);
    }
}
