//! Batch accumulators
//!
//! Cheap facts (likes, bookmarks, play events) are collected and written in
//! as few transactions as possible. An accumulator flushes when it reaches
//! its size threshold, or when no entry has been added for its debounce
//! delay.
//!
//! The pending list is snapshotted and cleared under a short synchronous
//! lock before any asynchronous work starts, so a snapshot can only ever be
//! flushed once, whichever of threshold, timer or forced flush gets there
//! first.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use quire_core::{PublisherAddress, WriteKind};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::AccumulatorConfig;
use crate::request::PendingWrite;
use crate::writer::{BatchWriter, FlushReport};

/// What an accumulator is holding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatus {
    pub kind: WriteKind,
    /// Entries waiting to be flushed
    pub pending: usize,
    /// Time until the debounce timer fires, if armed
    pub will_flush_in: Option<Duration>,
    /// Distinct target publishers among the pending entries
    pub publishers: Vec<PublisherAddress>,
}

#[derive(Default)]
struct AccumulatorState {
    pending: Vec<PendingWrite>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is re-armed or disarmed
    timer_generation: u64,
    deadline: Option<Instant>,
}

impl AccumulatorState {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_generation += 1;
        self.deadline = None;
    }
}

/// One queue of pending writes with size and time thresholds
pub struct BatchAccumulator {
    kind: WriteKind,
    config: AccumulatorConfig,
    state: Mutex<AccumulatorState>,
    writer: Arc<BatchWriter>,
}

impl BatchAccumulator {
    pub fn new(kind: WriteKind, config: AccumulatorConfig, writer: Arc<BatchWriter>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            config,
            state: Mutex::new(AccumulatorState::default()),
            writer,
        })
    }

    pub fn kind(&self) -> WriteKind {
        self.kind
    }

    pub fn config(&self) -> AccumulatorConfig {
        self.config
    }

    /// Append one entry
    ///
    /// Reaching the threshold flushes immediately in the background;
    /// otherwise the debounce timer is (re)started.
    pub fn add(self: &Arc<Self>, entry: PendingWrite) {
        self.absorb(vec![entry]);
    }

    /// Append several entries, keeping their order
    pub fn absorb(self: &Arc<Self>, entries: Vec<PendingWrite>) {
        if entries.is_empty() {
            return;
        }

        let snapshot = {
            let mut state = self.state.lock();
            state.pending.extend(entries);
            if state.pending.len() >= self.config.threshold {
                state.disarm();
                Some(std::mem::take(&mut state.pending))
            } else {
                self.arm_timer(&mut state);
                None
            }
        };

        if let Some(batch) = snapshot {
            debug!(kind = %self.kind, entries = batch.len(), "Threshold reached, flushing");
            let writer = Arc::clone(&self.writer);
            let kind = self.kind;
            tokio::spawn(async move {
                writer.submit(kind, batch).await;
            });
        }
    }

    /// Cancel the timer and flush whatever is pending now
    pub async fn force_flush(&self) -> FlushReport {
        let batch = {
            let mut state = self.state.lock();
            state.disarm();
            std::mem::take(&mut state.pending)
        };
        if batch.is_empty() {
            return FlushReport::default();
        }
        debug!(kind = %self.kind, entries = batch.len(), "Forced flush");
        self.writer.submit(self.kind, batch).await
    }

    /// Remove and return the pending entries targeting `publisher`
    pub fn take_for_publisher(&self, publisher: &PublisherAddress) -> Vec<PendingWrite> {
        let mut state = self.state.lock();
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|entry| &entry.request.publisher == publisher);
        state.pending = kept;
        if state.pending.is_empty() {
            state.disarm();
        }
        taken
    }

    /// Whether any pending entry targets `publisher`
    pub fn has_pending_for(&self, publisher: &PublisherAddress) -> bool {
        self.state
            .lock()
            .pending
            .iter()
            .any(|entry| &entry.request.publisher == publisher)
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn status(&self) -> BatchStatus {
        let state = self.state.lock();
        let mut publishers: Vec<PublisherAddress> = state
            .pending
            .iter()
            .map(|entry| entry.request.publisher.clone())
            .collect();
        publishers.sort();
        publishers.dedup();

        BatchStatus {
            kind: self.kind,
            pending: state.pending.len(),
            will_flush_in: state
                .deadline
                .map(|deadline| deadline.saturating_duration_since(Instant::now())),
            publishers,
        }
    }

    /// Restart the debounce timer
    ///
    /// The timer holds only a weak reference, so a dropped accumulator does
    /// not linger until its timer fires.
    fn arm_timer(self: &Arc<Self>, state: &mut AccumulatorState) {
        state.disarm();
        let generation = state.timer_generation;
        let delay = self.config.debounce();
        state.deadline = Some(Instant::now() + delay);

        let accumulator: Weak<Self> = Arc::downgrade(self);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(accumulator) = accumulator.upgrade() {
                accumulator.flush_from_timer(generation).await;
            }
        }));
    }

    async fn flush_from_timer(&self, generation: u64) {
        let batch = {
            let mut state = self.state.lock();
            if state.timer_generation != generation {
                trace!(kind = %self.kind, "Stale debounce timer");
                return;
            }
            // Detach rather than abort: this is the running timer task.
            state.timer = None;
            state.timer_generation += 1;
            state.deadline = None;
            std::mem::take(&mut state.pending)
        };
        if batch.is_empty() {
            return;
        }
        debug!(kind = %self.kind, entries = batch.len(), "Debounce elapsed, flushing");
        self.writer.submit(self.kind, batch).await;
    }
}

impl Drop for BatchAccumulator {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for BatchAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAccumulator")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("pending", &self.pending_len())
            .finish()
    }
}
