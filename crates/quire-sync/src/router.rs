//! Accumulator routing and unified detection
//!
//! Every interaction class has its own accumulator. When a publisher has
//! entries of two or more classes pending at the same time, those entries
//! would otherwise become two or more transactions for the same signer.
//! The router detects this and moves every pending entry for that publisher
//! into the unified accumulator, so they flush together in one transaction.
//!
//! Placement runs under a router-wide lock. The check for other classes and
//! the move into unified must not interleave with a concurrent placement for
//! the same publisher.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use quire_core::{PublisherAddress, WriteKind};
use tracing::debug;

use crate::accumulator::{BatchAccumulator, BatchStatus};
use crate::config::AccumulatorSet;
use crate::request::{PendingWrite, WriteRequest, WriteTicket};
use crate::writer::{BatchWriter, FlushReport};

/// Owns one accumulator per [`WriteKind`]
#[derive(Debug)]
pub struct WriteRouter {
    accumulators: BTreeMap<WriteKind, Arc<BatchAccumulator>>,
    unified_routing: bool,
    next_seq: AtomicU64,
    /// Held across detection and placement
    placement: Mutex<()>,
}

impl WriteRouter {
    pub fn new(config: &AccumulatorSet, unified_routing: bool, writer: Arc<BatchWriter>) -> Self {
        let accumulators = WriteKind::ALL
            .into_iter()
            .map(|kind| {
                (
                    kind,
                    BatchAccumulator::new(kind, config.get(kind), Arc::clone(&writer)),
                )
            })
            .collect();
        Self {
            accumulators,
            unified_routing,
            next_seq: AtomicU64::new(0),
            placement: Mutex::new(()),
        }
    }

    /// The accumulator for `kind`
    pub fn accumulator(&self, kind: WriteKind) -> &Arc<BatchAccumulator> {
        // Every kind is inserted at construction.
        &self.accumulators[&kind]
    }

    /// Queue `request`, returning the ticket for its outcome
    pub fn route(&self, request: WriteRequest) -> WriteTicket {
        let _placement = self.placement.lock();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (entry, ticket) = PendingWrite::new(request, seq);
        self.place(entry);
        ticket
    }

    fn place(&self, entry: PendingWrite) {
        let kind = entry.request.kind;
        if !self.unified_routing || kind == WriteKind::Unified {
            self.accumulator(kind).add(entry);
            return;
        }

        let publisher = entry.request.publisher.clone();
        let unified = self.accumulator(WriteKind::Unified);
        if unified.has_pending_for(&publisher) {
            unified.add(entry);
            return;
        }

        let others: Vec<WriteKind> = WriteKind::CLASSES
            .into_iter()
            .filter(|other| *other != kind && self.accumulator(*other).has_pending_for(&publisher))
            .collect();
        if others.is_empty() {
            self.accumulator(kind).add(entry);
            return;
        }

        let mut moved = self.accumulator(kind).take_for_publisher(&publisher);
        for other in &others {
            moved.extend(self.accumulator(*other).take_for_publisher(&publisher));
        }
        moved.push(entry);
        moved.sort_by_key(|pending| pending.seq);

        debug!(
            publisher = %publisher,
            kind = %kind,
            entries = moved.len(),
            classes = others.len() + 1,
            "Mixed classes pending, routing to unified"
        );
        unified.absorb(moved);
    }

    /// Flush one accumulator, or all of them
    pub async fn force_flush(&self, kind: Option<WriteKind>) -> FlushReport {
        match kind {
            Some(kind) => self.accumulator(kind).force_flush().await,
            None => {
                let flushes = self.accumulators.values().map(|acc| acc.force_flush());
                let mut report = FlushReport::default();
                for partial in join_all(flushes).await {
                    report.merge(partial);
                }
                report
            }
        }
    }

    pub fn status(&self, kind: WriteKind) -> BatchStatus {
        self.accumulator(kind).status()
    }

    /// Pending entries across every accumulator
    pub fn pending_len(&self) -> usize {
        self.accumulators.values().map(|acc| acc.pending_len()).sum()
    }

    /// Kinds with entries pending for `publisher`
    pub fn pending_kinds_for(&self, publisher: &PublisherAddress) -> Vec<WriteKind> {
        self.accumulators
            .iter()
            .filter(|(_, acc)| acc.has_pending_for(publisher))
            .map(|(kind, _)| *kind)
            .collect()
    }
}
