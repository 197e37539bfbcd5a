//! Batch submission
//!
//! A flushed snapshot is split into one group per target publisher. Each
//! group becomes a single composite `set()` call, run through the
//! serializer of the signer writing it; groups for different publishers are
//! submitted concurrently. Every caller in a group receives that group's
//! outcome, and no entry is re-enqueued automatically.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use quire_core::{ChainClient, DataItem, PublisherAddress, SchemaId, SignerHandle, TxHandle, WriteKind};
use quire_logging::{fields, publisher_span};
use quire_storage::PublisherRegistry;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::events::{EventSink, WriteEvent};
use crate::reader::RecordCache;
use crate::request::PendingWrite;
use crate::serializer::SerializerPool;

/// Signing identities available to this process, by address
#[derive(Debug, Default)]
pub struct SignerSet {
    signers: DashMap<PublisherAddress, SignerHandle>,
}

impl SignerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `signer` available for groups targeting its address
    pub fn insert(&self, signer: SignerHandle) {
        self.signers.insert(signer.address.clone(), signer);
    }

    pub fn get(&self, publisher: &PublisherAddress) -> Option<SignerHandle> {
        self.signers.get(publisher).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}

/// Summary of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries in the snapshot
    pub entries: usize,
    /// Publisher groups submitted
    pub groups: usize,
    /// Groups whose write failed
    pub failed_groups: usize,
    /// Transactions of the successful groups
    pub transactions: Vec<TxHandle>,
}

impl FlushReport {
    /// Fold another report into this one
    pub fn merge(&mut self, other: FlushReport) {
        self.entries += other.entries;
        self.groups += other.groups;
        self.failed_groups += other.failed_groups;
        self.transactions.extend(other.transactions);
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// Submits flushed snapshots and immediate writes
pub struct BatchWriter {
    chain: Arc<dyn ChainClient>,
    registry: Arc<PublisherRegistry>,
    serializers: Arc<SerializerPool>,
    signers: Arc<SignerSet>,
    cache: Arc<RecordCache>,
    events: EventSink,
}

impl BatchWriter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: Arc<PublisherRegistry>,
        serializers: Arc<SerializerPool>,
        signers: Arc<SignerSet>,
        cache: Arc<RecordCache>,
        events: EventSink,
    ) -> Self {
        Self {
            chain,
            registry,
            serializers,
            signers,
            cache,
            events,
        }
    }

    /// Group `entries` by publisher and submit each group
    pub async fn submit(&self, kind: WriteKind, entries: Vec<PendingWrite>) -> FlushReport {
        if entries.is_empty() {
            return FlushReport::default();
        }

        let total = entries.len();
        let mut groups: BTreeMap<PublisherAddress, Vec<PendingWrite>> = BTreeMap::new();
        for entry in entries {
            groups
                .entry(entry.request.publisher.clone())
                .or_default()
                .push(entry);
        }
        info!(kind = %kind, entries = total, groups = groups.len(), "Flushing batch");

        let submissions = groups
            .into_iter()
            .map(|(publisher, group)| self.submit_group(kind, publisher, group));
        let outcomes = join_all(submissions).await;

        let mut report = FlushReport {
            entries: total,
            groups: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(tx) => report.transactions.push(tx),
                Err(_) => report.failed_groups += 1,
            }
        }
        report
    }

    async fn submit_group(
        &self,
        kind: WriteKind,
        publisher: PublisherAddress,
        group: Vec<PendingWrite>,
    ) -> SyncResult<TxHandle> {
        let span = publisher_span(kind, &publisher);
        span.record(fields::ENTRIES, group.len());

        async move {
            let records = group.len();
            let result = match self.resolve_signer(&publisher, &group) {
                Ok(signer) => {
                    let items: Vec<DataItem> = group
                        .iter()
                        .map(|entry| {
                            DataItem::new(
                                entry.request.schema_id.clone(),
                                entry.request.record_id.clone(),
                                entry.request.payload.clone(),
                            )
                        })
                        .collect();
                    self.write_as(&signer, items).await
                }
                Err(e) => Err(e),
            };

            match &result {
                Ok(tx) => {
                    debug!(tx = %tx, records, "Group written");
                    self.events.publish(WriteEvent::Flushed {
                        kind: Some(kind),
                        publisher: publisher.clone(),
                        tx: tx.clone(),
                        records,
                    });
                }
                Err(e) => {
                    error!(error = %e, records, "Group write failed");
                    self.events.publish(WriteEvent::Failed {
                        kind: Some(kind),
                        publisher: publisher.clone(),
                        error: e.clone(),
                        records,
                    });
                }
            }

            for entry in group {
                entry.complete(result.clone());
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Write `items` in one transaction, bypassing accumulators
    pub async fn write_now(&self, signer: &SignerHandle, items: Vec<DataItem>) -> SyncResult<TxHandle> {
        let records = items.len();
        let result = self.write_as(signer, items).await;
        let event = match &result {
            Ok(tx) => WriteEvent::Flushed {
                kind: None,
                publisher: signer.address.clone(),
                tx: tx.clone(),
                records,
            },
            Err(e) => {
                error!(publisher = %signer.address, error = %e, records, "Immediate write failed");
                WriteEvent::Failed {
                    kind: None,
                    publisher: signer.address.clone(),
                    error: e.clone(),
                    records,
                }
            }
        };
        self.events.publish(event);
        result
    }

    /// One composite write through the signer's serializer
    ///
    /// On success the signer is registered as a publisher and every schema
    /// touched by the write is invalidated in the read cache.
    async fn write_as(&self, signer: &SignerHandle, items: Vec<DataItem>) -> SyncResult<TxHandle> {
        let schemas: BTreeSet<SchemaId> = items.iter().map(|item| item.schema_id.clone()).collect();

        let chain = Arc::clone(&self.chain);
        let task_signer = signer.clone();
        let tx = self
            .serializers
            .get(&signer.address)
            .enqueue(
                async move {
                    chain
                        .set(&task_signer, items)
                        .await
                        .map_err(SyncError::from)
                }
                .in_current_span(),
            )
            .await?;

        if let Err(e) = self.registry.add(&signer.address).await {
            warn!(publisher = %signer.address, error = %e, "Failed to persist publisher after write");
        }
        for schema in &schemas {
            self.cache.invalidate(schema);
        }
        Ok(tx)
    }

    /// Signer for a group
    ///
    /// An entry's own signer is preferred, then any known signer for the
    /// address. A group whose entries only name signers for other addresses
    /// fails with [`SyncError::SignerMismatch`].
    fn resolve_signer(
        &self,
        publisher: &PublisherAddress,
        group: &[PendingWrite],
    ) -> SyncResult<SignerHandle> {
        let mut explicit = group.iter().filter_map(|entry| entry.request.signer.as_ref());

        if let Some(signer) = explicit.clone().find(|signer| signer.signs_for(publisher)) {
            return Ok(signer.clone());
        }
        if let Some(signer) = self.signers.get(publisher) {
            return Ok(signer);
        }
        match explicit.next() {
            Some(other) => Err(SyncError::SignerMismatch {
                publisher: publisher.clone(),
                signer: other.address.clone(),
            }),
            None => Err(SyncError::MissingSigner {
                publisher: publisher.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("signers", &self.signers.len())
            .finish()
    }
}
