//! Multi-publisher fan-out reads
//!
//! The chain has no global index: records are only addressable per
//! (schema, publisher) pair. A read of a schema is therefore issued against
//! every publisher in the registry, in parallel, and the results merged.
//!
//! ## Merge rules
//!
//! - A publisher with no data contributes nothing; any other read failure
//!   is logged and that publisher contributes nothing (partial results).
//! - Records that fail to decode their identity are skipped with a warning.
//! - Versions of the same logical id are collapsed: a terminal version
//!   (e.g. `deleted = true`) beats a non-terminal one, otherwise the version
//!   observed later in traversal order wins. Publishers are traversed in
//!   address order, so the outcome does not depend on response timing.
//! - Authors named in records that the registry does not know yet are added
//!   to it, so the next read includes them.
//! - Publishers that served records, and every author observed, have their
//!   activity refreshed in one registry write, so age-based cleanup only
//!   evicts publishers nobody reads from.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use quire_core::{ChainClient, PublisherAddress, RawRecord, SchemaId};
use quire_logging::{fields, read_span};
use quire_storage::PublisherRegistry;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, warn};

use crate::cache::ReadCache;
use crate::decode::{Decoded, DecodedRecord, SchemaLayout};
use crate::error::SyncResult;

/// Cache of merged read outcomes, keyed by schema
pub type RecordCache = ReadCache<SchemaId, Arc<ReadOutcome>>;

/// Merged result of one fan-out read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOutcome {
    /// One winning version per logical id, in first-seen order
    pub records: Vec<DecodedRecord>,
    /// How many publishers were queried
    pub publishers_queried: usize,
    /// Publishers whose read failed for a reason other than "no data"
    pub failed_publishers: Vec<PublisherAddress>,
    /// Raw records dropped by decoding
    pub skipped: usize,
    /// Publishers added to the registry from authorship fields
    pub discovered: Vec<PublisherAddress>,
}

/// Reads one schema across every known publisher
pub struct MultiPublisherReader {
    chain: Arc<dyn ChainClient>,
    registry: Arc<PublisherRegistry>,
    /// Seeds an empty registry
    local: PublisherAddress,
}

impl MultiPublisherReader {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        registry: Arc<PublisherRegistry>,
        local: PublisherAddress,
    ) -> Self {
        Self {
            chain,
            registry,
            local,
        }
    }

    /// Fan out, decode, merge and discover
    pub async fn read_all(
        &self,
        schema_id: &SchemaId,
        layout: &SchemaLayout,
    ) -> SyncResult<ReadOutcome> {
        let span = read_span(schema_id.as_str());
        self.read_all_inner(schema_id, layout).instrument(span).await
    }

    async fn read_all_inner(
        &self,
        schema_id: &SchemaId,
        layout: &SchemaLayout,
    ) -> SyncResult<ReadOutcome> {
        if let Err(e) = self.registry.ensure_bootstrap(&self.local).await {
            // The address is registered in memory even if persisting failed.
            warn!(error = %e, "Failed to persist bootstrapped publisher");
        }

        let mut publishers = self.registry.all();
        publishers.sort();
        tracing::Span::current().record(fields::PUBLISHERS, publishers.len());

        let reads = publishers
            .iter()
            .map(|publisher| self.read_publisher(schema_id, publisher));
        let results = join_all(reads).await;

        let mut outcome = ReadOutcome {
            publishers_queried: publishers.len(),
            ..Default::default()
        };
        let mut order: Vec<String> = Vec::new();
        let mut winners: HashMap<String, DecodedRecord> = HashMap::new();
        let mut authors: BTreeSet<PublisherAddress> = BTreeSet::new();
        let mut serving: BTreeSet<PublisherAddress> = BTreeSet::new();

        for (publisher, result) in publishers.iter().zip(results) {
            let Some(raw_records) = result else {
                outcome.failed_publishers.push(publisher.clone());
                continue;
            };
            if !raw_records.is_empty() {
                serving.insert(publisher.clone());
            }

            for raw in &raw_records {
                let record = match layout.decode(raw, publisher) {
                    Decoded::Record(record) => record,
                    Decoded::Skip(reason) => {
                        warn!(publisher = %publisher, schema = %schema_id, reason = %reason, "Skipping undecodable record");
                        outcome.skipped += 1;
                        continue;
                    }
                };

                if let Some(author) = &record.author {
                    authors.insert(author.clone());
                }
                merge(&mut order, &mut winners, record);
            }
        }

        outcome.records = order
            .into_iter()
            .filter_map(|id| winners.remove(&id))
            .collect();

        let unknown: Vec<PublisherAddress> = authors
            .iter()
            .filter(|author| !self.registry.has(author))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            info!(count = unknown.len(), schema = %schema_id, "Discovered new publishers");
        }

        let active: BTreeSet<&PublisherAddress> = serving.iter().chain(authors.iter()).collect();
        if !active.is_empty() {
            if let Err(e) = self.registry.add_many(active).await {
                warn!(error = %e, "Failed to persist publisher activity");
            }
        }
        outcome.discovered = unknown;

        debug!(
            schema = %schema_id,
            publishers = outcome.publishers_queried,
            records = outcome.records.len(),
            skipped = outcome.skipped,
            failed = outcome.failed_publishers.len(),
            "Fan-out read complete"
        );
        Ok(outcome)
    }

    /// `None` when the read failed for a reason other than "no data"
    async fn read_publisher(
        &self,
        schema_id: &SchemaId,
        publisher: &PublisherAddress,
    ) -> Option<Vec<RawRecord>> {
        match self
            .chain
            .get_all_publisher_data_for_schema(schema_id, publisher)
            .await
        {
            Ok(records) => Some(records),
            Err(e) if e.is_no_data() => {
                debug!(publisher = %publisher, schema = %schema_id, "No data for publisher");
                Some(Vec::new())
            }
            Err(e) if e.is_timeout() => {
                warn!(publisher = %publisher, schema = %schema_id, error = %e, "Publisher read timed out");
                None
            }
            Err(e) => {
                warn!(publisher = %publisher, schema = %schema_id, error = %e, "Publisher read failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for MultiPublisherReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiPublisherReader")
            .field("local", &self.local)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Keep one version per logical id
///
/// The position of an id is fixed by its first sighting. A later version
/// replaces the current one unless that would un-delete the record.
fn merge(order: &mut Vec<String>, winners: &mut HashMap<String, DecodedRecord>, record: DecodedRecord) {
    match winners.get_mut(&record.id) {
        Some(current) => {
            if !(current.terminal && !record.terminal) {
                *current = record;
            }
        }
        None => {
            order.push(record.id.clone());
            winners.insert(record.id.clone(), record);
        }
    }
}
