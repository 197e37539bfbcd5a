//! The sync layer facade
//!
//! [`SyncLayer`] is constructed once per process with an injected chain
//! client, durable store and local signer, and owns every other component:
//!
//! ```text
//! enqueue_write ─► WriteRouter ─► BatchAccumulator ─► BatchWriter ─► TransactionSerializer ─► ChainClient::set
//! read_all ─► ReadCache ─► MultiPublisherReader ─► ChainClient::get_all_publisher_data_for_schema
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use quire_core::{
    ChainClient, DataItem, DurableStore, RecordId, SchemaDescriptor, SchemaId, SignerHandle,
    TxHandle, WriteKind,
};
use quire_storage::PublisherRegistry;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::accumulator::BatchStatus;
use crate::cache::ReadCache;
use crate::config::SyncConfig;
use crate::decode::{DecodedRecord, SchemaLayout};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventSink, WriteEvent};
use crate::page::{Page, ReadOptions};
use crate::reader::{MultiPublisherReader, ReadOutcome, RecordCache};
use crate::request::{WriteRequest, WriteTicket};
use crate::router::WriteRouter;
use crate::schemas::SchemaCatalog;
use crate::serializer::{SerializerPool, SerializerStats};
use crate::writer::{BatchWriter, FlushReport, SignerSet};

/// Batched writes and fan-out reads across many publishers
pub struct SyncLayer {
    config: SyncConfig,
    local: SignerHandle,
    registry: Arc<PublisherRegistry>,
    signers: Arc<SignerSet>,
    serializers: Arc<SerializerPool>,
    cache: Arc<RecordCache>,
    schemas: SchemaCatalog,
    reader: Arc<MultiPublisherReader>,
    writer: Arc<BatchWriter>,
    router: WriteRouter,
    events: EventSink,
    shutting_down: AtomicBool,
}

impl SyncLayer {
    /// Build the layer and rehydrate the publisher registry
    ///
    /// If `registry_max_age` is configured, stale publishers are dropped
    /// before the first read.
    pub async fn new(
        config: SyncConfig,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn DurableStore>,
        local: SignerHandle,
    ) -> SyncResult<Self> {
        config
            .validate()
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        let registry = Arc::new(PublisherRegistry::load(store, config.registry_key.clone()).await?);
        if let Some(max_age) = config.registry_max_age() {
            let removed = registry.cleanup(max_age).await?;
            if removed > 0 {
                info!(removed, "Dropped stale publishers at startup");
            }
        }

        let signers = Arc::new(SignerSet::new());
        signers.insert(local.clone());

        let serializers = Arc::new(SerializerPool::new(config.cool_down()));
        let cache: Arc<RecordCache> = Arc::new(ReadCache::new(config.cache_ttl()));
        let events = EventSink::new(config.event_channel_capacity);

        let writer = Arc::new(BatchWriter::new(
            Arc::clone(&chain),
            Arc::clone(&registry),
            Arc::clone(&serializers),
            Arc::clone(&signers),
            Arc::clone(&cache),
            events.clone(),
        ));
        let router = WriteRouter::new(
            &config.accumulators,
            config.unified_routing,
            Arc::clone(&writer),
        );
        let reader = Arc::new(MultiPublisherReader::new(
            Arc::clone(&chain),
            Arc::clone(&registry),
            local.address.clone(),
        ));

        info!(
            local = %local.address,
            publishers = registry.len(),
            "Sync layer ready"
        );

        Ok(Self {
            schemas: SchemaCatalog::new(chain),
            config,
            local,
            registry,
            signers,
            serializers,
            cache,
            reader,
            writer,
            router,
            events,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The signer used when a write names none
    pub fn local_signer(&self) -> &SignerHandle {
        &self.local
    }

    /// Make another signing identity available to write groups
    pub fn add_signer(&self, signer: SignerHandle) {
        self.signers.insert(signer);
    }

    pub fn registry(&self) -> &Arc<PublisherRegistry> {
        &self.registry
    }

    /// Compute (once) the id of a schema
    pub async fn schema_id(&self, descriptor: &SchemaDescriptor) -> SyncResult<SchemaId> {
        self.schemas.schema_id(descriptor).await
    }

    /// Compute the id of a schema and bind the layout used to decode it
    pub async fn register_schema(
        &self,
        descriptor: &SchemaDescriptor,
        layout: Option<SchemaLayout>,
    ) -> SyncResult<SchemaId> {
        self.schemas.register(descriptor, layout).await
    }

    /// Queue a write for the signer's own storage
    ///
    /// Without an explicit signer the local signer writes. The returned
    /// ticket resolves when the batch carrying the entry settles; the write
    /// goes ahead whether or not it is awaited.
    pub fn enqueue_write(
        &self,
        kind: WriteKind,
        schema_id: SchemaId,
        record_id: RecordId,
        payload: impl Into<Bytes>,
        metadata: serde_json::Value,
        signer: Option<SignerHandle>,
    ) -> WriteTicket {
        let signer = signer.unwrap_or_else(|| self.local.clone());
        let request = WriteRequest::new(kind, schema_id, record_id, payload, signer.address.clone())
            .with_metadata(metadata)
            .with_signer(signer);
        self.enqueue(request)
    }

    /// Queue a fully specified request
    ///
    /// The target publisher may differ from every known signer; the group
    /// then fails with [`SyncError::MissingSigner`] at flush time.
    pub fn enqueue(&self, request: WriteRequest) -> WriteTicket {
        if self.shutting_down.load(Ordering::SeqCst) {
            return WriteTicket::ready(Err(SyncError::ShuttingDown));
        }
        self.router.route(request)
    }

    /// Submit `items` as one transaction now, bypassing the accumulators
    pub async fn write_now(&self, signer: &SignerHandle, items: Vec<DataItem>) -> SyncResult<TxHandle> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        self.writer.write_now(signer, items).await
    }

    /// Flush one accumulator, or every accumulator
    pub async fn force_flush(&self, kind: Option<WriteKind>) -> FlushReport {
        self.router.force_flush(kind).await
    }

    /// Every record of a schema across all known publishers
    ///
    /// Served from the cache while fresh; concurrent reads of the same
    /// schema share one fan-out.
    pub async fn read_all(
        &self,
        schema_id: &SchemaId,
        options: ReadOptions,
    ) -> SyncResult<Page<DecodedRecord>> {
        let outcome = self.read_outcome(schema_id, options.force_refresh).await?;
        Ok(Page::slice(&outcome.records, &options))
    }

    /// Full merged read result, including discovery and failure details
    pub async fn read_outcome(
        &self,
        schema_id: &SchemaId,
        force_refresh: bool,
    ) -> SyncResult<Arc<ReadOutcome>> {
        let layout = self.schemas.layout(schema_id)?;
        let reader = Arc::clone(&self.reader);
        let schema = schema_id.clone();

        self.cache
            .get_or_fetch(schema_id.clone(), force_refresh, move || async move {
                reader.read_all(&schema, &layout).await.map(Arc::new)
            })
            .await
    }

    /// Drop cached reads for one schema, or all of them
    pub fn invalidate_cache(&self, schema_id: Option<&SchemaId>) {
        match schema_id {
            Some(schema_id) => self.cache.invalidate(schema_id),
            None => self.cache.invalidate_all(),
        }
    }

    pub fn batch_status(&self, kind: WriteKind) -> BatchStatus {
        self.router.status(kind)
    }

    /// Per-signer serializer counters
    pub fn serializer_stats(&self) -> Vec<(quire_core::PublisherAddress, SerializerStats)> {
        self.serializers.stats()
    }

    /// Reject every write waiting in a signer queue
    ///
    /// Writes already submitted to the chain complete on their own. Returns
    /// how many queued writes were rejected.
    pub fn clear_write_queues(&self) -> usize {
        let rejected = self.serializers.clear_all();
        if rejected > 0 {
            warn!(rejected, "Cleared pending transaction queues");
        }
        rejected
    }

    /// Subscribe to write outcome events
    pub fn subscribe(&self) -> broadcast::Receiver<WriteEvent> {
        self.events.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop accepting writes, flush everything pending and persist the registry
    pub async fn shutdown(&self) -> SyncResult<FlushReport> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(FlushReport::default());
        }
        info!(pending = self.router.pending_len(), "Sync layer shutting down");

        let report = self.router.force_flush(None).await;
        if report.failed_groups > 0 {
            warn!(failed_groups = report.failed_groups, "Some groups failed during shutdown flush");
        }
        self.registry.persist().await?;

        info!(
            entries = report.entries,
            transactions = report.transactions.len(),
            "Sync layer stopped"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for SyncLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLayer")
            .field("local", &self.local.address)
            .field("registry", &self.registry)
            .field("schemas", &self.schemas)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{MockChainClient, PublisherAddress};
    use quire_storage::InMemoryStore;

    fn local() -> SignerHandle {
        SignerHandle::new(PublisherAddress::from_bytes([0xaa; 20]), "local")
    }

    async fn layer(config: SyncConfig) -> (Arc<MockChainClient>, SyncLayer) {
        let chain = Arc::new(MockChainClient::new());
        let layer = SyncLayer::new(config, chain.clone(), Arc::new(InMemoryStore::new()), local())
            .await
            .unwrap();
        (chain, layer)
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = SyncConfig::default().with_event_channel_capacity(0);
        let result = SyncLayer::new(
            config,
            Arc::new(MockChainClient::new()),
            Arc::new(InMemoryStore::new()),
            local(),
        )
        .await;
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_read_of_unregistered_schema_fails() {
        let (_chain, layer) = layer(SyncConfig::default()).await;
        let result = layer.read_all(&SchemaId::new("0x99"), ReadOptions::new()).await;
        assert!(matches!(result, Err(SyncError::UnknownSchema(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_refuses_new_writes() {
        let (chain, layer) = layer(SyncConfig::default()).await;
        let schema = layer
            .register_schema(&SchemaDescriptor::new("uint64 id, bool liked"), None)
            .await
            .unwrap();

        let ticket = layer.enqueue_write(
            WriteKind::Like,
            schema.clone(),
            RecordId::new("1"),
            vec![1],
            serde_json::Value::Null,
            None,
        );

        let report = layer.shutdown().await.unwrap();
        assert_eq!(report.entries, 1);
        ticket.await.unwrap();
        assert_eq!(chain.set_calls().len(), 1);
        assert!(layer.is_shutting_down());

        let refused = layer.enqueue_write(
            WriteKind::Like,
            schema,
            RecordId::new("2"),
            vec![2],
            serde_json::Value::Null,
            None,
        );
        assert_eq!(refused.await, Err(SyncError::ShuttingDown));
        assert_eq!(layer.shutdown().await.unwrap(), FlushReport::default());
    }

    #[tokio::test]
    async fn test_registry_cleanup_at_startup() {
        let store: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
        {
            let registry = PublisherRegistry::load(Arc::clone(&store), "quire.publishers")
                .await
                .unwrap();
            let old = chrono::Utc::now() - chrono::Duration::days(30);
            registry
                .add_at(&PublisherAddress::from_bytes([0x01; 20]), old)
                .await
                .unwrap();
            registry
                .add(&PublisherAddress::from_bytes([0x02; 20]))
                .await
                .unwrap();
        }

        let config = SyncConfig::default()
            .with_registry_max_age(std::time::Duration::from_secs(7 * 24 * 3600));
        let layer = SyncLayer::new(config, Arc::new(MockChainClient::new()), store, local())
            .await
            .unwrap();
        assert_eq!(layer.registry().all(), vec![PublisherAddress::from_bytes([0x02; 20])]);
    }
}
