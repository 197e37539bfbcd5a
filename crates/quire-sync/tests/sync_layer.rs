//! End-to-end tests driving `SyncLayer` against the mock chain client

use std::sync::Arc;
use std::time::Duration;

use quire_core::{
    ChainError, DataItem, MockChainClient, PublisherAddress, RawField, RawRecord, RecordId,
    SchemaDescriptor, SchemaId, SignerHandle, WriteKind,
};
use quire_storage::{FileStore, InMemoryStore};
use quire_sync::{
    AccumulatorConfig, ReadOptions, SyncConfig, SyncError, SyncLayer, WriteEvent, WriteRequest,
};
use serde_json::json;
use tempfile::TempDir;

const POSTS: &str = "uint64 id, address author, string body, bool deleted";

fn addr(byte: u8) -> PublisherAddress {
    PublisherAddress::from_bytes([byte; 20])
}

fn local() -> SignerHandle {
    SignerHandle::new(addr(0xaa), "local")
}

fn post(id: u64, author: &PublisherAddress, body: &str, deleted: bool) -> RawRecord {
    RawRecord::new(vec![
        RawField::new("id", "uint64", json!({"value": id})),
        RawField::new("author", "address", json!(author.as_str())),
        RawField::new("body", "string", json!(body)),
        RawField::new("deleted", "bool", json!(deleted)),
    ])
}

async fn setup(config: SyncConfig) -> (Arc<MockChainClient>, SyncLayer) {
    let chain = Arc::new(MockChainClient::new());
    let layer = SyncLayer::new(config, chain.clone(), Arc::new(InMemoryStore::new()), local())
        .await
        .unwrap();
    (chain, layer)
}

async fn posts_schema(layer: &SyncLayer) -> SchemaId {
    layer
        .register_schema(&SchemaDescriptor::new(POSTS), None)
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_three_likes_flush_as_one_transaction() {
    let (chain, layer) = setup(SyncConfig::default()).await;
    let schema = posts_schema(&layer).await;
    let mut events = layer.subscribe();

    let tickets: Vec<_> = (1..=3)
        .map(|i| {
            layer.enqueue_write(
                WriteKind::Like,
                schema.clone(),
                RecordId::new(i.to_string()),
                vec![i as u8],
                json!({"target": format!("post-{i}")}),
                None,
            )
        })
        .collect();

    let status = layer.batch_status(WriteKind::Like);
    assert_eq!(status.pending, 3);
    assert_eq!(status.publishers, vec![addr(0xaa)]);
    assert_eq!(status.will_flush_in, Some(Duration::from_secs(2)));

    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let calls = chain.set_calls_for(&addr(0xaa));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].items.len(), 3);
    assert_eq!(layer.batch_status(WriteKind::Like).pending, 0);

    let results = futures::future::join_all(tickets).await;
    let tx = results[0].clone().unwrap();
    assert!(results.iter().all(|r| r.as_ref() == Ok(&tx)));

    match events.recv().await.unwrap() {
        WriteEvent::Flushed {
            kind,
            publisher,
            tx: event_tx,
            records,
        } => {
            assert_eq!(kind, Some(WriteKind::Like));
            assert_eq!(publisher, addr(0xaa));
            assert_eq!(event_tx, tx);
            assert_eq!(records, 3);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(layer.registry().has(&addr(0xaa)));
}

#[tokio::test(start_paused = true)]
async fn test_threshold_boundary() {
    let config = SyncConfig::default()
        .with_accumulator(WriteKind::Bookmark, AccumulatorConfig::new(4, 2_000));
    let (chain, layer) = setup(config).await;
    let schema = posts_schema(&layer).await;

    let enqueue = |i: u32| {
        layer.enqueue_write(
            WriteKind::Bookmark,
            schema.clone(),
            RecordId::new(i.to_string()),
            vec![0],
            json!(null),
            None,
        )
    };

    // THRESHOLD - 1 waits for the debounce
    let _early: Vec<_> = (0..3).map(enqueue).collect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(chain.set_calls().is_empty());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(chain.set_calls().len(), 1);

    // Exactly THRESHOLD flushes immediately
    let _late: Vec<_> = (10..14).map(enqueue).collect();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(chain.set_calls().len(), 2);
    assert_eq!(chain.set_calls()[1].items.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_same_signer_writes_never_overlap() {
    let config = SyncConfig::default().with_cool_down(Duration::from_millis(500));
    let (chain, layer) = setup(config).await;
    chain.set_write_latency(Duration::from_millis(300));
    let schema = posts_schema(&layer).await;
    let other = SignerHandle::new(addr(0xbb), "second");

    let item = |id: &str| vec![DataItem::new(schema.clone(), RecordId::new(id), vec![1])];

    let local_a1 = local();
    let local_a2 = local();
    let (a1, a2, b1) = tokio::join!(
        layer.write_now(&local_a1, item("a1")),
        layer.write_now(&local_a2, item("a2")),
        layer.write_now(&other, item("b1")),
    );
    a1.unwrap();
    a2.unwrap();
    b1.unwrap();

    assert_eq!(chain.max_in_flight_per_signer(), 1);
    // Different signers proceed concurrently
    assert_eq!(chain.max_in_flight_total(), 2);

    let calls = chain.set_calls_for(&addr(0xaa));
    assert_eq!(calls.len(), 2);
    assert!(calls[1].started_at >= calls[0].finished_at + Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_share_one_fan_out() {
    let (chain, layer) = setup(SyncConfig::default()).await;
    let schema = posts_schema(&layer).await;
    chain.set_read_latency(Duration::from_millis(200));
    chain.insert_records(&schema, &addr(0xaa), vec![post(1, &addr(0xaa), "hello", false)]);

    let (a, b) = tokio::join!(
        layer.read_all(&schema, ReadOptions::new()),
        layer.read_all(&schema, ReadOptions::new()),
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(chain.read_count(), 1);

    // Cached until the TTL elapses
    layer.read_all(&schema, ReadOptions::new()).await.unwrap();
    assert_eq!(chain.read_count(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    layer.read_all(&schema, ReadOptions::new()).await.unwrap();
    assert_eq!(chain.read_count(), 2);

    layer
        .read_all(&schema, ReadOptions::new().with_force_refresh(true))
        .await
        .unwrap();
    assert_eq!(chain.read_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_write_invalidates_cached_read() {
    let (chain, layer) = setup(SyncConfig::default()).await;
    let schema = posts_schema(&layer).await;

    let before = layer.read_all(&schema, ReadOptions::new()).await.unwrap();
    assert!(before.items.is_empty());
    assert_eq!(chain.read_count(), 1);

    chain.insert_records(&schema, &addr(0xaa), vec![post(7, &addr(0xaa), "new", false)]);
    layer
        .write_now(
            &local(),
            vec![DataItem::new(schema.clone(), RecordId::new("7"), vec![7])],
        )
        .await
        .unwrap();

    let after = layer.read_all(&schema, ReadOptions::new()).await.unwrap();
    assert_eq!(chain.read_count(), 2);
    assert_eq!(after.items.len(), 1);
    assert_eq!(after.items[0].id, "7");
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_and_discovery() {
    let (chain, layer) = setup(SyncConfig::default()).await;
    let schema = posts_schema(&layer).await;
    assert!(layer.registry().is_empty());

    // The local signer's storage holds a repost authored by someone else
    chain.insert_records(&schema, &addr(0xaa), vec![post(1, &addr(0xcc), "repost", false)]);
    chain.insert_records(&schema, &addr(0xcc), vec![post(2, &addr(0xcc), "original", false)]);

    let first = layer.read_outcome(&schema, false).await.unwrap();
    assert_eq!(chain.read_log(), vec![addr(0xaa)]);
    assert_eq!(first.discovered, vec![addr(0xcc)]);
    assert_eq!(first.records.len(), 1);
    assert!(layer.registry().has(&addr(0xcc)));

    let second = layer.read_all(&schema, ReadOptions::new().with_force_refresh(true))
        .await
        .unwrap();
    assert_eq!(second.total, 2);
    assert!(chain.read_log().ends_with(&[addr(0xaa), addr(0xcc)]));
}

#[tokio::test(start_paused = true)]
async fn test_deleted_version_wins_merge() {
    let (chain, layer) = setup(SyncConfig::default()).await;
    let schema = posts_schema(&layer).await;
    layer
        .registry()
        .add_many(&[addr(0x01), addr(0x02)])
        .await
        .unwrap();

    chain.insert_records(&schema, &addr(0x01), vec![post(42, &addr(0x01), "x", false)]);
    chain.insert_records(&schema, &addr(0x02), vec![post(42, &addr(0x01), "x", true)]);
    chain.fail_reads_for(&addr(0xaa), ChainError::Transport("connection reset".into()));

    let outcome = layer.read_outcome(&schema, false).await.unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].id, "42");
    assert_eq!(outcome.records[0].bool("deleted"), Some(true));
    assert!(outcome.failed_publishers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_results_when_a_publisher_fails() {
    let (chain, layer) = setup(SyncConfig::default()).await;
    let schema = posts_schema(&layer).await;
    layer.registry().add_many(&[addr(0xaa), addr(0xbb)]).await.unwrap();

    chain.insert_records(&schema, &addr(0xaa), vec![post(1, &addr(0xaa), "ok", false)]);
    chain.fail_reads_for(&addr(0xbb), ChainError::Timeout("read".into()));

    let outcome = layer.read_outcome(&schema, false).await.unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.failed_publishers, vec![addr(0xbb)]);
}

#[tokio::test(start_paused = true)]
async fn test_pagination() {
    let (chain, layer) = setup(SyncConfig::default()).await;
    let schema = posts_schema(&layer).await;
    chain.insert_records(
        &schema,
        &addr(0xaa),
        (1..=5).map(|i| post(i, &addr(0xaa), "p", false)).collect(),
    );

    let page = layer
        .read_all(&schema, ReadOptions::new().with_page(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(
        page.items.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        vec!["3", "4"]
    );
    assert!(page.has_more);
    assert_eq!(chain.read_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_for_unknown_publisher_needs_a_signer() {
    let (chain, layer) = setup(SyncConfig::default()).await;
    let schema = posts_schema(&layer).await;

    let request = WriteRequest::new(WriteKind::Generic, schema.clone(), RecordId::new("1"), vec![1], addr(0xdd));
    let orphan = layer.enqueue(request.clone());
    layer.force_flush(Some(WriteKind::Generic)).await;
    assert_eq!(
        orphan.await,
        Err(SyncError::MissingSigner {
            publisher: addr(0xdd)
        })
    );
    assert!(chain.set_calls().is_empty());

    layer.add_signer(SignerHandle::new(addr(0xdd), "delegate"));
    let adopted = layer.enqueue(request);
    layer.force_flush(None).await;
    adopted.await.unwrap();
    assert_eq!(chain.set_calls_for(&addr(0xdd)).len(), 1);
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let chain = Arc::new(MockChainClient::new());
    let config = SyncConfig::default().with_cool_down(Duration::from_millis(1));

    {
        let store = Arc::new(FileStore::new(temp_dir.path()).await.unwrap());
        let layer = SyncLayer::new(config.clone(), chain.clone(), store, local())
            .await
            .unwrap();
        let schema = posts_schema(&layer).await;
        let ticket = layer.enqueue_write(
            WriteKind::Repost,
            schema,
            RecordId::new("1"),
            vec![1],
            json!({}),
            Some(SignerHandle::new(addr(0xbb), "second")),
        );
        let report = layer.shutdown().await.unwrap();
        assert_eq!(report.transactions.len(), 1);
        ticket.await.unwrap();
    }

    let store = Arc::new(FileStore::new(temp_dir.path()).await.unwrap());
    let layer = SyncLayer::new(config, chain, store, local()).await.unwrap();
    assert!(layer.registry().has(&addr(0xbb)));
    assert_eq!(layer.registry().len(), 1);
}
