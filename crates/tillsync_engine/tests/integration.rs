//! End-to-end tests for sync runs between two stores.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tillsync_engine::{
    CancelToken, ConnectivityProbe, FileHistory, RetryPolicy, RunState, SyncConfiguration,
    SyncHistoryStore, SyncOrchestrator, SyncScope,
};
use tillsync_protocol::{
    ConflictResolution, ConflictResolutionStrategy, ConflictType, DataSource, SyncDirection,
    SyncErrorType, SyncGuid, SyncableRecord,
};
use tillsync_store::{
    load_all, save_record, EntityStore, FileStore, MemoryStore, RecordQuery, StoreResult,
    StoredRecord,
};
use tillsync_testkit::prelude::*;

fn orchestrator(stores: &StorePair, config: SyncConfiguration) -> SyncOrchestrator {
    SyncOrchestrator::builder(config, stores.client.clone(), stores.server.clone())
        .with_retry_policy(RetryPolicy::no_retry())
        .register::<Customer>(SyncScope::Both)
        .register::<Product>(SyncScope::Both)
        .register::<Invoice>(SyncScope::Both)
        .register::<InvoiceLine>(SyncScope::Both)
        .register::<ReceiptScan>(SyncScope::UploadOnly)
        .build()
        .unwrap()
}

/// A product at `version` that both sides agree on.
fn synced_product(stores: &StorePair, version: u64) -> Product {
    let mut product = Product::new("SKU-RICE", "Rice 1kg", 1200, 20);
    while product.sync.version < version {
        product = edited(&product, |p| p.stock += 1);
    }
    stores.seed_synced(&product)
}

fn put_on_server<T: SyncableRecord>(stores: &StorePair, record: &T) {
    let mut copy = record.clone();
    copy.sync_meta_mut().data_source = DataSource::Server;
    stores.server.put(&copy).unwrap();
}

struct SlowProbe(Duration);

#[async_trait]
impl ConnectivityProbe for SlowProbe {
    async fn check(&self, _cancel: &CancelToken) -> bool {
        tokio::time::sleep(self.0).await;
        true
    }
}

/// Reports the server reachable, then cancels the run it was asked about.
struct CancellingProbe(CancelToken);

#[async_trait]
impl ConnectivityProbe for CancellingProbe {
    async fn check(&self, _cancel: &CancelToken) -> bool {
        self.0.cancel();
        true
    }
}

/// A store whose queries take longer than a run is allowed to.
struct SlowStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait]
impl EntityStore for SlowStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }

    async fn find_by_guid(
        &self,
        entity_type: &str,
        guid: SyncGuid,
    ) -> StoreResult<Option<StoredRecord>> {
        self.inner.find_by_guid(entity_type, guid).await
    }

    async fn insert(&self, entity_type: &str, record: StoredRecord) -> StoreResult<StoredRecord> {
        self.inner.insert(entity_type, record).await
    }

    async fn apply_values(
        &self,
        entity_type: &str,
        existing: &StoredRecord,
        incoming: StoredRecord,
    ) -> StoreResult<StoredRecord> {
        self.inner.apply_values(entity_type, existing, incoming).await
    }

    async fn query(&self, entity_type: &str, query: &RecordQuery) -> StoreResult<Vec<StoredRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.query(entity_type, query).await
    }

    async fn count(&self, entity_type: &str, query: &RecordQuery) -> StoreResult<u64> {
        self.inner.count(entity_type, query).await
    }

    async fn persist(&self) -> StoreResult<usize> {
        self.inner.persist().await
    }
}

#[tokio::test]
async fn new_invoice_is_inserted_on_server() {
    let stores = StorePair::new();
    let invoice = Invoice::new("INV-1001", None, 4500);
    stores.client.put(&invoice).unwrap();
    let orchestrator = orchestrator(&stores, SyncConfiguration::new());

    let result = orchestrator.sync_to_server(&CancelToken::new()).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.statistics.inserted, 1);

    let guid = invoice.sync_guid();
    let server_copy: Invoice = stores.server_copy(guid).unwrap();
    assert_eq!(server_copy.number, "INV-1001");
    assert!(stores.server.get_raw("Invoice", guid).unwrap().local_id >= SERVER_FIRST_LOCAL_ID);

    let client_copy: Invoice = stores.client_copy(guid).unwrap();
    assert!(!client_copy.sync.is_pending_sync);
}

#[tokio::test]
async fn identical_copies_are_left_alone_under_every_strategy() {
    for strategy in [
        ConflictResolutionStrategy::ServerWins,
        ConflictResolutionStrategy::ClientWins,
        ConflictResolutionStrategy::LastWriteWins,
        ConflictResolutionStrategy::HighestVersionWins,
        ConflictResolutionStrategy::ManualResolution,
    ] {
        let stores = StorePair::new();
        let product = synced_product(&stores, 3);
        assert_eq!(product.sync.version, 3);

        let config = SyncConfiguration::new().with_conflict_resolution(strategy);
        let result = orchestrator(&stores, config)
            .sync_bidirectional(&CancelToken::new())
            .await;
        assert!(result.success, "{strategy}: {}", result.message);
        assert_eq!(result.statistics.updated, 0, "{strategy}");
        assert_eq!(result.statistics.records_synced(), 0, "{strategy}");
        assert!(result.conflicts.is_empty(), "{strategy}");
    }
}

#[tokio::test]
async fn client_ahead_wins_under_highest_version() {
    let stores = StorePair::new();
    let base = synced_product(&stores, 3);

    let client_edit = edited(&edited(&base, |p| p.price_cents = 1300), |p| p.stock = 7);
    stores.client.put(&client_edit).unwrap();
    let server_edit = edited(&base, |p| p.name = "Rice 1 kg".into());
    put_on_server(&stores, &server_edit);
    assert_eq!((client_edit.sync.version, server_edit.sync.version), (5, 4));

    let config = SyncConfiguration::new()
        .with_conflict_resolution(ConflictResolutionStrategy::HighestVersionWins);
    let result = orchestrator(&stores, config)
        .sync_bidirectional(&CancelToken::new())
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.statistics.updated, 1);
    assert_eq!(result.statistics.conflicts_resolved, 1);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].resolution, ConflictResolution::UseLocal);

    let guid = base.sync_guid();
    let server_copy: Product = stores.server_copy(guid).unwrap();
    let client_copy: Product = stores.client_copy(guid).unwrap();
    assert_eq!(server_copy.price_cents, 1300);
    assert_eq!(server_copy.name, "Rice 1kg");
    assert_eq!(server_copy.sync.version, 5);
    assert!(client_copy.sync.same_state(&server_copy.sync));
}

#[tokio::test]
async fn manual_conflict_waits_for_a_decision() {
    let stores = StorePair::new();
    let base = synced_product(&stores, 2);
    let client_edit = edited(&base, |p| p.price_cents = 999);
    stores.client.put(&client_edit).unwrap();
    let server_edit = edited(&base, |p| p.stock = 0);
    put_on_server(&stores, &server_edit);

    let config = SyncConfiguration::new()
        .with_conflict_resolution(ConflictResolutionStrategy::ManualResolution);
    let orchestrator = orchestrator(&stores, config);
    let result = orchestrator.sync_bidirectional(&CancelToken::new()).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].resolution, ConflictResolution::ManualRequired);
    assert_eq!(result.conflicts[0].conflict_type, ConflictType::BothModified);

    let guid = base.sync_guid();
    assert_eq!(stores.client_copy::<Product>(guid).unwrap(), client_edit);
    assert_eq!(stores.server_copy::<Product>(guid).unwrap().stock, 0);

    let queued = orchestrator.pending_conflicts();
    assert_eq!(queued.len(), 1);
    let info = orchestrator.pending_changes_info().await.unwrap();
    assert_eq!(info.unresolved_conflicts, 1);

    orchestrator
        .resolve_conflict(queued[0].id, ConflictResolution::UseLocal)
        .await
        .unwrap();
    let server_copy: Product = stores.server_copy(guid).unwrap();
    let client_copy: Product = stores.client_copy(guid).unwrap();
    assert_eq!(server_copy.price_cents, 999);
    assert_eq!(server_copy.stock, client_edit.stock);
    assert!(client_copy.sync.same_state(&server_copy.sync));
    assert!(orchestrator.pending_conflicts().is_empty());

    let again = orchestrator.sync_bidirectional(&CancelToken::new()).await;
    assert!(again.conflicts.is_empty());
    assert_eq!(again.statistics.records_synced(), 0);
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let stores = StorePair::new();
    let sale = SaleFixture::record(&stores, 3);
    let orchestrator = orchestrator(&stores, SyncConfiguration::new().with_batch_size(2));

    let first = orchestrator.sync_bidirectional(&CancelToken::new()).await;
    assert!(first.success, "{}", first.message);
    assert_eq!(first.statistics.inserted as usize, sale.record_count());
    assert!(!orchestrator.has_pending_changes().await.unwrap());

    let second = orchestrator.sync_bidirectional(&CancelToken::new()).await;
    assert!(second.success);
    assert_eq!(second.statistics.records_synced(), 0);
    assert_eq!(second.statistics.failed, 0);
    assert!(second.conflicts.is_empty());
    assert_eq!(stores.server.len(), sale.record_count());
    assert_eq!(stores.client.len(), sale.record_count());
}

#[tokio::test]
async fn records_are_matched_by_guid() {
    let stores = StorePair::new();
    stores.client.put(&Product::new("SKU-A", "Padding", 100, 1)).unwrap();
    let product = synced_product(&stores, 1);
    let guid = product.sync_guid();
    let client_id = stores.client.get_raw("Product", guid).unwrap().local_id;
    let server_id = stores.server.get_raw("Product", guid).unwrap().local_id;
    assert_ne!(client_id, server_id);

    let repriced = edited(&product, |p| p.price_cents = 1450);
    put_on_server(&stores, &repriced);

    let result = orchestrator(&stores, SyncConfiguration::new())
        .sync_to_client(&CancelToken::new())
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.statistics.updated, 1);

    let client_copy: Product = stores.client_copy(guid).unwrap();
    assert_eq!(client_copy.price_cents, 1450);
    assert_eq!(client_copy.sync.data_source, DataSource::Server);
    assert_eq!(stores.client.get_raw("Product", guid).unwrap().local_id, client_id);
    assert_eq!(stores.client.len(), 2);
}

#[tokio::test]
async fn concurrent_run_is_rejected() {
    let stores = StorePair::new();
    SaleFixture::record(&stores, 1);
    let orchestrator = SyncOrchestrator::builder(
        SyncConfiguration::new(),
        stores.client.clone(),
        stores.server.clone(),
    )
    .with_probe(Arc::new(SlowProbe(Duration::from_millis(200))))
    .register::<Customer>(SyncScope::Both)
    .register::<Product>(SyncScope::Both)
    .register::<Invoice>(SyncScope::Both)
    .register::<InvoiceLine>(SyncScope::Both)
    .build()
    .unwrap();

    let cancel = CancelToken::new();
    let (first, second) = tokio::join!(orchestrator.sync_to_server(&cancel), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(orchestrator.state(), RunState::Running);
        orchestrator.sync_to_server(&cancel).await
    });

    assert!(first.success, "{}", first.message);
    assert!(!second.success);
    assert_eq!(second.message, "sync already in progress");
    assert_eq!(second.statistics.total_processed, 0);
    assert_eq!(orchestrator.sync_history(10).await.unwrap().len(), 1);
    assert_eq!(orchestrator.state(), RunState::Succeeded);
}

#[tokio::test]
async fn failing_entity_type_does_not_stop_the_run() {
    let stores = StorePair::new();
    let sale = SaleFixture::record(&stores, 2);
    stores.client.fail_next_queries(1);
    let orchestrator = orchestrator(&stores, SyncConfiguration::new());

    let result = orchestrator.sync_to_server(&CancelToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].entity_type.as_deref(), Some("Customer"));
    assert_eq!(result.errors[0].error_type, SyncErrorType::NetworkError);
    assert!(result.errors[0].retryable);
    assert_eq!(result.statistics.inserted as usize, sale.record_count() - 1);
    assert!(stores.server_copy::<Customer>(sale.customer.sync_guid()).is_none());

    let retry = orchestrator.sync_to_server(&CancelToken::new()).await;
    assert!(retry.success, "{}", retry.message);
    assert_eq!(retry.statistics.inserted, 1);
}

#[tokio::test]
async fn one_failing_record_is_isolated() {
    let stores = StorePair::new();
    let sale = SaleFixture::record(&stores, 3);
    let bad = sale.lines[1].sync_guid();
    stores.server.fail_writes_for(bad);
    let orchestrator = orchestrator(&stores, SyncConfiguration::new());

    let result = orchestrator.sync_to_server(&CancelToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.statistics.inserted as usize, sale.record_count() - 1);
    assert_eq!(result.statistics.failed, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_type, SyncErrorType::DatabaseError);
    assert_eq!(result.errors[0].entity_id, Some(bad));
    assert!(stores.client_copy::<InvoiceLine>(bad).unwrap().sync.is_pending_sync);

    stores.server.clear_write_failure(bad);
    let retry = orchestrator.sync_to_server(&CancelToken::new()).await;
    assert!(retry.success, "{}", retry.message);
    assert_eq!(retry.statistics.inserted, 1);
}

#[tokio::test]
async fn cancelled_run_reports_partial_result() {
    let stores = StorePair::new();
    SaleFixture::record(&stores, 1);
    let cancel = CancelToken::new();
    let orchestrator = SyncOrchestrator::builder(
        SyncConfiguration::new(),
        stores.client.clone(),
        stores.server.clone(),
    )
    .with_probe(Arc::new(CancellingProbe(cancel.clone())))
    .register::<Customer>(SyncScope::Both)
    .build()
    .unwrap();

    let result = orchestrator.sync_bidirectional(&cancel).await;
    assert!(!result.success);
    assert!(result.is_complete());
    assert_eq!(result.errors[0].error_type, SyncErrorType::Cancelled);
    assert!(stores.server.is_empty());
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert_eq!(orchestrator.sync_history(5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancel_before_start_is_reported() {
    let stores = StorePair::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = orchestrator(&stores, SyncConfiguration::new())
        .sync_to_server(&cancel)
        .await;
    assert!(!result.success);
    assert_eq!(result.errors[0].error_type, SyncErrorType::Cancelled);
}

#[tokio::test]
async fn slow_run_times_out() {
    let stores = StorePair::new();
    SaleFixture::record(&stores, 1);
    let slow_client = Arc::new(SlowStore {
        inner: stores.client.clone(),
        delay: Duration::from_millis(1500),
    });
    let orchestrator = SyncOrchestrator::builder(
        SyncConfiguration::new().with_timeout_seconds(1),
        slow_client,
        stores.server.clone(),
    )
    .register::<Customer>(SyncScope::Both)
    .build()
    .unwrap();

    let result = orchestrator.sync_to_server(&CancelToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_type, SyncErrorType::TimeoutError);
    assert!(result.errors[0].retryable);
}

#[tokio::test]
async fn unreachable_server_is_retried_then_reported() {
    let stores = StorePair::new();
    SaleFixture::record(&stores, 1);
    stores.server.set_available(false);
    let orchestrator = SyncOrchestrator::builder(
        SyncConfiguration::new(),
        stores.client.clone(),
        stores.server.clone(),
    )
    .with_retry_policy(
        RetryPolicy::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false),
    )
    .register::<Customer>(SyncScope::Both)
    .build()
    .unwrap();

    let result = orchestrator.sync_bidirectional(&CancelToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_type, SyncErrorType::NetworkError);
    assert_eq!(result.statistics.total_processed, 0);
    assert!(!orchestrator.test_server_connection(&CancelToken::new()).await);

    stores.server.set_available(true);
    assert!(orchestrator.test_server_connection(&CancelToken::new()).await);
}

#[tokio::test]
async fn history_is_recorded_and_pruned() {
    let stores = StorePair::new();
    SaleFixture::record(&stores, 1);
    let orchestrator = orchestrator(&stores, SyncConfiguration::new());

    orchestrator.sync_to_server(&CancelToken::new()).await;
    orchestrator.sync_to_client(&CancelToken::new()).await;

    let history = orchestrator.sync_history(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].started_at >= history[1].started_at);
    assert_eq!(history[1].records_synced, 4);
    assert_eq!(orchestrator.sync_history(1).await.unwrap().len(), 1);

    let info = orchestrator.pending_changes_info().await.unwrap();
    assert_eq!(info.total_pending, 0);
    assert_eq!(info.last_successful_sync, Some(history[0].started_at));

    assert_eq!(orchestrator.cleanup_old_sync_data(30).await.unwrap(), 0);
    assert_eq!(orchestrator.cleanup_old_sync_data(0).await.unwrap(), 2);
    assert!(orchestrator.sync_history(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn bidirectional_run_merges_both_directions() {
    let stores = StorePair::new();
    let invoice = Invoice::new("INV-2001", None, 1800);
    stores.client.put(&invoice).unwrap();
    let customer = stores.seed_server(&Customer::new("Amina"));
    let orchestrator = orchestrator(&stores, SyncConfiguration::new());

    let result = orchestrator.sync_bidirectional(&CancelToken::new()).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.direction, SyncDirection::Bidirectional);
    assert!(result.is_complete());
    assert_eq!(result.statistics.inserted, 2);
    assert_eq!(result.statistics.skipped, 1);
    assert_eq!(result.statistics.total_processed, 3);
    assert_eq!(result.statistics.processed_by_entity.get("Invoice"), Some(&2));
    assert_eq!(result.statistics.processed_by_entity.get("Customer"), Some(&1));
    assert!(stores.server_copy::<Invoice>(invoice.sync_guid()).is_some());
    assert!(stores.client_copy::<Customer>(customer.sync_guid()).is_some());

    let history = orchestrator.sync_history(1).await.unwrap();
    assert_eq!(history[0].direction, SyncDirection::Bidirectional);
    assert_eq!(history[0].records_synced, 2);
}

#[tokio::test]
async fn cleanup_accepts_any_retention() {
    let stores = StorePair::new();
    let orchestrator = orchestrator(&stores, SyncConfiguration::new());
    orchestrator.sync_to_server(&CancelToken::new()).await;

    assert_eq!(orchestrator.cleanup_old_sync_data(u32::MAX).await.unwrap(), 0);
    assert_eq!(orchestrator.sync_history(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn huge_trailing_window_syncs_everything() {
    let stores = StorePair::new();
    let invoice = Invoice::new("INV-3001", None, 100);
    stores.client.put(&invoice).unwrap();
    let config = SyncConfiguration::new().with_last_days_only(u32::MAX);

    let result = orchestrator(&stores, config)
        .sync_to_server(&CancelToken::new())
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.statistics.inserted, 1);
}

#[tokio::test]
async fn catalog_flows_down_only_when_scoped() {
    let stores = StorePair::new();
    let product = stores.seed_server(&Product::new("SKU-OIL", "Cooking oil", 5400, 12));
    let sale_only = SaleFixture::record(&StorePair::new(), 1);
    stores.client.put(&sale_only.invoice).unwrap();

    let orchestrator = SyncOrchestrator::builder(
        SyncConfiguration::new(),
        stores.client.clone(),
        stores.server.clone(),
    )
    .with_retry_policy(RetryPolicy::no_retry())
    .register::<Product>(SyncScope::DownloadOnly)
    .register::<Customer>(SyncScope::Both)
    .register::<Invoice>(SyncScope::UploadOnly)
    .build()
    .unwrap();
    assert_eq!(orchestrator.entity_types(), ["Product", "Customer", "Invoice"]);

    let down = orchestrator.sync_to_client(&CancelToken::new()).await;
    assert!(down.success, "{}", down.message);
    assert_eq!(down.statistics.inserted, 1);
    let client_copy: Product = stores.client_copy(product.sync_guid()).unwrap();
    assert_eq!(client_copy.sync.data_source, DataSource::Server);
    assert!(!client_copy.sync.is_pending_sync);
    assert!(stores.server_copy::<Invoice>(sale_only.invoice.sync_guid()).is_none());

    let up = orchestrator.sync_to_server(&CancelToken::new()).await;
    assert_eq!(up.statistics.inserted, 1);
    assert!(stores.server_copy::<Invoice>(sale_only.invoice.sync_guid()).is_some());
}

#[tokio::test]
async fn trailing_window_never_hides_pending_records() {
    let stores = StorePair::new();
    let long_ago = Utc::now() - ChronoDuration::days(10);

    let mut forgotten = Product::new("SKU-OLD", "Never uploaded", 100, 1);
    forgotten.sync.last_modified_utc = long_ago;
    stores.client.put(&forgotten).unwrap();

    let mut stale = Product::new("SKU-STALE", "Old catalog entry", 100, 1);
    stale.sync.last_modified_utc = long_ago;
    stale.sync.data_source = DataSource::Server;
    stale.sync.mark_synced(long_ago);
    stores.server.put(&stale).unwrap();

    let config = SyncConfiguration::new().with_last_days_only(1);
    let result = orchestrator(&stores, config)
        .sync_bidirectional(&CancelToken::new())
        .await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.statistics.inserted, 1);
    assert!(stores.server_copy::<Product>(forgotten.sync_guid()).is_some());
    assert!(stores.client_copy::<Product>(stale.sync_guid()).is_none());
}

#[tokio::test]
async fn attachments_follow_the_toggle() {
    let stores = StorePair::new();
    let sale = SaleFixture::record(&stores, 1);
    let scan = ReceiptScan::new(&sale.invoice, 64);
    stores.client.put(&scan).unwrap();

    let without = orchestrator(&stores, SyncConfiguration::new().with_attachments(false));
    assert!(!without.entity_types().contains(&"ReceiptScan"));
    without.sync_to_server(&CancelToken::new()).await;
    assert!(stores.server_copy::<ReceiptScan>(scan.sync_guid()).is_none());

    let with = orchestrator(&stores, SyncConfiguration::new());
    let result = with.sync_to_server(&CancelToken::new()).await;
    assert_eq!(result.statistics.inserted, 1);
    assert!(stores.server_copy::<ReceiptScan>(scan.sync_guid()).is_some());
}

#[tokio::test]
async fn compression_shrinks_transferred_bytes() {
    let mut transferred = Vec::new();
    for compress in [false, true] {
        let stores = StorePair::new();
        let invoice = Invoice::new("INV-9", None, 0);
        stores.client.put(&invoice).unwrap();
        stores.client.put(&ReceiptScan::new(&invoice, 20_000)).unwrap();

        let result = orchestrator(&stores, SyncConfiguration::new().with_compression(compress))
            .sync_to_server(&CancelToken::new())
            .await;
        assert!(result.success);
        transferred.push(result.statistics.bytes_transferred);
    }
    assert!(transferred[1] < transferred[0] / 10);
}

#[tokio::test]
async fn server_tombstone_reaches_client() {
    let stores = StorePair::new();
    let product = synced_product(&stores, 1);
    let mut gone = product.clone();
    gone.sync.mark_deleted(Utc::now());
    gone.refresh_hash();
    put_on_server(&stores, &gone);

    let result = orchestrator(&stores, SyncConfiguration::new())
        .sync_to_client(&CancelToken::new())
        .await;
    assert_eq!(result.statistics.deleted, 1);
    assert!(stores.client_copy::<Product>(product.sync_guid()).unwrap().sync.is_deleted);
}

#[tokio::test]
async fn conflicts_survive_a_restart_through_scanning() {
    let stores = StorePair::new();
    let base = synced_product(&stores, 1);
    stores
        .client
        .put(&edited(&base, |p| p.stock = 3))
        .unwrap();
    put_on_server(&stores, &edited(&base, |p| p.price_cents = 1500));
    let config = SyncConfiguration::new()
        .with_conflict_resolution(ConflictResolutionStrategy::ManualResolution);

    let first = orchestrator(&stores, config.clone())
        .sync_bidirectional(&CancelToken::new())
        .await;
    let conflict_id = first.conflicts[0].id;

    let restarted = orchestrator(&stores, config);
    assert!(restarted.pending_conflicts().is_empty());
    let found = restarted.scan_conflicts(&CancelToken::new()).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, conflict_id);

    restarted
        .resolve_conflict(conflict_id, ConflictResolution::Merge)
        .await
        .unwrap();
    let client_copy: Product = stores.client_copy(base.sync_guid()).unwrap();
    let server_copy: Product = stores.server_copy(base.sync_guid()).unwrap();
    assert_eq!((client_copy.stock, client_copy.price_cents), (3, 1500));
    assert_eq!(client_copy.sync.version, 3);
    assert!(client_copy.sync.same_state(&server_copy.sync));
    assert!(!client_copy.sync.is_pending_sync);
}

#[tokio::test]
async fn merge_is_refused_for_types_without_merge() {
    let stores = StorePair::new();
    let invoice = stores.seed_synced(&Invoice::new("INV-7", None, 100));
    stores
        .client
        .put(&edited(&invoice, |i| i.total_cents = 200))
        .unwrap();
    put_on_server(&stores, &edited(&invoice, |i| i.total_cents = 300));

    let orchestrator = orchestrator(
        &stores,
        SyncConfiguration::new()
            .with_conflict_resolution(ConflictResolutionStrategy::ManualResolution),
    );
    let result = orchestrator.sync_to_server(&CancelToken::new()).await;
    let id = result.conflicts[0].id;

    let outcome = orchestrator.resolve_conflict(id, ConflictResolution::Merge).await;
    assert!(outcome.is_err());
    assert_eq!(orchestrator.pending_conflicts().len(), 1);

    orchestrator
        .resolve_conflict(id, ConflictResolution::UseRemote)
        .await
        .unwrap();
    assert_eq!(stores.client_copy::<Invoice>(invoice.sync_guid()).unwrap().total_cents, 300);
}

#[tokio::test]
async fn file_backed_stores_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let client_path = dir.path().join("client.json");
    let server_path = dir.path().join("server.json");
    let history_path = dir.path().join("history.jsonl");

    let client = Arc::new(FileStore::open("client", &client_path).await.unwrap());
    let server = Arc::new(FileStore::open("server", &server_path).await.unwrap());
    let invoice = Invoice::new("INV-FILE", None, 1000);
    save_record(client.as_ref(), &invoice).await.unwrap();
    client.persist().await.unwrap();

    let orchestrator = SyncOrchestrator::builder(SyncConfiguration::new(), client, server)
        .with_history(Arc::new(FileHistory::new(&history_path)))
        .register::<Customer>(SyncScope::Both)
        .register::<Invoice>(SyncScope::Both)
        .build()
        .unwrap();
    let result = orchestrator.sync_bidirectional(&CancelToken::new()).await;
    assert!(result.success, "{}", result.message);
    drop(orchestrator);

    let reopened = FileStore::open("server", &server_path).await.unwrap();
    let invoices: Vec<Invoice> = load_all(&reopened).await.unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].number, "INV-FILE");

    let client = FileStore::open("client", &client_path).await.unwrap();
    let client_invoices: Vec<Invoice> = load_all(&client).await.unwrap();
    assert!(!client_invoices[0].sync.is_pending_sync);

    let history = FileHistory::new(&history_path);
    assert_eq!(history.recent(5).await.unwrap().len(), 1);
}
