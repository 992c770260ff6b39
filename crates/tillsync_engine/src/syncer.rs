//! Per-entity-type sync passes.

use crate::cancel::CancelToken;
use crate::config::{RetryPolicy, SyncConfiguration};
use crate::error::{EngineError, EngineResult};
use crate::retry::with_retry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::Arc;
use tillsync_protocol::{
    ConflictDecision, ConflictResolution, ConflictResolver, ConflictType, DataSource, Resolution,
    SyncConflict, SyncDirection, SyncError, SyncErrorType, SyncGuid, SyncMetadata, SyncResult, SyncableRecord,
};
use tillsync_store::{EntityStore, RecordQuery, StoreError, StoreResult, StoredRecord};

/// Which way a single pass moves records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassDirection {
    /// Client store to server store.
    Upload,
    /// Server store to client store.
    Download,
}

impl PassDirection {
    /// Report direction for this pass.
    pub fn as_sync_direction(&self) -> SyncDirection {
        match self {
            PassDirection::Upload => SyncDirection::ToServer,
            PassDirection::Download => SyncDirection::ToClient,
        }
    }

    /// Side whose records are read.
    pub fn source_side(&self) -> DataSource {
        match self {
            PassDirection::Upload => DataSource::Client,
            PassDirection::Download => DataSource::Server,
        }
    }

    fn source_wins(&self, resolution: Resolution) -> bool {
        matches!(
            (self, resolution),
            (PassDirection::Upload, Resolution::ApplyLocal)
                | (PassDirection::Download, Resolution::ApplyRemote)
        )
    }

    /// Orders a (source, destination) pair as (client, server).
    fn client_server<'a, X>(&self, source: &'a X, dest: &'a X) -> (&'a X, &'a X) {
        match self {
            PassDirection::Upload => (source, dest),
            PassDirection::Download => (dest, source),
        }
    }
}

/// Synchronizes one entity type between the client and server stores.
///
/// Records are joined by [`SyncGuid`] and every pair that exists on both
/// sides goes through the [`ConflictResolver`]. Per-record failures are
/// written into the run's [`SyncResult`] and never abort the batch; only
/// failures to fetch or persist a whole batch end the pass with an error.
pub struct EntitySyncer<T> {
    client: Arc<dyn EntityStore>,
    server: Arc<dyn EntityStore>,
    config: SyncConfiguration,
    resolver: ConflictResolver,
    retry: RetryPolicy,
    _record: PhantomData<fn() -> T>,
}

impl<T: SyncableRecord> EntitySyncer<T> {
    /// Creates a syncer for `T` between `client` and `server`.
    pub fn new(
        client: Arc<dyn EntityStore>,
        server: Arc<dyn EntityStore>,
        config: &SyncConfiguration,
    ) -> Self {
        Self {
            client,
            server,
            resolver: ConflictResolver::new(config.conflict_resolution),
            retry: config.retry_policy(),
            config: config.clone(),
            _record: PhantomData,
        }
    }

    /// Overrides the retry policy derived from the configuration.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn stores(&self, direction: PassDirection) -> (&dyn EntityStore, &dyn EntityStore) {
        match direction {
            PassDirection::Upload => (self.client.as_ref(), self.server.as_ref()),
            PassDirection::Download => (self.server.as_ref(), self.client.as_ref()),
        }
    }

    /// Runs one pass in `direction`, accumulating into `result`.
    ///
    /// Statistics, errors and conflicts land in `result` as they happen, so
    /// a pass that is cancelled or dropped midway still leaves its partial
    /// counts behind.
    ///
    /// # Errors
    ///
    /// Returns an error if a batch cannot be fetched or persisted after
    /// retries, or if `cancel` fires at a batch boundary.
    pub async fn sync_pass(
        &self,
        direction: PassDirection,
        cancel: &CancelToken,
        result: &mut SyncResult,
    ) -> EngineResult<()> {
        let entity_type = T::ENTITY_TYPE;
        let (source, dest) = self.stores(direction);
        let base = RecordQuery::all().since(self.config.window_start(Utc::now()));
        let batch_size = self.config.batch_size.max(1);
        let mut cursor = 0u64;
        let mut batches = 0usize;

        loop {
            cancel.check()?;

            let query = base.clone().after(cursor).page(0, batch_size);
            let q = &query;
            let batch = with_retry(&self.retry, cancel, "fetch batch", move || {
                source.query(entity_type, q)
            })
            .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.local_id;
            let fetched = batch.len();

            let mut source_writes = false;
            for stored in batch {
                source_writes |= self.sync_record(direction, stored, result).await;
            }

            with_retry(&self.retry, cancel, "persist destination", move || dest.persist())
                .await?;
            if source_writes {
                with_retry(&self.retry, cancel, "persist source", move || source.persist())
                    .await?;
            }

            batches += 1;
            tracing::debug!(
                entity_type,
                direction = %direction.as_sync_direction(),
                batch = batches,
                records = fetched,
                "batch applied"
            );

            if fetched < batch_size {
                break;
            }
        }

        tracing::info!(
            entity_type,
            direction = %direction.as_sync_direction(),
            batches,
            "entity pass complete"
        );
        Ok(())
    }

    /// Processes one source record. Returns true if the source copy was
    /// written.
    async fn sync_record(
        &self,
        direction: PassDirection,
        stored: StoredRecord,
        result: &mut SyncResult,
    ) -> bool {
        let entity_type = T::ENTITY_TYPE;
        let (_, dest) = self.stores(direction);
        let guid = stored.guid();
        result.statistics.record_processed(entity_type);

        let record: T = match stored.to_record() {
            Ok(record) => record,
            Err(e) => {
                self.record_failure(
                    result,
                    SyncErrorType::ValidationError,
                    guid,
                    format!("cannot decode record: {e}"),
                    false,
                );
                return false;
            }
        };
        if let Err(reason) = record.validate() {
            self.record_failure(result, SyncErrorType::ValidationError, guid, reason, false);
            return false;
        }

        let existing = match dest.find_by_guid(entity_type, guid).await {
            Ok(existing) => existing,
            Err(e) => {
                self.store_failure(result, guid, "lookup failed", &e);
                return false;
            }
        };
        let Some(existing) = existing else {
            return self.insert_missing(direction, &stored, result).await;
        };

        let source_meta = hashed(&stored.meta, &record);
        let dest_meta = self.hashed_meta(&existing);
        let (client_meta, server_meta) = direction.client_server(&source_meta, &dest_meta);
        let decision = self.resolver.resolve(client_meta, server_meta);

        match decision.resolution {
            Resolution::Skip => {
                result.statistics.skipped += 1;
                let (source, dest) = self.stores(direction);
                self.settle(dest, &existing, None).await;
                self.settle(source, &stored, None).await
            }
            Resolution::RequireManual => {
                let conflict =
                    self.conflict(direction, &stored, &existing, decision, ConflictResolution::ManualRequired);
                tracing::info!(entity_type, %guid, "conflict queued for manual resolution");
                result.push_conflict(conflict);
                result.statistics.skipped += 1;
                false
            }
            Resolution::Merge => {
                let (client, server) = direction.client_server(&stored, &existing);
                match self.write_merged(client, server, Utc::now()).await {
                    Ok(()) => {
                        result.statistics.updated += 1;
                        self.record_resolved(direction, &stored, &existing, decision, result);
                        true
                    }
                    Err(e) => {
                        self.record_failure(
                            result,
                            SyncErrorType::ConflictError,
                            guid,
                            format!("merge failed: {e}"),
                            false,
                        );
                        false
                    }
                }
            }
            resolution if direction.source_wins(resolution) => {
                self.apply_source(direction, &stored, &existing, decision, result)
                    .await
            }
            _ => {
                result.statistics.skipped += 1;
                self.record_resolved(direction, &stored, &existing, decision, result);
                false
            }
        }
    }

    async fn insert_missing(
        &self,
        direction: PassDirection,
        stored: &StoredRecord,
        result: &mut SyncResult,
    ) -> bool {
        let (source, dest) = self.stores(direction);
        let now = Utc::now();
        let mut meta = stored.meta.clone();
        meta.mark_synced(now);

        let mut copy_meta = meta.clone();
        copy_meta.data_source = direction.source_side();
        let written = match self.restamp(stored, copy_meta) {
            Ok(copy) => dest.insert(T::ENTITY_TYPE, copy).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(written) => {
                if written.meta.is_deleted {
                    result.statistics.deleted += 1;
                } else {
                    result.statistics.inserted += 1;
                }
                result.statistics.bytes_transferred += self.payload_size(&written.body);
            }
            Err(e) => {
                self.store_failure(result, stored.guid(), "insert failed", &e);
                return false;
            }
        }

        self.settle(source, stored, Some(meta)).await
    }

    async fn apply_source(
        &self,
        direction: PassDirection,
        stored: &StoredRecord,
        existing: &StoredRecord,
        decision: ConflictDecision,
        result: &mut SyncResult,
    ) -> bool {
        let (source, dest) = self.stores(direction);
        let now = Utc::now();
        let mut meta = stored.meta.clone();
        meta.version = meta.version.max(existing.meta.version);
        meta.mark_synced(now);

        let mut copy_meta = meta.clone();
        copy_meta.data_source = direction.source_side();
        let written = match self.restamp(stored, copy_meta) {
            Ok(copy) => dest.apply_values(T::ENTITY_TYPE, existing, copy).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(written) => {
                if written.meta.is_deleted {
                    result.statistics.deleted += 1;
                } else {
                    result.statistics.updated += 1;
                }
                result.statistics.bytes_transferred += self.payload_size(&written.body);
            }
            Err(e) => {
                self.store_failure(result, stored.guid(), "update failed", &e);
                return false;
            }
        }

        self.record_resolved(direction, stored, existing, decision, result);
        self.settle(source, stored, Some(meta)).await
    }

    /// Brings a copy's metadata to `target`, or just clears its pending flag
    /// when no target is given. Returns true if the copy was written.
    async fn settle(
        &self,
        store: &dyn EntityStore,
        stored: &StoredRecord,
        target: Option<SyncMetadata>,
    ) -> bool {
        let meta = match target {
            Some(mut meta) => {
                meta.data_source = stored.meta.data_source;
                meta
            }
            None if stored.meta.is_pending_sync || !stored.meta.has_synced() => {
                let mut meta = stored.meta.clone();
                meta.mark_synced(Utc::now());
                meta
            }
            None => return false,
        };
        if meta == stored.meta {
            return false;
        }

        let written = match self.restamp(stored, meta) {
            Ok(copy) => store.apply_values(T::ENTITY_TYPE, stored, copy).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(_) => true,
            Err(e) => {
                // The destination already holds the record; the next run
                // will see identical copies and settle again.
                tracing::warn!(
                    entity_type = T::ENTITY_TYPE,
                    guid = %stored.guid(),
                    store = store.name(),
                    error = %e,
                    "could not mark record as synced"
                );
                false
            }
        }
    }

    /// Metadata of `stored` with the digest recomputed from its body.
    /// Falls back to the stored digest if the body does not decode.
    fn hashed_meta(&self, stored: &StoredRecord) -> SyncMetadata {
        match stored.to_record::<T>() {
            Ok(record) => hashed(&stored.meta, &record),
            Err(_) => stored.meta.clone(),
        }
    }

    fn restamp(&self, stored: &StoredRecord, meta: SyncMetadata) -> StoreResult<StoredRecord> {
        let mut record: T = stored.to_record()?;
        *record.sync_meta_mut() = meta;
        StoredRecord::from_record(&record)
    }

    fn record_resolved(
        &self,
        direction: PassDirection,
        stored: &StoredRecord,
        existing: &StoredRecord,
        decision: ConflictDecision,
        result: &mut SyncResult,
    ) {
        if decision.conflict.is_none() {
            return;
        }
        let conflict = self.conflict(direction, stored, existing, decision, decision.resolution.into());
        tracing::debug!(
            entity_type = T::ENTITY_TYPE,
            guid = %stored.guid(),
            resolution = ?conflict.resolution,
            "conflict resolved"
        );
        if result.push_conflict(conflict) {
            result.statistics.conflicts_resolved += 1;
        }
    }

    fn conflict(
        &self,
        direction: PassDirection,
        stored: &StoredRecord,
        existing: &StoredRecord,
        decision: ConflictDecision,
        resolution: ConflictResolution,
    ) -> SyncConflict {
        let (client, server) = direction.client_server(stored, existing);
        let conflict_type = decision.conflict.unwrap_or(ConflictType::BothModified);
        SyncConflict::new(
            T::ENTITY_TYPE,
            &client.meta,
            &server.meta,
            conflict_type,
            resolution,
            Utc::now(),
        )
        .with_snapshots(Some(client.body.clone()), Some(server.body.clone()))
    }

    fn store_failure(&self, result: &mut SyncResult, guid: SyncGuid, what: &str, error: &StoreError) {
        self.record_failure(
            result,
            SyncErrorType::DatabaseError,
            guid,
            format!("{what}: {error}"),
            error.is_transient(),
        );
    }

    fn record_failure(
        &self,
        result: &mut SyncResult,
        error_type: SyncErrorType,
        guid: SyncGuid,
        message: String,
        retryable: bool,
    ) {
        tracing::warn!(entity_type = T::ENTITY_TYPE, %guid, ?error_type, %message, "record failed");
        result.statistics.failed += 1;
        result.push_error(
            SyncError::new(error_type, message)
                .for_entity(T::ENTITY_TYPE, Some(guid))
                .retryable(retryable),
        );
    }

    fn payload_size(&self, body: &serde_json::Value) -> u64 {
        payload_size(body, self.config.enable_compression)
    }

    /// Resolves a queued conflict on the record with `guid`.
    ///
    /// # Errors
    ///
    /// Returns an error if either copy is missing, the type cannot merge,
    /// or a store write fails.
    pub async fn resolve_manually(
        &self,
        guid: SyncGuid,
        resolution: ConflictResolution,
    ) -> EngineResult<()> {
        let entity_type = T::ENTITY_TYPE;
        let client_copy = self.require(self.client.as_ref(), guid).await?;
        let server_copy = self.require(self.server.as_ref(), guid).await?;
        let now = Utc::now();

        match resolution {
            ConflictResolution::UseLocal => {
                self.overwrite(&client_copy, &server_copy, PassDirection::Upload, now)
                    .await?;
            }
            ConflictResolution::UseRemote => {
                self.overwrite(&server_copy, &client_copy, PassDirection::Download, now)
                    .await?;
            }
            ConflictResolution::Merge => {
                self.write_merged(&client_copy, &server_copy, now).await?;
            }
            ConflictResolution::Skip => {
                tracing::info!(entity_type, %guid, "conflict dismissed");
                return Ok(());
            }
            ConflictResolution::ManualRequired => {
                return Err(EngineError::Configuration(
                    "ManualRequired is not a resolution".into(),
                ));
            }
        }

        self.client.persist().await?;
        self.server.persist().await?;
        tracing::info!(entity_type, %guid, ?resolution, "conflict resolved manually");
        Ok(())
    }

    async fn require(&self, store: &dyn EntityStore, guid: SyncGuid) -> EngineResult<StoredRecord> {
        store
            .find_by_guid(T::ENTITY_TYPE, guid)
            .await?
            .ok_or_else(|| {
                EngineError::Store(StoreError::NotFound {
                    entity_type: T::ENTITY_TYPE.to_string(),
                    guid,
                })
            })
    }

    /// Writes `winner` over `loser`; `direction` names the winner as source.
    async fn overwrite(
        &self,
        winner: &StoredRecord,
        loser: &StoredRecord,
        direction: PassDirection,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let (winner_store, loser_store) = self.stores(direction);
        let mut meta = winner.meta.clone();
        meta.version = meta.version.max(loser.meta.version);
        meta.mark_synced(now);

        let mut loser_meta = meta.clone();
        loser_meta.data_source = direction.source_side();
        loser_store
            .apply_values(T::ENTITY_TYPE, loser, self.restamp(winner, loser_meta)?)
            .await?;

        meta.data_source = winner.meta.data_source;
        winner_store
            .apply_values(T::ENTITY_TYPE, winner, self.restamp(winner, meta)?)
            .await?;
        Ok(())
    }

    /// Merges both copies and writes the result to both stores.
    async fn write_merged(
        &self,
        client_copy: &StoredRecord,
        server_copy: &StoredRecord,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let local: T = client_copy.to_record()?;
        let remote: T = server_copy.to_record()?;
        let mut merged = local
            .merge(&remote)
            .ok_or_else(|| EngineError::MergeUnsupported(T::ENTITY_TYPE.to_string()))?;

        let mut meta = client_copy.meta.clone();
        meta.version = client_copy.meta.version.max(server_copy.meta.version) + 1;
        meta.last_modified_utc = now;
        meta.is_deleted = merged.sync_meta().is_deleted;
        meta.data_source = DataSource::Client;
        *merged.sync_meta_mut() = meta;
        merged.refresh_hash();
        merged.sync_meta_mut().mark_synced(now);

        let body = StoredRecord::from_record(&merged)?;
        self.client
            .apply_values(T::ENTITY_TYPE, client_copy, body.clone())
            .await?;
        self.server
            .apply_values(T::ENTITY_TYPE, server_copy, body)
            .await?;
        Ok(())
    }

    /// Lists manual conflicts between the stores without writing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be read.
    pub async fn scan_conflicts(&self, cancel: &CancelToken) -> EngineResult<Vec<SyncConflict>> {
        let entity_type = T::ENTITY_TYPE;
        let batch_size = self.config.batch_size.max(1);
        let mut cursor = 0u64;
        let mut found = Vec::new();

        loop {
            cancel.check()?;
            let query = RecordQuery::all().after(cursor).page(0, batch_size);
            let batch = self.client.query(entity_type, &query).await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.local_id;
            let fetched = batch.len();

            for client_copy in &batch {
                let Some(server_copy) = self
                    .server
                    .find_by_guid(entity_type, client_copy.guid())
                    .await?
                else {
                    continue;
                };
                let decision = self.resolver.resolve(
                    &self.hashed_meta(client_copy),
                    &self.hashed_meta(&server_copy),
                );
                if decision.resolution == Resolution::RequireManual {
                    found.push(self.conflict(
                        PassDirection::Upload,
                        client_copy,
                        &server_copy,
                        decision,
                        ConflictResolution::ManualRequired,
                    ));
                }
            }

            if fetched < batch_size {
                break;
            }
        }
        Ok(found)
    }

    /// Number of client records waiting for upload.
    ///
    /// # Errors
    ///
    /// Returns an error if the client store cannot be read.
    pub async fn pending_count(&self) -> EngineResult<u64> {
        Ok(self
            .client
            .count(T::ENTITY_TYPE, &RecordQuery::pending())
            .await?)
    }
}

/// Type-erased view of an [`EntitySyncer`], as held by the orchestrator.
#[async_trait]
pub(crate) trait EntityPass: Send + Sync {
    fn entity_type(&self) -> &'static str;

    async fn sync_pass(
        &self,
        direction: PassDirection,
        cancel: &CancelToken,
        result: &mut SyncResult,
    ) -> EngineResult<()>;

    async fn resolve_manually(
        &self,
        guid: SyncGuid,
        resolution: ConflictResolution,
    ) -> EngineResult<()>;

    async fn scan_conflicts(&self, cancel: &CancelToken) -> EngineResult<Vec<SyncConflict>>;

    async fn pending_count(&self) -> EngineResult<u64>;
}

#[async_trait]
impl<T: SyncableRecord> EntityPass for EntitySyncer<T> {
    fn entity_type(&self) -> &'static str {
        T::ENTITY_TYPE
    }

    async fn sync_pass(
        &self,
        direction: PassDirection,
        cancel: &CancelToken,
        result: &mut SyncResult,
    ) -> EngineResult<()> {
        EntitySyncer::sync_pass(self, direction, cancel, result).await
    }

    async fn resolve_manually(
        &self,
        guid: SyncGuid,
        resolution: ConflictResolution,
    ) -> EngineResult<()> {
        EntitySyncer::resolve_manually(self, guid, resolution).await
    }

    async fn scan_conflicts(&self, cancel: &CancelToken) -> EngineResult<Vec<SyncConflict>> {
        EntitySyncer::scan_conflicts(self, cancel).await
    }

    async fn pending_count(&self) -> EngineResult<u64> {
        EntitySyncer::pending_count(self).await
    }
}

fn hashed<T: SyncableRecord>(meta: &SyncMetadata, record: &T) -> SyncMetadata {
    let mut meta = meta.clone();
    meta.data_hash = Some(record.content_hash());
    meta
}

/// Bytes a body occupies on the wire, gzip-compressed if `compress` is set.
pub(crate) fn payload_size(body: &serde_json::Value, compress: bool) -> u64 {
    let Ok(bytes) = serde_json::to_vec(body) else {
        return 0;
    };
    if !compress {
        return bytes.len() as u64;
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    match encoder.write_all(&bytes).and_then(|()| encoder.finish()) {
        Ok(compressed) => compressed.len() as u64,
        Err(_) => bytes.len() as u64,
    }
}
