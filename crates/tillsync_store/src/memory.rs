//! In-memory entity store for testing.

use crate::error::{StoreError, StoreResult};
use crate::record::{RecordQuery, StoredRecord};
use crate::store::EntityStore;
use crate::table::Tables;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tillsync_protocol::{SyncGuid, SyncableRecord};

/// An in-memory entity store.
///
/// Writes are visible immediately and counted as staged until
/// [`persist`](EntityStore::persist) is called. The store can be told to
/// fail in several ways, which is what the engine tests use it for:
///
/// - [`set_available`](Self::set_available) makes every call fail with
///   [`StoreError::Unavailable`]
/// - [`fail_writes_for`](Self::fail_writes_for) rejects writes to one record
/// - [`fail_next_queries`](Self::fail_next_queries) and
///   [`fail_next_persists`](Self::fail_next_persists) fail a number of
///   calls before recovering
///
/// # Example
///
/// ```rust
/// use tillsync_store::{EntityStore, MemoryStore, RecordQuery};
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// runtime.block_on(async {
///     let store = MemoryStore::new("client");
///     assert_eq!(store.count("Product", &RecordQuery::all()).await.unwrap(), 0);
/// });
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    tables: RwLock<Tables>,
    staged: AtomicUsize,
    available: AtomicBool,
    failing_guids: Mutex<HashSet<SyncGuid>>,
    query_failures: AtomicUsize,
    persist_failures: AtomicUsize,
    persist_calls: AtomicUsize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_first_local_id(name, 1)
    }

    /// Creates an empty store whose local keys start at `first_local_id`.
    ///
    /// Useful for proving that records are never joined by local key.
    #[must_use]
    pub fn with_first_local_id(name: impl Into<String>, first_local_id: u64) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(Tables::starting_at(first_local_id)),
            staged: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            failing_guids: Mutex::new(HashSet::new()),
            query_failures: AtomicUsize::new(0),
            persist_failures: AtomicUsize::new(0),
            persist_calls: AtomicUsize::new(0),
        }
    }

    /// Makes the store reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Rejects every write to the record with `guid`.
    pub fn fail_writes_for(&self, guid: SyncGuid) {
        self.failing_guids.lock().insert(guid);
    }

    /// Stops rejecting writes to the record with `guid`.
    pub fn clear_write_failure(&self, guid: SyncGuid) {
        self.failing_guids.lock().remove(&guid);
    }

    /// Fails the next `count` queries with [`StoreError::Unavailable`].
    pub fn fail_next_queries(&self, count: usize) {
        self.query_failures.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` persists with [`StoreError::Unavailable`].
    pub fn fail_next_persists(&self, count: usize) {
        self.persist_failures.store(count, Ordering::SeqCst);
    }

    /// Number of persist calls made so far, failed ones included.
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    /// Number of writes staged since the last persist.
    pub fn staged_writes(&self) -> usize {
        self.staged.load(Ordering::SeqCst)
    }

    /// Total number of stored records across all entity types.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seeds a typed record directly, bypassing availability checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    pub fn put<T: SyncableRecord>(&self, record: &T) -> StoreResult<StoredRecord> {
        let stored = StoredRecord::from_record(record)?;
        Ok(self.tables.write().insert(T::ENTITY_TYPE, stored))
    }

    /// Reads a typed record directly, bypassing availability checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not decode.
    pub fn get<T: SyncableRecord>(&self, guid: SyncGuid) -> StoreResult<Option<T>> {
        let found = self.tables.read().find(T::ENTITY_TYPE, guid).cloned();
        found.map(StoredRecord::into_record).transpose()
    }

    /// Reads the raw envelope directly, bypassing availability checks.
    pub fn get_raw(&self, entity_type: &str, guid: SyncGuid) -> Option<StoredRecord> {
        self.tables.read().find(entity_type, guid).cloned()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} is offline", self.name)))
        }
    }

    fn check_writable(&self, guid: SyncGuid) -> StoreResult<()> {
        self.check_available()?;
        if self.failing_guids.lock().contains(&guid) {
            return Err(StoreError::Rejected(format!(
                "{} refused write to {guid}",
                self.name
            )));
        }
        Ok(())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn find_by_guid(
        &self,
        entity_type: &str,
        guid: SyncGuid,
    ) -> StoreResult<Option<StoredRecord>> {
        self.check_available()?;
        Ok(self.tables.read().find(entity_type, guid).cloned())
    }

    async fn insert(&self, entity_type: &str, record: StoredRecord) -> StoreResult<StoredRecord> {
        self.check_writable(record.guid())?;
        let stored = self.tables.write().insert(entity_type, record);
        self.staged.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn apply_values(
        &self,
        entity_type: &str,
        existing: &StoredRecord,
        incoming: StoredRecord,
    ) -> StoreResult<StoredRecord> {
        self.check_writable(existing.guid())?;
        let stored = self
            .tables
            .write()
            .apply_values(entity_type, existing, incoming)?;
        self.staged.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn query(&self, entity_type: &str, query: &RecordQuery) -> StoreResult<Vec<StoredRecord>> {
        self.check_available()?;
        if Self::take_failure(&self.query_failures) {
            return Err(StoreError::Unavailable(format!(
                "{} query timed out",
                self.name
            )));
        }
        Ok(self.tables.read().query(entity_type, query))
    }

    async fn count(&self, entity_type: &str, query: &RecordQuery) -> StoreResult<u64> {
        self.check_available()?;
        Ok(self.tables.read().count(entity_type, query))
    }

    async fn persist(&self) -> StoreResult<usize> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if Self::take_failure(&self.persist_failures) {
            return Err(StoreError::Unavailable(format!(
                "{} persist interrupted",
                self.name
            )));
        }
        Ok(self.staged.swap(0, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use tillsync_protocol::{hash_content, DataSource, SyncMetadata};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag {
        sync: SyncMetadata,
        label: String,
    }

    impl SyncableRecord for Tag {
        const ENTITY_TYPE: &'static str = "Tag";

        fn sync_meta(&self) -> &SyncMetadata {
            &self.sync
        }

        fn sync_meta_mut(&mut self) -> &mut SyncMetadata {
            &mut self.sync
        }

        fn content_hash(&self) -> String {
            hash_content(&self.label)
        }
    }

    fn tag(label: &str) -> Tag {
        Tag {
            sync: SyncMetadata::created(DataSource::Client, Utc::now()),
            label: label.into(),
        }
    }

    #[tokio::test]
    async fn memory_insert_and_find() {
        let store = MemoryStore::new("client");
        let t = tag("sale");
        let stored = store
            .insert("Tag", StoredRecord::from_record(&t).unwrap())
            .await
            .unwrap();
        assert_eq!(stored.local_id, 1);

        let found = store.find_by_guid("Tag", t.sync.sync_guid).await.unwrap();
        assert_eq!(found.unwrap().local_id, 1);
        assert_eq!(store.staged_writes(), 1);
        assert_eq!(store.persist().await.unwrap(), 1);
        assert_eq!(store.staged_writes(), 0);
    }

    #[tokio::test]
    async fn memory_unavailable_fails_everything() {
        let store = MemoryStore::new("server");
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.query("Tag", &RecordQuery::all()).await.is_err());
        assert!(store.persist().await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn memory_write_failure_injection() {
        let store = MemoryStore::new("server");
        let t = tag("vip");
        store.fail_writes_for(t.sync.sync_guid);

        let err = store
            .insert("Tag", StoredRecord::from_record(&t).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(!err.is_transient());

        store.clear_write_failure(t.sync.sync_guid);
        assert!(store
            .insert("Tag", StoredRecord::from_record(&t).unwrap())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn memory_counted_failures_recover() {
        let store = MemoryStore::new("server");
        store.fail_next_queries(2);
        assert!(store.query("Tag", &RecordQuery::all()).await.is_err());
        assert!(store.query("Tag", &RecordQuery::all()).await.is_err());
        assert!(store.query("Tag", &RecordQuery::all()).await.is_ok());

        store.fail_next_persists(1);
        assert!(store.persist().await.is_err());
        assert!(store.persist().await.is_ok());
        assert_eq!(store.persist_calls(), 2);
    }

    #[tokio::test]
    async fn memory_typed_helpers() {
        let store = MemoryStore::with_first_local_id("server", 500);
        let t = tag("loyalty");
        let stored = store.put(&t).unwrap();
        assert_eq!(stored.local_id, 500);
        assert_eq!(store.get::<Tag>(t.sync.sync_guid).unwrap(), Some(t));
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }
}
