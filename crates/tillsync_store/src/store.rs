//! Entity store trait definition.

use crate::error::{StoreError, StoreResult};
use crate::record::{RecordQuery, StoredRecord};
use async_trait::async_trait;
use tillsync_protocol::{SyncGuid, SyncableRecord};

/// A persistent store of synchronizable records.
///
/// Stores are keyed by entity type and know nothing about conflict
/// resolution. The engine joins records across stores by [`SyncGuid`],
/// never by the store-local key.
///
/// # Invariants
///
/// - `insert` assigns a local key; inserting an existing guid overwrites
///   it in place and keeps its key
/// - `apply_values` never changes the local key of the existing record
/// - `query` returns records ordered by local key
/// - writes may be staged until `persist` is called
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Trivial round-trip used for connectivity checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn ping(&self) -> StoreResult<()>;

    /// Looks up a record by global identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn find_by_guid(
        &self,
        entity_type: &str,
        guid: SyncGuid,
    ) -> StoreResult<Option<StoredRecord>>;

    /// Inserts a record, assigning a local key.
    ///
    /// # Errors
    ///
    /// Returns an error if the write is refused or fails.
    async fn insert(&self, entity_type: &str, record: StoredRecord) -> StoreResult<StoredRecord>;

    /// Overwrites `existing` with the values of `incoming`, keeping the
    /// local key of `existing`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if `existing` is no longer stored,
    /// or another error if the write is refused or fails.
    async fn apply_values(
        &self,
        entity_type: &str,
        existing: &StoredRecord,
        incoming: StoredRecord,
    ) -> StoreResult<StoredRecord>;

    /// Fetches records matching `query`, ordered by local key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn query(&self, entity_type: &str, query: &RecordQuery) -> StoreResult<Vec<StoredRecord>>;

    /// Counts records matching `query`, ignoring offset and limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn count(&self, entity_type: &str, query: &RecordQuery) -> StoreResult<u64>;

    /// Flushes staged writes and returns how many were flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails. Staged writes are kept.
    async fn persist(&self) -> StoreResult<usize>;
}

/// Loads and decodes a typed record.
///
/// # Errors
///
/// Returns an error if the store fails or the body does not decode.
pub async fn load_record<T: SyncableRecord>(
    store: &dyn EntityStore,
    guid: SyncGuid,
) -> StoreResult<Option<T>> {
    match store.find_by_guid(T::ENTITY_TYPE, guid).await? {
        Some(stored) => stored.into_record().map(Some),
        None => Ok(None),
    }
}

/// Encodes and saves a typed record, inserting or overwriting by guid.
///
/// # Errors
///
/// Returns an error if the record cannot be encoded or the write fails.
pub async fn save_record<T: SyncableRecord>(
    store: &dyn EntityStore,
    record: &T,
) -> StoreResult<StoredRecord> {
    let incoming = StoredRecord::from_record(record)?;
    match store.find_by_guid(T::ENTITY_TYPE, record.sync_guid()).await? {
        Some(existing) => store.apply_values(T::ENTITY_TYPE, &existing, incoming).await,
        None => store.insert(T::ENTITY_TYPE, incoming).await,
    }
}

/// Loads every record of type `T`, ordered by local key.
///
/// # Errors
///
/// Returns an error if the store fails or a body does not decode.
pub async fn load_all<T: SyncableRecord>(store: &dyn EntityStore) -> StoreResult<Vec<T>> {
    store
        .query(T::ENTITY_TYPE, &RecordQuery::all())
        .await?
        .into_iter()
        .map(StoredRecord::into_record)
        .collect()
}

/// Fails with [`StoreError::NotFound`] when `record` is `None`.
pub(crate) fn require(
    entity_type: &str,
    guid: SyncGuid,
    record: Option<StoredRecord>,
) -> StoreResult<StoredRecord> {
    record.ok_or_else(|| StoreError::NotFound {
        entity_type: entity_type.to_string(),
        guid,
    })
}
