//! Store envelope and query description.

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tillsync_protocol::{SyncGuid, SyncMetadata, SyncableRecord};

/// A record as a store sees it.
///
/// The body is the full JSON form of the typed record. The metadata block
/// is kept alongside it so stores can filter and index without decoding
/// bodies; when the two disagree the envelope metadata wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Entity type name.
    pub entity_type: String,
    /// Store-local key. Zero until the store assigns one.
    pub local_id: u64,
    /// Sync metadata.
    pub meta: SyncMetadata,
    /// JSON body.
    pub body: serde_json::Value,
}

impl StoredRecord {
    /// Wraps a typed record. The local key is left unassigned.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    pub fn from_record<T: SyncableRecord>(record: &T) -> StoreResult<Self> {
        Ok(Self {
            entity_type: T::ENTITY_TYPE.to_string(),
            local_id: 0,
            meta: record.sync_meta().clone(),
            body: serde_json::to_value(record)?,
        })
    }

    /// Decodes the typed record, applying the envelope metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not decode as `T`.
    pub fn into_record<T: SyncableRecord>(self) -> StoreResult<T> {
        let mut record: T = serde_json::from_value(self.body)?;
        *record.sync_meta_mut() = self.meta;
        Ok(record)
    }

    /// Decodes a copy of the typed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not decode as `T`.
    pub fn to_record<T: SyncableRecord>(&self) -> StoreResult<T> {
        self.clone().into_record()
    }

    /// Global identity of the record.
    pub fn guid(&self) -> SyncGuid {
        self.meta.sync_guid
    }

    /// Size of the serialized body in bytes.
    pub fn body_len(&self) -> usize {
        serde_json::to_vec(&self.body).map(|b| b.len()).unwrap_or(0)
    }
}

/// Selection of records for a batch fetch or count.
///
/// Results are ordered by store-local key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    /// Only records modified at or after this time. Pending records are
    /// always included.
    pub since: Option<DateTime<Utc>>,
    /// Only records with the pending flag set.
    pub pending_only: bool,
    /// Only records whose local key is greater than this.
    pub after_local_id: Option<u64>,
    /// Matching records to skip.
    pub offset: usize,
    /// Maximum records to return.
    pub limit: Option<usize>,
}

impl RecordQuery {
    /// Selects every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Selects pending records only.
    pub fn pending() -> Self {
        Self {
            pending_only: true,
            ..Self::default()
        }
    }

    /// Restricts to records modified since `since` or still pending.
    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    /// Starts after the given local key.
    pub fn after(mut self, local_id: u64) -> Self {
        self.after_local_id = Some(local_id);
        self
    }

    /// Sets offset and limit.
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Returns true if the record passes the filters (paging aside).
    pub fn matches(&self, record: &StoredRecord) -> bool {
        let meta = &record.meta;
        if self.pending_only && !meta.is_pending_sync {
            return false;
        }
        if let Some(after) = self.after_local_id {
            if record.local_id <= after {
                return false;
            }
        }
        match self.since {
            Some(since) => meta.is_pending_sync || meta.last_modified_utc >= since,
            None => true,
        }
    }
}
