//! Sync-aware record contract.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Global identity of a record.
///
/// Assigned once at creation time and never changed. This is the join key
/// between the client and server stores; store-local keys are never assumed
/// to match across stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncGuid(Uuid);

impl SyncGuid {
    /// Generates a new random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Builds an identity from raw bytes. Mostly useful in tests.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SyncGuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SyncGuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Which side last wrote a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataSource {
    /// Written by the central store.
    Server,
    /// Written by the local store.
    Client,
    /// Origin not recorded.
    #[default]
    Unknown,
}

impl DataSource {
    /// Returns a short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Server => "server",
            DataSource::Client => "client",
            DataSource::Unknown => "unknown",
        }
    }
}

/// Sync bookkeeping carried by every synchronizable record.
///
/// # Invariants
///
/// - `sync_guid` never changes once assigned
/// - `version` only increases
/// - `is_pending_sync` is true exactly when the record was modified after
///   its last sync (or was never synced)
///
/// The mutation helpers ([`touch`](Self::touch),
/// [`mark_deleted`](Self::mark_deleted), [`mark_synced`](Self::mark_synced))
/// keep these invariants; direct field writes are the caller's
/// responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Global identity.
    pub sync_guid: SyncGuid,
    /// Optimistic-concurrency version.
    pub version: u64,
    /// Time of the last mutation.
    pub last_modified_utc: DateTime<Utc>,
    /// Time of the last successful sync, if any.
    pub last_synced_utc: Option<DateTime<Utc>>,
    /// Set on local write, cleared on confirmed sync.
    pub is_pending_sync: bool,
    /// Side that last wrote the record.
    pub data_source: DataSource,
    /// Hex SHA-256 digest of the record content.
    pub data_hash: Option<String>,
    /// Tombstone marker.
    #[serde(default)]
    pub is_deleted: bool,
}

impl SyncMetadata {
    /// Metadata for a record created on `source` at `now`.
    pub fn created(source: DataSource, now: DateTime<Utc>) -> Self {
        Self::created_with_guid(SyncGuid::new(), source, now)
    }

    /// Metadata for a record created on `source` with a known identity.
    pub fn created_with_guid(sync_guid: SyncGuid, source: DataSource, now: DateTime<Utc>) -> Self {
        Self {
            sync_guid,
            version: 1,
            last_modified_utc: now,
            last_synced_utc: None,
            is_pending_sync: true,
            data_source: source,
            data_hash: None,
            is_deleted: false,
        }
    }

    /// Records a mutation at `now`.
    ///
    /// The modification time is kept strictly after the last sync time so
    /// the pending flag stays truthful even under small clock skew.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.last_modified_utc = match self.last_synced_utc {
            Some(synced) if now <= synced => synced + Duration::microseconds(1),
            _ => now,
        };
        self.is_pending_sync = true;
    }

    /// Turns the record into a tombstone at `now`.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.touch(now);
        self.is_deleted = true;
    }

    /// Records a successful sync at `at`.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_synced_utc = Some(at.max(self.last_modified_utc));
        self.is_pending_sync = false;
    }

    /// Returns true if the record has been synchronized at least once.
    pub fn has_synced(&self) -> bool {
        self.last_synced_utc.is_some()
    }

    /// Returns true if the record changed after its last sync.
    pub fn is_modified_since_sync(&self) -> bool {
        match self.last_synced_utc {
            Some(synced) => self.last_modified_utc > synced,
            None => true,
        }
    }

    /// Returns true if the pending flag agrees with the timestamps.
    pub fn is_consistent(&self) -> bool {
        self.is_pending_sync == self.is_modified_since_sync()
    }

    /// Returns true if both sides describe the same state of the record.
    pub fn same_state(&self, other: &SyncMetadata) -> bool {
        self.version == other.version
            && self.data_hash == other.data_hash
            && self.is_deleted == other.is_deleted
    }
}

/// The contract every synchronizable entity satisfies.
///
/// Entities carry a [`SyncMetadata`] block and name themselves through
/// associated constants, so the engine never needs runtime type
/// introspection to find keys or dependencies.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use tillsync_protocol::{hash_content, SyncMetadata, SyncableRecord};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Category {
///     sync: SyncMetadata,
///     name: String,
/// }
///
/// impl SyncableRecord for Category {
///     const ENTITY_TYPE: &'static str = "Category";
///
///     fn sync_meta(&self) -> &SyncMetadata {
///         &self.sync
///     }
///
///     fn sync_meta_mut(&mut self) -> &mut SyncMetadata {
///         &mut self.sync
///     }
///
///     fn content_hash(&self) -> String {
///         hash_content(&self.name)
///     }
/// }
/// ```
pub trait SyncableRecord: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Entity type name, unique within one orchestrator.
    const ENTITY_TYPE: &'static str;

    /// Entity types that must be synchronized before this one.
    const DEPENDS_ON: &'static [&'static str] = &[];

    /// Whether this type holds attachment payloads.
    const IS_ATTACHMENT: bool = false;

    /// Returns the sync metadata.
    fn sync_meta(&self) -> &SyncMetadata;

    /// Returns the sync metadata mutably.
    fn sync_meta_mut(&mut self) -> &mut SyncMetadata;

    /// Digest of the business content, excluding sync metadata.
    fn content_hash(&self) -> String;

    /// Global identity accessor.
    fn sync_guid(&self) -> SyncGuid {
        self.sync_meta().sync_guid
    }

    /// Structural precondition checked before the record is applied.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Combines a local and a remote copy. `None` means merging is not
    /// supported for this type.
    fn merge(&self, _remote: &Self) -> Option<Self> {
        None
    }

    /// Recomputes and stores the content digest.
    fn refresh_hash(&mut self) {
        let hash = self.content_hash();
        self.sync_meta_mut().data_hash = Some(hash);
    }

    /// Records a local mutation and refreshes the digest.
    fn record_change(&mut self, now: DateTime<Utc>) {
        self.sync_meta_mut().touch(now);
        self.refresh_hash();
    }
}

/// Hex SHA-256 digest of the JSON form of `content`.
pub fn hash_content<T: Serialize + ?Sized>(content: &T) -> String {
    let bytes = serde_json::to_vec(content).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}
