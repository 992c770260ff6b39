//! Conflict detection and resolution.
//!
//! "Local" always means the client copy of a record and "remote" the server
//! copy, whichever direction a pass is running in.

use crate::record::{SyncGuid, SyncMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConflictResolutionStrategy {
    /// The server copy always wins.
    #[default]
    ServerWins,
    /// The client copy always wins.
    ClientWins,
    /// The copy with the later modification time wins.
    LastWriteWins,
    /// The copy with the higher version wins.
    HighestVersionWins,
    /// Conflicts are queued for a person to resolve.
    ManualResolution,
}

impl ConflictResolutionStrategy {
    /// Returns true if this strategy resolves conflicts without a person.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictResolutionStrategy::ManualResolution)
    }

    /// Returns the configuration name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolutionStrategy::ServerWins => "ServerWins",
            ConflictResolutionStrategy::ClientWins => "ClientWins",
            ConflictResolutionStrategy::LastWriteWins => "LastWriteWins",
            ConflictResolutionStrategy::HighestVersionWins => "HighestVersionWins",
            ConflictResolutionStrategy::ManualResolution => "ManualResolution",
        }
    }
}

impl fmt::Display for ConflictResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "serverwins" => Ok(ConflictResolutionStrategy::ServerWins),
            "clientwins" => Ok(ConflictResolutionStrategy::ClientWins),
            "lastwritewins" => Ok(ConflictResolutionStrategy::LastWriteWins),
            "highestversionwins" => Ok(ConflictResolutionStrategy::HighestVersionWins),
            "manualresolution" | "manual" => Ok(ConflictResolutionStrategy::ManualResolution),
            _ => Err(format!("unknown conflict strategy: {s}")),
        }
    }
}

/// What to do with a pair of copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// The server copy wins.
    ApplyRemote,
    /// The client copy wins.
    ApplyLocal,
    /// Both copies are combined.
    Merge,
    /// Nothing to do.
    Skip,
    /// Leave both copies untouched and queue the conflict.
    RequireManual,
}

/// Category of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// Both copies changed since their last sync.
    BothModified,
    /// The client deleted a record the server still has live.
    DeletedLocal,
    /// The server deleted a record the client still has live.
    DeletedServer,
    /// Versions disagree without a recorded edit to explain it.
    VersionMismatch,
    /// Same version, different content.
    DataCorruption,
}

/// Resolution recorded on a [`SyncConflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// The client copy was kept.
    UseLocal,
    /// The server copy was kept.
    UseRemote,
    /// The copies were merged.
    Merge,
    /// The conflict was dismissed without changes.
    Skip,
    /// Waiting for a person to decide.
    ManualRequired,
}

impl From<Resolution> for ConflictResolution {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::ApplyRemote => ConflictResolution::UseRemote,
            Resolution::ApplyLocal => ConflictResolution::UseLocal,
            Resolution::Merge => ConflictResolution::Merge,
            Resolution::Skip => ConflictResolution::Skip,
            Resolution::RequireManual => ConflictResolution::ManualRequired,
        }
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "uselocal" | "local" | "client" => Ok(ConflictResolution::UseLocal),
            "useremote" | "remote" | "server" => Ok(ConflictResolution::UseRemote),
            "merge" => Ok(ConflictResolution::Merge),
            "skip" => Ok(ConflictResolution::Skip),
            _ => Err(format!("unknown conflict resolution: {s}")),
        }
    }
}

/// A conflict between the client and server copies of one record.
///
/// The id is derived from the entity type and record identity, so the same
/// diverged record yields the same id in every run and every process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict identifier.
    pub id: Uuid,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
    /// Entity type name.
    pub entity_type: String,
    /// Global identity of the record.
    pub entity_id: SyncGuid,
    /// Conflict category.
    pub conflict_type: ConflictType,
    /// Resolution applied (or pending).
    pub resolution: ConflictResolution,
    /// Serialized client copy.
    pub local_snapshot: Option<serde_json::Value>,
    /// Serialized server copy.
    pub remote_snapshot: Option<serde_json::Value>,
    /// Client modification time.
    pub local_modified_utc: DateTime<Utc>,
    /// Server modification time.
    pub remote_modified_utc: DateTime<Utc>,
    /// Client version.
    pub local_version: u64,
    /// Server version.
    pub remote_version: u64,
}

impl SyncConflict {
    /// Creates a conflict record from both copies' metadata.
    pub fn new(
        entity_type: impl Into<String>,
        local: &SyncMetadata,
        remote: &SyncMetadata,
        conflict_type: ConflictType,
        resolution: ConflictResolution,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let entity_type = entity_type.into();
        Self {
            id: Self::id_for(&entity_type, local.sync_guid),
            detected_at,
            entity_type,
            entity_id: local.sync_guid,
            conflict_type,
            resolution,
            local_snapshot: None,
            remote_snapshot: None,
            local_modified_utc: local.last_modified_utc,
            remote_modified_utc: remote.last_modified_utc,
            local_version: local.version,
            remote_version: remote.version,
        }
    }

    /// Stable conflict id for a record.
    pub fn id_for(entity_type: &str, guid: SyncGuid) -> Uuid {
        let digest = Sha256::new()
            .chain_update(entity_type.as_bytes())
            .chain_update(guid.as_uuid().as_bytes())
            .finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }

    /// Attaches serialized snapshots of both copies.
    pub fn with_snapshots(
        mut self,
        local: Option<serde_json::Value>,
        remote: Option<serde_json::Value>,
    ) -> Self {
        self.local_snapshot = local;
        self.remote_snapshot = remote;
        self
    }

    /// Returns true if the conflict still waits for a person.
    pub fn is_pending(&self) -> bool {
        self.resolution == ConflictResolution::ManualRequired
    }
}

/// Outcome of comparing two copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictDecision {
    /// What to do.
    pub resolution: Resolution,
    /// Set when the copies genuinely diverged.
    pub conflict: Option<ConflictType>,
}

impl ConflictDecision {
    fn clean(resolution: Resolution) -> Self {
        Self {
            resolution,
            conflict: None,
        }
    }

    fn conflicted(resolution: Resolution, conflict_type: ConflictType) -> Self {
        Self {
            resolution,
            conflict: Some(conflict_type),
        }
    }

    /// Returns true if a conflict was raised.
    pub fn is_conflict(&self) -> bool {
        self.conflict.is_some()
    }
}

/// Pure decision function over a pair of copies.
///
/// The resolver reads only the metadata it is given. The same inputs and
/// strategy always yield the same decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    strategy: ConflictResolutionStrategy,
}

impl ConflictResolver {
    /// Creates a resolver for the given strategy.
    pub fn new(strategy: ConflictResolutionStrategy) -> Self {
        Self { strategy }
    }

    /// Returns the configured strategy.
    pub fn strategy(&self) -> ConflictResolutionStrategy {
        self.strategy
    }

    /// Decides between the client (`local`) and server (`remote`) copies.
    ///
    /// A conflict is only raised when both copies have been synced before
    /// and they diverged in a way a fast-forward cannot explain.
    pub fn resolve(&self, local: &SyncMetadata, remote: &SyncMetadata) -> ConflictDecision {
        if local.same_state(remote) {
            return ConflictDecision::clean(Resolution::Skip);
        }

        if !local.has_synced() || !remote.has_synced() {
            return ConflictDecision::clean(by_version(local, remote));
        }

        let local_dirty = local.is_modified_since_sync();
        let remote_dirty = remote.is_modified_since_sync();

        match (local_dirty, remote_dirty) {
            (true, false) if local.version >= remote.version => {
                return ConflictDecision::clean(Resolution::ApplyLocal);
            }
            (false, true) if remote.version >= local.version => {
                return ConflictDecision::clean(Resolution::ApplyRemote);
            }
            _ => {}
        }

        let conflict_type = classify(local, remote, local_dirty && remote_dirty);
        ConflictDecision::conflicted(self.apply_strategy(local, remote), conflict_type)
    }

    fn apply_strategy(&self, local: &SyncMetadata, remote: &SyncMetadata) -> Resolution {
        match self.strategy {
            ConflictResolutionStrategy::ServerWins => Resolution::ApplyRemote,
            ConflictResolutionStrategy::ClientWins => Resolution::ApplyLocal,
            ConflictResolutionStrategy::LastWriteWins => by_recency(local, remote),
            ConflictResolutionStrategy::HighestVersionWins => by_version(local, remote),
            ConflictResolutionStrategy::ManualResolution => Resolution::RequireManual,
        }
    }
}

fn classify(local: &SyncMetadata, remote: &SyncMetadata, both_modified: bool) -> ConflictType {
    if local.is_deleted && !remote.is_deleted {
        ConflictType::DeletedLocal
    } else if remote.is_deleted && !local.is_deleted {
        ConflictType::DeletedServer
    } else if both_modified {
        ConflictType::BothModified
    } else if local.version != remote.version {
        ConflictType::VersionMismatch
    } else {
        ConflictType::DataCorruption
    }
}

/// Later modification wins; a tie goes to the server.
fn by_recency(local: &SyncMetadata, remote: &SyncMetadata) -> Resolution {
    if local.last_modified_utc > remote.last_modified_utc {
        Resolution::ApplyLocal
    } else {
        Resolution::ApplyRemote
    }
}

/// Higher version wins; a tie falls back to recency.
fn by_version(local: &SyncMetadata, remote: &SyncMetadata) -> Resolution {
    match local.version.cmp(&remote.version) {
        std::cmp::Ordering::Greater => Resolution::ApplyLocal,
        std::cmp::Ordering::Less => Resolution::ApplyRemote,
        std::cmp::Ordering::Equal => by_recency(local, remote),
    }
}
