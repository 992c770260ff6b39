//! Run reports: statistics, errors, results and history entries.

use crate::conflict::SyncConflict;
use crate::record::SyncGuid;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Direction of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Client store to server store.
    ToServer,
    /// Server store to client store.
    ToClient,
    /// Upload followed by download.
    Bidirectional,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncDirection::ToServer => "to-server",
            SyncDirection::ToClient => "to-client",
            SyncDirection::Bidirectional => "bidirectional",
        })
    }
}

/// Category of a recorded sync error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncErrorType {
    /// Connectivity probe or store round-trip failure.
    NetworkError,
    /// Store-level failure on an individual record.
    DatabaseError,
    /// A record failed a structural precondition.
    ValidationError,
    /// A conflict could not be resolved.
    ConflictError,
    /// The run exceeded its time budget.
    TimeoutError,
    /// The store refused our credentials.
    AuthenticationError,
    /// Anything else.
    UnknownError,
    /// The caller cancelled the run.
    Cancelled,
}

impl SyncErrorType {
    /// Whether errors of this type are worth retrying by default.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncErrorType::NetworkError | SyncErrorType::TimeoutError)
    }
}

/// An error recorded during a run.
///
/// Unlike a Rust error value this is a report entry: runs collect them and
/// keep going.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncError {
    /// When the error happened.
    pub occurred_at: DateTime<Utc>,
    /// Entity type being processed, if any.
    pub entity_type: Option<String>,
    /// Record being processed, if any.
    pub entity_id: Option<SyncGuid>,
    /// Human-readable message.
    pub message: String,
    /// Extra diagnostic context.
    pub context: Option<String>,
    /// Error category.
    pub error_type: SyncErrorType,
    /// Whether a later run could succeed without intervention.
    pub retryable: bool,
}

impl SyncError {
    /// Creates a run-level error.
    pub fn new(error_type: SyncErrorType, message: impl Into<String>) -> Self {
        Self {
            occurred_at: Utc::now(),
            entity_type: None,
            entity_id: None,
            message: message.into(),
            context: None,
            error_type,
            retryable: error_type.is_retryable(),
        }
    }

    /// Attaches the entity type and record identity.
    pub fn for_entity(mut self, entity_type: impl Into<String>, entity_id: Option<SyncGuid>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = entity_id;
        self
    }

    /// Attaches diagnostic context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Overrides the retryable flag.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}]", self.error_type)?;
        if let Some(entity_type) = &self.entity_type {
            write!(f, " {entity_type}")?;
        }
        if let Some(id) = &self.entity_id {
            write!(f, " {id}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Records examined.
    pub total_processed: u64,
    /// Records inserted into the destination.
    pub inserted: u64,
    /// Records overwritten in the destination.
    pub updated: u64,
    /// Tombstones applied to the destination.
    pub deleted: u64,
    /// Records left untouched.
    pub skipped: u64,
    /// Records that failed.
    pub failed: u64,
    /// Conflicts resolved automatically.
    pub conflicts_resolved: u64,
    /// Payload bytes written to the destination.
    pub bytes_transferred: u64,
    /// Records examined per entity type.
    pub processed_by_entity: BTreeMap<String, u64>,
}

impl SyncStatistics {
    /// Counts one examined record of `entity_type`.
    pub fn record_processed(&mut self, entity_type: &str) {
        self.total_processed += 1;
        *self
            .processed_by_entity
            .entry(entity_type.to_string())
            .or_insert(0) += 1;
    }

    /// Records that changed the destination.
    pub fn records_synced(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }

    /// Adds another set of counters to this one.
    pub fn absorb(&mut self, other: &SyncStatistics) {
        self.total_processed += other.total_processed;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.conflicts_resolved += other.conflicts_resolved;
        self.bytes_transferred += other.bytes_transferred;
        for (entity_type, count) in &other.processed_by_entity {
            *self.processed_by_entity.entry(entity_type.clone()).or_insert(0) += count;
        }
    }
}

/// Report for one orchestrated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Run direction.
    pub direction: SyncDirection,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time; `None` while running.
    pub completed_at: Option<DateTime<Utc>>,
    /// True when the run finished without errors.
    pub success: bool,
    /// Counters.
    pub statistics: SyncStatistics,
    /// Errors in the order they occurred.
    pub errors: Vec<SyncError>,
    /// Conflicts in the order they were detected.
    pub conflicts: Vec<SyncConflict>,
    /// Human-readable summary.
    pub message: String,
}

impl SyncResult {
    /// Starts a report for a run beginning at `now`.
    pub fn begin(direction: SyncDirection, now: DateTime<Utc>) -> Self {
        Self {
            direction,
            started_at: now,
            completed_at: None,
            success: false,
            statistics: SyncStatistics::default(),
            errors: Vec::new(),
            conflicts: Vec::new(),
            message: String::new(),
        }
    }

    /// A run that was refused before touching any data.
    pub fn rejected(
        direction: SyncDirection,
        error: SyncError,
        now: DateTime<Utc>,
    ) -> Self {
        let mut result = Self::begin(direction, now);
        result.message = error.message.clone();
        result.errors.push(error);
        result.finish(now)
    }

    /// Appends an error.
    pub fn push_error(&mut self, error: SyncError) {
        self.errors.push(error);
    }

    /// Appends a conflict unless one for the same record is already
    /// recorded. Returns true if the conflict was added.
    ///
    /// A bidirectional run sees a diverged record once per direction; it is
    /// reported once.
    pub fn push_conflict(&mut self, conflict: SyncConflict) -> bool {
        let duplicate = self
            .conflicts
            .iter()
            .any(|c| c.entity_type == conflict.entity_type && c.entity_id == conflict.entity_id);
        if duplicate {
            return false;
        }
        self.conflicts.push(conflict);
        true
    }

    /// Returns true if the run has completed.
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Conflicts still waiting for a person.
    pub fn pending_conflicts(&self) -> impl Iterator<Item = &SyncConflict> {
        self.conflicts.iter().filter(|c| c.is_pending())
    }

    /// Closes the report at `now`.
    ///
    /// Success means no errors were recorded; queued manual conflicts do not
    /// fail a run. A summary message is generated unless one was set.
    pub fn finish(mut self, now: DateTime<Utc>) -> Self {
        self.completed_at = Some(now);
        self.success = self.errors.is_empty();
        if self.message.is_empty() {
            self.message = self.summary();
        }
        self
    }

    /// Wall-clock duration, or zero while running.
    pub fn duration(&self) -> Duration {
        self.completed_at
            .map(|end| end - self.started_at)
            .unwrap_or_else(Duration::zero)
    }

    fn summary(&self) -> String {
        let stats = &self.statistics;
        let outcome = if self.success { "completed" } else { "completed with errors" };
        format!(
            "sync {} {}: {} processed, {} inserted, {} updated, {} deleted, {} skipped, {} failed, {} conflicts",
            self.direction,
            outcome,
            stats.total_processed,
            stats.inserted,
            stats.updated,
            stats.deleted,
            stats.skipped,
            stats.failed,
            self.conflicts.len(),
        )
    }

    /// Combines an upload report and a download report into one
    /// bidirectional report.
    ///
    /// Conflicts are de-duplicated per record and the resolved-conflict
    /// counter is recomputed from the surviving list.
    pub fn merge(upload: SyncResult, download: SyncResult) -> SyncResult {
        let mut merged = SyncResult::begin(SyncDirection::Bidirectional, upload.started_at);
        merged.statistics.absorb(&upload.statistics);
        merged.statistics.absorb(&download.statistics);
        merged.errors = upload.errors;
        merged.errors.extend(download.errors);
        for conflict in upload.conflicts.into_iter().chain(download.conflicts) {
            merged.push_conflict(conflict);
        }
        merged.statistics.conflicts_resolved =
            merged.conflicts.iter().filter(|c| !c.is_pending()).count() as u64;

        let completed_at = download
            .completed_at
            .or(upload.completed_at)
            .unwrap_or(download.started_at);
        merged.finish(completed_at)
    }
}

/// One line of the append-only history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Run end time.
    pub completed_at: DateTime<Utc>,
    /// Run duration in milliseconds.
    pub duration_ms: i64,
    /// Run direction.
    pub direction: SyncDirection,
    /// Whether the run succeeded.
    pub success: bool,
    /// Records examined.
    pub records_processed: u64,
    /// Records that changed the destination.
    pub records_synced: u64,
    /// Conflicts detected.
    pub conflicts: usize,
    /// Errors recorded.
    pub errors: usize,
    /// First error message, if any.
    pub error_message: Option<String>,
}

impl SyncHistoryEntry {
    /// Summarizes a completed run.
    pub fn from_result(result: &SyncResult) -> Self {
        let completed_at = result.completed_at.unwrap_or(result.started_at);
        Self {
            id: Uuid::new_v4(),
            started_at: result.started_at,
            completed_at,
            duration_ms: (completed_at - result.started_at).num_milliseconds(),
            direction: result.direction,
            success: result.success,
            records_processed: result.statistics.total_processed,
            records_synced: result.statistics.records_synced(),
            conflicts: result.conflicts.len(),
            errors: result.errors.len(),
            error_message: result.errors.first().map(|e| e.message.clone()),
        }
    }
}

/// Read-only view of unsynced local work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInfo {
    /// Pending records across all entity types.
    pub total_pending: u64,
    /// Pending records per entity type.
    pub by_entity_type: BTreeMap<String, u64>,
    /// Conflicts queued for manual resolution.
    pub unresolved_conflicts: usize,
    /// Start time of the most recent successful run, if known.
    pub last_successful_sync: Option<DateTime<Utc>>,
}

impl PendingInfo {
    /// Returns true if anything still needs to be uploaded or decided.
    pub fn has_pending(&self) -> bool {
        self.total_pending > 0 || self.unresolved_conflicts > 0
    }
}
