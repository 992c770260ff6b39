//! Configuration for the sync engine.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tillsync_protocol::ConflictResolutionStrategy;

/// Which directions a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// Upload then download.
    #[default]
    Bidirectional,
    /// Client to server only.
    UploadOnly,
    /// Server to client only.
    DownloadOnly,
}

/// Sync policy, read once when an orchestrator is built.
///
/// Serialized with PascalCase keys. Missing keys take their defaults, so an
/// empty document `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SyncConfiguration {
    /// Run syncs on a timer.
    pub enable_auto_sync: bool,
    /// Timer interval in minutes.
    pub auto_sync_interval_minutes: u64,
    /// Attempts for transient store failures, first attempt included.
    pub max_retry_attempts: u32,
    /// Base delay between attempts.
    pub retry_delay_seconds: u64,
    /// Records fetched per batch.
    pub batch_size: usize,
    /// Budget for a whole run.
    pub timeout_seconds: u64,
    /// Entity types to sync. Empty means all registered types.
    pub entities_to_sync: Vec<String>,
    /// Strategy for genuine conflicts.
    pub conflict_resolution: ConflictResolutionStrategy,
    /// Only records modified in the last N days (pending records are always
    /// included). Zero means no window.
    pub sync_last_days_only: u32,
    /// Count transferred bytes as compressed payloads.
    pub enable_compression: bool,
    /// Include attachment entity types.
    pub sync_attachments: bool,
    /// Directions covered by [`sync`](crate::SyncOrchestrator::sync).
    pub mode: SyncMode,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            enable_auto_sync: false,
            auto_sync_interval_minutes: 15,
            max_retry_attempts: 3,
            retry_delay_seconds: 5,
            batch_size: 100,
            timeout_seconds: 300,
            entities_to_sync: Vec::new(),
            conflict_resolution: ConflictResolutionStrategy::ServerWins,
            sync_last_days_only: 0,
            enable_compression: false,
            sync_attachments: true,
            mode: SyncMode::Bidirectional,
        }
    }
}

impl SyncConfiguration {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration document and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or invalid.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub async fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            EngineError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Checks the values that would make a run impossible.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] naming the offending key.
    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_size == 0 {
            return Err(EngineError::Configuration("BatchSize must be at least 1".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(EngineError::Configuration(
                "TimeoutSeconds must be at least 1".into(),
            ));
        }
        if self.enable_auto_sync && self.auto_sync_interval_minutes == 0 {
            return Err(EngineError::Configuration(
                "AutoSyncIntervalMinutes must be at least 1 when auto-sync is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the conflict strategy.
    pub fn with_conflict_resolution(mut self, strategy: ConflictResolutionStrategy) -> Self {
        self.conflict_resolution = strategy;
        self
    }

    /// Sets the run timeout.
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets retry attempts and base delay.
    pub fn with_retry(mut self, attempts: u32, delay_seconds: u64) -> Self {
        self.max_retry_attempts = attempts;
        self.retry_delay_seconds = delay_seconds;
        self
    }

    /// Restricts the run to the named entity types.
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities_to_sync = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the trailing-days window.
    pub fn with_last_days_only(mut self, days: u32) -> Self {
        self.sync_last_days_only = days;
        self
    }

    /// Enables or disables compressed byte accounting.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    /// Includes or excludes attachment types.
    pub fn with_attachments(mut self, enabled: bool) -> Self {
        self.sync_attachments = enabled;
        self
    }

    /// Sets the run mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Enables auto-sync at the given interval.
    pub fn with_auto_sync(mut self, interval_minutes: u64) -> Self {
        self.enable_auto_sync = true;
        self.auto_sync_interval_minutes = interval_minutes;
        self
    }

    /// Returns true if `entity_type` passes the allow-list.
    pub fn allows(&self, entity_type: &str) -> bool {
        self.entities_to_sync.is_empty()
            || self
                .entities_to_sync
                .iter()
                .any(|name| name.eq_ignore_ascii_case(entity_type))
    }

    /// Start of the trailing window relative to `now`, if one is set. A
    /// window reaching past the earliest representable time starts there.
    pub fn window_start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.sync_last_days_only > 0).then(|| {
            now.checked_sub_signed(ChronoDuration::days(i64::from(self.sync_last_days_only)))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }

    /// Budget for a whole run.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Auto-sync interval.
    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_minutes.saturating_mul(60))
    }

    /// Retry policy for transient store failures. The delay cap is a
    /// minute, or the configured delay if that is longer.
    pub fn retry_policy(&self) -> RetryPolicy {
        let initial = Duration::from_secs(self.retry_delay_seconds);
        RetryPolicy::new(self.max_retry_attempts)
            .with_initial_delay(initial)
            .with_max_delay(initial.max(Duration::from_secs(60)))
    }
}

/// Backoff for transient store-connectivity failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts, first one included. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter.
    pub add_jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy with `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A policy that tries once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Number of attempts, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before the given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        let total = if self.add_jitter && delay_secs > 0.0 {
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0)
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(total).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
