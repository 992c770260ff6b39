//! Run orchestration across registered entity types.
//!
//! The orchestrator owns the single-flight lock, the connectivity
//! pre-flight, the whole-run timeout, the manual conflict queue and the
//! history log. Entity types run one after another in dependency order;
//! a failing type is reported and the next one still runs.

use crate::cancel::CancelToken;
use crate::config::{RetryPolicy, SyncConfiguration, SyncMode};
use crate::error::{EngineError, EngineResult};
use crate::history::{MemoryHistory, SyncHistoryStore};
use crate::probe::{ConnectivityProbe, StoreProbe};
use crate::syncer::{EntityPass, EntitySyncer, PassDirection};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tillsync_protocol::{
    ConflictResolution, PendingInfo, SyncConflict, SyncDirection, SyncError, SyncErrorType,
    SyncHistoryEntry, SyncResult, SyncableRecord,
};
use tillsync_store::EntityStore;
use uuid::Uuid;

/// Directions a registered entity type takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncScope {
    /// Uploaded and downloaded.
    #[default]
    Both,
    /// Only uploaded, e.g. sales recorded at the till.
    UploadOnly,
    /// Only downloaded, e.g. catalog data owned by head office.
    DownloadOnly,
}

impl SyncScope {
    /// Returns true if passes in `direction` include this type.
    pub fn includes(&self, direction: PassDirection) -> bool {
        matches!(
            (self, direction),
            (SyncScope::Both, _)
                | (SyncScope::UploadOnly, PassDirection::Upload)
                | (SyncScope::DownloadOnly, PassDirection::Download)
        )
    }
}

/// Where the orchestrator is in its run cycle.
///
/// `Succeeded` and `Failed` describe the last finished run; like `Idle`
/// they accept a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has happened yet.
    Idle,
    /// A run holds the lock.
    Running,
    /// The last run finished without errors.
    Succeeded,
    /// The last run finished with errors.
    Failed,
}

impl RunState {
    /// Returns true while a run is in progress.
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }
}

/// Holds [`RunState::Running`] for the life of a run. A run dropped before
/// it finishes leaves the state at `Failed`.
struct RunningState<'a> {
    state: &'a RwLock<RunState>,
    finished: bool,
}

impl<'a> RunningState<'a> {
    fn enter(state: &'a RwLock<RunState>) -> Self {
        *state.write() = RunState::Running;
        Self {
            state,
            finished: false,
        }
    }

    fn finish(mut self, outcome: RunState) {
        *self.state.write() = outcome;
        self.finished = true;
    }
}

impl Drop for RunningState<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("sync abandoned before it finished");
            *self.state.write() = RunState::Failed;
        }
    }
}

/// Pass directions a run covers, in execution order.
fn pass_plan(direction: SyncDirection) -> &'static [PassDirection] {
    match direction {
        SyncDirection::ToServer => &[PassDirection::Upload],
        SyncDirection::ToClient => &[PassDirection::Download],
        SyncDirection::Bidirectional => &[PassDirection::Upload, PassDirection::Download],
    }
}

type PassFactory = fn(
    Arc<dyn EntityStore>,
    Arc<dyn EntityStore>,
    &SyncConfiguration,
    RetryPolicy,
) -> Arc<dyn EntityPass>;

fn make_pass<T: SyncableRecord>(
    client: Arc<dyn EntityStore>,
    server: Arc<dyn EntityStore>,
    config: &SyncConfiguration,
    retry: RetryPolicy,
) -> Arc<dyn EntityPass> {
    Arc::new(EntitySyncer::<T>::new(client, server, config).with_retry_policy(retry))
}

struct Registration {
    entity_type: &'static str,
    depends_on: &'static [&'static str],
    is_attachment: bool,
    scope: SyncScope,
    factory: PassFactory,
}

struct RegisteredPass {
    scope: SyncScope,
    pass: Arc<dyn EntityPass>,
}

/// Builder for [`SyncOrchestrator`].
pub struct SyncOrchestratorBuilder {
    config: SyncConfiguration,
    client: Arc<dyn EntityStore>,
    server: Arc<dyn EntityStore>,
    registrations: Vec<Registration>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    history: Option<Arc<dyn SyncHistoryStore>>,
    retry: Option<RetryPolicy>,
}

impl SyncOrchestratorBuilder {
    /// Registers entity type `T` for the directions in `scope`.
    pub fn register<T: SyncableRecord>(mut self, scope: SyncScope) -> Self {
        self.registrations.push(Registration {
            entity_type: T::ENTITY_TYPE,
            depends_on: T::DEPENDS_ON,
            is_attachment: T::IS_ATTACHMENT,
            scope,
            factory: make_pass::<T>,
        });
        self
    }

    /// Replaces the default probe, which pings the server store.
    pub fn with_probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Replaces the default in-memory history.
    pub fn with_history(mut self, history: Arc<dyn SyncHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Overrides the retry policy derived from the configuration.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Validates the configuration, orders the registered types and
    /// applies the entity filters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if the configuration is
    /// invalid, a type is registered twice, a dependency is not registered,
    /// or dependencies form a cycle.
    pub fn build(self) -> EngineResult<SyncOrchestrator> {
        self.config.validate()?;

        let mut seen = HashSet::new();
        for registration in &self.registrations {
            if !seen.insert(registration.entity_type) {
                return Err(EngineError::Configuration(format!(
                    "entity type {} registered twice",
                    registration.entity_type
                )));
            }
        }
        for name in &self.config.entities_to_sync {
            if !self
                .registrations
                .iter()
                .any(|r| r.entity_type.eq_ignore_ascii_case(name))
            {
                tracing::warn!(entity_type = %name, "EntitiesToSync names an unregistered type");
            }
        }

        let retry = self.retry.unwrap_or_else(|| self.config.retry_policy());
        let mut passes = Vec::new();
        for registration in dependency_order(self.registrations)? {
            if !self.config.allows(registration.entity_type) {
                tracing::debug!(entity_type = registration.entity_type, "excluded by EntitiesToSync");
                continue;
            }
            if registration.is_attachment && !self.config.sync_attachments {
                tracing::debug!(entity_type = registration.entity_type, "attachments disabled");
                continue;
            }
            passes.push(RegisteredPass {
                scope: registration.scope,
                pass: (registration.factory)(
                    self.client.clone(),
                    self.server.clone(),
                    &self.config,
                    retry.clone(),
                ),
            });
        }

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(StoreProbe::new(self.server.clone())));
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(MemoryHistory::new()));

        Ok(SyncOrchestrator {
            config: self.config,
            passes,
            probe,
            history,
            retry,
            run_lock: tokio::sync::Mutex::new(()),
            state: RwLock::new(RunState::Idle),
            conflicts: Mutex::new(BTreeMap::new()),
        })
    }
}

/// Stable topological sort: among the types whose dependencies are placed,
/// the earliest registered goes next.
fn dependency_order(mut pending: Vec<Registration>) -> EngineResult<Vec<Registration>> {
    let registered: HashSet<&str> = pending.iter().map(|r| r.entity_type).collect();
    for registration in &pending {
        if let Some(missing) = registration
            .depends_on
            .iter()
            .find(|dep| !registered.contains(**dep))
        {
            return Err(EngineError::Configuration(format!(
                "{} depends on unregistered type {missing}",
                registration.entity_type
            )));
        }
    }

    let mut placed: HashSet<&'static str> = HashSet::new();
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let Some(next) = pending
            .iter()
            .position(|r| r.depends_on.iter().all(|dep| placed.contains(dep)))
        else {
            let names: Vec<_> = pending.iter().map(|r| r.entity_type).collect();
            return Err(EngineError::Configuration(format!(
                "dependency cycle among {}",
                names.join(", ")
            )));
        };
        let registration = pending.remove(next);
        placed.insert(registration.entity_type);
        ordered.push(registration);
    }
    Ok(ordered)
}

/// Drives sync runs between a client store and a server store.
///
/// At most one run executes at a time; a second caller gets a failed
/// result immediately instead of waiting. Every run that takes the lock,
/// successful or not, ends with a completed [`SyncResult`] and a history
/// entry.
pub struct SyncOrchestrator {
    config: SyncConfiguration,
    passes: Vec<RegisteredPass>,
    probe: Arc<dyn ConnectivityProbe>,
    history: Arc<dyn SyncHistoryStore>,
    retry: RetryPolicy,
    run_lock: tokio::sync::Mutex<()>,
    state: RwLock<RunState>,
    conflicts: Mutex<BTreeMap<Uuid, SyncConflict>>,
}

impl SyncOrchestrator {
    /// Starts building an orchestrator for `client` and `server`.
    pub fn builder(
        config: SyncConfiguration,
        client: Arc<dyn EntityStore>,
        server: Arc<dyn EntityStore>,
    ) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder {
            config,
            client,
            server,
            registrations: Vec::new(),
            probe: None,
            history: None,
            retry: None,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfiguration {
        &self.config
    }

    /// Entity types that take part in runs, in execution order.
    pub fn entity_types(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.pass.entity_type()).collect()
    }

    /// Returns the current run state.
    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    /// Runs the directions named by the configured [`SyncMode`].
    pub async fn sync(&self, cancel: &CancelToken) -> SyncResult {
        match self.config.mode {
            SyncMode::Bidirectional => self.sync_bidirectional(cancel).await,
            SyncMode::UploadOnly => self.sync_to_server(cancel).await,
            SyncMode::DownloadOnly => self.sync_to_client(cancel).await,
        }
    }

    /// Uploads pending client changes.
    pub async fn sync_to_server(&self, cancel: &CancelToken) -> SyncResult {
        self.run(SyncDirection::ToServer, cancel).await
    }

    /// Downloads server changes for download-scoped types.
    pub async fn sync_to_client(&self, cancel: &CancelToken) -> SyncResult {
        self.run(SyncDirection::ToClient, cancel).await
    }

    /// Uploads, then downloads, under one lock. Each direction is tallied on
    /// its own and the two are merged into one report.
    pub async fn sync_bidirectional(&self, cancel: &CancelToken) -> SyncResult {
        self.run(SyncDirection::Bidirectional, cancel).await
    }

    async fn run(&self, direction: SyncDirection, cancel: &CancelToken) -> SyncResult {
        let Ok(_guard) = self.run_lock.try_lock() else {
            tracing::warn!(%direction, "sync rejected, another run holds the lock");
            let error = SyncError::new(
                SyncErrorType::UnknownError,
                EngineError::AlreadyRunning.to_string(),
            );
            return SyncResult::rejected(direction, error, Utc::now());
        };

        let running = RunningState::enter(&self.state);
        let started = Utc::now();
        tracing::info!(%direction, entity_types = self.passes.len(), "sync started");

        let plan = pass_plan(direction);
        let mut partials: Vec<SyncResult> = plan
            .iter()
            .map(|pass| SyncResult::begin(pass.as_sync_direction(), started))
            .collect();

        let budget = self.config.timeout();
        let work = self.execute(plan, cancel, &mut partials);
        if tokio::time::timeout(budget, work).await.is_err() {
            tracing::warn!(%direction, ?budget, "sync timed out");
            if let Some(last) = partials.last_mut() {
                last.push_error(SyncError::new(
                    SyncErrorType::TimeoutError,
                    format!("sync exceeded {}s", self.config.timeout_seconds),
                ));
            }
        }

        let now = Utc::now();
        let result = partials
            .into_iter()
            .map(|partial| partial.finish(now))
            .reduce(SyncResult::merge)
            .unwrap_or_else(|| SyncResult::begin(direction, started).finish(now));

        self.queue_conflicts(&result);
        if let Err(e) = self.history.append(SyncHistoryEntry::from_result(&result)).await {
            tracing::warn!(error = %e, "could not record sync history");
        }
        running.finish(if result.success {
            RunState::Succeeded
        } else {
            RunState::Failed
        });

        tracing::info!(
            %direction,
            success = result.success,
            processed = result.statistics.total_processed,
            synced = result.statistics.records_synced(),
            errors = result.errors.len(),
            conflicts = result.conflicts.len(),
            duration_ms = result.duration().num_milliseconds(),
            "sync finished"
        );
        result
    }

    /// Checks the server, then runs each direction of `plan` into its own
    /// entry of `partials`. Stops at the first cancellation.
    async fn execute(
        &self,
        plan: &[PassDirection],
        cancel: &CancelToken,
        partials: &mut [SyncResult],
    ) {
        if !self.check_server_with_retry(cancel).await {
            let error = if cancel.is_cancelled() {
                SyncError::new(SyncErrorType::Cancelled, "sync cancelled")
            } else {
                SyncError::new(SyncErrorType::NetworkError, "server unreachable")
            };
            if let Some(first) = partials.first_mut() {
                first.push_error(error);
            }
            return;
        }

        for (&pass_direction, result) in plan.iter().zip(partials.iter_mut()) {
            if !self.run_direction(pass_direction, cancel, result).await {
                return;
            }
        }
    }

    async fn check_server_with_retry(&self, cancel: &CancelToken) -> bool {
        let attempts = self.retry.attempts();
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt);
                tracing::debug!(attempt, ?delay, "checking server again");
                tokio::time::sleep(delay).await;
            }
            if cancel.is_cancelled() {
                return false;
            }
            if self.probe.check(cancel).await {
                return true;
            }
        }
        false
    }

    /// Runs every type scoped for `pass_direction`. Returns false if the
    /// run was cancelled.
    async fn run_direction(
        &self,
        pass_direction: PassDirection,
        cancel: &CancelToken,
        result: &mut SyncResult,
    ) -> bool {
        for registered in self.passes.iter().filter(|p| p.scope.includes(pass_direction)) {
            let entity_type = registered.pass.entity_type();
            if cancel.is_cancelled() {
                result.push_error(SyncError::new(SyncErrorType::Cancelled, "sync cancelled"));
                return false;
            }

            match registered.pass.sync_pass(pass_direction, cancel, result).await {
                Ok(()) => {}
                Err(EngineError::Cancelled) => {
                    result.push_error(
                        SyncError::new(SyncErrorType::Cancelled, "sync cancelled")
                            .for_entity(entity_type, None),
                    );
                    return false;
                }
                Err(e) => {
                    tracing::warn!(
                        entity_type,
                        direction = %pass_direction.as_sync_direction(),
                        error = %e,
                        "entity pass failed"
                    );
                    result.push_error(
                        SyncError::new(e.error_type(), e.to_string())
                            .for_entity(entity_type, None)
                            .with_context(format!("{} pass", pass_direction.as_sync_direction()))
                            .retryable(e.is_retryable()),
                    );
                }
            }
        }
        true
    }

    /// Adds the run's manual conflicts to the queue and drops queued ones
    /// the run resolved.
    fn queue_conflicts(&self, result: &SyncResult) {
        let mut queue = self.conflicts.lock();
        for conflict in &result.conflicts {
            if conflict.is_pending() {
                queue.insert(conflict.id, conflict.clone());
            } else {
                queue.remove(&conflict.id);
            }
        }
    }

    /// Conflicts waiting for manual resolution, oldest first.
    pub fn pending_conflicts(&self) -> Vec<SyncConflict> {
        let mut conflicts: Vec<_> = self.conflicts.lock().values().cloned().collect();
        conflicts.sort_by_key(|c| c.detected_at);
        conflicts
    }

    /// Looks for manual conflicts in the stores without syncing and adds
    /// them to the queue.
    ///
    /// A fresh process has an empty queue; this rebuilds it.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be read or `cancel` fires.
    pub async fn scan_conflicts(&self, cancel: &CancelToken) -> EngineResult<Vec<SyncConflict>> {
        let mut found = Vec::new();
        for registered in &self.passes {
            found.extend(registered.pass.scan_conflicts(cancel).await?);
        }
        let mut queue = self.conflicts.lock();
        for conflict in &found {
            queue.insert(conflict.id, conflict.clone());
        }
        Ok(found)
    }

    /// Applies a person's decision to a queued conflict.
    ///
    /// `Skip` dismisses the conflict without writing; the next run detects
    /// it again if the copies still diverge.
    ///
    /// # Errors
    ///
    /// Returns an error if no conflict has this id, a run is in progress,
    /// the entity type cannot merge, or a store write fails. The conflict
    /// stays queued on error.
    pub async fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        resolution: ConflictResolution,
    ) -> EngineResult<()> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return Err(EngineError::AlreadyRunning);
        };
        let conflict = self
            .conflicts
            .lock()
            .get(&conflict_id)
            .cloned()
            .ok_or(EngineError::ConflictNotFound(conflict_id))?;
        let registered = self
            .passes
            .iter()
            .find(|p| p.pass.entity_type() == conflict.entity_type)
            .ok_or_else(|| EngineError::UnknownEntityType(conflict.entity_type.clone()))?;

        registered
            .pass
            .resolve_manually(conflict.entity_id, resolution)
            .await?;
        self.conflicts.lock().remove(&conflict_id);
        Ok(())
    }

    /// Returns true if any client record awaits upload or any conflict
    /// awaits a decision.
    ///
    /// # Errors
    ///
    /// Returns an error if the client store cannot be read.
    pub async fn has_pending_changes(&self) -> EngineResult<bool> {
        Ok(self.pending_changes_info().await?.has_pending())
    }

    /// Counts pending client records per uploadable entity type.
    ///
    /// Reads only; never contacts the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the client store or the history cannot be read.
    pub async fn pending_changes_info(&self) -> EngineResult<PendingInfo> {
        let mut info = PendingInfo::default();
        for registered in &self.passes {
            if !registered.scope.includes(PassDirection::Upload) {
                continue;
            }
            let count = registered.pass.pending_count().await?;
            if count > 0 {
                info.by_entity_type
                    .insert(registered.pass.entity_type().to_string(), count);
                info.total_pending += count;
            }
        }
        info.unresolved_conflicts = self.conflicts.lock().len();
        info.last_successful_sync = self
            .history
            .last_successful()
            .await?
            .map(|entry| entry.started_at);
        Ok(info)
    }

    /// Probes the server once.
    pub async fn test_server_connection(&self, cancel: &CancelToken) -> bool {
        let reachable = self.probe.check(cancel).await;
        tracing::info!(reachable, "server connection test");
        reachable
    }

    /// Up to `count` history entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be read.
    pub async fn sync_history(&self, count: usize) -> EngineResult<Vec<SyncHistoryEntry>> {
        self.history.recent(count).await
    }

    /// Drops history entries and queued conflicts older than
    /// `days_to_keep` days. Returns the number of history entries removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the history cannot be rewritten.
    pub async fn cleanup_old_sync_data(&self, days_to_keep: u32) -> EngineResult<usize> {
        let cutoff = Utc::now()
            .checked_sub_signed(ChronoDuration::days(i64::from(days_to_keep)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.history.prune_older_than(cutoff).await?;

        let dropped = {
            let mut queue = self.conflicts.lock();
            let before = queue.len();
            queue.retain(|_, c| c.detected_at >= cutoff);
            before - queue.len()
        };
        tracing::info!(days_to_keep, history_removed = removed, conflicts_dropped = dropped, "old sync data cleaned up");
        Ok(removed)
    }
}
