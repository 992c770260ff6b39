//! Timer-driven background sync.

use crate::cancel::CancelToken;
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::SyncOrchestrator;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Runs [`SyncOrchestrator::sync`] every `AutoSyncIntervalMinutes`.
///
/// The first run happens one interval after [`start`](Self::start). A tick
/// that arrives while the previous run is still going is skipped rather
/// than queued.
pub struct AutoSyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    running: Arc<AtomicBool>,
    runs: Arc<AtomicU64>,
    task: Mutex<Option<Task>>,
}

struct Task {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
    cancel: CancelToken,
}

impl AutoSyncScheduler {
    /// Creates a stopped scheduler using the orchestrator's interval.
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        let interval = orchestrator.config().auto_sync_interval();
        Self {
            orchestrator,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Overrides the interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true while the background task is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs started by this scheduler so far.
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Spawns the background task.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if auto-sync is disabled, the
    /// interval is zero, or the scheduler is already running.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) -> EngineResult<()> {
        if !self.orchestrator.config().enable_auto_sync {
            return Err(EngineError::Configuration("EnableAutoSync is off".into()));
        }
        if self.interval.is_zero() {
            return Err(EngineError::Configuration(
                "auto-sync interval must be positive".into(),
            ));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Configuration(
                "auto-sync scheduler already running".into(),
            ));
        }

        let cancel = CancelToken::new();
        let shutdown = Arc::new(Notify::new());

        let orchestrator = self.orchestrator.clone();
        let running = self.running.clone();
        let runs = self.runs.clone();
        let task_cancel = cancel.clone();
        let task_shutdown = shutdown.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval = ?period, "auto-sync started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = task_shutdown.notified() => break,
                }
                if task_cancel.is_cancelled() {
                    break;
                }

                runs.fetch_add(1, Ordering::SeqCst);
                let result = orchestrator.sync(&task_cancel).await;
                if result.success {
                    tracing::info!(message = %result.message, "scheduled sync finished");
                } else {
                    tracing::warn!(message = %result.message, errors = result.errors.len(), "scheduled sync failed");
                }
            }

            running.store(false, Ordering::SeqCst);
            tracing::info!("auto-sync stopped");
        });
        *self.task.lock() = Some(Task {
            handle,
            shutdown,
            cancel,
        });
        Ok(())
    }

    /// Stops the background task, cancelling a run in progress, and waits
    /// for it to exit. Does nothing if the scheduler is stopped.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            task.shutdown.notify_one();
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "auto-sync task ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for AutoSyncScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryPolicy, SyncConfiguration};
    use tillsync_store::MemoryStore;

    fn orchestrator(config: SyncConfiguration) -> Arc<SyncOrchestrator> {
        let orchestrator = SyncOrchestrator::builder(
            config,
            Arc::new(MemoryStore::new("client")),
            Arc::new(MemoryStore::new("server")),
        )
        .with_retry_policy(RetryPolicy::no_retry())
        .build()
        .unwrap();
        Arc::new(orchestrator)
    }

    #[tokio::test]
    async fn runs_on_each_tick_until_stopped() {
        let orchestrator = orchestrator(SyncConfiguration::new().with_auto_sync(15));
        let scheduler = AutoSyncScheduler::new(orchestrator.clone())
            .with_interval(Duration::from_millis(20));
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        let runs = scheduler.run_count();
        assert!(runs >= 2, "expected several runs, got {runs}");
        assert_eq!(orchestrator.sync_history(100).await.unwrap().len() as u64, runs);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(scheduler.run_count(), runs);
    }

    #[tokio::test]
    async fn start_requires_auto_sync() {
        let scheduler = AutoSyncScheduler::new(orchestrator(SyncConfiguration::new()));
        assert!(scheduler.start().is_err());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let scheduler = AutoSyncScheduler::new(orchestrator(SyncConfiguration::new().with_auto_sync(1)));
        assert_eq!(scheduler.interval(), Duration::from_secs(60));
        scheduler.start().unwrap();
        assert!(scheduler.start().is_err());
        scheduler.stop().await;
    }
}
