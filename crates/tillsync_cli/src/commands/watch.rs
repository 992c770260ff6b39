//! Watch command implementation.

use std::sync::Arc;
use std::time::Duration;
use tillsync_engine::{AutoSyncScheduler, SyncOrchestrator};

/// Syncs on a timer until Ctrl-C.
///
/// `interval` overrides `AutoSyncIntervalMinutes`.
pub async fn run(
    orchestrator: Arc<SyncOrchestrator>,
    interval: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut scheduler = AutoSyncScheduler::new(orchestrator);
    if let Some(interval) = interval {
        scheduler = scheduler.with_interval(interval);
    }
    scheduler.start()?;
    println!(
        "Syncing every {}s, press Ctrl-C to stop",
        scheduler.interval().as_secs()
    );

    tokio::signal::ctrl_c().await?;
    scheduler.stop().await;
    println!("Stopped after {} run(s)", scheduler.run_count());
    Ok(())
}
