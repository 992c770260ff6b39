//! Cleanup command implementation.

use tillsync_engine::SyncOrchestrator;

/// Runs the cleanup command.
pub async fn run(
    orchestrator: &SyncOrchestrator,
    days_to_keep: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let removed = orchestrator.cleanup_old_sync_data(days_to_keep).await?;
    println!("Removed {removed} history entries older than {days_to_keep} day(s)");
    Ok(())
}
