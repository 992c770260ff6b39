//! Resolve command implementation.

use super::cancel_on_ctrl_c;
use tillsync_engine::SyncOrchestrator;
use tillsync_protocol::ConflictResolution;
use uuid::Uuid;

/// Runs the resolve command.
pub async fn run(
    orchestrator: &SyncOrchestrator,
    conflict_id: Uuid,
    resolution: ConflictResolution,
) -> Result<(), Box<dyn std::error::Error>> {
    if resolution == ConflictResolution::ManualRequired {
        return Err("choose local, remote, merge or skip".into());
    }
    orchestrator.scan_conflicts(&cancel_on_ctrl_c()).await?;
    orchestrator.resolve_conflict(conflict_id, resolution).await?;
    println!("✓ Conflict {conflict_id} resolved with {resolution:?}");
    Ok(())
}
