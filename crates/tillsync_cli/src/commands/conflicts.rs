//! Conflicts command implementation.

use super::{cancel_on_ctrl_c, print_json, Format};
use tillsync_engine::SyncOrchestrator;

/// Runs the conflicts command.
///
/// The queue lives in memory, so the stores are scanned first.
pub async fn run(
    orchestrator: &SyncOrchestrator,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    orchestrator.scan_conflicts(&cancel_on_ctrl_c()).await?;
    let conflicts = orchestrator.pending_conflicts();
    if format == Format::Json {
        return print_json(&conflicts);
    }

    if conflicts.is_empty() {
        println!("No conflicts waiting for a decision");
        return Ok(());
    }
    for conflict in &conflicts {
        println!("{}", conflict.id);
        println!("  {} {}", conflict.entity_type, conflict.entity_id);
        println!("  type:   {:?}", conflict.conflict_type);
        println!(
            "  local:  v{} modified {}",
            conflict.local_version,
            conflict.local_modified_utc.to_rfc3339()
        );
        println!(
            "  remote: v{} modified {}",
            conflict.remote_version,
            conflict.remote_modified_utc.to_rfc3339()
        );
    }
    println!();
    println!("Resolve with `tillsync resolve <ID> <local|remote|merge|skip>`");
    Ok(())
}
