//! Pending command implementation.

use super::{print_json, Format};
use tillsync_engine::SyncOrchestrator;

/// Runs the pending command. Never contacts the server.
pub async fn run(
    orchestrator: &SyncOrchestrator,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = orchestrator.pending_changes_info().await?;
    if format == Format::Json {
        return print_json(&info);
    }

    if !info.has_pending() {
        println!("Nothing to upload");
    } else {
        println!("{} record(s) waiting to upload", info.total_pending);
        for (entity_type, count) in &info.by_entity_type {
            println!("  {entity_type:<16} {count}");
        }
    }
    match info.last_successful_sync {
        Some(at) => println!("Last successful sync: {}", at.to_rfc3339()),
        None => println!("No successful sync recorded"),
    }
    Ok(())
}
