//! History command implementation.

use super::{print_json, Format};
use tillsync_engine::SyncOrchestrator;

/// Runs the history command.
pub async fn run(
    orchestrator: &SyncOrchestrator,
    count: usize,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = orchestrator.sync_history(count).await?;
    if format == Format::Json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No sync runs recorded");
        return Ok(());
    }
    for entry in &entries {
        let mark = if entry.success { "✓" } else { "✗" };
        println!(
            "{mark} {} {:<13} {:>6} ms  processed {:>5}  synced {:>5}  conflicts {:>3}",
            entry.started_at.format("%Y-%m-%d %H:%M:%S"),
            entry.direction.to_string(),
            entry.duration_ms,
            entry.records_processed,
            entry.records_synced,
            entry.conflicts,
        );
        if let Some(message) = &entry.error_message {
            println!("    {message}");
        }
    }
    Ok(())
}
