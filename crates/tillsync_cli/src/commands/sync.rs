//! Sync command implementation.

use super::{cancel_on_ctrl_c, print_json, Format};
use clap::ValueEnum;
use tillsync_engine::SyncOrchestrator;
use tillsync_protocol::SyncResult;

/// Directions a single invocation can cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    /// Client to server only.
    Up,
    /// Server to client only.
    Down,
    /// Upload then download.
    Both,
}

/// Runs the sync command.
///
/// Without a direction the configured mode decides.
pub async fn run(
    orchestrator: &SyncOrchestrator,
    direction: Option<Direction>,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = cancel_on_ctrl_c();
    let result = match direction {
        Some(Direction::Up) => orchestrator.sync_to_server(&cancel).await,
        Some(Direction::Down) => orchestrator.sync_to_client(&cancel).await,
        Some(Direction::Both) => orchestrator.sync_bidirectional(&cancel).await,
        None => orchestrator.sync(&cancel).await,
    };

    match format {
        Format::Json => print_json(&result)?,
        Format::Text => print_text(&result),
    }

    if result.success {
        Ok(())
    } else {
        Err(result.message.into())
    }
}

fn print_text(result: &SyncResult) {
    let stats = &result.statistics;
    println!("Sync {} ({} ms)", result.direction, result.duration().num_milliseconds());
    println!("  {}", result.message);
    println!();
    println!("  Processed:   {}", stats.total_processed);
    println!("  Inserted:    {}", stats.inserted);
    println!("  Updated:     {}", stats.updated);
    println!("  Deleted:     {}", stats.deleted);
    println!("  Skipped:     {}", stats.skipped);
    println!("  Failed:      {}", stats.failed);
    println!("  Resolved:    {}", stats.conflicts_resolved);
    println!("  Bytes:       {}", stats.bytes_transferred);

    if !stats.processed_by_entity.is_empty() {
        println!();
        for (entity_type, count) in &stats.processed_by_entity {
            println!("  {entity_type:<16} {count}");
        }
    }

    let pending: Vec<_> = result.pending_conflicts().collect();
    if !pending.is_empty() {
        println!();
        println!("  {} conflict(s) need a decision, see `tillsync conflicts`", pending.len());
    }

    if !result.errors.is_empty() {
        println!();
        for error in &result.errors {
            println!("  ✗ {error}");
        }
    }
}
