//! Check command implementation.

use tillsync_engine::{CancelToken, SyncOrchestrator};

/// Runs the check command.
pub async fn run(orchestrator: &SyncOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    if orchestrator.test_server_connection(&CancelToken::new()).await {
        println!("✓ Server reachable");
        Ok(())
    } else {
        println!("✗ Server unreachable");
        Err("server unreachable".into())
    }
}
