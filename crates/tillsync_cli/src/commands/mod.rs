//! CLI command implementations.

pub mod check;
pub mod cleanup;
pub mod conflicts;
pub mod history;
pub mod pending;
pub mod resolve;
pub mod seed;
pub mod sync;
pub mod watch;

use clap::ValueEnum;
use serde::Serialize;
use tillsync_engine::CancelToken;

/// Output format shared by the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Prints `value` as JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A token cancelled by the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            token.cancel();
        }
    });
    cancel
}
