//! # tillsync engine
//!
//! Offline-first synchronization between a till's local store and a
//! central server store.
//!
//! This crate provides:
//! - Per-entity-type sync passes joined by global identity
//! - Conflict classification and strategy-based resolution
//! - A manual conflict queue with `UseLocal`, `UseRemote`, `Merge`, `Skip`
//! - Run orchestration with a single-flight lock, a connectivity
//!   pre-flight, a whole-run timeout and dependency ordering
//! - Retry with exponential backoff for transient store failures
//! - Run history (in memory or JSON lines) and timer-driven auto-sync
//!
//! ## Architecture
//!
//! A run uploads pending client records, then downloads server records.
//! Each entity type is handled by an [`EntitySyncer`], which pages source
//! records in batches, classifies each against its destination copy, and
//! flushes the destination after every batch. The [`SyncOrchestrator`]
//! sequences entity types and folds every failure into the run's
//! [`SyncResult`](tillsync_protocol::SyncResult).
//!
//! ## Key Invariants
//!
//! - Records are matched by sync guid, never by local keys
//! - A second run on unchanged stores changes nothing
//! - One failing record never aborts its batch
//! - One failing entity type never aborts the run
//! - Callers always get a completed report

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod config;
mod error;
mod history;
mod orchestrator;
mod probe;
mod retry;
mod scheduler;
mod syncer;

pub use cancel::CancelToken;
pub use config::{RetryPolicy, SyncConfiguration, SyncMode};
pub use error::{EngineError, EngineResult};
pub use history::{FileHistory, MemoryHistory, SyncHistoryStore};
pub use orchestrator::{RunState, SyncOrchestrator, SyncOrchestratorBuilder, SyncScope};
pub use probe::{ConnectivityProbe, StoreProbe, DEFAULT_PROBE_TIMEOUT};
pub use scheduler::AutoSyncScheduler;
pub use syncer::{EntitySyncer, PassDirection};
