//! # tillsync Protocol
//!
//! Shared vocabulary for the tillsync synchronization engine.
//!
//! This crate provides:
//! - The [`SyncableRecord`] contract and its [`SyncMetadata`] block
//! - Global record identity ([`SyncGuid`])
//! - The pure [`ConflictResolver`] and its strategy table
//! - Run reports ([`SyncResult`], [`SyncStatistics`], [`SyncError`])
//!
//! Nothing in this crate performs I/O or reads the clock on its own
//! decision paths, so every type here can be shared by stores, the engine
//! and reporting tools alike.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod record;
mod report;

pub use conflict::{
    ConflictDecision, ConflictResolution, ConflictResolutionStrategy, ConflictResolver,
    ConflictType, Resolution, SyncConflict,
};
pub use record::{hash_content, DataSource, SyncGuid, SyncMetadata, SyncableRecord};
pub use report::{
    PendingInfo, SyncDirection, SyncError, SyncErrorType, SyncHistoryEntry, SyncResult,
    SyncStatistics,
};
