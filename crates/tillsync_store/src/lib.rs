//! # tillsync Store
//!
//! Entity store trait and implementations for tillsync.
//!
//! A store holds synchronizable records grouped by entity type. Each record
//! travels as a [`StoredRecord`] envelope: the sync metadata plus a JSON
//! body. Stores assign their own local keys; the engine only ever joins
//! records across stores by global identity.
//!
//! ## Design Principles
//!
//! - Stores know nothing about conflict resolution
//! - Batch fetches are explicit ([`RecordQuery`] with a cursor or
//!   offset/limit), so no store has to support lazy query composition
//! - Writes may be staged until [`EntityStore::persist`]
//! - Must be `Send + Sync` so one store can serve several entity passes
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing, with failure injection
//! - [`FileStore`] - One JSON document on disk

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod store;
mod table;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use record::{RecordQuery, StoredRecord};
pub use store::{load_all, load_record, save_record, EntityStore};
