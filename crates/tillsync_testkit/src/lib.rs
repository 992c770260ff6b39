//! # tillsync testkit
//!
//! Test utilities for tillsync.
//!
//! This crate provides:
//! - Point-of-sale record types with dependencies and an attachment type
//! - A client/server [`MemoryStore`](tillsync_store::MemoryStore) pair with
//!   disjoint local keys
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tillsync_testkit::prelude::*;
//!
//! let stores = StorePair::new();
//! let product = stores.seed_synced(&Product::new("SKU-1", "Soap", 250, 10));
//! let repriced = edited(&product, |p| p.price_cents = 275);
//! stores.server.put(&repriced).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
