//! Property-based test generators using proptest.
//!
//! Generated metadata always satisfies
//! [`SyncMetadata::is_consistent`](tillsync_protocol::SyncMetadata::is_consistent).

use crate::fixtures::Product;
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use tillsync_protocol::{
    ConflictResolutionStrategy, DataSource, SyncGuid, SyncMetadata, SyncableRecord,
};

/// Strategy for sync guids.
pub fn guid_strategy() -> impl Strategy<Value = SyncGuid> {
    prop::array::uniform16(any::<u8>()).prop_map(SyncGuid::from_bytes)
}

/// Strategy for timestamps within a year of a fixed epoch.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..365 * 24 * 3600).prop_map(|secs| {
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap_or_else(Utc::now)
            + Duration::seconds(secs)
    })
}

/// Strategy for conflict strategies.
pub fn strategy_strategy() -> impl Strategy<Value = ConflictResolutionStrategy> {
    prop_oneof![
        Just(ConflictResolutionStrategy::ServerWins),
        Just(ConflictResolutionStrategy::ClientWins),
        Just(ConflictResolutionStrategy::LastWriteWins),
        Just(ConflictResolutionStrategy::HighestVersionWins),
        Just(ConflictResolutionStrategy::ManualResolution),
    ]
}

/// Strategy for data sources.
pub fn data_source_strategy() -> impl Strategy<Value = DataSource> {
    prop_oneof![Just(DataSource::Client), Just(DataSource::Server)]
}

/// Strategy for metadata in any reachable state: fresh, synced, edited
/// after a sync, or deleted.
pub fn metadata_strategy() -> impl Strategy<Value = SyncMetadata> {
    (
        guid_strategy(),
        data_source_strategy(),
        timestamp_strategy(),
        0u32..4,
        any::<bool>(),
        any::<bool>(),
        prop::option::of("[a-f0-9]{8}"),
    )
        .prop_map(|(guid, source, created, edits, synced, deleted, hash)| {
            let mut meta = SyncMetadata::created_with_guid(guid, source, created);
            meta.data_hash = hash;
            if synced {
                meta.mark_synced(created + Duration::seconds(1));
            }
            for n in 0..edits {
                meta.touch(created + Duration::seconds(2 + i64::from(n)));
            }
            if deleted {
                meta.mark_deleted(created + Duration::seconds(10));
            }
            meta
        })
}

/// Strategy for valid client-side products.
pub fn product_strategy() -> impl Strategy<Value = Product> {
    (
        "SKU-[A-Z0-9]{4}",
        "[A-Za-z ]{1,20}",
        0i64..1_000_000,
        -10i64..1000,
    )
        .prop_map(|(sku, name, price, stock)| Product::new(&sku, &name, price, stock))
}

/// Strategy for a batch of valid products with distinct guids.
pub fn product_batch_strategy(max: usize) -> impl Strategy<Value = Vec<Product>> {
    prop::collection::vec(product_strategy(), 0..=max)
}

/// Strategy for a product that fails validation.
pub fn invalid_product_strategy() -> impl Strategy<Value = Product> {
    prop_oneof![
        product_strategy().prop_map(|mut p| {
            p.sku = String::new();
            p.refresh_hash();
            p
        }),
        (product_strategy(), 1i64..1000).prop_map(|(mut p, below)| {
            p.price_cents = -below;
            p.refresh_hash();
            p
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_metadata_is_consistent(meta in metadata_strategy()) {
            prop_assert!(meta.is_consistent());
            prop_assert!(meta.version >= 1);
        }

        #[test]
        fn generated_products_validate(product in product_strategy()) {
            prop_assert!(product.validate().is_ok());
            prop_assert!(product.sync.is_pending_sync);
        }

        #[test]
        fn invalid_products_fail(product in invalid_product_strategy()) {
            prop_assert!(product.validate().is_err());
        }
    }
}
