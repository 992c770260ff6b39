//! Benchmark utilities.

use rand::Rng;
use tillsync_engine::{RetryPolicy, SyncConfiguration, SyncOrchestrator, SyncScope};
use tillsync_testkit::{Customer, Invoice, InvoiceLine, Product, StorePair};

/// Generates `count` products with random prices and stock.
pub fn random_products(count: usize) -> Vec<Product> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            Product::new(
                &format!("SKU-{i:06}"),
                &format!("Item {i}"),
                rng.gen_range(1..100_000),
                rng.gen_range(0..500),
            )
        })
        .collect()
}

/// Stores holding `count` pending products on the client.
pub fn pending_products(count: usize) -> StorePair {
    let stores = StorePair::new();
    for product in random_products(count) {
        stores.client.put(&product).expect("seed product");
    }
    stores
}

/// Stores holding `count` products already synced to both sides.
pub fn synced_products(count: usize) -> StorePair {
    let stores = StorePair::new();
    for product in random_products(count) {
        stores.seed_synced(&product);
    }
    stores
}

/// An orchestrator over `stores` covering the sale record types.
pub fn orchestrator(stores: &StorePair, config: SyncConfiguration) -> SyncOrchestrator {
    SyncOrchestrator::builder(config, stores.client.clone(), stores.server.clone())
        .register::<Customer>(SyncScope::Both)
        .register::<Product>(SyncScope::Both)
        .register::<Invoice>(SyncScope::Both)
        .register::<InvoiceLine>(SyncScope::Both)
        .with_retry_policy(RetryPolicy::no_retry())
        .build()
        .expect("build orchestrator")
}

/// A current-thread runtime for driving async benchmarks.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build runtime")
}
