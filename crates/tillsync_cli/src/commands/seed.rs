//! Seed command implementation.

use crate::catalog::Sale;
use tillsync_store::{save_record, EntityStore, FileStore};

/// Records `count` sample sales in the client store.
pub async fn run(client: &FileStore, count: u32) -> Result<(), Box<dyn std::error::Error>> {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    for n in 1..=count {
        let sale = Sale::sample(&format!("{stamp}-{n}"), n);
        save_record(client, &sale.customer).await?;
        save_record(client, &sale.product).await?;
        save_record(client, &sale.invoice).await?;
        save_record(client, &sale.line).await?;
        save_record(client, &sale.movement).await?;
    }
    let written = client.persist().await?;
    println!("Recorded {count} sale(s), {written} record(s) written to {}", client.path().display());
    Ok(())
}
