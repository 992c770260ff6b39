//! Record types and store helpers for sync tests.
//!
//! The record types model a small till: customers and products owned by
//! head office, invoices and invoice lines written at the till, and
//! receipt scans as attachments.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tillsync_protocol::{hash_content, DataSource, SyncGuid, SyncMetadata, SyncableRecord};
use tillsync_store::MemoryStore;

/// First local id handed out by the server store in a [`StorePair`].
pub const SERVER_FIRST_LOCAL_ID: u64 = 1000;

/// A sellable item.
///
/// Head office owns prices and the till owns stock counts, so a merge takes
/// the remote price and the local stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Stock keeping unit.
    pub sku: String,
    /// Display name.
    pub name: String,
    /// Unit price in cents.
    pub price_cents: i64,
    /// Units on hand.
    pub stock: i64,
}

impl Product {
    /// Creates a client-side product.
    pub fn new(sku: &str, name: &str, price_cents: i64, stock: i64) -> Self {
        let mut product = Self {
            sync: SyncMetadata::created(DataSource::Client, Utc::now()),
            sku: sku.into(),
            name: name.into(),
            price_cents,
            stock,
        };
        product.refresh_hash();
        product
    }
}

impl SyncableRecord for Product {
    const ENTITY_TYPE: &'static str = "Product";

    fn sync_meta(&self) -> &SyncMetadata {
        &self.sync
    }

    fn sync_meta_mut(&mut self) -> &mut SyncMetadata {
        &mut self.sync
    }

    fn content_hash(&self) -> String {
        hash_content(&(&self.sku, &self.name, self.price_cents, self.stock))
    }

    fn validate(&self) -> Result<(), String> {
        if self.sku.trim().is_empty() {
            return Err("product sku is required".into());
        }
        if self.price_cents < 0 {
            return Err(format!("negative price {} for {}", self.price_cents, self.sku));
        }
        Ok(())
    }

    fn merge(&self, remote: &Self) -> Option<Self> {
        let mut merged = self.clone();
        merged.price_cents = remote.price_cents;
        Some(merged)
    }
}

/// A customer account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Full name.
    pub name: String,
    /// Contact phone number.
    pub phone: Option<String>,
}

impl Customer {
    /// Creates a client-side customer.
    pub fn new(name: &str) -> Self {
        let mut customer = Self {
            sync: SyncMetadata::created(DataSource::Client, Utc::now()),
            name: name.into(),
            phone: None,
        };
        customer.refresh_hash();
        customer
    }
}

impl SyncableRecord for Customer {
    const ENTITY_TYPE: &'static str = "Customer";

    fn sync_meta(&self) -> &SyncMetadata {
        &self.sync
    }

    fn sync_meta_mut(&mut self) -> &mut SyncMetadata {
        &mut self.sync
    }

    fn content_hash(&self) -> String {
        hash_content(&(&self.name, &self.phone))
    }
}

/// An invoice header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Human-facing invoice number.
    pub number: String,
    /// Customer, if the sale was not anonymous.
    pub customer: Option<SyncGuid>,
    /// Invoice total in cents.
    pub total_cents: i64,
}

impl Invoice {
    /// Creates a client-side invoice.
    pub fn new(number: &str, customer: Option<SyncGuid>, total_cents: i64) -> Self {
        let mut invoice = Self {
            sync: SyncMetadata::created(DataSource::Client, Utc::now()),
            number: number.into(),
            customer,
            total_cents,
        };
        invoice.refresh_hash();
        invoice
    }
}

impl SyncableRecord for Invoice {
    const ENTITY_TYPE: &'static str = "Invoice";
    const DEPENDS_ON: &'static [&'static str] = &["Customer"];

    fn sync_meta(&self) -> &SyncMetadata {
        &self.sync
    }

    fn sync_meta_mut(&mut self) -> &mut SyncMetadata {
        &mut self.sync
    }

    fn content_hash(&self) -> String {
        hash_content(&(&self.number, &self.customer, self.total_cents))
    }

    fn validate(&self) -> Result<(), String> {
        if self.number.trim().is_empty() {
            return Err("invoice number is required".into());
        }
        if self.total_cents < 0 {
            return Err(format!("invoice {} has a negative total", self.number));
        }
        Ok(())
    }
}

/// One line of an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Owning invoice.
    pub invoice: SyncGuid,
    /// Product sold.
    pub product: SyncGuid,
    /// Units sold; negative for returns.
    pub quantity: i64,
    /// Unit price at the time of sale.
    pub unit_price_cents: i64,
}

impl InvoiceLine {
    /// Creates a client-side line.
    pub fn new(invoice: &Invoice, product: &Product, quantity: i64) -> Self {
        let mut line = Self {
            sync: SyncMetadata::created(DataSource::Client, Utc::now()),
            invoice: invoice.sync_guid(),
            product: product.sync_guid(),
            quantity,
            unit_price_cents: product.price_cents,
        };
        line.refresh_hash();
        line
    }
}

impl SyncableRecord for InvoiceLine {
    const ENTITY_TYPE: &'static str = "InvoiceLine";
    const DEPENDS_ON: &'static [&'static str] = &["Invoice", "Product"];

    fn sync_meta(&self) -> &SyncMetadata {
        &self.sync
    }

    fn sync_meta_mut(&mut self) -> &mut SyncMetadata {
        &mut self.sync
    }

    fn content_hash(&self) -> String {
        hash_content(&(self.invoice, self.product, self.quantity, self.unit_price_cents))
    }

    fn validate(&self) -> Result<(), String> {
        if self.quantity == 0 {
            return Err("invoice line quantity must not be zero".into());
        }
        Ok(())
    }
}

/// A scanned paper receipt attached to an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptScan {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Owning invoice.
    pub invoice: SyncGuid,
    /// Base64 image payload.
    pub image: String,
}

impl ReceiptScan {
    /// Creates a client-side scan with a payload of `size` bytes.
    pub fn new(invoice: &Invoice, size: usize) -> Self {
        let mut scan = Self {
            sync: SyncMetadata::created(DataSource::Client, Utc::now()),
            invoice: invoice.sync_guid(),
            image: "A".repeat(size),
        };
        scan.refresh_hash();
        scan
    }
}

impl SyncableRecord for ReceiptScan {
    const ENTITY_TYPE: &'static str = "ReceiptScan";
    const DEPENDS_ON: &'static [&'static str] = &["Invoice"];
    const IS_ATTACHMENT: bool = true;

    fn sync_meta(&self) -> &SyncMetadata {
        &self.sync
    }

    fn sync_meta_mut(&mut self) -> &mut SyncMetadata {
        &mut self.sync
    }

    fn content_hash(&self) -> String {
        hash_content(&(self.invoice, &self.image))
    }
}

/// Returns a copy of `record` with `change` applied and recorded as a new
/// local edit.
pub fn edited<T: SyncableRecord>(record: &T, change: impl FnOnce(&mut T)) -> T {
    let mut copy = record.clone();
    change(&mut copy);
    copy.record_change(Utc::now());
    copy
}

/// Client and server stores for one test.
///
/// The server hands out local ids from [`SERVER_FIRST_LOCAL_ID`], so a test
/// that joins by local id instead of guid fails.
pub struct StorePair {
    /// The till's local store.
    pub client: Arc<MemoryStore>,
    /// The central store.
    pub server: Arc<MemoryStore>,
}

impl StorePair {
    /// Creates two empty stores.
    pub fn new() -> Self {
        Self {
            client: Arc::new(MemoryStore::new("client")),
            server: Arc::new(MemoryStore::with_first_local_id(
                "server",
                SERVER_FIRST_LOCAL_ID,
            )),
        }
    }

    /// Stores an already-synced copy of `record` on both sides and returns
    /// the client copy.
    pub fn seed_synced<T: SyncableRecord>(&self, record: &T) -> T {
        let mut client_copy = record.clone();
        client_copy.sync_meta_mut().mark_synced(Utc::now());
        let mut server_copy = client_copy.clone();
        server_copy.sync_meta_mut().data_source = DataSource::Server;

        self.client.put(&client_copy).expect("seed client copy");
        self.server.put(&server_copy).expect("seed server copy");
        client_copy
    }

    /// Stores a record that exists only on the server.
    pub fn seed_server<T: SyncableRecord>(&self, record: &T) -> T {
        let mut server_copy = record.clone();
        server_copy.sync_meta_mut().data_source = DataSource::Server;
        server_copy.sync_meta_mut().mark_synced(Utc::now());
        self.server.put(&server_copy).expect("seed server copy");
        server_copy
    }

    /// Reads the client copy of `guid`.
    pub fn client_copy<T: SyncableRecord>(&self, guid: SyncGuid) -> Option<T> {
        self.client.get(guid).expect("read client copy")
    }

    /// Reads the server copy of `guid`.
    pub fn server_copy<T: SyncableRecord>(&self, guid: SyncGuid) -> Option<T> {
        self.server.get(guid).expect("read server copy")
    }
}

impl Default for StorePair {
    fn default() -> Self {
        Self::new()
    }
}

/// One sale recorded at the till: a customer, a product, an invoice and
/// its lines, all pending upload.
pub struct SaleFixture {
    /// Buying customer.
    pub customer: Customer,
    /// Product sold.
    pub product: Product,
    /// Invoice header.
    pub invoice: Invoice,
    /// Invoice lines.
    pub lines: Vec<InvoiceLine>,
}

impl SaleFixture {
    /// Records a sale of `line_count` lines in the client store.
    pub fn record(stores: &StorePair, line_count: usize) -> Self {
        let customer = Customer::new("Amina Juma");
        let product = Product::new("SKU-SOAP", "Bar soap", 250, 40);
        let invoice = Invoice::new(
            "INV-0001",
            Some(customer.sync_guid()),
            250 * line_count as i64,
        );
        let lines: Vec<_> = (0..line_count)
            .map(|_| InvoiceLine::new(&invoice, &product, 1))
            .collect();

        stores.client.put(&customer).expect("store customer");
        stores.client.put(&product).expect("store product");
        stores.client.put(&invoice).expect("store invoice");
        for line in &lines {
            stores.client.put(line).expect("store line");
        }

        Self {
            customer,
            product,
            invoice,
            lines,
        }
    }

    /// Number of records the fixture wrote.
    pub fn record_count(&self) -> usize {
        3 + self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_copies_are_synced_and_identical() {
        let stores = StorePair::new();
        let product = stores.seed_synced(&Product::new("SKU-1", "Rice", 1200, 5));
        let server: Product = stores.server_copy(product.sync_guid()).unwrap();
        assert!(!product.sync.is_pending_sync);
        assert!(product.sync.same_state(&server.sync));
        assert_eq!(server.sync.data_source, DataSource::Server);
    }

    #[test]
    fn server_local_ids_are_disjoint() {
        let stores = StorePair::new();
        let product = stores.seed_synced(&Product::new("SKU-1", "Rice", 1200, 5));
        let guid = product.sync_guid();
        let client_id = stores.client.get_raw("Product", guid).unwrap().local_id;
        let server_id = stores.server.get_raw("Product", guid).unwrap().local_id;
        assert!(server_id >= SERVER_FIRST_LOCAL_ID);
        assert_ne!(client_id, server_id);
    }

    #[test]
    fn edited_bumps_version_and_hash() {
        let product = Product::new("SKU-1", "Rice", 1200, 5);
        let repriced = edited(&product, |p| p.price_cents = 1300);
        assert_eq!(repriced.sync.version, product.sync.version + 1);
        assert_ne!(repriced.sync.data_hash, product.sync.data_hash);
        assert!(repriced.sync.is_consistent());
    }

    #[test]
    fn product_merge_takes_remote_price() {
        let local = Product::new("SKU-1", "Rice", 1200, 3);
        let mut remote = local.clone();
        remote.price_cents = 1500;
        remote.stock = 99;
        let merged = local.merge(&remote).unwrap();
        assert_eq!(merged.price_cents, 1500);
        assert_eq!(merged.stock, 3);
    }

    #[test]
    fn validation_rules() {
        assert!(Product::new("", "x", 1, 1).validate().is_err());
        assert!(Invoice::new("INV-1", None, -5).validate().is_err());
        let invoice = Invoice::new("INV-1", None, 0);
        let product = Product::new("SKU", "x", 1, 1);
        assert!(InvoiceLine::new(&invoice, &product, 0).validate().is_err());
        assert!(InvoiceLine::new(&invoice, &product, -1).validate().is_ok());
    }

    #[test]
    fn sale_fixture_is_pending() {
        let stores = StorePair::new();
        let sale = SaleFixture::record(&stores, 2);
        assert_eq!(sale.record_count(), 5);
        assert_eq!(stores.client.len(), 5);
        assert!(stores.server.is_empty());
    }
}
