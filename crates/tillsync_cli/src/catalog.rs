//! Record types synchronized by the till.
//!
//! Head office owns categories. Products and customers are edited on both
//! sides. Invoices, their lines, and stock movements are written at the
//! till.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tillsync_engine::{SyncOrchestratorBuilder, SyncScope};
use tillsync_protocol::{hash_content, DataSource, SyncGuid, SyncMetadata, SyncableRecord};

macro_rules! sync_accessors {
    () => {
        fn sync_meta(&self) -> &SyncMetadata {
            &self.sync
        }

        fn sync_meta_mut(&mut self) -> &mut SyncMetadata {
            &mut self.sync
        }
    };
}

fn stamped<T: SyncableRecord>(mut record: T) -> T {
    record.refresh_hash();
    record
}

fn new_meta() -> SyncMetadata {
    SyncMetadata::created(DataSource::Client, Utc::now())
}

/// Product grouping maintained by head office.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Display name.
    pub name: String,
}

impl SyncableRecord for Category {
    const ENTITY_TYPE: &'static str = "Category";

    sync_accessors!();

    fn content_hash(&self) -> String {
        hash_content(&self.name)
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("category name is empty".into());
        }
        Ok(())
    }
}

/// A sellable item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Owning category.
    pub category: Option<SyncGuid>,
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
    /// Creates a product at the till.
    pub fn new(sku: &str, name: &str, price_cents: i64, stock: i64) -> Self {
        stamped(Self {
            sync: new_meta(),
            category: None,
            sku: sku.into(),
            name: name.into(),
            price_cents,
            stock,
        })
    }
}

impl SyncableRecord for Product {
    const ENTITY_TYPE: &'static str = "Product";
    const DEPENDS_ON: &'static [&'static str] = &["Category"];

    sync_accessors!();

    fn content_hash(&self) -> String {
        hash_content(&(&self.category, &self.sku, &self.name, self.price_cents, self.stock))
    }

    fn validate(&self) -> Result<(), String> {
        if self.sku.trim().is_empty() {
            return Err("product sku is empty".into());
        }
        if self.price_cents < 0 {
            return Err(format!("product {} has a negative price", self.sku));
        }
        Ok(())
    }

    /// Price and naming come from head office; the stock count is the
    /// till's.
    fn merge(&self, remote: &Self) -> Option<Self> {
        let mut merged = remote.clone();
        merged.stock = self.stock;
        merged.sync = self.sync.clone();
        merged.sync.version = self.sync.version.max(remote.sync.version);
        merged.record_change(Utc::now());
        Some(merged)
    }
}

/// A named buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Full name.
    pub name: String,
    /// Contact number.
    pub phone: Option<String>,
}

impl Customer {
    /// Creates a customer at the till.
    pub fn new(name: &str, phone: Option<&str>) -> Self {
        stamped(Self {
            sync: new_meta(),
            name: name.into(),
            phone: phone.map(str::to_string),
        })
    }
}

impl SyncableRecord for Customer {
    const ENTITY_TYPE: &'static str = "Customer";

    sync_accessors!();

    fn content_hash(&self) -> String {
        hash_content(&(&self.name, &self.phone))
    }
}

/// A completed sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Invoice number printed on the receipt.
    pub number: String,
    /// Buyer, if known.
    pub customer: Option<SyncGuid>,
    /// Total in cents.
    pub total_cents: i64,
}

impl SyncableRecord for Invoice {
    const ENTITY_TYPE: &'static str = "Invoice";
    const DEPENDS_ON: &'static [&'static str] = &["Customer"];

    sync_accessors!();

    fn content_hash(&self) -> String {
        hash_content(&(&self.number, &self.customer, self.total_cents))
    }

    fn validate(&self) -> Result<(), String> {
        if self.number.trim().is_empty() {
            return Err("invoice number is empty".into());
        }
        Ok(())
    }
}

/// One product on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Owning invoice.
    pub invoice: SyncGuid,
    /// Product sold.
    pub product: SyncGuid,
    /// Units sold.
    pub quantity: u32,
    /// Price per unit at the time of sale.
    pub unit_price_cents: i64,
}

impl SyncableRecord for InvoiceLine {
    const ENTITY_TYPE: &'static str = "InvoiceLine";
    const DEPENDS_ON: &'static [&'static str] = &["Invoice", "Product"];

    sync_accessors!();

    fn content_hash(&self) -> String {
        hash_content(&(
            &self.invoice,
            &self.product,
            self.quantity,
            self.unit_price_cents,
        ))
    }

    fn validate(&self) -> Result<(), String> {
        if self.quantity == 0 {
            return Err("invoice line has zero quantity".into());
        }
        Ok(())
    }
}

/// A change to a product's stock count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Sync metadata.
    pub sync: SyncMetadata,
    /// Product affected.
    pub product: SyncGuid,
    /// Signed change in units.
    pub delta: i64,
    /// Why the stock moved.
    pub reason: String,
}

impl SyncableRecord for StockMovement {
    const ENTITY_TYPE: &'static str = "StockMovement";
    const DEPENDS_ON: &'static [&'static str] = &["Product"];

    sync_accessors!();

    fn content_hash(&self) -> String {
        hash_content(&(&self.product, self.delta, &self.reason))
    }

    fn validate(&self) -> Result<(), String> {
        if self.delta == 0 {
            return Err("stock movement of zero units".into());
        }
        Ok(())
    }
}

/// Registers every catalog type with its scope.
pub fn register(builder: SyncOrchestratorBuilder) -> SyncOrchestratorBuilder {
    builder
        .register::<Category>(SyncScope::DownloadOnly)
        .register::<Product>(SyncScope::Both)
        .register::<Customer>(SyncScope::Both)
        .register::<Invoice>(SyncScope::Both)
        .register::<InvoiceLine>(SyncScope::Both)
        .register::<StockMovement>(SyncScope::UploadOnly)
}

/// Records written at the till for one sale.
#[derive(Debug, Clone)]
pub struct Sale {
    /// Buyer.
    pub customer: Customer,
    /// Product sold.
    pub product: Product,
    /// The invoice.
    pub invoice: Invoice,
    /// Its single line.
    pub line: InvoiceLine,
    /// Stock taken out by the sale.
    pub movement: StockMovement,
}

impl Sale {
    /// Builds a sale of `quantity` units of a new product to a new customer.
    pub fn sample(number: &str, quantity: u32) -> Self {
        let customer = Customer::new("Walk-in customer", None);
        let mut product = Product::new(&format!("SKU-{number}"), "Sample item", 250, 100);
        product.stock -= i64::from(quantity);
        product.refresh_hash();

        let total_cents = product.price_cents * i64::from(quantity);
        let invoice = stamped(Invoice {
            sync: new_meta(),
            number: number.into(),
            customer: Some(customer.sync_guid()),
            total_cents,
        });
        let line = stamped(InvoiceLine {
            sync: new_meta(),
            invoice: invoice.sync_guid(),
            product: product.sync_guid(),
            quantity,
            unit_price_cents: product.price_cents,
        });
        let movement = stamped(StockMovement {
            sync: new_meta(),
            product: product.sync_guid(),
            delta: -i64::from(quantity),
            reason: format!("sale {number}"),
        });

        Self {
            customer,
            product,
            invoice,
            line,
            movement,
        }
    }
}
