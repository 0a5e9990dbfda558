//! Persistence behind a single `Store` trait.
//!
//! `PgStore` keeps each aggregate in one row with its embedded documents in
//! JSONB columns. `MemoryStore` holds everything in process and backs the
//! router tests and `STORE=memory` runs.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{Category, Order, OrderStatus, PaymentStatus, Product, SubCategory, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient stock for {0}")]
    InsufficientStock(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub category: Option<Uuid>,
    pub subcategory: Option<Uuid>,
    pub search: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    #[serde(default)]
    pub sort: ProductSort,
}

impl ProductQuery {
    pub fn page(&self) -> u32 { self.page.unwrap_or(1).max(1) }
    pub fn per_page(&self) -> u32 { self.per_page.unwrap_or(20).clamp(1, 100) }
    pub fn offset(&self) -> u64 { u64::from(self.page() - 1) * u64::from(self.per_page()) }
    pub fn search_term(&self) -> Option<&str> { self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) }

    /// In-process equivalent of the SQL filter.
    pub fn matches(&self, p: &Product) -> bool {
        p.is_active()
            && self.category.map_or(true, |c| p.category_id == c)
            && self.subcategory.map_or(true, |s| p.subcategory_id == Some(s))
            && self.min_price.map_or(true, |min| p.price >= min)
            && self.max_price.map_or(true, |max| p.price <= max)
            && self.search_term().map_or(true, |term| p.name.to_lowercase().contains(&term.to_lowercase()))
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

/// The order state a conditional write expects to find stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderVersion {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

impl OrderVersion {
    pub fn of(order: &Order) -> Self {
        Self { status: order.status, payment_status: order.payment_status }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // Users
    /// Fails with `Conflict` when the email is already registered.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn save_user(&self, user: &User) -> Result<(), StoreError>;

    // Categories
    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;
    async fn find_category(&self, id: Uuid) -> Result<Option<Category>, StoreError>;
    async fn insert_category(&self, category: &Category) -> Result<(), StoreError>;
    async fn save_category(&self, category: &Category) -> Result<(), StoreError>;
    /// Fails with `Conflict` while subcategories or products still reference it.
    async fn delete_category(&self, id: Uuid) -> Result<bool, StoreError>;

    // Subcategories
    async fn list_subcategories(&self, category: Option<Uuid>) -> Result<Vec<SubCategory>, StoreError>;
    async fn find_subcategory(&self, id: Uuid) -> Result<Option<SubCategory>, StoreError>;
    async fn insert_subcategory(&self, subcategory: &SubCategory) -> Result<(), StoreError>;
    async fn save_subcategory(&self, subcategory: &SubCategory) -> Result<(), StoreError>;
    async fn delete_subcategory(&self, id: Uuid) -> Result<bool, StoreError>;

    // Products
    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>, StoreError>;
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError>;
    async fn insert_product(&self, product: &Product) -> Result<(), StoreError>;
    async fn save_product(&self, product: &Product) -> Result<(), StoreError>;

    // Orders
    /// Takes stock for every item, inserts the order and empties the buyer's
    /// cart as one unit. Fails with `InsufficientStock` without side effects.
    async fn place_order(&self, order: &Order) -> Result<(), StoreError>;
    async fn find_order(&self, id: &str) -> Result<Option<Order>, StoreError>;
    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, StoreError>;
    /// Writes the order's mutable fields if the stored order is still at
    /// `expected`, otherwise fails with `Conflict`.
    async fn save_order(&self, order: &Order, expected: OrderVersion) -> Result<(), StoreError>;
    /// Persists a payment transition only if the stored order is still at
    /// `expected`; returns false when another writer got there first.
    /// A transition to `Failed` returns the order's stock.
    async fn record_payment(&self, order: &Order, expected: OrderVersion) -> Result<bool, StoreError>;
}

fn stale_order() -> StoreError {
    StoreError::Conflict("Order was updated concurrently, reload and retry".into())
}

/// Takes every order item's quantity out of the loaded products.
pub(crate) fn take_order_stock(products: &mut HashMap<Uuid, Product>, order: &Order) -> Result<(), StoreError> {
    for item in &order.items {
        let product = products.get_mut(&item.product_id).ok_or_else(|| StoreError::InsufficientStock(item.name.clone()))?;
        product
            .take_stock(item.variant_id, item.option_id, item.quantity)
            .map_err(|_| StoreError::InsufficientStock(item.name.clone()))?;
    }
    Ok(())
}

pub(crate) fn return_order_stock(products: &mut HashMap<Uuid, Product>, order: &Order) {
    for item in &order.items {
        let returned = products
            .get_mut(&item.product_id)
            .is_some_and(|p| p.return_stock(item.variant_id, item.option_id, item.quantity));
        if !returned {
            tracing::warn!(order_id = %order.id, product_id = %item.product_id, "could not return stock, option no longer exists");
        }
    }
}
