use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{return_order_stock, stale_order, take_order_stock, OrderVersion, Page, ProductQuery, ProductSort, Store, StoreError};
use crate::domain::aggregates::{Category, Order, OrderStatus, PaymentStatus, Product, SubCategory, User};

/// Process-local store. Every operation takes the lock once, so multi-record
/// writes are atomic with respect to other requests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    categories: HashMap<Uuid, Category>,
    subcategories: HashMap<Uuid, SubCategory>,
    products: HashMap<Uuid, Product>,
    orders: HashMap<String, Order>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

fn newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) {
    items.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("An account with this email already exists".into()));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().users.values().find(|u| u.email.as_str() == email).cloned())
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let slot = t.users.get_mut(&user.id).ok_or_else(|| StoreError::NotFound("User".into()))?;
        *slot = user.clone();
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let mut all: Vec<Category> = self.tables.read().categories.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn find_category(&self, id: Uuid) -> Result<Option<Category>, StoreError> {
        Ok(self.tables.read().categories.get(&id).cloned())
    }

    async fn insert_category(&self, category: &Category) -> Result<(), StoreError> {
        self.tables.write().categories.insert(category.id, category.clone());
        Ok(())
    }

    async fn save_category(&self, category: &Category) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let slot = t.categories.get_mut(&category.id).ok_or_else(|| StoreError::NotFound("Category".into()))?;
        *slot = category.clone();
        Ok(())
    }

    async fn delete_category(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.write();
        if t.subcategories.values().any(|s| s.category_id == id) || t.products.values().any(|p| p.category_id == id) {
            return Err(StoreError::Conflict("Category is still in use".into()));
        }
        Ok(t.categories.remove(&id).is_some())
    }

    async fn list_subcategories(&self, category: Option<Uuid>) -> Result<Vec<SubCategory>, StoreError> {
        let mut all: Vec<SubCategory> = self.tables.read().subcategories.values()
            .filter(|s| category.map_or(true, |c| s.category_id == c))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn find_subcategory(&self, id: Uuid) -> Result<Option<SubCategory>, StoreError> {
        Ok(self.tables.read().subcategories.get(&id).cloned())
    }

    async fn insert_subcategory(&self, subcategory: &SubCategory) -> Result<(), StoreError> {
        self.tables.write().subcategories.insert(subcategory.id, subcategory.clone());
        Ok(())
    }

    async fn save_subcategory(&self, subcategory: &SubCategory) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let slot = t.subcategories.get_mut(&subcategory.id).ok_or_else(|| StoreError::NotFound("Subcategory".into()))?;
        *slot = subcategory.clone();
        Ok(())
    }

    async fn delete_subcategory(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.write();
        if t.products.values().any(|p| p.subcategory_id == Some(id)) {
            return Err(StoreError::Conflict("Subcategory is still in use".into()));
        }
        Ok(t.subcategories.remove(&id).is_some())
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>, StoreError> {
        let mut hits: Vec<Product> = self.tables.read().products.values().filter(|p| query.matches(p)).cloned().collect();
        match query.sort {
            ProductSort::Newest => newest_first(&mut hits, |p| p.created_at),
            ProductSort::PriceAsc => hits.sort_by_key(|p| p.price),
            ProductSort::PriceDesc => hits.sort_by_key(|p| std::cmp::Reverse(p.price)),
        }
        let total = hits.len() as i64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let data = hits.into_iter().skip(offset).take(query.per_page() as usize).collect();
        Ok(Page { data, total, page: query.page(), per_page: query.per_page() })
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.tables.read().products.get(&id).cloned())
    }

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        let t = self.tables.read();
        Ok(ids.iter().filter_map(|id| t.products.get(id).cloned()).collect())
    }

    async fn insert_product(&self, product: &Product) -> Result<(), StoreError> {
        self.tables.write().products.insert(product.id, product.clone());
        Ok(())
    }

    async fn save_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let slot = t.products.get_mut(&product.id).ok_or_else(|| StoreError::NotFound("Product".into()))?;
        *slot = product.clone();
        Ok(())
    }

    async fn place_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let mut touched: HashMap<Uuid, Product> = order.items.iter()
            .filter_map(|i| t.products.get(&i.product_id).map(|p| (p.id, p.clone())))
            .collect();
        take_order_stock(&mut touched, order)?;
        let user = t.users.get_mut(&order.user_id).ok_or_else(|| StoreError::NotFound("User".into()))?;
        user.cart.clear();
        user.touch();
        t.products.extend(touched);
        t.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn find_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.read().orders.get(id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let mut mine: Vec<Order> = self.tables.read().orders.values().filter(|o| o.user_id == user_id).cloned().collect();
        newest_first(&mut mine, |o| o.created_at);
        Ok(mine)
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, StoreError> {
        let mut all: Vec<Order> = self.tables.read().orders.values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        newest_first(&mut all, |o| o.created_at);
        Ok(all)
    }

    async fn save_order(&self, order: &Order, expected: OrderVersion) -> Result<(), StoreError> {
        let mut t = self.tables.write();
        let slot = t.orders.get_mut(&order.id).ok_or_else(|| StoreError::NotFound("Order".into()))?;
        if OrderVersion::of(slot) != expected {
            return Err(stale_order());
        }
        *slot = order.clone();
        Ok(())
    }

    async fn record_payment(&self, order: &Order, expected: OrderVersion) -> Result<bool, StoreError> {
        let mut t = self.tables.write();
        let current = t.orders.get(&order.id).ok_or_else(|| StoreError::NotFound("Order".into()))?;
        if OrderVersion::of(current) != expected { return Ok(false); }
        if order.payment_status == PaymentStatus::Failed {
            return_order_stock(&mut t.products, order);
        }
        t.orders.insert(order.id.clone(), order.clone());
        Ok(true)
    }
}
