use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{return_order_stock, stale_order, take_order_stock, OrderVersion, Page, ProductQuery, ProductSort, Store, StoreError};
use crate::domain::aggregates::{
    Address, Cart, Category, CourierChoice, Order, OrderItem, OrderStatus, PaymentStatus, Product, SubCategory, User, Variant,
};
use crate::domain::value_objects::Email;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid, name: String, email: String, password_hash: String, phone: Option<String>,
    addresses: Json<Vec<Address>>, cart: Json<Cart>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: Uuid, name: String, description: Option<String>, image: Option<String>, status: String,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct SubCategoryRow {
    id: Uuid, category_id: Uuid, name: String, description: Option<String>, image: Option<String>, status: String,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid, name: String, description: String, price: i64, stock: i64, weight: i64, category_id: Uuid,
    subcategory_id: Option<Uuid>, images: Json<Vec<String>>, variants: Json<Vec<Variant>>, status: String,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String, user_id: Uuid, items: Json<Vec<OrderItem>>, shipping_address: Json<Address>, courier: Option<Json<CourierChoice>>,
    subtotal: i64, shipping_cost: i64, amount: i64, payment_method: String, payment_status: String,
    payment_token: Option<String>, payment_url: Option<String>, transaction_id: Option<String>, tracking_number: Option<String>,
    status: String, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> StoreError { StoreError::Corrupt(format!("{what}: {err}")) }

fn to_u32(what: &str, value: i64) -> Result<u32, StoreError> { u32::try_from(value).map_err(|e| corrupt(what, e)) }

impl TryFrom<UserRow> for User {
    type Error = StoreError;
    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id, name: r.name, email: Email::parse(&r.email).map_err(|e| corrupt("users.email", e))?,
            password_hash: r.password_hash, phone: r.phone, addresses: r.addresses.0, cart: r.cart.0,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

impl TryFrom<CategoryRow> for Category {
    type Error = StoreError;
    fn try_from(r: CategoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id, name: r.name, description: r.description, image: r.image,
            status: r.status.parse().map_err(|e| corrupt("categories.status", e))?, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

impl TryFrom<SubCategoryRow> for SubCategory {
    type Error = StoreError;
    fn try_from(r: SubCategoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id, category_id: r.category_id, name: r.name, description: r.description, image: r.image,
            status: r.status.parse().map_err(|e| corrupt("subcategories.status", e))?, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;
    fn try_from(r: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id, name: r.name, description: r.description, price: r.price,
            stock: to_u32("products.stock", r.stock)?, weight: to_u32("products.weight", r.weight)?,
            category_id: r.category_id, subcategory_id: r.subcategory_id, images: r.images.0, variants: r.variants.0,
            status: r.status.parse().map_err(|e| corrupt("products.status", e))?, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;
    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id, user_id: r.user_id, items: r.items.0, shipping_address: r.shipping_address.0, courier: r.courier.map(|c| c.0),
            subtotal: r.subtotal, shipping_cost: r.shipping_cost, amount: r.amount,
            payment_method: r.payment_method.parse().map_err(|e| corrupt("orders.payment_method", e))?,
            payment_status: r.payment_status.parse().map_err(|e| corrupt("orders.payment_status", e))?,
            payment_token: r.payment_token, payment_url: r.payment_url, transaction_id: r.transaction_id,
            tracking_number: r.tracking_number, status: r.status.parse().map_err(|e| corrupt("orders.status", e))?,
            created_at: r.created_at, updated_at: r.updated_at, events: vec![],
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Maps constraint violations onto store conflicts.
fn constraint(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

// =============================================================================
// Product helpers shared by order transactions
// =============================================================================

async fn lock_products(conn: &mut PgConnection, ids: &[Uuid]) -> Result<HashMap<Uuid, Product>, StoreError> {
    let rows: Vec<ProductRow> = sqlx::query_as("SELECT * FROM products WHERE id = ANY($1) FOR UPDATE")
        .bind(ids)
        .fetch_all(conn)
        .await?;
    let products: Vec<Product> = collect(rows)?;
    Ok(products.into_iter().map(|p| (p.id, p)).collect())
}

async fn write_stock(conn: &mut PgConnection, product: &Product) -> Result<(), StoreError> {
    sqlx::query("UPDATE products SET stock = $2, variants = $3, updated_at = $4 WHERE id = $1")
        .bind(product.id)
        .bind(i64::from(product.stock))
        .bind(Json(&product.variants))
        .bind(product.updated_at)
        .execute(conn)
        .await?;
    Ok(())
}

fn item_product_ids(order: &Order) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = order.items.iter().map(|i| i.product_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn push_product_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ProductQuery) {
    if let Some(category) = query.category {
        qb.push(" AND category_id = ").push_bind(category);
    }
    if let Some(subcategory) = query.subcategory {
        qb.push(" AND subcategory_id = ").push_bind(subcategory);
    }
    if let Some(min) = query.min_price {
        qb.push(" AND price >= ").push_bind(min);
    }
    if let Some(max) = query.max_price {
        qb.push(" AND price <= ").push_bind(max);
    }
    if let Some(term) = query.search_term() {
        qb.push(" AND name ILIKE ").push_bind(format!("%{}%", term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")));
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, phone, addresses, cart, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(user.id).bind(&user.name).bind(user.email.as_str()).bind(&user.password_hash).bind(&user.phone)
        .bind(Json(&user.addresses)).bind(Json(&user.cart)).bind(user.created_at).bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint(e, "An account with this email already exists"))?;
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE email = $1").bind(email).fetch_optional(&self.pool).await?;
        row.map(User::try_from).transpose()
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE users SET name = $2, password_hash = $3, phone = $4, addresses = $5, cart = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(user.id).bind(&user.name).bind(&user.password_hash).bind(&user.phone)
        .bind(Json(&user.addresses)).bind(Json(&user.cart)).bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 { return Err(StoreError::NotFound("User".into())); }
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let rows: Vec<CategoryRow> = sqlx::query_as("SELECT * FROM categories ORDER BY name").fetch_all(&self.pool).await?;
        collect(rows)
    }

    async fn find_category(&self, id: Uuid) -> Result<Option<Category>, StoreError> {
        let row: Option<CategoryRow> = sqlx::query_as("SELECT * FROM categories WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.map(Category::try_from).transpose()
    }

    async fn insert_category(&self, c: &Category) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO categories (id, name, description, image, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
            .bind(c.id).bind(&c.name).bind(&c.description).bind(&c.image).bind(c.status.as_str()).bind(c.created_at).bind(c.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_category(&self, c: &Category) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE categories SET name = $2, description = $3, image = $4, status = $5, updated_at = $6 WHERE id = $1")
            .bind(c.id).bind(&c.name).bind(&c.description).bind(&c.image).bind(c.status.as_str()).bind(c.updated_at)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 { return Err(StoreError::NotFound("Category".into())); }
        Ok(())
    }

    async fn delete_category(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| constraint(e, "Category is still in use"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_subcategories(&self, category: Option<Uuid>) -> Result<Vec<SubCategory>, StoreError> {
        let rows: Vec<SubCategoryRow> = sqlx::query_as(
            "SELECT * FROM subcategories WHERE ($1::uuid IS NULL OR category_id = $1) ORDER BY name",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn find_subcategory(&self, id: Uuid) -> Result<Option<SubCategory>, StoreError> {
        let row: Option<SubCategoryRow> = sqlx::query_as("SELECT * FROM subcategories WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.map(SubCategory::try_from).transpose()
    }

    async fn insert_subcategory(&self, s: &SubCategory) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO subcategories (id, category_id, name, description, image, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(s.id).bind(s.category_id).bind(&s.name).bind(&s.description).bind(&s.image).bind(s.status.as_str())
        .bind(s.created_at).bind(s.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint(e, "Parent category does not exist"))?;
        Ok(())
    }

    async fn save_subcategory(&self, s: &SubCategory) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE subcategories SET category_id = $2, name = $3, description = $4, image = $5, status = $6, updated_at = $7 WHERE id = $1",
        )
        .bind(s.id).bind(s.category_id).bind(&s.name).bind(&s.description).bind(&s.image).bind(s.status.as_str()).bind(s.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint(e, "Parent category does not exist"))?;
        if res.rows_affected() == 0 { return Err(StoreError::NotFound("Subcategory".into())); }
        Ok(())
    }

    async fn delete_subcategory(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM subcategories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| constraint(e, "Subcategory is still in use"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_products(&self, query: &ProductQuery) -> Result<Page<Product>, StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products WHERE status = 'active'");
        push_product_filters(&mut count, query);
        let (total,): (i64,) = count.build_query_as::<(i64,)>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM products WHERE status = 'active'");
        push_product_filters(&mut select, query);
        select.push(match query.sort {
            ProductSort::Newest => " ORDER BY created_at DESC",
            ProductSort::PriceAsc => " ORDER BY price ASC, created_at DESC",
            ProductSort::PriceDesc => " ORDER BY price DESC, created_at DESC",
        });
        select.push(" LIMIT ").push_bind(i64::from(query.per_page()));
        select.push(" OFFSET ").push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));
        let rows: Vec<ProductRow> = select.build_query_as::<ProductRow>().fetch_all(&self.pool).await?;

        Ok(Page { data: collect(rows)?, total, page: query.page(), per_page: query.per_page() })
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let row: Option<ProductRow> = sqlx::query_as("SELECT * FROM products WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.map(Product::try_from).transpose()
    }

    async fn find_products(&self, ids: &[Uuid]) -> Result<Vec<Product>, StoreError> {
        if ids.is_empty() { return Ok(vec![]); }
        let rows: Vec<ProductRow> = sqlx::query_as("SELECT * FROM products WHERE id = ANY($1)").bind(ids).fetch_all(&self.pool).await?;
        collect(rows)
    }

    async fn insert_product(&self, p: &Product) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO products (id, name, description, price, stock, weight, category_id, subcategory_id, images, variants, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(p.id).bind(&p.name).bind(&p.description).bind(p.price).bind(i64::from(p.stock)).bind(i64::from(p.weight))
        .bind(p.category_id).bind(p.subcategory_id).bind(Json(&p.images)).bind(Json(&p.variants)).bind(p.status.as_str())
        .bind(p.created_at).bind(p.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint(e, "Category or subcategory does not exist"))?;
        Ok(())
    }

    async fn save_product(&self, p: &Product) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE products SET name = $2, description = $3, price = $4, stock = $5, weight = $6, category_id = $7, \
             subcategory_id = $8, images = $9, variants = $10, status = $11, updated_at = $12 WHERE id = $1",
        )
        .bind(p.id).bind(&p.name).bind(&p.description).bind(p.price).bind(i64::from(p.stock)).bind(i64::from(p.weight))
        .bind(p.category_id).bind(p.subcategory_id).bind(Json(&p.images)).bind(Json(&p.variants)).bind(p.status.as_str())
        .bind(p.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint(e, "Category or subcategory does not exist"))?;
        if res.rows_affected() == 0 { return Err(StoreError::NotFound("Product".into())); }
        Ok(())
    }

    async fn place_order(&self, o: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut products = lock_products(&mut *tx, &item_product_ids(o)).await?;
        take_order_stock(&mut products, o)?;
        for product in products.values() {
            write_stock(&mut *tx, product).await?;
        }

        sqlx::query(
            "INSERT INTO orders (id, user_id, items, shipping_address, courier, subtotal, shipping_cost, amount, payment_method, \
             payment_status, payment_token, payment_url, transaction_id, tracking_number, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(&o.id).bind(o.user_id).bind(Json(&o.items)).bind(Json(&o.shipping_address)).bind(o.courier.as_ref().map(Json))
        .bind(o.subtotal).bind(o.shipping_cost).bind(o.amount).bind(o.payment_method.as_str()).bind(o.payment_status.as_str())
        .bind(&o.payment_token).bind(&o.payment_url).bind(&o.transaction_id).bind(&o.tracking_number).bind(o.status.as_str())
        .bind(o.created_at).bind(o.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET cart = '[]'::jsonb, updated_at = NOW() WHERE id = $1")
            .bind(o.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let row: Option<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.map(Order::try_from).transpose()
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, StoreError> {
        let rows: Vec<OrderRow> = sqlx::query_as("SELECT * FROM orders WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC")
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn save_order(&self, o: &Order, expected: OrderVersion) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE orders SET payment_status = $2, payment_token = $3, payment_url = $4, transaction_id = $5, \
             tracking_number = $6, status = $7, updated_at = $8 WHERE id = $1 AND status = $9 AND payment_status = $10",
        )
        .bind(&o.id).bind(o.payment_status.as_str()).bind(&o.payment_token).bind(&o.payment_url).bind(&o.transaction_id)
        .bind(&o.tracking_number).bind(o.status.as_str()).bind(o.updated_at)
        .bind(expected.status.as_str()).bind(expected.payment_status.as_str())
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
                .bind(&o.id)
                .fetch_one(&self.pool)
                .await?;
            return Err(if exists { stale_order() } else { StoreError::NotFound("Order".into()) });
        }
        Ok(())
    }

    async fn record_payment(&self, o: &Order, expected: OrderVersion) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            "UPDATE orders SET payment_status = $2, status = $3, transaction_id = $4, updated_at = $5 \
             WHERE id = $1 AND status = $6 AND payment_status = $7",
        )
        .bind(&o.id).bind(o.payment_status.as_str()).bind(o.status.as_str()).bind(&o.transaction_id).bind(o.updated_at)
        .bind(expected.status.as_str()).bind(expected.payment_status.as_str())
        .execute(&mut *tx)
        .await?;
        if res.rows_affected() == 0 {
            return Ok(false);
        }

        if o.payment_status == PaymentStatus::Failed {
            let mut products = lock_products(&mut *tx, &item_product_ids(o)).await?;
            return_order_stock(&mut products, o);
            for product in products.values() {
                write_stock(&mut *tx, product).await?;
            }
        }

        tx.commit().await?;
        Ok(true)
    }
}
