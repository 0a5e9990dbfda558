//! Product catalog. Listing only shows active products; deleting archives.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use super::{created, ok, paged, ApiResponse, ApiPath, ApiQuery, ValidJson};
use crate::auth::AdminUser;
use crate::domain::aggregates::{Product, ProductDraft};
use crate::error::{AppError, Result};
use crate::store::ProductQuery;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/product", get(list_products).post(create_product))
        .route("/api/product/:id", get(get_product).put(update_product).delete(delete_product))
}

fn product_not_found() -> AppError { AppError::NotFound("Product not found".into()) }

async fn list_products(State(state): State<AppState>, ApiQuery(query): ApiQuery<ProductQuery>) -> Result<Json<ApiResponse<Vec<Product>>>> {
    Ok(paged(state.store.list_products(&query).await?))
}

async fn get_product(State(state): State<AppState>, ApiPath(id): ApiPath<Uuid>) -> Result<Json<ApiResponse<Product>>> {
    let product = state.store.find_product(id).await?.filter(Product::is_active).ok_or_else(product_not_found)?;
    Ok(ok(product))
}

/// The category must exist and the subcategory, when given, must belong to it.
async fn check_placement(state: &AppState, draft: &ProductDraft) -> Result<()> {
    if state.store.find_category(draft.category_id).await?.is_none() {
        return Err(AppError::Unprocessable("Category does not exist".into()));
    }
    if let Some(sub_id) = draft.subcategory_id {
        let sub = state.store.find_subcategory(sub_id).await?;
        if sub.map_or(true, |s| s.category_id != draft.category_id) {
            return Err(AppError::Unprocessable("Subcategory does not belong to the category".into()));
        }
    }
    Ok(())
}

async fn create_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    ValidJson(draft): ValidJson<ProductDraft>,
) -> Result<(StatusCode, Json<ApiResponse<Product>>)> {
    check_placement(&state, &draft).await?;
    let product = Product::create(draft)?;
    state.store.insert_product(&product).await?;
    tracing::info!(product_id = %product.id, "product created");
    Ok(created(product))
}

async fn update_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    ValidJson(draft): ValidJson<ProductDraft>,
) -> Result<Json<ApiResponse<Product>>> {
    let mut product = state.store.find_product(id).await?.ok_or_else(product_not_found)?;
    check_placement(&state, &draft).await?;
    product.apply(draft)?;
    state.store.save_product(&product).await?;
    Ok(ok(product))
}

async fn delete_product(State(state): State<AppState>, _admin: AdminUser, ApiPath(id): ApiPath<Uuid>) -> Result<Json<ApiResponse<Product>>> {
    let mut product = state.store.find_product(id).await?.filter(Product::is_active).ok_or_else(product_not_found)?;
    product.archive();
    state.store.save_product(&product).await?;
    tracing::info!(product_id = %id, "product archived");
    Ok(ok(product))
}
