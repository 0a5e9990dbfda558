//! The signed-in customer's cart.

use std::collections::HashMap;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::{created, ok, ApiResponse, ApiPath, ValidJson};
use crate::auth::CurrentUser;
use crate::domain::aggregates::{Cart, CartView};
use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/cart", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/cart/:line_id", put(update_line).delete(remove_line))
}

fn one() -> u32 { 1 }

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub option_id: Option<Uuid>,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 999, message = "quantity must be between 1 and 999"))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLineRequest {
    #[validate(range(max = 999, message = "quantity must be at most 999"))]
    pub quantity: u32,
}

/// Resolves every line against the current catalog.
pub(crate) async fn price_cart(state: &AppState, cart: &Cart) -> Result<CartView> {
    let products = state.store.find_products(&cart.product_ids()).await?;
    let products: HashMap<Uuid, _> = products.into_iter().map(|p| (p.id, p)).collect();
    Ok(cart.price(&products))
}

async fn get_cart(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<ApiResponse<CartView>>> {
    Ok(ok(price_cart(&state, &user.cart).await?))
}

async fn add_to_cart(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ValidJson(req): ValidJson<AddToCartRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CartView>>)> {
    let product = state
        .store
        .find_product(req.product_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    let selection = product.select(req.variant_id, req.option_id)?;
    user.cart.add(selection, req.quantity)?;
    user.touch();
    state.store.save_user(&user).await?;
    Ok(created(price_cart(&state, &user.cart).await?))
}

/// Quantity zero removes the line.
async fn update_line(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ApiPath(line_id): ApiPath<Uuid>,
    ValidJson(req): ValidJson<UpdateLineRequest>,
) -> Result<Json<ApiResponse<CartView>>> {
    let line = user.cart.line(line_id).cloned().ok_or_else(|| AppError::NotFound("Cart item not found".into()))?;
    let available = if req.quantity == 0 {
        0
    } else {
        let product = state
            .store
            .find_product(line.product_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
        product.select(line.variant_id, line.option_id)?.stock()
    };
    user.cart.set_quantity(line_id, req.quantity, available)?;
    user.touch();
    state.store.save_user(&user).await?;
    Ok(ok(price_cart(&state, &user.cart).await?))
}

async fn remove_line(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ApiPath(line_id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<CartView>>> {
    user.cart.remove(line_id)?;
    user.touch();
    state.store.save_user(&user).await?;
    Ok(ok(price_cart(&state, &user.cart).await?))
}

async fn clear_cart(State(state): State<AppState>, CurrentUser(mut user): CurrentUser) -> Result<Json<ApiResponse<CartView>>> {
    user.cart.clear();
    user.touch();
    state.store.save_user(&user).await?;
    Ok(ok(price_cart(&state, &user.cart).await?))
}
