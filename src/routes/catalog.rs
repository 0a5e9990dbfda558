//! Categories and subcategories. Reads are public, writes need an admin token.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{created, ok, ApiResponse, ApiPath, ApiQuery, ValidJson};
use crate::auth::AdminUser;
use crate::domain::aggregates::{Category, CategoryDraft, SubCategory, SubCategoryDraft};
use crate::domain::value_objects::CatalogStatus;
use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/category", get(list_categories).post(create_category))
        .route("/api/category/:id", get(get_category).put(update_category).delete(delete_category))
        .route("/api/subcategory", get(list_subcategories).post(create_subcategory))
        .route("/api/subcategory/:id", get(get_subcategory).put(update_subcategory).delete(delete_subcategory))
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogFilter {
    pub category: Option<Uuid>,
    pub status: Option<CatalogStatus>,
}

fn category_not_found() -> AppError { AppError::NotFound("Category not found".into()) }
fn subcategory_not_found() -> AppError { AppError::NotFound("Subcategory not found".into()) }

async fn list_categories(State(state): State<AppState>, ApiQuery(filter): ApiQuery<CatalogFilter>) -> Result<Json<ApiResponse<Vec<Category>>>> {
    let mut categories = state.store.list_categories().await?;
    if let Some(status) = filter.status {
        categories.retain(|c| c.status == status);
    }
    Ok(ok(categories))
}

async fn get_category(State(state): State<AppState>, ApiPath(id): ApiPath<Uuid>) -> Result<Json<ApiResponse<Category>>> {
    let category = state.store.find_category(id).await?.ok_or_else(category_not_found)?;
    Ok(ok(category))
}

async fn create_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    ValidJson(draft): ValidJson<CategoryDraft>,
) -> Result<(StatusCode, Json<ApiResponse<Category>>)> {
    let category = Category::create(draft);
    state.store.insert_category(&category).await?;
    tracing::info!(category_id = %category.id, "category created");
    Ok(created(category))
}

async fn update_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    ValidJson(draft): ValidJson<CategoryDraft>,
) -> Result<Json<ApiResponse<Category>>> {
    let mut category = state.store.find_category(id).await?.ok_or_else(category_not_found)?;
    category.apply(draft);
    state.store.save_category(&category).await?;
    Ok(ok(category))
}

async fn delete_category(State(state): State<AppState>, _admin: AdminUser, ApiPath(id): ApiPath<Uuid>) -> Result<StatusCode> {
    if !state.store.delete_category(id).await? {
        return Err(category_not_found());
    }
    tracing::info!(category_id = %id, "category deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_subcategories(State(state): State<AppState>, ApiQuery(filter): ApiQuery<CatalogFilter>) -> Result<Json<ApiResponse<Vec<SubCategory>>>> {
    let mut subcategories = state.store.list_subcategories(filter.category).await?;
    if let Some(status) = filter.status {
        subcategories.retain(|s| s.status == status);
    }
    Ok(ok(subcategories))
}

async fn get_subcategory(State(state): State<AppState>, ApiPath(id): ApiPath<Uuid>) -> Result<Json<ApiResponse<SubCategory>>> {
    let subcategory = state.store.find_subcategory(id).await?.ok_or_else(subcategory_not_found)?;
    Ok(ok(subcategory))
}

async fn ensure_category(state: &AppState, id: Uuid) -> Result<()> {
    match state.store.find_category(id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::Unprocessable("Parent category does not exist".into())),
    }
}

async fn create_subcategory(
    State(state): State<AppState>,
    _admin: AdminUser,
    ValidJson(draft): ValidJson<SubCategoryDraft>,
) -> Result<(StatusCode, Json<ApiResponse<SubCategory>>)> {
    ensure_category(&state, draft.category_id).await?;
    let subcategory = SubCategory::create(draft);
    state.store.insert_subcategory(&subcategory).await?;
    Ok(created(subcategory))
}

async fn update_subcategory(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    ValidJson(draft): ValidJson<SubCategoryDraft>,
) -> Result<Json<ApiResponse<SubCategory>>> {
    let mut subcategory = state.store.find_subcategory(id).await?.ok_or_else(subcategory_not_found)?;
    if draft.category_id != subcategory.category_id {
        ensure_category(&state, draft.category_id).await?;
    }
    subcategory.apply(draft);
    state.store.save_subcategory(&subcategory).await?;
    Ok(ok(subcategory))
}

async fn delete_subcategory(State(state): State<AppState>, _admin: AdminUser, ApiPath(id): ApiPath<Uuid>) -> Result<StatusCode> {
    if !state.store.delete_subcategory(id).await? {
        return Err(subcategory_not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
