//! Accounts, sign-in and the address book.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{created, ok, ApiResponse, ApiPath, ValidJson};
use crate::auth::{self, CurrentUser, Role};
use crate::domain::aggregates::{Address, AddressDraft, User};
use crate::domain::value_objects::{not_blank, Email};
use crate::error::{AppError, Result};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/user/register", post(register))
        .route("/api/user/login", post(login))
        .route("/api/user/admin/login", post(admin_login))
        .route("/api/user/profile", get(profile).put(update_profile))
        .route("/api/user/password", put(change_password))
        .route("/api/user/addresses", get(list_addresses).post(add_address))
        .route("/api/user/addresses/:id", put(update_address).delete(delete_address))
        .route("/api/user/addresses/:id/default", put(set_default_address))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "name is required"), custom = "not_blank")]
    pub name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProfileRequest {
    #[validate(length(min = 1, max = 100, message = "name is required"), custom = "not_blank")]
    pub name: String,
    #[validate(length(min = 6, max = 20, message = "phone must be 6 to 20 characters"))]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordRequest {
    pub current_password: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct Session {
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

async fn register(State(state): State<AppState>, ValidJson(req): ValidJson<RegisterRequest>) -> Result<(StatusCode, Json<ApiResponse<Session>>)> {
    let email = Email::parse(&req.email).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let user = User::register(req.name.trim(), email, auth::hash_password(&req.password)?);
    state.store.insert_user(&user).await?;
    tracing::info!(user_id = %user.id, "customer registered");

    let token = state.auth.issue(&user.id.to_string(), Role::Customer)?;
    Ok(created(Session { token, user: Some(user) }))
}

async fn login(State(state): State<AppState>, ValidJson(req): ValidJson<LoginRequest>) -> Result<Json<ApiResponse<Session>>> {
    let invalid = || AppError::Unauthorized("Invalid email or password".into());
    let email = req.email.trim().to_lowercase();
    let user = state.store.find_user_by_email(&email).await?.ok_or_else(invalid)?;
    if !auth::verify_password(&req.password, &user.password_hash) {
        return Err(invalid());
    }
    let token = state.auth.issue(&user.id.to_string(), Role::Customer)?;
    Ok(ok(Session { token, user: Some(user) }))
}

async fn admin_login(State(state): State<AppState>, ValidJson(req): ValidJson<LoginRequest>) -> Result<Json<ApiResponse<Session>>> {
    if !state.auth.is_admin(&req.email, &req.password) {
        tracing::warn!("rejected admin sign-in");
        return Err(AppError::Unauthorized("Invalid email or password".into()));
    }
    Ok(ok(Session { token: state.auth.issue("admin", Role::Admin)?, user: None }))
}

async fn profile(CurrentUser(user): CurrentUser) -> Json<ApiResponse<User>> {
    ok(user)
}

async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ValidJson(req): ValidJson<ProfileRequest>,
) -> Result<Json<ApiResponse<User>>> {
    user.update_profile(req.name.trim().to_string(), req.phone.map(|p| p.trim().to_string()));
    state.store.save_user(&user).await?;
    Ok(ok(user))
}

async fn change_password(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ValidJson(req): ValidJson<PasswordRequest>,
) -> Result<Json<ApiResponse<&'static str>>> {
    if !auth::verify_password(&req.current_password, &user.password_hash) {
        return Err(AppError::BadRequest("Current password is incorrect".into()));
    }
    user.set_password_hash(auth::hash_password(&req.new_password)?);
    state.store.save_user(&user).await?;
    Ok(ok("Password updated"))
}

async fn list_addresses(CurrentUser(user): CurrentUser) -> Json<ApiResponse<Vec<Address>>> {
    ok(user.addresses)
}

async fn add_address(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ValidJson(draft): ValidJson<AddressDraft>,
) -> Result<(StatusCode, Json<ApiResponse<Address>>)> {
    let address = user.add_address(draft).clone();
    state.store.save_user(&user).await?;
    Ok(created(address))
}

async fn update_address(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ValidJson(draft): ValidJson<AddressDraft>,
) -> Result<Json<ApiResponse<Address>>> {
    let address = user.update_address(id, draft)?.clone();
    state.store.save_user(&user).await?;
    Ok(ok(address))
}

async fn delete_address(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<Vec<Address>>>> {
    user.remove_address(id)?;
    state.store.save_user(&user).await?;
    Ok(ok(user.addresses))
}

async fn set_default_address(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ApiResponse<Vec<Address>>>> {
    user.set_default_address(id)?;
    state.store.save_user(&user).await?;
    Ok(ok(user.addresses))
}
