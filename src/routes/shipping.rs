//! Public proxy over the courier rate API.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use validator::Validate;

use super::{ok, ApiResponse, ApiQuery, ValidJson};
use crate::error::Result;
use crate::services::shipping::{City, CourierRates, Province};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/shipping/province", get(provinces))
        .route("/api/shipping/city", get(cities))
        .route("/api/shipping/cost", post(cost))
}

#[derive(Debug, Deserialize)]
pub struct CityQuery {
    pub province: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CostRequest {
    pub origin: Option<String>,
    #[validate(length(min = 1, message = "destination is required"))]
    pub destination: String,
    /// Grams
    #[validate(range(min = 1, max = 30000, message = "weight must be between 1 and 30000 grams"))]
    pub weight: u32,
    #[validate(length(min = 1, message = "courier is required"))]
    pub courier: String,
}

async fn provinces(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<Province>>>> {
    Ok(ok(state.shipping.provinces().await?.to_vec()))
}

async fn cities(State(state): State<AppState>, ApiQuery(query): ApiQuery<CityQuery>) -> Result<Json<ApiResponse<Vec<City>>>> {
    Ok(ok(state.shipping.cities(query.province.as_deref()).await?.to_vec()))
}

async fn cost(State(state): State<AppState>, ValidJson(req): ValidJson<CostRequest>) -> Result<Json<ApiResponse<Vec<CourierRates>>>> {
    let rates = state.shipping.cost(req.origin.as_deref(), &req.destination, req.weight, &req.courier).await?;
    Ok(ok(rates.to_vec()))
}
