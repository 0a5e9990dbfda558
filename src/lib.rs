//! Shopfront - storefront backend
//!
//! REST API for a single-store shop: customer accounts with addresses and a
//! cart, a catalog of categories, subcategories and products with variants,
//! orders paid through Midtrans Snap, RajaOngkir shipping rates and
//! Cloudinary image uploads for the back office.

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::Authenticator;
use crate::config::Config;
use crate::services::{media::CloudinaryClient, payment::MidtransClient, shipping::ShippingClient};
use crate::store::Store;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: Arc<Authenticator>,
    pub shipping: ShippingClient,
    pub payments: MidtransClient,
    /// `None` when Cloudinary credentials are not configured.
    pub media: Option<CloudinaryClient>,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            auth: Arc::new(Authenticator::new(&config.auth)),
            shipping: ShippingClient::new(&config.shipping)?,
            payments: MidtransClient::new(&config.midtrans)?,
            media: config.cloudinary.as_ref().map(CloudinaryClient::new).transpose()?,
        })
    }
}

pub fn app(state: AppState) -> Router {
    routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
