//! Shopfront server entry point

use std::sync::Arc;

use anyhow::Result;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shopfront::config::{Config, StoreConfig};
use shopfront::store::{MemoryStore, PgStore, Store};
use shopfront::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.store {
        StoreConfig::Postgres { url } => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url.expose_secret()).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        StoreConfig::Memory => {
            tracing::warn!("using the in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let app = shopfront::app(AppState::new(&config, store)?);

    let addr = config.socket_addr();
    tracing::info!(%addr, "shopfront listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
