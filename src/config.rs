//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string (unless `STORE=memory`)
//! - `JWT_SECRET` - token signing secret (min 32 chars)
//! - `ADMIN_EMAIL` / `ADMIN_PASSWORD` - back office credentials
//! - `MIDTRANS_SERVER_KEY` - Midtrans server key
//! - `RAJAONGKIR_API_KEY` - RajaOngkir API key
//! - `SHIPPING_ORIGIN_CITY` - RajaOngkir city id parcels ship from
//!
//! ## Optional
//! - `HOST` (default: 0.0.0.0), `PORT` (default: 8083)
//! - `STORE` - `postgres` or `memory` (default: postgres)
//! - `JWT_TTL_HOURS` (default: 168)
//! - `MIDTRANS_PRODUCTION` (default: false), `MIDTRANS_SNAP_URL`
//! - `RAJAONGKIR_BASE_URL`, `SHIPPING_CACHE_TTL_SECS` (default: 3600)
//! - `CLOUDINARY_CLOUD_NAME`, `CLOUDINARY_API_KEY`, `CLOUDINARY_API_SECRET`,
//!   `CLOUDINARY_FOLDER` - image uploads are disabled unless all three
//!   credentials are set

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_JWT_SECRET_LENGTH: usize = 32;
const MIDTRANS_SANDBOX_URL: &str = "https://app.sandbox.midtrans.com/snap/v1/transactions";
const MIDTRANS_PRODUCTION_URL: &str = "https://app.midtrans.com/snap/v1/transactions";
const RAJAONGKIR_URL: &str = "https://api.rajaongkir.com/starter";
const CLOUDINARY_URL: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub midtrans: MidtransConfig,
    pub shipping: ShippingConfig,
    pub cloudinary: Option<CloudinaryConfig>,
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Postgres { url: SecretString },
    Memory,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub token_ttl: Duration,
    pub admin_email: String,
    pub admin_password: SecretString,
}

#[derive(Debug, Clone)]
pub struct MidtransConfig {
    pub server_key: SecretString,
    /// Snap transaction endpoint
    pub snap_url: String,
}

#[derive(Debug, Clone)]
pub struct ShippingConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub origin_city: String,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: SecretString,
    pub folder: Option<String>,
    pub base_url: String,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first
    /// when present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let host = parse_env("HOST", "0.0.0.0")?;
        let port = parse_env("PORT", "8083")?;
        let store = match get_env_or_default("STORE", "postgres").as_str() {
            "postgres" => StoreConfig::Postgres { url: get_required_secret("DATABASE_URL")? },
            "memory" => StoreConfig::Memory,
            other => return Err(ConfigError::InvalidEnvVar("STORE".into(), format!("unknown store `{other}`"))),
        };

        Ok(Self {
            host,
            port,
            store,
            auth: AuthConfig::from_env()?,
            midtrans: MidtransConfig::from_env()?,
            shipping: ShippingConfig::from_env()?,
            cloudinary: CloudinaryConfig::from_env(),
        })
    }

    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl AuthConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = get_required_secret("JWT_SECRET")?;
        validate_jwt_secret(&jwt_secret, "JWT_SECRET")?;
        let hours: u64 = parse_env("JWT_TTL_HOURS", "168")?;
        Ok(Self {
            jwt_secret,
            token_ttl: token_ttl(hours)?,
            admin_email: get_required_env("ADMIN_EMAIL")?.trim().to_lowercase(),
            admin_password: get_required_secret("ADMIN_PASSWORD")?,
        })
    }
}

impl MidtransConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let production: bool = parse_env("MIDTRANS_PRODUCTION", "false")?;
        let default_url = if production { MIDTRANS_PRODUCTION_URL } else { MIDTRANS_SANDBOX_URL };
        Ok(Self {
            server_key: get_required_secret("MIDTRANS_SERVER_KEY")?,
            snap_url: get_env_or_default("MIDTRANS_SNAP_URL", default_url),
        })
    }
}

impl ShippingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let ttl: u64 = parse_env("SHIPPING_CACHE_TTL_SECS", "3600")?;
        Ok(Self {
            api_key: get_required_secret("RAJAONGKIR_API_KEY")?,
            base_url: get_env_or_default("RAJAONGKIR_BASE_URL", RAJAONGKIR_URL),
            origin_city: get_required_env("SHIPPING_ORIGIN_CITY")?,
            cache_ttl: Duration::from_secs(ttl),
        })
    }
}

impl CloudinaryConfig {
    fn from_env() -> Option<Self> {
        Some(Self {
            cloud_name: get_optional_env("CLOUDINARY_CLOUD_NAME")?,
            api_key: get_optional_env("CLOUDINARY_API_KEY")?,
            api_secret: SecretString::from(get_optional_env("CLOUDINARY_API_SECRET")?),
            folder: get_optional_env("CLOUDINARY_FOLDER"),
            base_url: CLOUDINARY_URL.to_string(),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    get_required_env(key).map(SecretString::from)
}

fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn token_ttl(hours: u64) -> Result<Duration, ConfigError> {
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidEnvVar("JWT_TTL_HOURS".into(), format!("{hours} hours is out of range")))
}

fn validate_jwt_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    if secret.expose_secret().len() < MIN_JWT_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("must be at least {MIN_JWT_SECRET_LENGTH} characters"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_jwt_secret_too_short() {
        let secret = SecretString::from("short");
        assert!(matches!(validate_jwt_secret(&secret, "JWT_SECRET"), Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_jwt_secret_valid_length() {
        let secret = SecretString::from("k".repeat(32));
        assert!(validate_jwt_secret(&secret, "JWT_SECRET").is_ok());
    }

    #[test]
    fn test_token_ttl_rejects_overflowing_hours() {
        assert_eq!(token_ttl(168).unwrap(), Duration::from_secs(168 * 3600));
        assert!(matches!(token_ttl(u64::MAX), Err(ConfigError::InvalidEnvVar(key, _)) if key == "JWT_TTL_HOURS"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let midtrans = MidtransConfig { server_key: SecretString::from("SB-Mid-server-abc"), snap_url: MIDTRANS_SANDBOX_URL.into() };
        let rendered = format!("{midtrans:?}");
        assert!(!rendered.contains("SB-Mid-server-abc"));
    }

    #[test]
    fn test_parse_env_reports_the_variable() {
        let err = parse_env::<u16>("SHOPFRONT_TEST_UNSET_PORT", "not-a-port").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "SHOPFRONT_TEST_UNSET_PORT"));
    }
}
