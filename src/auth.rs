//! Password hashing, token issuing and the request extractors that guard
//! customer and admin routes.
//!
//! Tokens are HS256 JWTs carrying `{ sub, role, iat, exp }` and are read from
//! `Authorization: Bearer <token>`.

use std::time::Duration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{async_trait, extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::domain::aggregates::User;
use crate::error::AppError;
use crate::AppState;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

pub struct Authenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    admin_email: String,
    admin_password: SecretString,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: config.token_ttl,
            admin_email: config.admin_email.clone(),
            admin_password: config.admin_password.clone(),
        }
    }

    pub fn issue(&self, sub: &str, role: Role) -> Result<String, AppError> {
        let iat = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims { sub: sub.to_string(), role, iat, exp: iat.saturating_add(ttl) };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected bearer token");
                AppError::Unauthorized("Invalid or expired token".into())
            })
    }

    /// Constant-time check against the configured back office credentials.
    pub fn is_admin(&self, email: &str, password: &str) -> bool {
        let email = email.trim().to_lowercase();
        let email_ok: bool = email.as_bytes().ct_eq(self.admin_email.as_bytes()).into();
        let password_ok: bool = password.as_bytes().ct_eq(self.admin_password.expose_secret().as_bytes()).into();
        email_ok & password_ok
    }
}

fn bearer_claims(parts: &Parts, state: &AppState) -> Result<Claims, AppError> {
    let token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;
    state.auth.verify(token)
}

async fn load_customer(claims: &Claims, state: &AppState) -> Result<User, AppError> {
    let id: Uuid = claims.sub.parse().map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;
    state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Account no longer exists".into()))
}

/// A signed-in customer, loaded from the store.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = bearer_claims(parts, state)?;
        if claims.role != Role::Customer {
            return Err(AppError::Forbidden("Customer account required".into()));
        }
        Ok(Self(load_customer(&claims, state).await?))
    }
}

pub struct AdminUser;

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_claims(parts, state)?.role {
            Role::Admin => Ok(Self),
            Role::Customer => Err(AppError::Forbidden("Admin access required".into())),
        }
    }
}

/// Either kind of signed-in caller, for routes shared by owners and admins.
pub enum Caller {
    Customer(User),
    Admin,
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let claims = bearer_claims(parts, state)?;
        match claims.role {
            Role::Admin => Ok(Self::Admin),
            Role::Customer => Ok(Self::Customer(load_customer(&claims, state).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(ttl: Duration) -> Authenticator {
        Authenticator::new(&AuthConfig {
            jwt_secret: SecretString::from("a-test-secret-that-is-long-enough!!"),
            token_ttl: ttl,
            admin_email: "owner@shop.test".into(),
            admin_password: SecretString::from("hunter22"),
        })
    }

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_token_carries_role() {
        let auth = authenticator(Duration::from_secs(3600));
        let token = auth.issue("admin", Role::Admin).unwrap();
        let claims = auth.verify(&token).unwrap();
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expired_and_foreign_tokens_are_rejected() {
        let auth = authenticator(Duration::ZERO);
        let claims = Claims { sub: "x".into(), role: Role::Customer, iat: 0, exp: 1 };
        let stale = encode(&Header::new(Algorithm::HS256), &claims, &auth.encoding).unwrap();
        assert!(matches!(auth.verify(&stale), Err(AppError::Unauthorized(_))));

        let other = Authenticator::new(&AuthConfig {
            jwt_secret: SecretString::from("another-secret-that-is-long-enough!"),
            token_ttl: Duration::from_secs(60),
            admin_email: "x@y.z".into(),
            admin_password: SecretString::from("pw"),
        });
        let forged = other.issue("admin", Role::Admin).unwrap();
        assert!(auth.verify(&forged).is_err());
    }

    #[test]
    fn test_admin_credentials() {
        let auth = authenticator(Duration::from_secs(60));
        assert!(auth.is_admin(" Owner@Shop.test ", "hunter22"));
        assert!(!auth.is_admin("owner@shop.test", "hunter2"));
        assert!(!auth.is_admin("someone@shop.test", "hunter22"));
    }
}
