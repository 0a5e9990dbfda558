//! Unified API error handling.
//!
//! Every handler returns `Result<T, AppError>`. Errors are rendered as
//! `{ "success": false, "code": ..., "message": ..., "details": ... }` with a
//! status code chosen per variant. Store and upstream failures are logged and
//! replaced with a generic message.

use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::aggregates::{CartError, OrderError, ProductError, UserError};
use crate::services::media::MediaError;
use crate::services::payment::PaymentError;
use crate::services::shipping::ShippingError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Shipping service error: {0}")]
    Shipping(#[from] ShippingError),

    #[error("Payment gateway error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Media service error: {0}")]
    Media(#[from] MediaError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<HashMap<String, Vec<String>>>,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound(_) | Self::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Conflict(_) | Self::Store(StoreError::Conflict(_) | StoreError::InsufficientStock(_)) => (StatusCode::CONFLICT, "conflict"),
            Self::Unprocessable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            Self::Shipping(_) | Self::Payment(_) | Self::Media(_) => (StatusCode::BAD_GATEWAY, "external_service_error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Store(StoreError::Database(_)) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Store(e) => e.to_string(),
            Self::Shipping(_) => "Shipping rate service is unavailable".to_string(),
            Self::Payment(_) => "Payment gateway is unavailable".to_string(),
            Self::Media(_) => "Image upload failed".to_string(),
            other => other.to_string(),
        }
    }

    fn details(&self) -> Option<HashMap<String, Vec<String>>> {
        let Self::Validation(errors) = self else { return None };
        let details = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| e.message.as_ref().map_or_else(|| format!("{field} is invalid"), ToString::to_string))
                    .collect();
                (field.to_string(), messages)
            })
            .collect();
        Some(details)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        }
        let body = ErrorBody { success: false, code, message: self.public_message(), details: self.details() };
        (status, Json(body)).into_response()
    }
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::ItemNotFound => Self::NotFound(err.to_string()),
            CartError::InvalidQuantity => Self::BadRequest(err.to_string()),
            CartError::ExceedsStock { .. } => Self::Conflict(err.to_string()),
        }
    }
}

impl From<ProductError> for AppError {
    fn from(err: ProductError) -> Self {
        match err {
            ProductError::VariantNotFound | ProductError::OptionNotFound => Self::NotFound(err.to_string()),
            ProductError::Unavailable | ProductError::InsufficientStock { .. } => Self::Conflict(err.to_string()),
            ProductError::OptionRequired | ProductError::Invalid(_) => Self::BadRequest(err.to_string()),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NoItems | OrderError::Unavailable(_) => Self::Unprocessable(err.to_string()),
            OrderError::TrackingRequired => Self::BadRequest(err.to_string()),
            OrderError::InvalidTransition { .. } | OrderError::CannotCancel => Self::Conflict(err.to_string()),
        }
    }
}

impl From<UserError> for AppError {
    fn from(err: UserError) -> Self { Self::NotFound(err.to_string()) }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use validator::Validate;

    use super::*;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_validation_errors_carry_field_details() {
        #[derive(Validate)]
        struct Signup {
            #[validate(email(message = "email is invalid"))]
            email: String,
        }
        let err = Signup { email: "nope".into() }.validate().unwrap_err();
        let (status, body) = render(AppError::from(err)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "validation_error");
        assert_eq!(body["details"]["email"][0], "email is invalid");
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (status, body) = render(AppError::Internal("pool exhausted".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_domain_errors_map_to_statuses() {
        assert_eq!(render(OrderError::NoItems.into()).await.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(render(CartError::ExceedsStock { available: 1 }.into()).await.0, StatusCode::CONFLICT);
        assert_eq!(render(ProductError::OptionRequired.into()).await.0, StatusCode::BAD_REQUEST);
        assert_eq!(render(StoreError::NotFound("order".into()).into()).await.0, StatusCode::NOT_FOUND);
    }
}
