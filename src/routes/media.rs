//! Back office image uploads.

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};

use super::{created, ApiResponse};
use crate::auth::AdminUser;
use crate::error::{AppError, Result};
use crate::services::media::UploadedImage;
use crate::AppState;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/media", post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)))
}

/// Uploads every file part of the form and returns the CDN URLs in order.
async fn upload(
    State(state): State<AppState>,
    _admin: AdminUser,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<UploadedImage>>>)> {
    let media = state.media.as_ref().ok_or_else(|| AppError::ServiceUnavailable("Image uploads are not configured".into()))?;
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut uploaded = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::BadRequest(e.body_text()))? {
        let Some(file_name) = field.file_name().map(str::to_string) else { continue };
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(AppError::BadRequest(format!("{file_name} is not an image")));
        }
        let bytes = field.bytes().await.map_err(|e| AppError::BadRequest(e.body_text()))?;
        if bytes.is_empty() {
            return Err(AppError::BadRequest(format!("{file_name} is empty")));
        }
        uploaded.push(media.upload(&file_name, &content_type, bytes.to_vec()).await?);
    }

    if uploaded.is_empty() {
        return Err(AppError::BadRequest("No image files in the request".into()));
    }
    tracing::info!(count = uploaded.len(), "images uploaded");
    Ok(created(uploaded))
}
