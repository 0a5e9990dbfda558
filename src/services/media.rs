//! Cloudinary image uploads for catalog pictures.
//!
//! Uploads are signed with SHA-256, so the Cloudinary account must have its
//! signature algorithm set to SHA-256.

use std::sync::Arc;

use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;

use crate::config::CloudinaryConfig;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cloudinary rejected the upload ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedImage {
    pub secure_url: String,
    pub public_id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

#[derive(Clone)]
pub struct CloudinaryClient {
    inner: Arc<CloudinaryClientInner>,
}

struct CloudinaryClientInner {
    client: Client,
    cloud_name: String,
    api_key: String,
    api_secret: SecretString,
    folder: Option<String>,
    base_url: String,
}

impl CloudinaryClient {
    pub fn new(config: &CloudinaryConfig) -> Result<Self, MediaError> {
        Ok(Self {
            inner: Arc::new(CloudinaryClientInner {
                client: super::http_client()?,
                cloud_name: config.cloud_name.clone(),
                api_key: config.api_key.clone(),
                api_secret: config.api_secret.clone(),
                folder: config.folder.clone(),
                base_url: config.base_url.trim_end_matches('/').to_string(),
            }),
        })
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(&self, file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<UploadedImage, MediaError> {
        let timestamp = Utc::now().timestamp().to_string();
        let mut params: Vec<(&str, &str)> = vec![("timestamp", timestamp.as_str())];
        if let Some(folder) = &self.inner.folder {
            params.push(("folder", folder.as_str()));
        }
        let signature = sign(&mut params, self.inner.api_secret.expose_secret());

        let file = Part::bytes(bytes).file_name(file_name.to_string()).mime_str(content_type)?;
        let mut form = Form::new()
            .part("file", file)
            .text("api_key", self.inner.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");
        for (key, value) in params {
            form = form.text(key.to_string(), value.to_string());
        }

        let url = format!("{}/{}/image/upload", self.inner.base_url, self.inner.cloud_name);
        let response = self.inner.client.post(url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.json::<ErrorBody>().await.map(|b| b.error.message).unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %message, "Cloudinary upload rejected");
            return Err(MediaError::Rejected { status: status.as_u16(), message });
        }
        Ok(response.json().await?)
    }
}

/// Sorts `params` by name and signs `k=v&k=v` followed by the API secret.
fn sign(params: &mut [(&str, &str)], secret: &str) -> String {
    params.sort_unstable_by_key(|(k, _)| *k);
    let joined = params.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
