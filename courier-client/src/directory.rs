//! Key directory HTTP client.

use crate::error::{ClientError, Result};
use courier_types::{ErrorBody, OneTimeKeyCount, PrekeyBundle, UploadBundle, UploadReceipt};
use serde::de::DeserializeOwned;

/// Client for `/keys/*`.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DirectoryClient {
    /// Create a client for the directory at `base_url` (e.g. `http://127.0.0.1:8000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client sharing an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Publish a bundle.
    pub async fn upload(&self, bundle: &UploadBundle) -> Result<UploadReceipt> {
        let response = self
            .http
            .post(format!("{}/keys/upload", self.base_url))
            .json(bundle)
            .send()
            .await?;
        decode(response).await
    }

    /// Fetch `user_id`'s bundle, consuming one of its one-time prekeys.
    pub async fn fetch(&self, user_id: &str) -> Result<PrekeyBundle> {
        let response = self
            .http
            .get(format!("{}/keys/{}", self.base_url, user_id))
            .send()
            .await?;
        decode(response).await
    }

    /// How many one-time prekeys `user_id` has left.
    pub async fn one_time_count(&self, user_id: &str) -> Result<OneTimeKeyCount> {
        let response = self
            .http
            .get(format!("{}/keys/{}/one-time-count", self.base_url, user_id))
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await?;
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .map(|e| e.detail)
        .unwrap_or(body);
    tracing::debug!("Directory returned {}: {}", status, detail);
    Err(ClientError::from_status(status.as_u16(), detail))
}
