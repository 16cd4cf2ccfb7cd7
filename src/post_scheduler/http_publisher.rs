//! HTTP client for the external publishing service.

use super::publisher::{PublishError, PublishRequest, Publisher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct PublishResponse {
    post_id: String,
}

/// Sends publish requests as JSON to `<base_url>/posts`.
///
/// The service is expected to read the media from the shared media path and
/// answer with `{ "post_id": "..." }`.
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

impl HttpPublisher {
    pub fn new(base_url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the publishing service is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to connect to publishing service")?;
        if !response.status().is_success() {
            anyhow::bail!(
                "Publisher health check failed with status: {}",
                response.status()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let response = self
            .client
            .post(format!("{}/posts", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| PublishError::retryable(format!("publishing service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("publishing service returned {}: {}", status, body.trim());
            return Err(if is_retryable_status(status) {
                PublishError::retryable(message)
            } else {
                PublishError::permanent(message)
            });
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| PublishError::permanent(format!("unreadable publish response: {}", e)))?;
        if parsed.post_id.is_empty() {
            return Err(PublishError::permanent("publish response has an empty post_id"));
        }
        Ok(parsed.post_id)
    }
}
