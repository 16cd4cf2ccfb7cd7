//! Downloader that fetches videos over HTTP.

use super::downloader::{DownloadError, DownloadErrorKind, DownloadRequest, DownloadedFile, Downloader};
use crate::storage::{extension_of, LocalTier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Streams a video into the local tier.
///
/// Without a base URL the job URL is fetched directly. With one, the request
/// goes to `<base_url>/download?url=<job url>&video_id=<id>`, letting an
/// external resolver turn share links into media.
pub struct HttpDownloader {
    name: String,
    client: reqwest::Client,
    base_url: Option<String>,
    local: LocalTier,
}

fn classify(err: &reqwest::Error) -> DownloadErrorKind {
    if err.is_timeout() {
        DownloadErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        DownloadErrorKind::Connection
    } else {
        DownloadErrorKind::Unknown
    }
}

fn extension_for(content_type: Option<&str>, url: &str) -> String {
    match content_type.map(|c| c.split(';').next().unwrap_or("").trim()) {
        Some("video/mp4") => ".mp4".to_string(),
        Some("video/quicktime") => ".mov".to_string(),
        Some("video/webm") => ".webm".to_string(),
        _ => {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            let last_segment = path.rsplit('/').next().unwrap_or("");
            if last_segment.contains('.') {
                extension_of(Path::new(last_segment))
            } else {
                ".mp4".to_string()
            }
        }
    }
}

impl HttpDownloader {
    pub fn new(
        name: impl Into<String>,
        base_url: Option<String>,
        timeout_sec: u64,
        local: LocalTier,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            name: name.into(),
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            local,
        })
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    async fn send(&self, request: &DownloadRequest) -> Result<reqwest::Response, DownloadError> {
        let builder = match &self.base_url {
            Some(base) => self.client.get(format!("{}/download", base)).query(&[
                ("url", request.url.as_str()),
                ("video_id", request.video_id.as_str()),
            ]),
            None => self.client.get(&request.url),
        };
        let response = builder
            .send()
            .await
            .map_err(|e| DownloadError::new(classify(&e), e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(DownloadError::new(
                DownloadErrorKind::NotFound,
                format!("{} returned {}", request.url, response.status()),
            )),
            status => Err(DownloadError::new(
                DownloadErrorKind::HttpStatus,
                format!("{} returned {}", request.url, status),
            )),
        }
    }

    async fn write_body(&self, response: reqwest::Response, partial: &Path) -> Result<u64, DownloadError> {
        let storage_err = |e: std::io::Error| DownloadError::new(DownloadErrorKind::Storage, e.to_string());

        let mut file = File::create(partial).await.map_err(storage_err)?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| DownloadError::new(classify(&e), e.to_string()))?;
            file.write_all(&chunk).await.map_err(storage_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(storage_err)?;
        Ok(written)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadedFile, DownloadError> {
        let response = self.send(request).await?;
        let extension = extension_for(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            &request.url,
        );

        self.local
            .ensure_dirs()
            .await
            .map_err(|e| DownloadError::new(DownloadErrorKind::Storage, e.to_string()))?;
        let partial = self.local.partial_path_for(&request.video_id);
        let size = match self.write_body(response, &partial).await {
            Ok(size) => size,
            Err(e) => {
                let _ = self.local.remove_local(&partial).await;
                return Err(e);
            }
        };
        if size == 0 {
            let _ = self.local.remove_local(&partial).await;
            return Err(DownloadError::new(
                DownloadErrorKind::Unknown,
                format!("{} returned an empty body", request.url),
            ));
        }

        let path = self
            .local
            .finalize(&partial, &request.video_id, &extension)
            .await
            .map_err(|e| DownloadError::new(DownloadErrorKind::Storage, e.to_string()))?;
        debug!("Downloaded {} bytes to {}", size, path.display());
        Ok(DownloadedFile { path, size })
    }
}
