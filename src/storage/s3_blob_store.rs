//! Durable tier on any S3-compatible object store.

use super::blob_store::{BlobInfo, BlobMetadata, BlobStore};
use super::error::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct S3BlobConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2...).
    pub endpoint_url: Option<String>,
    /// When absent the default AWS credential chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    region: String,
}

fn sdk_error<E: std::error::Error + 'static>(err: E) -> String {
    DisplayErrorContext(err).to_string()
}

fn content_type_for(key: &str) -> &'static str {
    match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

impl S3BlobStore {
    pub async fn new(config: S3BlobConfig) -> StorageResult<Self> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let credentials =
                    Credentials::new(access_key_id, secret_access_key, None, None, "reposter");
                loader = loader.credentials_provider(credentials);
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::config_error(
                    "access_key_id and secret_access_key must be set together",
                ))
            }
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            region: config.region,
        })
    }

    fn info_from_parts(
        key: String,
        size: Option<i64>,
        last_modified: Option<&aws_sdk_s3::primitives::DateTime>,
        metadata: Option<&std::collections::HashMap<String, String>>,
    ) -> BlobInfo {
        BlobInfo {
            key,
            size: size.unwrap_or(0).max(0) as u64,
            last_modified: last_modified.map(|t| t.secs()),
            metadata: metadata.and_then(BlobMetadata::from_map),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    fn container(&self) -> &str {
        &self.bucket
    }

    async fn ensure_container(&self) -> StorageResult<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => return Ok(()),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {}
            Err(e) => return Err(StorageError::Unavailable(sdk_error(e))),
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if self.region != "us-east-1" && self.region != "auto" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(sdk_error(e)))?;
        info!("Created bucket {}", self.bucket);
        Ok(())
    }

    async fn put(&self, key: &str, path: &Path, metadata: &BlobMetadata) -> StorageResult<u64> {
        debug!("Uploading {} to {}", path.display(), key);
        let size = tokio::fs::metadata(path).await?.len();
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(key))
            .set_metadata(Some(metadata.to_map()))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(sdk_error(e)))?;

        Ok(size)
    }

    async fn head(&self, key: &str) -> StorageResult<Option<BlobInfo>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(Self::info_from_parts(
                key.to_string(),
                output.content_length(),
                output.last_modified(),
                output.metadata(),
            ))),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
            Err(e) => Err(StorageError::AwsSdk(sdk_error(e))),
        }
    }

    async fn fetch(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        debug!("Downloading {} to {}", key, dest.display());
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::not_found(key)
                } else {
                    StorageError::DownloadFailed(sdk_error(e))
                }
            })?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut partial = dest.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut reader = response.body.into_async_read();
        let mut file = tokio::fs::File::create(&partial).await?;
        let size = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("{}: {}", key, e)))?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&partial, dest).await?;
        Ok(size)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(sdk_error(e)))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<BlobInfo>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(sdk_error(e)))?;

            for obj in response.contents() {
                objects.push(Self::info_from_parts(
                    obj.key().unwrap_or_default().to_string(),
                    obj.size(),
                    obj.last_modified(),
                    None,
                ));
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(objects)
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("bucket {}: {}", self.bucket, sdk_error(e))))?;
        Ok(())
    }
}
