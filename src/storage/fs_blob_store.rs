//! Durable tier backed by a directory, for single-host deployments and tests.
//!
//! Layout under `<root>/<container>/`:
//! - `<key>`: blob content
//! - `.meta/<key>.json`: [`BlobMetadata`] sidecar

use super::blob_store::{BlobInfo, BlobMetadata, BlobStore};
use super::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tracing::debug;

const META_DIR: &str = ".meta";
const PARTIAL_SUFFIX: &str = ".uploading";

pub struct FsBlobStore {
    container: String,
    container_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl AsRef<Path>, container: impl Into<String>) -> Self {
        let container = container.into();
        Self {
            container_dir: root.as_ref().join(&container),
            container,
        }
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    fn blob_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with(PARTIAL_SUFFIX)
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && relative
                .components()
                .next()
                .is_some_and(|c| c.as_os_str() != META_DIR);
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.container_dir.join(relative))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.container_dir
            .join(META_DIR)
            .join(format!("{}.json", key))
    }

    async fn require_container(&self) -> StorageResult<()> {
        match fs::metadata(&self.container_dir).await {
            Ok(m) if m.is_dir() => Ok(()),
            _ => Err(StorageError::Unavailable(format!(
                "{} is not a directory",
                self.container_dir.display()
            ))),
        }
    }

    async fn read_sidecar(&self, key: &str) -> Option<BlobMetadata> {
        let bytes = fs::read(self.sidecar_path(key)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn info_for(&self, key: String, path: &Path) -> StorageResult<BlobInfo> {
        let meta = fs::metadata(path).await?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        let metadata = self.read_sidecar(&key).await;
        Ok(BlobInfo {
            key,
            size: meta.len(),
            last_modified,
            metadata,
        })
    }
}

async fn copy_atomically(from: &Path, to: &Path) -> std::io::Result<u64> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut partial = to.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);
    let size = fs::copy(from, &partial).await?;
    fs::rename(&partial, to).await?;
    Ok(size)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    fn container(&self) -> &str {
        &self.container
    }

    async fn ensure_container(&self) -> StorageResult<()> {
        fs::create_dir_all(self.container_dir.join(META_DIR)).await?;
        Ok(())
    }

    async fn put(&self, key: &str, path: &Path, metadata: &BlobMetadata) -> StorageResult<u64> {
        let dest = self.blob_path(key)?;
        self.require_container().await?;
        debug!("Storing {} as {}", path.display(), key);

        let size = copy_atomically(path, &dest)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;

        let sidecar = self.sidecar_path(key);
        if let Some(parent) = sidecar.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&sidecar, serde_json::to_vec_pretty(metadata)?).await?;
        Ok(size)
    }

    async fn head(&self, key: &str) -> StorageResult<Option<BlobInfo>> {
        let path = self.blob_path(key)?;
        self.require_container().await?;
        match fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(Some(self.info_for(key.to_string(), &path).await?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        let path = self.blob_path(key)?;
        self.require_container().await?;
        match copy_atomically(&path, dest).await {
            Ok(size) => Ok(size),
            Err(e) if e.kind() == ErrorKind::NotFound && !path.exists() => {
                Err(StorageError::not_found(key))
            }
            Err(e) => Err(StorageError::DownloadFailed(format!("{}: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        self.require_container().await?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::not_found(key)),
            Err(e) => return Err(StorageError::delete_failed(format!("{}: {}", key, e))),
        }
        match fs::remove_file(self.sidecar_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<BlobInfo>> {
        self.require_container().await?;
        let mut blobs = Vec::new();
        let mut pending_dirs = vec![self.container_dir.clone()];

        while let Some(dir) = pending_dirs.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::ListFailed(format!("{}: {}", dir.display(), e)))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if dir != self.container_dir || entry.file_name() != META_DIR {
                        pending_dirs.push(path);
                    }
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.container_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(PARTIAL_SUFFIX) || !key.starts_with(prefix) {
                    continue;
                }
                blobs.push(self.info_for(key, &path).await?);
            }
        }

        blobs.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(blobs)
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.require_container().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata() -> BlobMetadata {
        BlobMetadata {
            original_path: "/tmp/a.mp4".into(),
            upload_date: 1_700_000_000,
            retention_date: 1_700_604_800,
        }
    }

    async fn setup() -> (TempDir, FsBlobStore, PathBuf) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().join("durable"), "videos-test");
        store.ensure_container().await.unwrap();
        let source = dir.path().join("a.mp4");
        fs::write(&source, b"0123456789").await.unwrap();
        (dir, store, source)
    }

    #[tokio::test]
    async fn put_head_fetch_delete() {
        let (dir, store, source) = setup().await;

        assert_eq!(store.put("videos/a.mp4", &source, &metadata()).await.unwrap(), 10);
        let info = store.head("videos/a.mp4").await.unwrap().unwrap();
        assert_eq!(info.size, 10);
        assert_eq!(info.metadata, Some(metadata()));

        let restored = dir.path().join("restore/a.mp4");
        assert_eq!(store.fetch("videos/a.mp4", &restored).await.unwrap(), 10);
        assert_eq!(fs::read(&restored).await.unwrap(), b"0123456789");

        store.delete("videos/a.mp4").await.unwrap();
        assert!(store.head("videos/a.mp4").await.unwrap().is_none());
        assert!(store.delete("videos/a.mp4").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_skips_sidecars_and_filters_prefix() {
        let (_dir, store, source) = setup().await;
        store.put("videos/b.mp4", &source, &metadata()).await.unwrap();
        store.put("videos/a.mp4", &source, &metadata()).await.unwrap();
        store.put("thumbs/a.jpg", &source, &metadata()).await.unwrap();

        let keys: Vec<_> = store
            .list("videos/")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.key)
            .collect();
        assert_eq!(keys, vec!["videos/a.mp4", "videos/b.mp4"]);
        assert_eq!(store.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let (_dir, store, source) = setup().await;
        for key in ["../x.mp4", "/abs.mp4", ".meta/x.json", ""] {
            assert!(matches!(
                store.put(key, &source, &metadata()).await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn missing_container_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path(), "absent");
        assert!(matches!(
            store.health_check().await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(matches!(
            store.head("videos/a.mp4").await,
            Err(StorageError::Unavailable(_))
        ));
    }
}
