use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const PARTIAL_DIR: &str = ".partial";

/// Where downloaded videos live before (and after) promotion.
///
/// Finished files sit at `<root>/<video_id><ext>`. In-flight downloads are
/// written under `<root>/.partial/` and renamed in place once complete, so a
/// file at its final path is always whole.
#[derive(Debug, Clone)]
pub struct LocalTier {
    root: PathBuf,
}

/// Keeps ids usable as file names.
///
/// ASCII letters, digits and `-` pass through. Every other byte becomes
/// `_XX` (uppercase hex), so distinct ids never share a file name.
pub fn sanitize_id(video_id: &str) -> String {
    let mut out = String::with_capacity(video_id.len());
    for byte in video_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

/// Extension of `path` with its leading dot, `.mp4` when it has none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_else(|| ".mp4".to_string())
}

impl LocalTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.root.join(PARTIAL_DIR)).await
    }

    pub fn path_for(&self, video_id: &str, extension: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", sanitize_id(video_id), extension))
    }

    pub fn partial_path_for(&self, video_id: &str) -> PathBuf {
        self.root
            .join(PARTIAL_DIR)
            .join(format!("{}.part", sanitize_id(video_id)))
    }

    /// Moves a finished partial download to its final path.
    pub async fn finalize(&self, partial: &Path, video_id: &str, extension: &str) -> std::io::Result<PathBuf> {
        let dest = self.path_for(video_id, extension);
        fs::rename(partial, &dest).await?;
        Ok(dest)
    }

    /// Removes a local artifact. Returns false if it was already gone.
    pub async fn remove_local(&self, path: &Path) -> std::io::Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
    }

    /// Number of finished files and their total size.
    pub async fn usage(&self) -> std::io::Result<(usize, u64)> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(e),
        };
        let (mut files, mut bytes) = (0, 0);
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                files += 1;
                bytes += meta.len();
            }
        }
        Ok((files, bytes))
    }
}
