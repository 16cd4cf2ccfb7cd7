//! Download queue: durable, prioritized work list of videos to fetch, and
//! the downloaders that fetch them.

mod downloader;
mod http_downloader;
mod queue;

pub use downloader::{
    DownloadError, DownloadErrorKind, DownloadRequest, DownloadedFile, Downloader,
    DownloaderRegistry,
};
pub use http_downloader::HttpDownloader;
pub use queue::{DownloadOutcome, DownloadQueue};
