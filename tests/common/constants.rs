/// Start of every test clock.
pub const T0: i64 = 1_700_000_000;

pub const DAY: i64 = 86_400;

/// Bytes written by [`ScriptedDownloader`](super::ScriptedDownloader).
pub const VIDEO_BYTES: &[u8] = b"video-bytes";

/// Service name the scripted downloader registers under.
pub const SERVICE: &str = "http";

/// How long to wait for a spawned test server to answer.
pub const SERVER_READY_TIMEOUT_MS: u64 = 5_000;
