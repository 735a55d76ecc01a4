//! Artifact downloader.
//!
//! Streams artifact bytes through a [`Provider`] and turns the raw
//! per-chunk counters into [`DownloadProgress`] reports with a percentage
//! and an instantaneous transfer rate.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::UpdateError;
use crate::manifest::UpdateInfo;
use crate::provider::{ChunkProgress, Provider};

/// Percentage reported when the total size is unknown.
pub const UNKNOWN_PERCENT: i32 = -1;

/// Download progress information.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    /// Bytes received so far.
    pub transferred: u64,
    /// Total bytes, when the transport announced them.
    pub total: Option<u64>,
    /// Percent complete in `0..=100`, or `-1` if the total is unknown.
    pub percent: i32,
    /// Rate observed over the last chunk, in bytes per second.
    pub bytes_per_second: f64,
}

impl DownloadProgress {
    /// Whether every announced byte has arrived.
    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(total) if total > 0 && self.transferred >= total)
    }
}

impl std::fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.total {
            Some(total) if self.percent >= 0 => write!(
                f,
                "{}/{} bytes ({}%, {:.0} B/s)",
                self.transferred, total, self.percent, self.bytes_per_second
            ),
            _ => write!(
                f,
                "{} bytes ({:.0} B/s)",
                self.transferred, self.bytes_per_second
            ),
        }
    }
}

/// Rounded percentage clamped to `0..=100`.
///
/// A missing or zero total is reported as [`UNKNOWN_PERCENT`].
pub fn percent_complete(transferred: u64, total: Option<u64>) -> i32 {
    match total {
        Some(total) if total > 0 => {
            let pct = (transferred as f64 * 100.0 / total as f64).round();
            pct.clamp(0.0, 100.0) as i32
        }
        _ => UNKNOWN_PERCENT,
    }
}

/// Tracks chunk timing to derive the instantaneous rate.
struct RateMeter {
    last: Instant,
}

impl RateMeter {
    fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    fn observe(&mut self, chunk_len: usize) -> f64 {
        let now = Instant::now();
        let secs = now.duration_since(self.last).as_secs_f64().max(1e-3);
        self.last = now;
        chunk_len as f64 / secs
    }
}

/// Downloads artifacts through a provider.
pub struct Downloader {
    provider: Arc<dyn Provider>,
}

impl Downloader {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Fetch the artifact for `info`, reporting progress per chunk.
    ///
    /// Progress stops as soon as `cancel` fires. A non-zero size in the
    /// manifest must match the number of bytes received.
    pub async fn fetch<F>(
        &self,
        info: &UpdateInfo,
        cancel: &CancelToken,
        on_progress: F,
    ) -> Result<Bytes, UpdateError>
    where
        F: Fn(DownloadProgress) + Send + Sync,
    {
        info!(version = %info.version, size = info.size, "Starting artifact download");

        let meter = Mutex::new(RateMeter::new());
        let report = |chunk: ChunkProgress| {
            if cancel.is_cancelled() {
                return;
            }
            let bytes_per_second = match meter.lock() {
                Ok(mut meter) => meter.observe(chunk.chunk_len),
                Err(_) => 0.0,
            };
            on_progress(DownloadProgress {
                transferred: chunk.received,
                total: chunk.total,
                percent: percent_complete(chunk.received, chunk.total),
                bytes_per_second,
            });
        };

        let bytes = self.provider.fetch_artifact(info, cancel, &report).await?;

        if cancel.is_cancelled() {
            debug!("Download finished after cancellation, discarding");
            return Err(UpdateError::Aborted);
        }

        let actual = bytes.len() as u64;
        if info.size > 0 && actual != info.size {
            warn!(expected = info.size, actual, "Artifact size mismatch");
            return Err(UpdateError::SizeMismatch {
                expected: info.size,
                actual,
            });
        }

        info!(bytes = actual, "Download complete");
        Ok(bytes)
    }
}
