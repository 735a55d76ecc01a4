//! On-disk staging of verified artifacts.
//!
//! For a live artifact `app.pak` the session owns three sibling paths:
//! - `app.pak.download` holds the compressed bytes while they are verified
//! - `app.pak.partial` receives the decompressed bytes
//! - `app.pak.staged` is the finished update, renamed from `.partial`
//!   only after a complete write
//!
//! The live file itself is never opened for writing by the session. The
//! host swaps the staged file in at startup with [`apply_staged_update`].

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::UpdateError;

const DOWNLOAD_SUFFIX: &str = "download";
const PARTIAL_SUFFIX: &str = "partial";
const STAGED_SUFFIX: &str = "staged";

fn sibling(live: &Path, suffix: &str) -> PathBuf {
    let mut name = live
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".");
    name.push(suffix);
    live.with_file_name(name)
}

/// Paths owned by one session for one install location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPaths {
    live: PathBuf,
    intermediate: PathBuf,
    partial: PathBuf,
    staged: PathBuf,
}

impl StagingPaths {
    pub fn for_install(live: &Path) -> Self {
        Self {
            live: live.to_path_buf(),
            intermediate: sibling(live, DOWNLOAD_SUFFIX),
            partial: sibling(live, PARTIAL_SUFFIX),
            staged: sibling(live, STAGED_SUFFIX),
        }
    }

    pub fn live(&self) -> &Path {
        &self.live
    }

    pub fn intermediate(&self) -> &Path {
        &self.intermediate
    }

    pub fn partial(&self) -> &Path {
        &self.partial
    }

    pub fn staged(&self) -> &Path {
        &self.staged
    }

    /// Remove every session-owned file. Missing files are not an error.
    pub async fn cleanup(&self) -> Result<(), UpdateError> {
        for path in [&self.intermediate, &self.partial, &self.staged] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Removed stale update file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(UpdateError::Staging(format!(
                        "failed to remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(())
    }

    /// Cleanup on a failure path: errors are logged, never returned.
    pub async fn cleanup_best_effort(&self) {
        if let Err(e) = self.cleanup().await {
            warn!("Cleanup after failed update left files behind: {}", e);
        }
    }

    /// Persist the compressed download while it is being verified.
    pub async fn write_intermediate(&self, bytes: &[u8]) -> Result<(), UpdateError> {
        write_synced(&self.intermediate, bytes).await
    }

    /// Write decompressed bytes and promote them to the staged path.
    pub async fn stage(&self, bytes: &[u8]) -> Result<PathBuf, UpdateError> {
        write_synced(&self.partial, bytes).await?;
        tokio::fs::rename(&self.partial, &self.staged).await?;
        match tokio::fs::remove_file(&self.intermediate).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove intermediate download: {}", e),
        }
        info!(path = %self.staged.display(), bytes = bytes.len(), "Update staged");
        Ok(self.staged.clone())
    }

    /// Whether a finished update is waiting to be applied.
    pub async fn has_staged(&self) -> bool {
        tokio::fs::metadata(&self.staged)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), UpdateError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Move a staged update over the live artifact.
///
/// Meant for the host's startup sequence, before the live artifact is
/// loaded. Returns `true` if an update was applied.
///
/// # Errors
///
/// Returns [`UpdateError::Staging`] if the rename fails; the live
/// artifact is left untouched in that case.
pub fn apply_staged_update(install_path: &Path) -> Result<bool, UpdateError> {
    let paths = StagingPaths::for_install(install_path);
    if !paths.staged.is_file() {
        return Ok(false);
    }

    std::fs::rename(&paths.staged, &paths.live).map_err(|e| {
        UpdateError::Staging(format!(
            "failed to move {} into place: {}",
            paths.staged.display(),
            e
        ))
    })?;

    info!(path = %paths.live.display(), "Applied staged update");
    Ok(true)
}
