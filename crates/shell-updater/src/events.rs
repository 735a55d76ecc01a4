//! Typed session events.
//!
//! A session hands its receiver to the host at construction. Events are
//! delivered in emission order; a dropped receiver is ignored.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::download::DownloadProgress;
use crate::error::{ErrorKind, UpdateError};
use crate::version::Version;

/// Why a check found nothing to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Installed entry/shell is older than the release's minimum version
    BelowMinimum,
    /// Installed app is already at or above the offered version
    NotNewer,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BelowMinimum => write!(f, "below-minimum"),
            Self::NotNewer => write!(f, "not-newer"),
        }
    }
}

/// Event emitted by an [`UpdateSession`](crate::session::UpdateSession).
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    CheckingForUpdate,
    UpdateAvailable {
        version: Version,
        minimum_version: Version,
        size: u64,
    },
    UpdateNotAvailable {
        reason: UnavailableReason,
    },
    DownloadProgress(DownloadProgress),
    UpdateDownloaded {
        version: Version,
        staged_path: PathBuf,
    },
    Cancelled,
    Error {
        kind: ErrorKind,
        message: String,
    },
    /// Host is about to relaunch into the staged update
    QuitAndInstall,
}

impl UpdateEvent {
    pub fn error(err: &UpdateError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Sending half of a session's event stream.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<UpdateEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: UpdateEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}
