//! Update session - orchestrates the complete update flow.
//!
//! The session combines all update components:
//! - a [`Provider`] for manifests and artifacts
//! - the [`Downloader`] for progress reporting
//! - signature verification and decompression through the provider
//! - [`StagingPaths`] for writing the verified artifact beside the live one
//! - the [`Host`] for installed versions and relaunching
//!
//! # States
//!
//! ```text
//! Idle -> Checking -> Available | Unavailable
//!      -> Downloading -> Downloaded | Failed
//!      -> Installing (host relaunches)
//! ```
//!
//! At most one check or download runs at a time. A call made while one is
//! running returns a `Busy` outcome without touching any state.
//! [`UpdateSession::cancel`] fires the operation's token; the operation
//! itself cleans up, returns to `Idle` and emits the `Cancelled` event, so
//! all of its events come from one task in order.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cancel::CancelToken;
use crate::config::UpdateConfig;
use crate::download::Downloader;
use crate::error::UpdateError;
use crate::events::{EventSender, UnavailableReason, UpdateEvent};
use crate::host::Host;
use crate::http::HttpProvider;
use crate::manifest::{Manifest, UpdateInfo};
use crate::provider::Provider;
use crate::staging::StagingPaths;
use crate::version::Version;

/// Current state of the update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    /// No operation has run, or the last one was cancelled or failed a check
    #[default]
    Idle,
    /// Fetching or validating the manifest
    Checking,
    /// A newer release is pending download
    Available,
    /// The last check found nothing to install
    Unavailable,
    /// Fetching, verifying and staging the artifact
    Downloading,
    /// A verified update is staged
    Downloaded,
    /// The last download failed
    Failed,
    /// The host was asked to relaunch into the staged update
    Installing,
}

impl UpdateState {
    /// Whether a check or download is running.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Checking | Self::Downloading)
    }
}

/// Result of [`UpdateSession::check_for_updates`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Available(UpdateInfo),
    Unavailable(UnavailableReason),
    /// Another operation was running; nothing happened
    Busy,
}

/// A verified, staged update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedUpdate {
    pub version: Version,
    pub staged_path: PathBuf,
    /// SHA-256 of the staged (decompressed) bytes, hex encoded
    pub sha256: String,
}

/// Result of [`UpdateSession::download_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded(DownloadedUpdate),
    /// Another operation was running; nothing happened
    Busy,
}

/// An artifact supplied by the caller instead of fetched from the provider.
#[derive(Debug, Clone)]
pub struct LocalArtifact {
    /// Compressed artifact bytes
    pub buffer: Bytes,
    /// Signature token for `buffer`
    pub signature: String,
    /// Version the token is expected to be bound to
    pub version: Version,
    /// Lowest entry/shell version able to run the artifact, if known
    pub minimum_version: Option<Version>,
}

/// Single-flight bookkeeping, published so `cancel()` can wait on it.
#[derive(Debug, Clone, Copy, Default)]
struct Flight {
    busy: bool,
    /// Operations started so far
    started: u64,
}

/// Clears the busy flag when an operation ends, on every path.
struct ProcessingGuard<'a> {
    flight: &'a watch::Sender<Flight>,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flight.send_modify(|flight| flight.busy = false);
    }
}

/// One update client per embedding process.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use shell_updater::{CheckOutcome, UpdateConfig, UpdateSession};
///
/// let config = UpdateConfig::load_from_file(path)?;
/// let (session, mut events) = UpdateSession::with_http(config, host)?;
///
/// if let CheckOutcome::Available(info) = session.check_for_updates(None).await? {
///     println!("Update available: {}", info.version);
///     session.download_update(None).await?;
///     session.quit_and_install().await?;
/// }
/// ```
pub struct UpdateSession {
    /// Injected configuration
    config: UpdateConfig,
    /// Public key the artifacts are signed for
    cert: VerifyingKey,
    /// Transport and strategy implementation
    provider: Arc<dyn Provider>,
    /// Embedding application
    host: Arc<dyn Host>,
    /// Progress-reporting artifact fetcher
    downloader: Downloader,
    /// Files owned by this session
    paths: StagingPaths,
    /// Event stream to the host
    events: EventSender,
    /// Current state; events that change it are emitted under this lock
    state: RwLock<UpdateState>,
    /// Release selected by the last successful check
    pending: RwLock<Option<UpdateInfo>>,
    /// Single-flight state
    flight: watch::Sender<Flight>,
    /// Token for the operation in flight; replaced on every cancel
    cancel: Mutex<CancelToken>,
    /// Time of the last completed manifest check
    last_check: RwLock<Option<DateTime<Utc>>>,
    /// Log context for everything this session does
    span: tracing::Span,
}

impl UpdateSession {
    /// Create a session.
    ///
    /// Returns the session and the receiving end of its event stream.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the configuration is incomplete
    /// or the public key cannot be parsed.
    pub fn new(
        config: UpdateConfig,
        provider: Arc<dyn Provider>,
        host: Arc<dyn Host>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<UpdateEvent>), UpdateError> {
        config.validate()?;
        let cert = config.security.parse_public_key()?;

        let span = info_span!(
            "update_session",
            install = %config.install_path.display(),
            beta = config.receive_beta,
        );
        let (events, rx) = EventSender::channel();

        let session = Self {
            cert,
            downloader: Downloader::new(Arc::clone(&provider)),
            paths: StagingPaths::for_install(&config.install_path),
            provider,
            host,
            events,
            state: RwLock::new(UpdateState::Idle),
            pending: RwLock::new(None),
            flight: watch::Sender::new(Flight::default()),
            cancel: Mutex::new(CancelToken::new()),
            last_check: RwLock::new(None),
            span,
            config,
        };
        Ok((session, rx))
    }

    /// Create a session backed by the HTTP provider from `config.network`.
    pub fn with_http(
        config: UpdateConfig,
        host: Arc<dyn Host>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<UpdateEvent>), UpdateError> {
        let provider = Arc::new(HttpProvider::new(&config.network)?);
        Self::new(config, provider, host)
    }

    /// Get the current state.
    pub async fn state(&self) -> UpdateState {
        *self.state.read().await
    }

    /// Whether a check or download is running.
    pub fn is_processing(&self) -> bool {
        self.flight.borrow().busy
    }

    /// Release selected by the last successful check, if not yet consumed.
    pub async fn pending(&self) -> Option<UpdateInfo> {
        self.pending.read().await.clone()
    }

    /// Time of the last completed manifest check.
    pub async fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        *self.last_check.read().await
    }

    /// Get the configuration.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Files this session stages into.
    pub fn staging_paths(&self) -> &StagingPaths {
        &self.paths
    }

    fn try_begin(&self) -> Option<ProcessingGuard<'_>> {
        let began = self.flight.send_if_modified(|flight| {
            if flight.busy {
                return false;
            }
            flight.busy = true;
            flight.started += 1;
            true
        });
        began.then(|| ProcessingGuard {
            flight: &self.flight,
        })
    }

    fn current_token(&self) -> CancelToken {
        match self.cancel.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Enter an in-flight state and return the token guarding it.
    async fn enter(&self, next: UpdateState, event: Option<UpdateEvent>) -> CancelToken {
        let mut state = self.state.write().await;
        let token = self.current_token();
        *state = next;
        if let Some(event) = event {
            self.events.emit(event);
        }
        token
    }

    /// Check for an applicable update.
    ///
    /// With `manifest == None` the manifest is fetched from the provider at
    /// the configured path; otherwise the supplied JSON is validated.
    ///
    /// # Returns
    ///
    /// - `Ok(CheckOutcome::Available(info))` if a newer release applies
    /// - `Ok(CheckOutcome::Unavailable(reason))` if it does not
    /// - `Ok(CheckOutcome::Busy)` if another operation is running
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be fetched or is invalid, or
    /// [`UpdateError::Aborted`] if the check was cancelled.
    pub async fn check_for_updates(
        &self,
        manifest: Option<serde_json::Value>,
    ) -> Result<CheckOutcome, UpdateError> {
        let Some(_guard) = self.try_begin() else {
            debug!(parent: &self.span, "Check ignored: another operation is running");
            return Ok(CheckOutcome::Busy);
        };

        async {
            info!("Checking for updates...");
            let cancel = self
                .enter(UpdateState::Checking, Some(UpdateEvent::CheckingForUpdate))
                .await;

            match self.run_check(manifest, &cancel).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => {
                    self.fail_check(&cancel, &e).await;
                    Err(e)
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    async fn run_check(
        &self,
        supplied: Option<serde_json::Value>,
        cancel: &CancelToken,
    ) -> Result<CheckOutcome, UpdateError> {
        let manifest = match supplied {
            Some(value) => Manifest::from_value(value)?,
            None => {
                debug!(path = %self.config.manifest_path, "Fetching manifest");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(UpdateError::Aborted),
                    res = self.provider.fetch_manifest(&self.config.manifest_path, cancel) => res?,
                }
            }
        };

        let info = manifest.select(self.config.receive_beta).clone();
        let entry_version = self.host.entry_version();
        let app_version = self.host.app_version();

        let reason = if self
            .provider
            .is_lower_version(&entry_version, &info.minimum_version)
        {
            info!(
                entry = %entry_version,
                required = %info.minimum_version,
                "Installed shell is below the update's minimum version"
            );
            Some(UnavailableReason::BelowMinimum)
        } else if !self.provider.is_lower_version(&app_version, &info.version) {
            info!(
                current = %app_version,
                latest = %info.version,
                "No update available"
            );
            Some(UnavailableReason::NotNewer)
        } else {
            None
        };

        let mut state = self.state.write().await;
        if cancel.is_cancelled() {
            return Err(UpdateError::Aborted);
        }
        *self.last_check.write().await = Some(Utc::now());

        match reason {
            Some(reason) => {
                *self.pending.write().await = None;
                *state = UpdateState::Unavailable;
                self.events.emit(UpdateEvent::UpdateNotAvailable { reason });
                Ok(CheckOutcome::Unavailable(reason))
            }
            None => {
                info!(
                    current = %app_version,
                    latest = %info.version,
                    size = info.size,
                    "Update available"
                );
                *self.pending.write().await = Some(info.clone());
                *state = UpdateState::Available;
                self.events.emit(UpdateEvent::UpdateAvailable {
                    version: info.version.clone(),
                    minimum_version: info.minimum_version.clone(),
                    size: info.size,
                });
                Ok(CheckOutcome::Available(info))
            }
        }
    }

    async fn fail_check(&self, cancel: &CancelToken, err: &UpdateError) {
        let mut state = self.state.write().await;
        if cancel.is_cancelled() {
            info!("Update check cancelled");
            *state = UpdateState::Idle;
            self.events.emit(UpdateEvent::Cancelled);
            return;
        }
        error!(kind = %err.kind(), "Update check failed: {}", err);
        *state = UpdateState::Idle;
        self.events.emit(UpdateEvent::error(err));
    }

    /// Download, verify and stage an update.
    ///
    /// With `local == None` the release found by the last successful check
    /// is fetched from the provider. With a [`LocalArtifact`] the supplied
    /// bytes are verified and staged instead.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - there is neither a pending release nor a local artifact
    /// - the fetch fails or is cancelled
    /// - the signature does not bind the artifact to the expected version
    /// - decompression or staging fails
    ///
    /// Partial files are removed before the error is returned.
    pub async fn download_update(
        &self,
        local: Option<LocalArtifact>,
    ) -> Result<DownloadOutcome, UpdateError> {
        let Some(_guard) = self.try_begin() else {
            debug!(parent: &self.span, "Download ignored: another operation is running");
            return Ok(DownloadOutcome::Busy);
        };

        async {
            let cancel = self.enter(UpdateState::Downloading, None).await;

            match self.run_download(local, &cancel).await {
                Ok(downloaded) => Ok(DownloadOutcome::Downloaded(downloaded)),
                Err(e) => {
                    self.fail_download(&cancel, &e).await;
                    Err(e)
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    async fn run_download(
        &self,
        local: Option<LocalArtifact>,
        cancel: &CancelToken,
    ) -> Result<DownloadedUpdate, UpdateError> {
        let (info, supplied) = match local {
            Some(artifact) => (self.local_info(&artifact)?, Some(artifact.buffer)),
            None => {
                let info = self.pending.read().await.clone().ok_or_else(|| {
                    UpdateError::Param(
                        "no pending update; check for updates or supply an artifact".to_string(),
                    )
                })?;
                (info, None)
            }
        };

        self.paths.cleanup().await?;

        let bytes = match supplied {
            Some(bytes) => {
                info!(version = %info.version, bytes = bytes.len(), "Using supplied artifact");
                bytes
            }
            None => {
                let events = self.events.clone();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(UpdateError::Aborted),
                    res = self.downloader.fetch(&info, cancel, move |progress| {
                        events.emit(UpdateEvent::DownloadProgress(progress));
                    }) => res?,
                }
            }
        };
        ensure_live(cancel)?;

        self.paths.write_intermediate(&bytes).await?;
        ensure_live(cancel)?;

        if !self
            .provider
            .verify(&bytes, &info.version, &info.signature, &self.cert)
        {
            warn!(version = %info.version, "Artifact signature rejected");
            return Err(UpdateError::InvalidSignature);
        }
        debug!("Artifact signature verified");

        let decompressed = self.provider.decompress(&bytes)?;
        let staged_path = self.paths.stage(&decompressed).await?;
        let sha256 = hex::encode(Sha256::digest(&decompressed));

        let mut state = self.state.write().await;
        ensure_live(cancel)?;
        *self.pending.write().await = None;
        *state = UpdateState::Downloaded;
        self.events.emit(UpdateEvent::UpdateDownloaded {
            version: info.version.clone(),
            staged_path: staged_path.clone(),
        });
        info!(version = %info.version, sha256 = %sha256, "Update downloaded and staged");

        Ok(DownloadedUpdate {
            version: info.version,
            staged_path,
            sha256,
        })
    }

    /// Build the release entry for a caller-supplied artifact.
    fn local_info(&self, artifact: &LocalArtifact) -> Result<UpdateInfo, UpdateError> {
        if artifact.buffer.is_empty() {
            return Err(UpdateError::Param("supplied artifact is empty".to_string()));
        }
        if artifact.signature.trim().is_empty() {
            return Err(UpdateError::Param(
                "supplied artifact has no signature".to_string(),
            ));
        }

        let entry_version = self.host.entry_version();
        let minimum_version = artifact
            .minimum_version
            .clone()
            .unwrap_or_else(|| entry_version.clone());
        if self
            .provider
            .is_lower_version(&entry_version, &minimum_version)
        {
            return Err(UpdateError::BelowMinimumVersion {
                installed: entry_version.to_string(),
                required: minimum_version.to_string(),
            });
        }

        let app_version = self.host.app_version();
        if !self
            .provider
            .is_lower_version(&app_version, &artifact.version)
        {
            return Err(UpdateError::NotNewer {
                offered: artifact.version.to_string(),
                installed: app_version.to_string(),
            });
        }

        Ok(UpdateInfo {
            signature: artifact.signature.clone(),
            minimum_version,
            version: artifact.version.clone(),
            size: artifact.buffer.len() as u64,
        })
    }

    async fn fail_download(&self, cancel: &CancelToken, err: &UpdateError) {
        self.paths.cleanup_best_effort().await;

        let mut state = self.state.write().await;
        if cancel.is_cancelled() {
            info!("Update download cancelled");
            *self.pending.write().await = None;
            *state = UpdateState::Idle;
            self.events.emit(UpdateEvent::Cancelled);
            return;
        }
        error!(kind = %err.kind(), "Update download failed: {}", err);
        *self.pending.write().await = None;
        *state = UpdateState::Failed;
        self.events.emit(UpdateEvent::error(err));
    }

    /// Cancel the running check or download.
    ///
    /// Fires the operation's token and waits until it has unwound: partial
    /// files are removed, the state is back to `Idle` and one
    /// [`UpdateEvent::Cancelled`] has been emitted by the time this returns.
    /// Calling it with nothing in flight does nothing, so a finished
    /// download stays staged.
    pub async fn cancel(&self) {
        let started = {
            let state = self.state.write().await;
            if !state.is_in_flight() {
                debug!(parent: &self.span, "Cancel ignored: nothing in flight");
                return;
            }

            let token = match self.cancel.lock() {
                Ok(mut slot) => std::mem::take(&mut *slot),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            token.cancel();
            let started = self.flight.borrow().started;
            started
        };

        info!(parent: &self.span, "Cancelling update operation");
        let mut flight = self.flight.subscribe();
        // The sender is owned by `self`, so waiting cannot fail.
        let _ = flight
            .wait_for(|flight| !flight.busy || flight.started != started)
            .await;
    }

    /// Ask the host to relaunch into the staged update.
    ///
    /// The swap itself happens in the host's startup sequence through
    /// [`apply_staged_update`](crate::staging::apply_staged_update).
    pub async fn quit_and_install(&self) -> Result<(), UpdateError> {
        let Some(_guard) = self.try_begin() else {
            return Err(UpdateError::Param(
                "an update operation is still running".to_string(),
            ));
        };
        if !self.paths.has_staged().await {
            return Err(UpdateError::Param("no staged update to install".to_string()));
        }

        {
            let mut state = self.state.write().await;
            *state = UpdateState::Installing;
            self.events.emit(UpdateEvent::QuitAndInstall);
        }
        info!(parent: &self.span, "Relaunching into staged update");

        if let Err(e) = self.host.relaunch() {
            error!(parent: &self.span, "Relaunch failed: {}", e);
            *self.state.write().await = UpdateState::Downloaded;
            self.events.emit(UpdateEvent::error(&e));
            return Err(e);
        }
        Ok(())
    }
}

fn ensure_live(cancel: &CancelToken) -> Result<(), UpdateError> {
    if cancel.is_cancelled() {
        return Err(UpdateError::Aborted);
    }
    Ok(())
}
