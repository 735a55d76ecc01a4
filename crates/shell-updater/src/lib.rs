//! # shell-updater
//!
//! Incremental update client for desktop applications that ship a
//! long-lived entry/shell plus a replaceable application artifact.
//!
//! This crate handles:
//! - Release manifests with a stable and a beta channel
//! - Version gating against the installed app and the shell's minimum
//! - Artifact download with progress reporting and cancellation
//! - Signature tokens binding each artifact to its release version
//! - Staging the decompressed artifact beside the live one
//!
//! ## Security
//!
//! - An artifact is only staged after its signature token verifies
//!   against the public key shipped with the application
//! - The Ed25519 signature covers the artifact digest together with its
//!   version label, so a validly signed older artifact cannot be replayed
//!   as a newer one without the private key
//! - The live artifact is never written; the host swaps the staged file
//!   in at startup

pub mod cancel;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod host;
pub mod http;
pub mod manifest;
pub mod provider;
#[cfg(test)]
mod proptests;
pub mod session;
pub mod signature;
pub mod staging;
pub mod version;

// Re-export main types for convenience
pub use cancel::CancelToken;
pub use config::{NetworkConfig, SecurityConfig, UpdateConfig};
pub use download::{DownloadProgress, Downloader};
pub use error::{ErrorKind, UpdateError};
pub use events::{UnavailableReason, UpdateEvent};
pub use host::Host;
pub use http::HttpProvider;
pub use manifest::{Manifest, UpdateInfo};
pub use provider::Provider;
pub use session::{
    CheckOutcome, DownloadOutcome, DownloadedUpdate, LocalArtifact, UpdateSession, UpdateState,
};
pub use staging::{apply_staged_update, StagingPaths};
pub use version::{is_lower, is_lower_version, Version};
