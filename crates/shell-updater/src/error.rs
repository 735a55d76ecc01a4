//! Error types for the update client.
//!
//! Every error maps onto one of four kinds so hosts can react to the
//! category without matching on individual variants. Lower-level
//! transport, serialization and crypto errors are converted into these
//! variants at the module boundary and never escape as-is.

use thiserror::Error;

/// Coarse error category reported to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid caller input.
    Param,
    /// Transport failure, timeout or abort.
    Network,
    /// Signature mismatch, decompress or staging failure.
    Validation,
    /// Version gate rejected the update.
    Version,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Param => write!(f, "ParamError"),
            Self::Network => write!(f, "NetworkError"),
            Self::Validation => write!(f, "ValidationError"),
            Self::Version => write!(f, "VersionError"),
        }
    }
}

/// Errors that can occur during update operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Version string does not match the version grammar
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Manifest is missing fields or carries malformed values
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Caller input is missing or inconsistent
    #[error("invalid parameter: {0}")]
    Param(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Download failed with HTTP status
    #[error("request failed with status {status}")]
    HttpStatus { status: u16 },

    /// Network error during fetch
    #[error("network error: {0}")]
    Network(String),

    /// Operation aborted through the session's cancel token
    #[error("operation aborted")]
    Aborted,

    /// Signature token did not verify against the artifact
    #[error("signature verification failed")]
    InvalidSignature,

    /// Artifact size does not match the manifest
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Artifact could not be decompressed
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// Staged artifact could not be written or moved
    #[error("staging failed: {0}")]
    Staging(String),

    /// Installed shell is older than the update requires
    #[error("entry version {installed} is below required minimum {required}")]
    BelowMinimumVersion { installed: String, required: String },

    /// Offered version is not newer than the installed one
    #[error("version {offered} is not newer than installed {installed}")]
    NotNewer { offered: String, installed: String },
}

impl UpdateError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidVersion(_)
            | Self::InvalidManifest(_)
            | Self::Param(_)
            | Self::Config(_) => ErrorKind::Param,
            Self::HttpStatus { .. } | Self::Network(_) | Self::Aborted => ErrorKind::Network,
            Self::InvalidSignature
            | Self::SizeMismatch { .. }
            | Self::Decompress(_)
            | Self::Staging(_) => ErrorKind::Validation,
            Self::BelowMinimumVersion { .. } | Self::NotNewer { .. } => ErrorKind::Version,
        }
    }

    /// Whether the error was caused by cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return UpdateError::HttpStatus {
                status: status.as_u16(),
            };
        }
        UpdateError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(err: serde_json::Error) -> Self {
        UpdateError::InvalidManifest(err.to_string())
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(err: std::io::Error) -> Self {
        UpdateError::Staging(err.to_string())
    }
}
