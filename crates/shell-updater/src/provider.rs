//! Provider capability interface.
//!
//! A provider supplies manifests and artifact bytes plus the strategies
//! the session uses to compare versions, verify signatures and
//! decompress artifacts. The comparison, verification and decompression
//! strategies have library defaults; transports implement only the two
//! fetch methods.

use std::io::{Read, Write};

use async_trait::async_trait;
use bytes::Bytes;
use ed25519_dalek::VerifyingKey;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::cancel::CancelToken;
use crate::error::UpdateError;
use crate::manifest::{Manifest, UpdateInfo};
use crate::signature;
use crate::version::{self, Version};

/// Raw transfer progress for one received chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Total bytes received so far, including this chunk.
    pub received: u64,
    /// Size of this chunk.
    pub chunk_len: usize,
    /// Total size announced by the transport, if any.
    pub total: Option<u64>,
}

/// Callback invoked once per received chunk, in receive order.
pub type ChunkCallback<'a> = &'a (dyn Fn(ChunkProgress) + Send + Sync);

/// Source of manifests and artifacts.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Fetch and validate the manifest at `path`.
    async fn fetch_manifest(&self, path: &str, cancel: &CancelToken)
        -> Result<Manifest, UpdateError>;

    /// Fetch the compressed artifact described by `info`.
    ///
    /// Must return [`UpdateError::Aborted`] promptly once `cancel` fires,
    /// dropping the underlying request.
    async fn fetch_artifact(
        &self,
        info: &UpdateInfo,
        cancel: &CancelToken,
        on_progress: ChunkCallback<'_>,
    ) -> Result<Bytes, UpdateError>;

    /// Version ordering used for the applicability checks.
    fn is_lower_version(&self, a: &Version, b: &Version) -> bool {
        version::is_lower_version(a, b)
    }

    /// Decompress a fetched artifact.
    fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, UpdateError> {
        gunzip(bytes)
    }

    /// Check that `signature` binds `bytes` to `version` under `cert`.
    fn verify(&self, bytes: &[u8], version: &Version, signature: &str, cert: &VerifyingKey) -> bool {
        match signature::verify(bytes, signature, cert) {
            Ok(bound) => bound == *version,
            Err(_) => false,
        }
    }
}

/// Decode a gzip stream.
pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, UpdateError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| UpdateError::Decompress(e.to_string()))?;
    Ok(out)
}

/// Encode a gzip stream, as the packaging step does.
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>, UpdateError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| UpdateError::Decompress(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| UpdateError::Decompress(e.to_string()))
}
