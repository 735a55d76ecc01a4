//! Update manifest model.
//!
//! The manifest is a small JSON document published next to the artifacts:
//!
//! ```json
//! {
//!   "version": "1.2.3", "minimumVersion": "1.0.0", "signature": "...", "size": 12345,
//!   "beta": { "version": "1.3.0-beta.1", "minimumVersion": "1.0.0", "signature": "...", "size": 999 }
//! }
//! ```
//!
//! The top level describes the stable channel. Both channels must be
//! complete; a manifest with any missing, empty or malformed field is
//! rejected as a whole.

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;
use crate::version::Version;

/// One release channel entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    /// Signature token binding the artifact to `version`
    pub signature: String,
    /// Lowest entry/shell version able to run this release
    pub minimum_version: Version,
    /// Version of the release
    pub version: Version,
    /// Size of the compressed artifact in bytes
    pub size: u64,
}

/// A validated manifest with both channels populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub stable: UpdateInfo,
    pub beta: UpdateInfo,
}

/// Wire form of a channel entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseEntry {
    version: String,
    minimum_version: String,
    signature: String,
    size: u64,
}

/// Wire form of the whole document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument {
    version: String,
    minimum_version: String,
    signature: String,
    size: u64,
    beta: ReleaseEntry,
}

impl ReleaseEntry {
    fn validate(self, channel: &str) -> Result<UpdateInfo, UpdateError> {
        let field = |name: &str, value: &str| -> Result<(), UpdateError> {
            if value.trim().is_empty() {
                return Err(UpdateError::InvalidManifest(format!(
                    "{channel}: field '{name}' is empty"
                )));
            }
            Ok(())
        };
        field("version", &self.version)?;
        field("minimumVersion", &self.minimum_version)?;
        field("signature", &self.signature)?;

        let parse = |name: &str, value: &str| {
            Version::parse(value).map_err(|_| {
                UpdateError::InvalidManifest(format!("{channel}: field '{name}' is not a version"))
            })
        };

        Ok(UpdateInfo {
            version: parse("version", &self.version)?,
            minimum_version: parse("minimumVersion", &self.minimum_version)?,
            signature: self.signature,
            size: self.size,
        })
    }

    fn from_info(info: &UpdateInfo) -> Self {
        Self {
            version: info.version.to_string(),
            minimum_version: info.minimum_version.to_string(),
            signature: info.signature.clone(),
            size: info.size,
        }
    }
}

impl Manifest {
    /// Parse and validate manifest bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, UpdateError> {
        let document: ManifestDocument = serde_json::from_slice(data)?;
        Self::from_document(document)
    }

    /// Validate a manifest that is already decoded into JSON.
    ///
    /// Used when the host hands the manifest in directly.
    pub fn from_value(value: serde_json::Value) -> Result<Self, UpdateError> {
        let document: ManifestDocument = serde_json::from_value(value)?;
        Self::from_document(document)
    }

    fn from_document(document: ManifestDocument) -> Result<Self, UpdateError> {
        let stable = ReleaseEntry {
            version: document.version,
            minimum_version: document.minimum_version,
            signature: document.signature,
            size: document.size,
        }
        .validate("stable")?;
        let beta = document.beta.validate("beta")?;

        Ok(Self { stable, beta })
    }

    /// Pick the channel entry for this client.
    pub fn select(&self, receive_beta: bool) -> &UpdateInfo {
        if receive_beta {
            &self.beta
        } else {
            &self.stable
        }
    }

    /// Serialize back into the wire form.
    pub fn to_json(&self) -> Result<String, UpdateError> {
        let stable = ReleaseEntry::from_info(&self.stable);
        let document = ManifestDocument {
            version: stable.version,
            minimum_version: stable.minimum_version,
            signature: stable.signature,
            size: stable.size,
            beta: ReleaseEntry::from_info(&self.beta),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }
}
