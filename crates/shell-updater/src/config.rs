//! Configuration structures for the update client.
//!
//! The host builds an [`UpdateConfig`] (usually from a TOML file shipped
//! with the application) and injects it into the session at
//! construction. Nothing here is process-global.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Main update configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Follow the beta channel instead of stable
    #[serde(default)]
    pub receive_beta: bool,

    /// Manifest location relative to the provider's base URL
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Live artifact the host loads at startup. Never written by the
    /// session; updates are staged beside it.
    #[serde(default)]
    pub install_path: PathBuf,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Security configuration
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            receive_beta: false,
            manifest_path: default_manifest_path(),
            install_path: PathBuf::new(),
            network: NetworkConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, UpdateError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| UpdateError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| UpdateError::Config(format!("{}: {}", parent.display(), e)))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| UpdateError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Check the settings a session cannot run without.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.install_path.as_os_str().is_empty() {
            return Err(UpdateError::Config("install_path is not set".to_string()));
        }
        if self.install_path.file_name().is_none() {
            return Err(UpdateError::Config(
                "install_path must name a file".to_string(),
            ));
        }
        if self.manifest_path.trim().is_empty() {
            return Err(UpdateError::Config("manifest_path is empty".to_string()));
        }
        self.security.parse_public_key()?;
        Ok(())
    }
}

/// Network configuration for the HTTP provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Base URL serving the manifest and artifacts
    #[serde(default)]
    pub base_url: String,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Read timeout for streaming in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,

    /// Artifact file name; `{version}` is replaced with the release version
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_seconds: default_timeout(),
            read_timeout_seconds: default_read_timeout(),
            artifact_name: default_artifact_name(),
            headers: BTreeMap::new(),
        }
    }
}

/// Security configuration for artifact verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Public key shipped with the application.
    /// Format: "ed25519:<hex>" or plain base64 of the 32 key bytes
    #[serde(default)]
    pub public_key: String,
}

impl SecurityConfig {
    /// Parse the configured public key.
    pub fn parse_public_key(&self) -> Result<VerifyingKey, UpdateError> {
        parse_public_key(&self.public_key)
    }
}

/// Parse an Ed25519 public key.
///
/// Supports formats:
/// - "ed25519:<hex_encoded_32_bytes>"
/// - "<base64_encoded_32_bytes>"
pub fn parse_public_key(s: &str) -> Result<VerifyingKey, UpdateError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(UpdateError::Config("public key is not set".to_string()));
    }

    let key_data = if let Some(hex_str) = s.strip_prefix("ed25519:") {
        hex::decode(hex_str)
            .map_err(|e| UpdateError::Config(format!("invalid key encoding: {}", e)))?
    } else {
        STANDARD
            .decode(s)
            .map_err(|e| UpdateError::Config(format!("invalid key encoding: {}", e)))?
    };

    let key_bytes: [u8; 32] = key_data.try_into().map_err(|_| {
        UpdateError::Config("Ed25519 public key must be 32 bytes".to_string())
    })?;

    VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| UpdateError::Config(format!("invalid Ed25519 public key: {}", e)))
}

/// Encode a public key in the base64 form accepted by [`parse_public_key`].
pub fn encode_public_key(key: &VerifyingKey) -> String {
    STANDARD.encode(key.as_bytes())
}

// Default value functions for serde
fn default_manifest_path() -> String {
    "update.json".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

fn default_artifact_name() -> String {
    "update-{version}.gz".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn test_key() -> VerifyingKey {
        SigningKey::from_bytes(&[42u8; 32]).verifying_key()
    }

    #[test]
    fn test_default_config() {
        let config = UpdateConfig::default();
        assert!(!config.receive_beta);
        assert_eq!(config.manifest_path, "update.json");
        assert_eq!(config.network.timeout_seconds, 30);
        assert_eq!(config.network.read_timeout_seconds, 60);
        assert_eq!(config.network.artifact_name, "update-{version}.gz");
        assert!(config.network.headers.is_empty());
    }

    #[test]
    fn test_parse_public_key_base64_and_hex() {
        let key = test_key();
        assert_eq!(parse_public_key(&encode_public_key(&key)).unwrap(), key);

        let hex_form = format!("ed25519:{}", hex::encode(key.as_bytes()));
        assert_eq!(parse_public_key(&hex_form).unwrap(), key);
    }

    #[test]
    fn test_parse_public_key_invalid() {
        assert!(parse_public_key("").is_err());
        assert!(parse_public_key("ed25519:00000000").is_err());
        assert!(parse_public_key("ed25519:zz").is_err());
        assert!(parse_public_key("AAAA").is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = UpdateConfig::default();
        assert!(config.validate().is_err());

        config.install_path = PathBuf::from("/opt/app/resources/app.pak");
        assert!(config.validate().is_err());

        config.security.public_key = encode_public_key(&test_key());
        assert!(config.validate().is_ok());

        config.manifest_path = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("updater.toml");

        let mut config = UpdateConfig::default();
        config.receive_beta = true;
        config.install_path = PathBuf::from("/opt/app/app.pak");
        config.network.base_url = "https://updates.example.com".to_string();
        config
            .network
            .headers
            .insert("X-Channel".to_string(), "desktop".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = UpdateConfig::load_from_file(&path).unwrap();
        assert!(loaded.receive_beta);
        assert_eq!(loaded.install_path, config.install_path);
        assert_eq!(loaded.network.headers.get("X-Channel").unwrap(), "desktop");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: UpdateConfig = toml::from_str(
            r#"
            install_path = "/opt/app/app.pak"

            [network]
            base_url = "https://updates.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.manifest_path, "update.json");
        assert_eq!(config.network.timeout_seconds, 30);
        assert!(!config.receive_beta);
    }
}
