//! HTTP(S) provider.
//!
//! Fetches the manifest and artifacts from a static file server:
//! - manifest: `GET {base_url}/{manifest_path}`
//! - artifact: `GET {base_url}/{artifact_name}` with `{version}` substituted,
//!   sent with `Accept: application/octet-stream`
//!
//! Caller-configured headers are attached to every request. When the
//! cancel token fires the request future is dropped, which closes the
//! connection instead of merely pausing the body read.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::NetworkConfig;
use crate::error::UpdateError;
use crate::manifest::{Manifest, UpdateInfo};
use crate::provider::{ChunkCallback, ChunkProgress, Provider};
use crate::version::Version;

/// Placeholder replaced by the release version in artifact names.
const VERSION_PLACEHOLDER: &str = "{version}";

/// Upper bound on the buffer reserved from an announced length.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// reqwest-backed [`Provider`].
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    artifact_name: String,
}

impl HttpProvider {
    /// Build a provider from network configuration.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if a configured header is not a
    /// valid HTTP header or the client cannot be built.
    pub fn new(config: &NetworkConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .user_agent(format!("shell-updater/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(header_map(config)?)
            .build()
            .map_err(|e| UpdateError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            artifact_name: config.artifact_name.clone(),
        })
    }

    /// Absolute URL for a path below the base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Absolute URL of the artifact for `version`.
    pub fn artifact_url(&self, version: &Version) -> String {
        let name = self
            .artifact_name
            .replace(VERSION_PLACEHOLDER, &version.to_string());
        self.url_for(&name)
    }

    async fn get(
        &self,
        url: &str,
        accept: &'static str,
        cancel: &CancelToken,
    ) -> Result<reqwest::Response, UpdateError> {
        debug!(url, "Sending request");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdateError::Aborted),
            res = self.client.get(url).header(ACCEPT, accept).send() => res?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn header_map(config: &NetworkConfig) -> Result<HeaderMap, UpdateError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| UpdateError::Config(format!("invalid header name: {}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| UpdateError::Config(format!("invalid value for header {}", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl Provider for HttpProvider {
    async fn fetch_manifest(
        &self,
        path: &str,
        cancel: &CancelToken,
    ) -> Result<Manifest, UpdateError> {
        let url = self.url_for(path);
        let response = self.get(&url, "application/json", cancel).await?;

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdateError::Aborted),
            body = response.bytes() => body?,
        };
        debug!(bytes = body.len(), "Fetched manifest");
        Manifest::from_slice(&body)
    }

    async fn fetch_artifact(
        &self,
        info: &UpdateInfo,
        cancel: &CancelToken,
        on_progress: ChunkCallback<'_>,
    ) -> Result<Bytes, UpdateError> {
        let url = self.artifact_url(&info.version);
        let response = self.get(&url, "application/octet-stream", cancel).await?;

        let total = response.content_length().filter(|len| *len > 0);
        let capacity = total.unwrap_or(info.size).min(MAX_PREALLOCATION);
        let mut buffer = Vec::with_capacity(capacity as usize);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UpdateError::Aborted),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| UpdateError::Network(e.to_string()))?;

            buffer.extend_from_slice(&chunk);
            on_progress(ChunkProgress {
                received: buffer.len() as u64,
                chunk_len: chunk.len(),
                total,
            });
        }

        Ok(Bytes::from(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config() -> NetworkConfig {
        NetworkConfig {
            base_url: "https://updates.example.com/app/".to_string(),
            ..NetworkConfig::default()
        }
    }

    #[test]
    fn test_url_for_joins_slashes() {
        let provider = HttpProvider::new(&config()).unwrap();
        assert_eq!(
            provider.url_for("/update.json"),
            "https://updates.example.com/app/update.json"
        );
        assert_eq!(
            provider.url_for("update.json"),
            "https://updates.example.com/app/update.json"
        );
    }

    #[test]
    fn test_artifact_url_substitutes_version() {
        let provider = HttpProvider::new(&config()).unwrap();
        let url = provider.artifact_url(&Version::parse("1.3.0-beta.1").unwrap());
        assert_eq!(url, "https://updates.example.com/app/update-1.3.0-beta.1.gz");
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let config = NetworkConfig {
            headers,
            ..config()
        };
        assert!(matches!(
            HttpProvider::new(&config),
            Err(UpdateError::Config(_))
        ));
    }

    #[test]
    fn test_custom_headers_accepted() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        let config = NetworkConfig {
            headers,
            ..config()
        };
        assert!(HttpProvider::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_before_send_aborts() {
        let provider = HttpProvider::new(&config()).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = provider.fetch_manifest("update.json", &cancel).await;
        assert!(matches!(result, Err(UpdateError::Aborted)));
    }
}
