//! Property-based tests for shell-updater.
//!
//! # Properties Tested
//!
//! - Version ordering is a strict total order matching the documented
//!   precedence (numeric parts, release over pre-release, stage, stage number)
//! - Signature tokens round-trip for any artifact and version
//! - Any change to the artifact, the token or the key is rejected
//! - A token never verifies for a version other than the one it was bound to

#![cfg(test)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use proptest::prelude::*;

use crate::cancel::CancelToken;
use crate::error::UpdateError;
use crate::manifest::{Manifest, UpdateInfo};
use crate::provider::{ChunkCallback, Provider};
use crate::signature::{sign, verify};
use crate::version::{is_lower, is_lower_version, Version, NO_STAGE_VERSION};

// =============================================================================
// Generators
// =============================================================================

/// Generate a random Ed25519 signing key from 32 random bytes.
fn arb_signing_key() -> impl Strategy<Value = SigningKey> {
    prop::array::uniform32(any::<u8>()).prop_map(|bytes| SigningKey::from_bytes(&bytes))
}

/// Generate a release or pre-release version.
fn arb_version() -> impl Strategy<Value = Version> {
    let stage = prop_oneof![
        Just(String::new()),
        Just("alpha".to_string()),
        Just("beta".to_string()),
        Just("rc".to_string()),
    ];
    (0u64..4, 0u64..4, 0u64..4, stage, -1i64..4).prop_map(
        |(major, minor, patch, stage, stage_version)| {
            if stage.is_empty() {
                Version::new(major, minor, patch)
            } else {
                Version::with_stage(major, minor, patch, &stage, stage_version)
            }
        },
    )
}

/// Generate random artifact content (1 to 4KB).
fn arb_artifact_content() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..4096)
}

// =============================================================================
// Helpers
// =============================================================================

/// Reference precedence key for a version.
fn precedence(v: &Version) -> (u64, u64, u64, bool, String, i64) {
    (
        v.major,
        v.minor,
        v.patch,
        v.is_release(),
        v.stage.clone(),
        if v.is_release() {
            NO_STAGE_VERSION
        } else {
            v.stage_version
        },
    )
}

/// Provider that only exercises the default verification.
struct OfflineProvider;

#[async_trait]
impl Provider for OfflineProvider {
    async fn fetch_manifest(
        &self,
        _path: &str,
        _cancel: &CancelToken,
    ) -> Result<Manifest, UpdateError> {
        Err(UpdateError::Network("offline".to_string()))
    }

    async fn fetch_artifact(
        &self,
        _info: &UpdateInfo,
        _cancel: &CancelToken,
        _on_progress: ChunkCallback<'_>,
    ) -> Result<Bytes, UpdateError> {
        Err(UpdateError::Network("offline".to_string()))
    }
}

/// Flip one byte of the decoded token and re-encode it.
fn tamper_token(token: &str, index: usize) -> String {
    let mut raw = STANDARD.decode(token).unwrap();
    let i = index % raw.len();
    raw[i] ^= 0x01;
    STANDARD.encode(raw)
}

// =============================================================================
// Version ordering
// =============================================================================

proptest! {
    #[test]
    fn prop_ordering_matches_precedence(a in arb_version(), b in arb_version()) {
        prop_assert_eq!(is_lower_version(&a, &b), precedence(&a) < precedence(&b));
    }

    #[test]
    fn prop_ordering_is_irreflexive(a in arb_version()) {
        prop_assert!(!is_lower_version(&a, &a));
    }

    #[test]
    fn prop_ordering_is_antisymmetric(a in arb_version(), b in arb_version()) {
        prop_assert!(!(is_lower_version(&a, &b) && is_lower_version(&b, &a)));
    }

    #[test]
    fn prop_ordering_is_transitive(
        a in arb_version(),
        b in arb_version(),
        c in arb_version(),
    ) {
        if is_lower_version(&a, &b) && is_lower_version(&b, &c) {
            prop_assert!(is_lower_version(&a, &c));
        }
    }

    #[test]
    fn prop_string_comparison_agrees(a in arb_version(), b in arb_version()) {
        let lower = is_lower(&a.to_string(), &b.to_string()).unwrap();
        prop_assert_eq!(lower, is_lower_version(&a, &b));
    }
}

// =============================================================================
// Signature tokens
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_sign_verify_roundtrip(
        key in arb_signing_key(),
        content in arb_artifact_content(),
        version in arb_version(),
    ) {
        let token = sign(&content, &key, &key.verifying_key(), &version).unwrap();
        let bound = verify(&content, &token, &key.verifying_key()).unwrap();
        prop_assert_eq!(bound, version);
    }

    #[test]
    fn prop_modified_artifact_rejected(
        key in arb_signing_key(),
        content in arb_artifact_content(),
        version in arb_version(),
        index in any::<usize>(),
    ) {
        let token = sign(&content, &key, &key.verifying_key(), &version).unwrap();

        let mut tampered = content.clone();
        let i = index % tampered.len();
        tampered[i] ^= 0xFF;

        prop_assert!(verify(&tampered, &token, &key.verifying_key()).is_err());
    }

    #[test]
    fn prop_modified_token_rejected(
        key in arb_signing_key(),
        content in arb_artifact_content(),
        version in arb_version(),
        index in any::<usize>(),
    ) {
        let token = sign(&content, &key, &key.verifying_key(), &version).unwrap();
        let tampered = tamper_token(&token, index);

        prop_assert!(verify(&content, &tampered, &key.verifying_key()).is_err());
    }

    #[test]
    fn prop_wrong_key_rejected(
        key in arb_signing_key(),
        other in arb_signing_key(),
        content in arb_artifact_content(),
        version in arb_version(),
    ) {
        prop_assume!(key.verifying_key() != other.verifying_key());
        let token = sign(&content, &key, &key.verifying_key(), &version).unwrap();

        prop_assert!(verify(&content, &token, &other.verifying_key()).is_err());
    }

    #[test]
    fn prop_token_bound_to_version(
        key in arb_signing_key(),
        content in arb_artifact_content(),
        signed_as in arb_version(),
        claimed in arb_version(),
    ) {
        let token = sign(&content, &key, &key.verifying_key(), &signed_as).unwrap();
        let accepted = OfflineProvider.verify(&content, &claimed, &token, &key.verifying_key());
        prop_assert_eq!(accepted, claimed == signed_as);
    }
}
