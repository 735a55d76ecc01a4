//! Artifact signature tokens.
//!
//! A token carries an Ed25519 signature over the artifact digest and the
//! version label the artifact is published under:
//!
//! ```text
//! message   = SHA-256(buffer) || version
//! plaintext = base64(ed25519_sign(message)) || "\n" || version
//! key       = SHA-256(public key bytes)
//! nonce     = SHA-256(buffer)[..12]
//! token     = base64(ChaCha20-Poly1305(key, nonce, plaintext))
//! ```
//!
//! The symmetric layer is not secret: its key derives from the public key
//! shipped with the application. It only ties the token to the exact
//! artifact bytes, since the nonce comes from the artifact. Authenticity
//! of both the artifact and its version comes from the Ed25519 signature,
//! so relabelling an artifact with another version needs the private key.
//!
//! # Security
//!
//! [`verify`] reports every failure as the same
//! [`UpdateError::InvalidSignature`]. The failing step is only visible in
//! `debug` logs.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::UpdateError;
use crate::version::Version;

/// Separator between the encoded signature and the version label.
const SEPARATOR: char = '\n';

/// Nonce length for ChaCha20-Poly1305.
const NONCE_LEN: usize = 12;

/// Derive the symmetric key from the public key ("cert").
pub fn derive_key(cert: &VerifyingKey) -> [u8; 32] {
    Sha256::digest(cert.as_bytes()).into()
}

/// Derive the nonce from the artifact bytes.
pub fn derive_nonce(buffer: &[u8]) -> [u8; NONCE_LEN] {
    let digest = Sha256::digest(buffer);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    nonce
}

/// Bytes covered by the Ed25519 signature.
fn signed_message(buffer: &[u8], version: &str) -> Vec<u8> {
    let mut message = Sha256::digest(buffer).to_vec();
    message.extend_from_slice(version.as_bytes());
    message
}

fn cipher_for(cert: &VerifyingKey) -> ChaCha20Poly1305 {
    let key = derive_key(cert);
    ChaCha20Poly1305::new(Key::from_slice(&key))
}

/// Produce a signature token for `buffer` published as `version`.
///
/// This is the build-time half of the scheme; the client only ever calls
/// [`verify`].
///
/// # Errors
///
/// Returns [`UpdateError::Param`] if `cert` is not the public half of
/// `private_key`.
pub fn sign(
    buffer: &[u8],
    private_key: &SigningKey,
    cert: &VerifyingKey,
    version: &Version,
) -> Result<String, UpdateError> {
    if private_key.verifying_key() != *cert {
        return Err(UpdateError::Param(
            "certificate does not match signing key".to_string(),
        ));
    }

    let version = version.to_string();
    let signature = private_key.sign(&signed_message(buffer, &version));
    let plaintext = format!(
        "{}{}{}",
        STANDARD.encode(signature.to_bytes()),
        SEPARATOR,
        version
    );

    let nonce = derive_nonce(buffer);
    let ciphertext = cipher_for(cert)
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| UpdateError::Param("failed to seal signature token".to_string()))?;

    Ok(STANDARD.encode(ciphertext))
}

/// Verify a token against `buffer` and return the version it is bound to.
///
/// # Errors
///
/// Returns [`UpdateError::InvalidSignature`] for any failure: bad
/// encoding, failed decryption, malformed plaintext, signature mismatch
/// or an unparsable version label.
pub fn verify(buffer: &[u8], token: &str, cert: &VerifyingKey) -> Result<Version, UpdateError> {
    open_token(buffer, token, cert).map_err(|reason| {
        debug!(reason, "signature token rejected");
        UpdateError::InvalidSignature
    })
}

fn open_token(buffer: &[u8], token: &str, cert: &VerifyingKey) -> Result<Version, &'static str> {
    let ciphertext = STANDARD
        .decode(token.trim())
        .map_err(|_| "token is not valid base64")?;

    let nonce = derive_nonce(buffer);
    let plaintext = cipher_for(cert)
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| "token does not decrypt for this artifact and key")?;

    let plaintext = String::from_utf8(plaintext).map_err(|_| "plaintext is not utf-8")?;
    let (encoded_sig, version) = plaintext
        .split_once(SEPARATOR)
        .ok_or("plaintext has no separator")?;

    let sig_bytes: [u8; 64] = STANDARD
        .decode(encoded_sig)
        .map_err(|_| "signature is not valid base64")?
        .try_into()
        .map_err(|_| "signature has wrong length")?;
    let signature = Signature::from_bytes(&sig_bytes);

    cert.verify_strict(&signed_message(buffer, version), &signature)
        .map_err(|_| "signature does not match artifact and version")?;

    Version::parse(version).map_err(|_| "bound version is malformed")
}
