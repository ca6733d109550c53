//! Manifest signing
//!
//! Produces the detached Ed25519 signature published next to the channel
//! manifest. The signing input is the manifest's canonical JSON bytes, so
//! anyone holding the public key can re-canonicalize a downloaded manifest
//! and verify it byte-for-byte. Key material is read from configured file
//! locations inside the constructor and lives only as long as the
//! `Signer`.

use std::fs;
use std::path::Path;

use base64::Engine;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Signature algorithm identifier
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Schema version for the detached signature document
pub const SIGNATURE_SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SIGNATURE_SCHEMA_ID: &str = "dist-promote/manifest-signature@1";

/// Errors from signing operations
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The detached signature document published as `<manifest>.sig`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestSignature {
    pub schema_version: u32,
    pub schema_id: String,

    /// Base64-encoded Ed25519 signature over the canonical manifest bytes
    pub signature: String,

    /// Always `Ed25519`
    pub signature_algorithm: String,

    /// SHA-256 fingerprint of the signing public key, hex-encoded
    pub pubkey_fingerprint: String,
}

impl ManifestSignature {
    /// Public object name of the signature for a manifest object
    pub fn file_name(manifest_file_name: &str) -> String {
        format!("{}.sig", manifest_file_name)
    }

    /// Verify this signature over `message` with the given public key
    pub fn verify(&self, verifying_key: &VerifyingKey, message: &[u8]) -> Result<bool, SignError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(&self.signature)?;
        let signature = Signature::from_slice(&bytes)
            .map_err(|e| SignError::InvalidSignature(e.to_string()))?;
        Ok(verifying_key.verify(message, &signature).is_ok())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Holds the signing key for the duration of one run
pub struct Signer {
    signing_key: SigningKey,
}

impl Signer {
    /// Load the key from its configured file locations.
    ///
    /// Without a passphrase file the key file must hold a base64-encoded
    /// 32-byte seed. With one, the decoded secret is folded together with
    /// the passphrase through SHA-256 to derive the actual seed, so the
    /// key file alone cannot produce signatures.
    pub fn from_files(key_path: &Path, passphrase_path: Option<&Path>) -> Result<Self, SignError> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|source| SignError::Io {
                path: path.display().to_string(),
                source,
            })
        };

        let secret = base64::engine::general_purpose::STANDARD.decode(read(key_path)?.trim())?;

        let seed: [u8; 32] = match passphrase_path {
            Some(path) => {
                let passphrase = read(path)?;
                let mut hasher = Sha256::new();
                hasher.update(&secret);
                hasher.update(passphrase.trim().as_bytes());
                hasher.finalize().into()
            }
            None => secret
                .try_into()
                .map_err(|_| SignError::InvalidKey("seed must be 32 bytes".to_string()))?,
        };

        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Produce the detached signature over `message`
    pub fn sign(&self, message: &[u8]) -> ManifestSignature {
        let signature = self.signing_key.sign(message);
        ManifestSignature {
            schema_version: SIGNATURE_SCHEMA_VERSION,
            schema_id: SIGNATURE_SCHEMA_ID.to_string(),
            signature: base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
            pubkey_fingerprint: compute_key_fingerprint(&self.signing_key.verifying_key()),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

/// SHA-256 fingerprint of an Ed25519 public key
pub fn compute_key_fingerprint(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a fresh signing key (test fixtures; production keys come from
/// the key-store bootstrap, which is out of scope here)
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::thread_rng())
}

/// Encode a signing key seed to base64 for file storage
pub fn encode_signing_key(key: &SigningKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.to_bytes())
}
