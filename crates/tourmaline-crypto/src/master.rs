//! Master key loading and subkey derivation.
//!
//! The master key is an external secret: loaded once at startup through the
//! [`SecretStore`] collaborator, held only in memory, zeroized on drop, and
//! never persisted alongside records or written to logs.

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

/// Failure modes of the external secret store.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret '{0}' not found")]
    NotFound(String),

    #[error("secret store unreachable: {0}")]
    Unreachable(String),
}

/// External secret store collaborator (KMS, vault, environment).
///
/// Supplies raw master key bytes by reference name. Absence of the secret is
/// a startup-fatal configuration error.
pub trait SecretStore: Send + Sync {
    fn get(&self, key_ref: &str) -> std::result::Result<Vec<u8>, SecretError>;
}

/// In-memory secret store for tests and embedded deployments.
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    secrets: std::collections::HashMap<String, Vec<u8>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, key_ref: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.secrets.insert(key_ref.into(), bytes);
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, key_ref: &str) -> std::result::Result<Vec<u8>, SecretError> {
        self.secrets
            .get(key_ref)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(key_ref.to_string()))
    }
}

/// The root of the key hierarchy. 32 bytes, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    /// Loads the master key from the secret store.
    ///
    /// A missing secret is [`CryptoError::Configuration`]; any other length
    /// than 32 bytes is rejected for the same reason.
    pub fn load(store: &dyn SecretStore, key_ref: &str) -> Result<Self> {
        let bytes = match store.get(key_ref) {
            Ok(bytes) => bytes,
            Err(SecretError::NotFound(name)) => {
                return Err(CryptoError::Configuration(format!(
                    "master key secret '{name}' not found"
                )));
            }
            Err(SecretError::Unreachable(reason)) => {
                return Err(CryptoError::KeyUnavailable {
                    alt_name: key_ref.to_string(),
                    reason,
                });
            }
        };

        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::Configuration(format!(
                "master key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        if key == [0u8; 32] {
            return Err(CryptoError::Configuration(
                "master key is all zeros".to_string(),
            ));
        }
        Ok(Self { key })
    }

    /// Generates a fresh random master key. Test and bootstrap use only.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Derives the key-encryption key that wraps data keys at rest.
    pub(crate) fn derive_kek(&self) -> [u8; 32] {
        hkdf_derive(&self.key, b"tourmaline-kek", b"data-key-wrapping")
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never appear in logs or panic messages.
        f.write_str("MasterKey(..)")
    }
}

/// RFC 5869 HKDF-SHA256 extract-and-expand to a 32-byte subkey.
pub(crate) fn hkdf_derive(ikm: &[u8; 32], salt: &[u8], info: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .expect("32-byte output within HKDF maximum");
    okm
}
