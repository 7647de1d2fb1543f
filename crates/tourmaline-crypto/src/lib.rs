//! # tourmaline-crypto: Field encryption and key management
//!
//! Implements the three per-field encryption classes on top of AES-256-GCM:
//!
//! - **Random**: fresh random nonce per call. Same plaintext encrypts
//!   differently every time; callers must never compare `Sealed` ciphertext
//!   for equality.
//! - **Deterministic**: synthetic nonce derived as a keyed PRF of the
//!   plaintext (SIV-style), so repeated plaintext yields identical
//!   ciphertext and equality search works on ciphertext bytes.
//! - **Range**: the plaintext ordinal is bucketed per the field's declared
//!   domain and mapped through a keyed order-preserving token; the exact
//!   value is additionally AEAD-sealed so decryption is lossless.
//!
//! Key material follows a two-level hierarchy: a master key from the secret
//! store wraps per-field data keys, which are created lazily and cached for
//! the process lifetime. All key types zeroize on drop.

pub mod aead;
pub mod codec;
pub mod keys;
pub mod master;
pub mod ore;

pub use codec::EncryptionCodec;
pub use keys::{DataKey, KeyDescriptor, KeyManager, KeyStore, MemoryKeyStore};
pub use master::{MasterKey, SecretStore, StaticSecretStore};

use thiserror::Error;
use tourmaline_types::{EntityType, FieldName};

/// Errors raised by the crypto layer.
///
/// Display strings deliberately never include plaintext, key bytes, or
/// ciphertext fragments.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Missing or malformed master key / policy configuration. Fatal at
    /// startup, never retried.
    #[error("crypto configuration error: {0}")]
    Configuration(String),

    /// The data key could not be resolved or created. Retryable if the
    /// underlying key store failure is transient.
    #[error("data key unavailable for '{alt_name}': {reason}")]
    KeyUnavailable { alt_name: String, reason: String },

    /// Authenticated decryption failed: tamper, corruption, or wrong key.
    /// Never retried, never accompanied by partial plaintext.
    #[error("decryption failed: ciphertext rejected by authentication")]
    DecryptionFailed,

    /// No policy is registered for the field.
    #[error("no field policy for {entity}.{field}")]
    UnknownField { entity: EntityType, field: FieldName },

    /// A Range-class value or query bound lies outside the declared domain.
    /// Rejected outright, never clamped.
    #[error("value for {entity}.{field} outside declared domain")]
    OutOfDomain { entity: EntityType, field: FieldName },

    /// The value's shape is invalid for the field's class (e.g. text in a
    /// Range field, or a ciphertext variant that does not match the class).
    #[error("value incompatible with {class} class for {entity}.{field}")]
    ClassMismatch {
        entity: EntityType,
        field: FieldName,
        class: &'static str,
    },
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
