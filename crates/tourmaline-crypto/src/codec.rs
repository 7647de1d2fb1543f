//! The field encryption codec.
//!
//! Resolves a field's policy and key, then encrypts or decrypts a single
//! value according to the field's encryption class. Callers supply the codec
//! explicitly wherever (de)serialization happens; record types hold no
//! ambient reference to it.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tourmaline_policy::{EncryptionClass, FieldPolicy, FieldPolicyRegistry};
use tourmaline_types::{EncryptedValue, EntityType, FieldName, FieldValue};

use crate::keys::{DataKey, KeyManager};
use crate::{CryptoError, Result, aead, ore};

type HmacSha256 = Hmac<Sha256>;

/// Encrypts and decrypts single field values per the field policy registry.
pub struct EncryptionCodec {
    registry: Arc<FieldPolicyRegistry>,
    keys: Arc<KeyManager>,
}

impl EncryptionCodec {
    pub fn new(registry: Arc<FieldPolicyRegistry>, keys: Arc<KeyManager>) -> Self {
        Self { registry, keys }
    }

    /// The policy registry this codec operates under.
    pub fn registry(&self) -> &FieldPolicyRegistry {
        &self.registry
    }

    /// Encrypts one plaintext value according to its field's class.
    ///
    /// Range-class values are domain-checked here: out-of-domain plaintext
    /// is rejected with [`CryptoError::OutOfDomain`], never clamped.
    pub fn encrypt(
        &self,
        entity: &EntityType,
        field: &FieldName,
        value: &FieldValue,
    ) -> Result<EncryptedValue> {
        let policy = self.policy(entity, field)?;
        let key = self.keys.resolve_or_create(&policy.key_alt_name())?;
        let aad = field_aad(entity, field);
        let plaintext = value.canonical_bytes();

        match &policy.class {
            EncryptionClass::Random => {
                let nonce = random_nonce();
                let sealed = aead::seal(&key.enc_key(), &nonce, &plaintext, &aad)?;
                Ok(EncryptedValue::Sealed(sealed))
            }
            EncryptionClass::Deterministic => {
                let nonce = synthetic_nonce(&key, &plaintext);
                let sealed = aead::seal(&key.enc_key(), &nonce, &plaintext, &aad)?;
                Ok(EncryptedValue::Exact(sealed))
            }
            EncryptionClass::Range(domain) => {
                let ordinal = value.ordinal().ok_or_else(|| CryptoError::ClassMismatch {
                    entity: entity.clone(),
                    field: field.clone(),
                    class: "range",
                })?;
                if !domain.contains(ordinal) {
                    return Err(CryptoError::OutOfDomain {
                        entity: entity.clone(),
                        field: field.clone(),
                    });
                }
                let token = ore::range_token(&key.ore_key(), domain, ordinal);
                let nonce = random_nonce();
                let sealed = aead::seal(&key.enc_key(), &nonce, &plaintext, &aad)?;
                Ok(EncryptedValue::Ordered { token, sealed })
            }
        }
    }

    /// Decrypts one ciphertext value.
    ///
    /// The ciphertext variant must match the field's declared class; any
    /// authentication failure is [`CryptoError::DecryptionFailed`] with no
    /// partial plaintext.
    pub fn decrypt(
        &self,
        entity: &EntityType,
        field: &FieldName,
        value: &EncryptedValue,
    ) -> Result<FieldValue> {
        let policy = self.policy(entity, field)?;
        let key = self.keys.resolve_or_create(&policy.key_alt_name())?;
        let aad = field_aad(entity, field);

        let sealed = match (&policy.class, value) {
            (EncryptionClass::Random, EncryptedValue::Sealed(bytes))
            | (EncryptionClass::Deterministic, EncryptedValue::Exact(bytes))
            | (EncryptionClass::Range(_), EncryptedValue::Ordered { sealed: bytes, .. }) => bytes,
            (class, _) => {
                return Err(CryptoError::ClassMismatch {
                    entity: entity.clone(),
                    field: field.clone(),
                    class: class.name(),
                });
            }
        };

        let plaintext = aead::open(&key.enc_key(), sealed, &aad)?;
        FieldValue::from_canonical_bytes(&plaintext).ok_or(CryptoError::DecryptionFailed)
    }

    /// Ciphertext bytes for an equality query on a Deterministic field.
    ///
    /// Produces exactly the bytes [`encrypt`](Self::encrypt) would store, so
    /// the server can match on byte equality.
    pub fn equality_ciphertext(
        &self,
        entity: &EntityType,
        field: &FieldName,
        value: &FieldValue,
    ) -> Result<Vec<u8>> {
        let policy = self.policy(entity, field)?;
        if policy.class != EncryptionClass::Deterministic {
            return Err(CryptoError::ClassMismatch {
                entity: entity.clone(),
                field: field.clone(),
                class: policy.class.name(),
            });
        }
        match self.encrypt(entity, field, value)? {
            EncryptedValue::Exact(bytes) => Ok(bytes),
            _ => unreachable!("deterministic class always yields Exact"),
        }
    }

    /// Order token for a range-query bound on a Range field.
    pub fn range_token(
        &self,
        entity: &EntityType,
        field: &FieldName,
        value: &FieldValue,
    ) -> Result<u64> {
        let policy = self.policy(entity, field)?;
        let EncryptionClass::Range(domain) = &policy.class else {
            return Err(CryptoError::ClassMismatch {
                entity: entity.clone(),
                field: field.clone(),
                class: policy.class.name(),
            });
        };
        let ordinal = value.ordinal().ok_or_else(|| CryptoError::ClassMismatch {
            entity: entity.clone(),
            field: field.clone(),
            class: "range",
        })?;
        if !domain.contains(ordinal) {
            return Err(CryptoError::OutOfDomain {
                entity: entity.clone(),
                field: field.clone(),
            });
        }
        let key = self.keys.resolve_or_create(&policy.key_alt_name())?;
        Ok(ore::range_token(&key.ore_key(), domain, ordinal))
    }

    fn policy(&self, entity: &EntityType, field: &FieldName) -> Result<&FieldPolicy> {
        self.registry
            .get(entity, field)
            .ok_or_else(|| CryptoError::UnknownField {
                entity: entity.clone(),
                field: field.clone(),
            })
    }
}

/// Associated data binding ciphertext to its `(entity, field)` slot.
fn field_aad(entity: &EntityType, field: &FieldName) -> Vec<u8> {
    format!("{entity}/{field}").into_bytes()
}

fn random_nonce() -> [u8; aead::NONCE_LEN] {
    use rand::RngCore;
    let mut nonce = [0u8; aead::NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// SIV-style synthetic nonce: a keyed PRF of the plaintext, so identical
/// plaintext under the same key yields identical ciphertext.
fn synthetic_nonce(key: &DataKey, plaintext: &[u8]) -> [u8; aead::NONCE_LEN] {
    let mut mac =
        HmacSha256::new_from_slice(&key.det_nonce_key()).expect("HMAC accepts any key length");
    mac.update(plaintext);
    let digest = mac.finalize().into_bytes();
    let mut nonce = [0u8; aead::NONCE_LEN];
    nonce.copy_from_slice(&digest[..aead::NONCE_LEN]);
    nonce
}
