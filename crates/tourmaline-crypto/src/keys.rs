//! Data key management.
//!
//! One data key exists per alternate name (one per `(entity, field)` pair in
//! practice). Keys are created lazily on first use, wrapped under a KEK
//! derived from the master key, and cached unwrapped for the process
//! lifetime. The persisted descriptor carries only wrapped material.
//!
//! Rotation is lazy: a rotated master produces a new KEK, and data keys are
//! re-wrapped the next time their record is written, not in an eager
//! migration pass.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::master::{MasterKey, hkdf_derive};
use crate::{CryptoError, Result, aead};

/// Failure modes of the key descriptor store.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// The alt-name unique constraint fired: another writer created the key
    /// first. Callers resolve by re-reading.
    #[error("key descriptor for '{0}' already exists")]
    Duplicate(String),

    #[error("key store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted form of a data key: wrapped material plus lookup metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub key_id: Uuid,
    /// Unique alternate name, e.g. `"patient/ssn"`.
    pub alt_name: String,
    /// Data key wrapped under the master-derived KEK.
    pub wrapped_key: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Persistence boundary for key descriptors.
///
/// Implementations must enforce a unique constraint on `alt_name` and
/// surface violations as [`KeyStoreError::Duplicate`] so concurrent creates
/// resolve deterministically.
pub trait KeyStore: Send + Sync {
    fn insert(&self, descriptor: &KeyDescriptor) -> std::result::Result<(), KeyStoreError>;
    fn find(&self, alt_name: &str) -> std::result::Result<Option<KeyDescriptor>, KeyStoreError>;
}

/// In-memory key store for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    descriptors: RwLock<HashMap<String, KeyDescriptor>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn insert(&self, descriptor: &KeyDescriptor) -> std::result::Result<(), KeyStoreError> {
        let mut map = self
            .descriptors
            .write()
            .map_err(|_| KeyStoreError::Unavailable("lock poisoned".to_string()))?;
        if map.contains_key(&descriptor.alt_name) {
            return Err(KeyStoreError::Duplicate(descriptor.alt_name.clone()));
        }
        map.insert(descriptor.alt_name.clone(), descriptor.clone());
        Ok(())
    }

    fn find(&self, alt_name: &str) -> std::result::Result<Option<KeyDescriptor>, KeyStoreError> {
        let map = self
            .descriptors
            .read()
            .map_err(|_| KeyStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(map.get(alt_name).cloned())
    }
}

/// An unwrapped data key, held only in memory. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    #[zeroize(skip)]
    key_id: Uuid,
    #[zeroize(skip)]
    alt_name: String,
    key: [u8; 32],
}

impl DataKey {
    pub fn key_id(&self) -> Uuid {
        self.key_id
    }

    pub fn alt_name(&self) -> &str {
        &self.alt_name
    }

    /// Subkey for AEAD field encryption.
    pub fn enc_key(&self) -> [u8; 32] {
        hkdf_derive(&self.key, b"tourmaline-field", b"enc")
    }

    /// Subkey for deriving deterministic synthetic nonces.
    pub fn det_nonce_key(&self) -> [u8; 32] {
        hkdf_derive(&self.key, b"tourmaline-field", b"det-nonce")
    }

    /// Subkey for order-revealing range tokens.
    pub fn ore_key(&self) -> [u8; 32] {
        hkdf_derive(&self.key, b"tourmaline-field", b"ore")
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("key_id", &self.key_id)
            .field("alt_name", &self.alt_name)
            .finish_non_exhaustive()
    }
}

/// Resolves and lazily creates data keys.
///
/// The cache is guarded by a `RwLock`: reads after creation take the shared
/// path; the exclusive lock is held only on the create-or-fetch path.
pub struct KeyManager {
    kek: [u8; 32],
    store: Arc<dyn KeyStore>,
    cache: RwLock<HashMap<String, DataKey>>,
}

impl KeyManager {
    pub fn new(master: &MasterKey, store: Arc<dyn KeyStore>) -> Self {
        Self {
            kek: master.derive_kek(),
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the data key for `alt_name`, creating it idempotently on
    /// first use.
    ///
    /// A duplicate-create race (unique constraint violation in the store)
    /// resolves by re-reading the winner's descriptor, so every caller ends
    /// up with the same key material.
    pub fn resolve_or_create(&self, alt_name: &str) -> Result<DataKey> {
        if let Some(key) = self.cache_get(alt_name) {
            return Ok(key);
        }

        if let Some(descriptor) = self.store_find(alt_name)? {
            let key = self.unwrap_descriptor(&descriptor)?;
            self.cache_put(key.clone());
            return Ok(key);
        }

        let descriptor = self.new_descriptor(alt_name);
        match self.store.insert(&descriptor) {
            Ok(()) => {
                tracing::debug!(alt_name, key_id = %descriptor.key_id, "data key created");
                let key = self.unwrap_descriptor(&descriptor)?;
                self.cache_put(key.clone());
                Ok(key)
            }
            Err(KeyStoreError::Duplicate(_)) => {
                // Lost the create race: the winner's descriptor is now
                // authoritative.
                let descriptor =
                    self.store_find(alt_name)?
                        .ok_or_else(|| CryptoError::KeyUnavailable {
                            alt_name: alt_name.to_string(),
                            reason: "descriptor vanished after duplicate insert".to_string(),
                        })?;
                let key = self.unwrap_descriptor(&descriptor)?;
                self.cache_put(key.clone());
                Ok(key)
            }
            Err(KeyStoreError::Unavailable(reason)) => Err(CryptoError::KeyUnavailable {
                alt_name: alt_name.to_string(),
                reason,
            }),
        }
    }

    fn cache_get(&self, alt_name: &str) -> Option<DataKey> {
        self.cache.read().ok()?.get(alt_name).cloned()
    }

    fn cache_put(&self, key: DataKey) {
        if let Ok(mut cache) = self.cache.write() {
            cache.entry(key.alt_name.clone()).or_insert(key);
        }
    }

    fn store_find(&self, alt_name: &str) -> Result<Option<KeyDescriptor>> {
        self.store
            .find(alt_name)
            .map_err(|e| CryptoError::KeyUnavailable {
                alt_name: alt_name.to_string(),
                reason: e.to_string(),
            })
    }

    fn new_descriptor(&self, alt_name: &str) -> KeyDescriptor {
        use rand::RngCore;
        let mut dek = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut dek);

        let wrapped_key = wrap_key(&self.kek, &dek, alt_name);
        dek.zeroize();

        KeyDescriptor {
            key_id: Uuid::new_v4(),
            alt_name: alt_name.to_string(),
            wrapped_key,
            created_at: Utc::now(),
        }
    }

    fn unwrap_descriptor(&self, descriptor: &KeyDescriptor) -> Result<DataKey> {
        let plain = aead::open(
            &self.kek,
            &descriptor.wrapped_key,
            descriptor.alt_name.as_bytes(),
        )
        .map_err(|_| CryptoError::KeyUnavailable {
            alt_name: descriptor.alt_name.clone(),
            reason: "wrapped key failed authentication (wrong master key?)".to_string(),
        })?;

        let key: [u8; 32] =
            plain
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::KeyUnavailable {
                    alt_name: descriptor.alt_name.clone(),
                    reason: "unwrapped key has wrong length".to_string(),
                })?;

        Ok(DataKey {
            key_id: descriptor.key_id,
            alt_name: descriptor.alt_name.clone(),
            key,
        })
    }
}

/// Wraps a data key under the KEK with a synthetic nonce derived from the
/// key material, binding the descriptor to its alt name via AAD.
fn wrap_key(kek: &[u8; 32], dek: &[u8; 32], alt_name: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(kek);
    hasher.update(dek);
    let digest = hasher.finalize();
    let mut nonce = [0u8; aead::NONCE_LEN];
    nonce.copy_from_slice(&digest[..aead::NONCE_LEN]);

    aead::seal(kek, &nonce, dek, alt_name.as_bytes())
        .expect("wrapping a 32-byte key cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new(&MasterKey::generate(), Arc::new(MemoryKeyStore::new()))
    }

    #[test]
    fn test_create_then_resolve_same_key() {
        let manager = manager();
        let first = manager.resolve_or_create("patient/ssn").unwrap();
        let second = manager.resolve_or_create("patient/ssn").unwrap();

        assert_eq!(first.key_id(), second.key_id());
        assert_eq!(first.enc_key(), second.enc_key());
    }

    #[test]
    fn test_distinct_alt_names_distinct_keys() {
        let manager = manager();
        let a = manager.resolve_or_create("patient/ssn").unwrap();
        let b = manager.resolve_or_create("patient/notes").unwrap();

        assert_ne!(a.key_id(), b.key_id());
        assert_ne!(a.enc_key(), b.enc_key());
    }

    #[test]
    fn test_subkeys_are_distinct() {
        let manager = manager();
        let key = manager.resolve_or_create("patient/ssn").unwrap();

        assert_ne!(key.enc_key(), key.det_nonce_key());
        assert_ne!(key.enc_key(), key.ore_key());
        assert_ne!(key.det_nonce_key(), key.ore_key());
    }

    #[test]
    fn test_descriptor_serde_roundtrip() {
        // Descriptors persist as JSON in durable key stores
        let manager = manager();
        manager.resolve_or_create("patient/ssn").unwrap();
        let descriptor = manager.store_find("patient/ssn").unwrap().unwrap();

        let json = serde_json::to_string(&descriptor).unwrap();
        let back: KeyDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key_id, descriptor.key_id);
        assert_eq!(back.alt_name, "patient/ssn");
        assert_eq!(back.wrapped_key, descriptor.wrapped_key);
    }

    #[test]
    fn test_resolve_from_persisted_descriptor() {
        // Two managers sharing a store and master key resolve the same key
        let master_bytes = {
            let store = crate::StaticSecretStore::new().with_secret("m", vec![9u8; 32]);
            MasterKey::load(&store, "m").unwrap()
        };
        let master_bytes_2 = {
            let store = crate::StaticSecretStore::new().with_secret("m", vec![9u8; 32]);
            MasterKey::load(&store, "m").unwrap()
        };
        let store: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());

        let first = KeyManager::new(&master_bytes, Arc::clone(&store));
        let created = first.resolve_or_create("patient/ssn").unwrap();

        let second = KeyManager::new(&master_bytes_2, store);
        let resolved = second.resolve_or_create("patient/ssn").unwrap();

        assert_eq!(created.key_id(), resolved.key_id());
        assert_eq!(created.enc_key(), resolved.enc_key());
    }

    #[test]
    fn test_wrong_master_cannot_unwrap() {
        let store: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());
        let first = KeyManager::new(&MasterKey::generate(), Arc::clone(&store));
        first.resolve_or_create("patient/ssn").unwrap();

        let second = KeyManager::new(&MasterKey::generate(), store);
        let result = second.resolve_or_create("patient/ssn");
        assert!(matches!(result, Err(CryptoError::KeyUnavailable { .. })));
    }

    #[test]
    fn test_duplicate_insert_race_resolves_by_reread() {
        /// Store that reports Duplicate on first insert but serves the
        /// "winner's" descriptor on the following find.
        struct RacingStore {
            inner: MemoryKeyStore,
            raced: std::sync::atomic::AtomicBool,
        }
        impl KeyStore for RacingStore {
            fn insert(&self, d: &KeyDescriptor) -> std::result::Result<(), KeyStoreError> {
                if !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    // Simulate the other writer winning with its own key
                    let winner = KeyDescriptor {
                        key_id: Uuid::new_v4(),
                        ..d.clone()
                    };
                    self.inner.insert(&winner).unwrap();
                    return Err(KeyStoreError::Duplicate(d.alt_name.clone()));
                }
                self.inner.insert(d)
            }
            fn find(
                &self,
                alt_name: &str,
            ) -> std::result::Result<Option<KeyDescriptor>, KeyStoreError> {
                self.inner.find(alt_name)
            }
        }

        let master = MasterKey::generate();
        let store = Arc::new(RacingStore {
            inner: MemoryKeyStore::new(),
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = KeyManager::new(&master, store.clone());

        let key = manager.resolve_or_create("patient/ssn").unwrap();
        let winner = store.inner.find("patient/ssn").unwrap().unwrap();
        // We got the winner's key, not our own failed insert
        assert_eq!(key.key_id(), winner.key_id);
    }

    #[test]
    fn test_unavailable_store_surfaces_key_unavailable() {
        struct DownStore;
        impl KeyStore for DownStore {
            fn insert(&self, _: &KeyDescriptor) -> std::result::Result<(), KeyStoreError> {
                Err(KeyStoreError::Unavailable("down".to_string()))
            }
            fn find(
                &self,
                _: &str,
            ) -> std::result::Result<Option<KeyDescriptor>, KeyStoreError> {
                Err(KeyStoreError::Unavailable("down".to_string()))
            }
        }
        let manager = KeyManager::new(&MasterKey::generate(), Arc::new(DownStore));
        let result = manager.resolve_or_create("patient/ssn");
        assert!(matches!(result, Err(CryptoError::KeyUnavailable { .. })));
    }

    #[test]
    fn test_debug_does_not_leak_key_material() {
        let manager = manager();
        let key = manager.resolve_or_create("patient/ssn").unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("patient/ssn"));
        assert!(!debug.contains("key:"));
    }
}
