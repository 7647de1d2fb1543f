//! The storage boundary.
//!
//! Persistence is a collaborator behind [`RecordStore`]: the gateway hands
//! it ciphertext and gets ciphertext back, byte for byte. The store never
//! sees plaintext and never needs keys; the only structure it understands
//! is the two searchable ciphertext forms (exact bytes and order tokens).

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tourmaline_query::ServerCondition;
use tourmaline_types::{EncryptedFieldMap, EncryptedValue, EntityType, ResourceRef};

/// Storage failure, split by whether a retry can help.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Worth retrying: timeouts, connection loss.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Retrying cannot help: constraint violations, corrupt state.
    #[error("storage failure: {0}")]
    Permanent(String),
}

/// One stored record: a resource reference plus its encrypted fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub resource: ResourceRef,
    pub fields: EncryptedFieldMap,
}

impl StoredRecord {
    pub fn new(resource: ResourceRef, fields: EncryptedFieldMap) -> Self {
        Self { resource, fields }
    }

    /// Whether this record satisfies every condition, evaluated on
    /// ciphertext alone. A missing field or a non-searchable ciphertext
    /// form fails the condition.
    pub fn matches(&self, conditions: &[ServerCondition]) -> bool {
        conditions.iter().all(|condition| match condition {
            ServerCondition::CiphertextEq { field, ciphertext } => matches!(
                self.fields.get(field),
                Some(EncryptedValue::Exact(stored)) if stored == ciphertext
            ),
            ServerCondition::TokenRange { field, low, high } => matches!(
                self.fields.get(field),
                Some(EncryptedValue::Ordered { token, .. }) if token >= low && token <= high
            ),
        })
    }
}

/// Persistence collaborator. Implementations must uphold a unique
/// constraint on the resource reference; `upsert` replaces whole records.
///
/// Calls run synchronously on the gateway thread, so implementations must
/// bound their own call time (connection and request timeouts) and report
/// expiry as [`StorageError::Transient`]. The retry loop adds its own
/// total deadline on top; see [`RetryPolicy`].
pub trait RecordStore: Send + Sync {
    fn fetch(&self, resource: &ResourceRef)
    -> std::result::Result<Option<StoredRecord>, StorageError>;

    fn upsert(&self, record: StoredRecord) -> std::result::Result<(), StorageError>;

    /// All records of an entity satisfying the conditions. Empty conditions
    /// return everything.
    fn find(
        &self,
        entity: &EntityType,
        conditions: &[ServerCondition],
    ) -> std::result::Result<Vec<StoredRecord>, StorageError>;
}

/// Bounded retry with doubling delay for transient storage failures.
///
/// Two budgets apply: an attempt count and a total wall-clock deadline.
/// Whichever runs out first ends the loop, so a caller-facing timeout holds
/// even when individual store calls are slow.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    /// Total wall-clock budget across all attempts and backoff sleeps.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(25),
            deadline: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy for tests.
    pub fn immediate() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::ZERO,
            deadline: Duration::from_secs(1),
        }
    }

    /// Policy that never sleeps or retries past `deadline`.
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            ..Self::default()
        }
    }

    /// Runs `op`, retrying transient failures until the attempt budget or
    /// the deadline runs out. Permanent failures surface immediately.
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> std::result::Result<T, StorageError>,
    ) -> std::result::Result<T, StorageError> {
        let started = std::time::Instant::now();
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err @ StorageError::Permanent(_)) => return Err(err),
                Err(err @ StorageError::Transient(_)) => {
                    if attempt >= self.attempts
                        || started.elapsed().saturating_add(delay) >= self.deadline
                    {
                        return Err(err);
                    }
                    tracing::warn!(attempt, error = %err, "storage call failed, retrying");
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}

/// In-memory store backing tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<ResourceRef, StoredRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ResourceRef, StoredRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for MemoryRecordStore {
    fn fetch(
        &self,
        resource: &ResourceRef,
    ) -> std::result::Result<Option<StoredRecord>, StorageError> {
        Ok(self.read().get(resource).cloned())
    }

    fn upsert(&self, record: StoredRecord) -> std::result::Result<(), StorageError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.resource.clone(), record);
        Ok(())
    }

    fn find(
        &self,
        entity: &EntityType,
        conditions: &[ServerCondition],
    ) -> std::result::Result<Vec<StoredRecord>, StorageError> {
        let mut out: Vec<StoredRecord> = self
            .read()
            .values()
            .filter(|r| &r.resource.entity_type == entity && r.matches(conditions))
            .cloned()
            .collect();
        // HashMap order is arbitrary; results are stable by resource id.
        out.sort_by(|a, b| a.resource.resource_id.cmp(&b.resource.resource_id));
        Ok(out)
    }
}
