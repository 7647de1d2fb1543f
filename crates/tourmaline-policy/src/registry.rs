//! Field policy types and the immutable registry.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tourmaline_types::{EntityType, FieldName};

use crate::{PolicyError, Result};

/// Domain bounds and precision for a Range-class field.
///
/// Values are integer ordinals (dates use days-from-CE, see
/// [`tourmaline_types::FieldValue::ordinal`]). Queries and inserts outside
/// `[min, max]` are rejected outright -- never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeDomain {
    /// Smallest admissible ordinal (inclusive).
    pub min: i64,
    /// Largest admissible ordinal (inclusive).
    pub max: i64,
    /// Bucket width: values within the same bucket are indistinguishable on
    /// ciphertext; values at least one bucket apart are ordered.
    pub precision: i64,
    /// Per-bucket token spread. Larger values blur bucket boundaries in the
    /// token space at the cost of token range width.
    pub sparsity: u32,
}

impl RangeDomain {
    /// Creates a domain over raw integer ordinals.
    pub fn new(min: i64, max: i64, precision: i64, sparsity: u32) -> Self {
        Self {
            min,
            max,
            precision,
            sparsity,
        }
    }

    /// Creates a domain over calendar dates with bucket width in days.
    pub fn dates(min: NaiveDate, max: NaiveDate, precision_days: i64, sparsity: u32) -> Self {
        Self {
            min: i64::from(min.num_days_from_ce()),
            max: i64::from(max.num_days_from_ce()),
            precision: precision_days,
            sparsity,
        }
    }

    /// Returns whether the ordinal lies inside the declared domain.
    pub fn contains(&self, ordinal: i64) -> bool {
        ordinal >= self.min && ordinal <= self.max
    }

    /// Bucket index of an in-domain ordinal. Caller must check
    /// [`contains`](Self::contains) first.
    pub fn bucket(&self, ordinal: i64) -> u64 {
        debug_assert!(self.contains(ordinal), "ordinal outside declared domain");
        // i128 span: min may be deeply negative while ordinal is near i64::MAX
        let offset = i128::from(ordinal) - i128::from(self.min);
        (offset / i128::from(self.precision)) as u64
    }

    /// Number of buckets in the domain. Meaningful only for a domain that
    /// passed [`validate`](Self::validate), which bounds the count by u64.
    pub fn bucket_count(&self) -> u64 {
        let span = i128::from(self.max) - i128::from(self.min);
        (span / i128::from(self.precision) + 1) as u64
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.min >= self.max {
            return Err(format!("min {} must be below max {}", self.min, self.max));
        }
        if self.precision <= 0 {
            return Err(format!("precision {} must be positive", self.precision));
        }
        if self.sparsity == 0 {
            return Err("sparsity must be at least 1".to_string());
        }
        // Token space must fit in u64: buckets * sparsity <= u64::MAX. The
        // span itself can exceed i64, so all of this runs in i128.
        let span = i128::from(self.max) - i128::from(self.min);
        let buckets = span / i128::from(self.precision) + 1;
        if buckets * i128::from(self.sparsity) > i128::from(u64::MAX) {
            return Err(format!(
                "token space overflow: {buckets} buckets * sparsity {}",
                self.sparsity
            ));
        }
        Ok(())
    }
}

/// Encryption class assigned to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionClass {
    /// Fresh random nonce per call; no server-side search, ever.
    Random,
    /// Synthetic-nonce AEAD; ciphertext equality is plaintext equality.
    Deterministic,
    /// Bucketed order-revealing token plus sealed exact value.
    Range(RangeDomain),
}

impl EncryptionClass {
    pub fn name(&self) -> &'static str {
        match self {
            EncryptionClass::Random => "random",
            EncryptionClass::Deterministic => "deterministic",
            EncryptionClass::Range(_) => "range",
        }
    }
}

/// Visibility group a field belongs to, whitelisted per role by the
/// access policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldGroup {
    /// Names, national identifiers, birth dates.
    Identifying,
    /// Addresses, phone numbers, email.
    Contact,
    /// Diagnoses, treatment notes, observations.
    Clinical,
    /// Billing, insurance, payment data.
    Financial,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 4] = [
        FieldGroup::Identifying,
        FieldGroup::Contact,
        FieldGroup::Clinical,
        FieldGroup::Financial,
    ];
}

/// Policy for a single `(entity, field)` pair. Immutable after startup load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    pub entity_type: EntityType,
    pub field_name: FieldName,
    pub class: EncryptionClass,
    pub group: FieldGroup,
}

impl FieldPolicy {
    pub fn new(
        entity_type: impl Into<EntityType>,
        field_name: impl Into<FieldName>,
        class: EncryptionClass,
        group: FieldGroup,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            field_name: field_name.into(),
            class,
            group,
        }
    }

    /// Data-key alternate name for this field. One data key per
    /// `(entity, field)` pair.
    pub fn key_alt_name(&self) -> String {
        format!("{}/{}", self.entity_type, self.field_name)
    }
}

/// Immutable, process-wide map of field policies.
///
/// Built once via [`RegistryBuilder`] or the TOML loader; lookups thereafter
/// are lock-free shared reads.
#[derive(Debug, Clone, Default)]
pub struct FieldPolicyRegistry {
    policies: BTreeMap<(EntityType, FieldName), FieldPolicy>,
}

impl FieldPolicyRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up the policy for a field. `None` means the field is not under
    /// policy management; callers treat that the same as "not permitted" to
    /// avoid leaking which fields exist.
    pub fn get(&self, entity: &EntityType, field: &FieldName) -> Option<&FieldPolicy> {
        self.policies.get(&(entity.clone(), field.clone()))
    }

    /// All policies for an entity type, in field-name order.
    pub fn fields_for_entity<'a>(
        &'a self,
        entity: &'a EntityType,
    ) -> impl Iterator<Item = &'a FieldPolicy> {
        self.policies
            .iter()
            .filter(move |((e, _), _)| e == entity)
            .map(|(_, p)| p)
    }

    /// Field names of an entity belonging to any of the given groups.
    pub fn fields_in_groups<'a>(
        &'a self,
        entity: &'a EntityType,
        groups: &'a [FieldGroup],
    ) -> impl Iterator<Item = &'a FieldName> {
        self.fields_for_entity(entity)
            .filter(|p| groups.contains(&p.group))
            .map(|p| &p.field_name)
    }

    /// Total number of registered field policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Builder enforcing the one-class-per-field invariant at construction time.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    policies: BTreeMap<(EntityType, FieldName), FieldPolicy>,
}

impl RegistryBuilder {
    /// Adds a policy, rejecting duplicates and invalid range domains.
    pub fn policy(mut self, policy: FieldPolicy) -> Result<Self> {
        if let EncryptionClass::Range(domain) = &policy.class {
            domain
                .validate()
                .map_err(|reason| PolicyError::InvalidDomain {
                    entity: policy.entity_type.clone(),
                    field: policy.field_name.clone(),
                    reason,
                })?;
        }
        let key = (policy.entity_type.clone(), policy.field_name.clone());
        if self.policies.contains_key(&key) {
            return Err(PolicyError::DuplicatePolicy {
                entity: policy.entity_type,
                field: policy.field_name,
            });
        }
        self.policies.insert(key, policy);
        Ok(self)
    }

    pub fn build(self) -> FieldPolicyRegistry {
        tracing::debug!(policies = self.policies.len(), "field policy registry built");
        FieldPolicyRegistry {
            policies: self.policies,
        }
    }
}
