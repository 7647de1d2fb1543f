//! # tourmaline-types: Core types for Tourmaline
//!
//! This crate contains shared types used across the Tourmaline system:
//! - Entity identifiers ([`EntityType`], [`FieldName`], [`ResourceId`], [`ActorId`])
//! - Resource references ([`ResourceRef`])
//! - Plaintext field values ([`FieldValue`])
//! - Ciphertext field values ([`EncryptedValue`])
//! - Access actions ([`Action`])
//!
//! Everything here is deliberately dependency-light so that the policy,
//! crypto, query, and audit crates can share vocabulary without pulling in
//! each other.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// The kind of record an operation targets (e.g. `"patient"`, `"invoice"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The name of a single field within an entity (e.g. `"ssn"`, `"birth_date"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldName(String);

impl FieldName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FieldName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque identifier of a stored resource.
///
/// Subject-of-record binding compares these by exact equality only; there is
/// no partial or fuzzy matching anywhere in the system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of an authenticated actor, supplied by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A fully-qualified reference to one stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub entity_type: EntityType,
    pub resource_id: ResourceId,
}

impl ResourceRef {
    pub fn new(entity_type: impl Into<EntityType>, resource_id: impl Into<ResourceId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

// ============================================================================
// Actions
// ============================================================================

/// The action an actor is attempting.
///
/// Every `(role, action)` pair must have a defined outcome in the permission
/// table; unmapped actions default-deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Read a single resource by id.
    Read,
    /// Search resources by predicate.
    Search,
    /// Create a new resource.
    Create,
    /// Update fields of an existing resource.
    Update,
    /// Delete a resource.
    Delete,
    /// Bulk export (includes explicitly-authorized decrypt-and-scan).
    Export,
    /// Collaborator-originated authentication event; audited, never
    /// permission-checked here.
    Authenticate,
}

impl Action {
    /// All actions the permission table must cover.
    pub const ALL: [Action; 7] = [
        Action::Read,
        Action::Search,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Export,
        Action::Authenticate,
    ];

    /// Returns whether this action returns decrypted field data to the
    /// caller, and therefore requires field-visibility masking.
    pub fn returns_fields(self) -> bool {
        matches!(self, Action::Read | Action::Search | Action::Export)
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Read => "read",
            Action::Search => "search",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Export => "export",
            Action::Authenticate => "authenticate",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Field values
// ============================================================================

/// A decrypted field value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Date(NaiveDate),
}

impl FieldValue {
    /// Canonical byte encoding used as AEAD plaintext and as PRF input for
    /// deterministic nonces. Tagged so that `Text("1")` and `Integer(1)`
    /// never collide.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::Text(s) => {
                let mut out = Vec::with_capacity(1 + s.len());
                out.push(b't');
                out.extend_from_slice(s.as_bytes());
                out
            }
            FieldValue::Integer(i) => {
                let mut out = Vec::with_capacity(9);
                out.push(b'i');
                out.extend_from_slice(&i.to_be_bytes());
                out
            }
            FieldValue::Date(d) => {
                let mut out = Vec::with_capacity(9);
                out.push(b'd');
                out.extend_from_slice(&i64::from(d.num_days_from_ce()).to_be_bytes());
                out
            }
        }
    }

    /// Decodes a value previously produced by [`canonical_bytes`].
    ///
    /// [`canonical_bytes`]: FieldValue::canonical_bytes
    pub fn from_canonical_bytes(bytes: &[u8]) -> Option<Self> {
        let (tag, rest) = bytes.split_first()?;
        match tag {
            b't' => Some(FieldValue::Text(String::from_utf8(rest.to_vec()).ok()?)),
            b'i' => {
                let arr: [u8; 8] = rest.try_into().ok()?;
                Some(FieldValue::Integer(i64::from_be_bytes(arr)))
            }
            b'd' => {
                let arr: [u8; 8] = rest.try_into().ok()?;
                let days = i32::try_from(i64::from_be_bytes(arr)).ok()?;
                NaiveDate::from_num_days_from_ce_opt(days).map(FieldValue::Date)
            }
            _ => None,
        }
    }

    /// Integer ordinal for order-revealing encryption. `None` for text,
    /// which is never a valid Range-class value.
    pub fn ordinal(&self) -> Option<i64> {
        match self {
            FieldValue::Text(_) => None,
            FieldValue::Integer(i) => Some(*i),
            FieldValue::Date(d) => Some(i64::from(d.num_days_from_ce())),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

/// A decrypted record: field name to plaintext value.
pub type FieldMap = BTreeMap<FieldName, FieldValue>;

// ============================================================================
// Encrypted values
// ============================================================================

/// A ciphertext field value, shaped by the field's encryption class.
///
/// Storage must preserve these byte-for-byte; the variants exist so the
/// query layer can tell at the type level which comparisons are meaningful:
/// `Sealed` supports none, `Exact` supports byte equality, `Ordered`
/// supports `u64` ordering on its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptedValue {
    /// Random-class ciphertext. Never compare for equality: the same
    /// plaintext encrypts differently on every call.
    Sealed(Vec<u8>),
    /// Deterministic-class ciphertext; identical plaintext + key yields
    /// identical bytes, so byte equality is plaintext equality.
    Exact(Vec<u8>),
    /// Range-class ciphertext: an order-revealing token for server-side
    /// comparison plus a sealed exact value so decryption is lossless.
    Ordered { token: u64, sealed: Vec<u8> },
}

impl EncryptedValue {
    /// Human-readable class name, used in diagnostics and audit metadata.
    /// Never includes ciphertext bytes.
    pub fn class_name(&self) -> &'static str {
        match self {
            EncryptedValue::Sealed(_) => "random",
            EncryptedValue::Exact(_) => "deterministic",
            EncryptedValue::Ordered { .. } => "range",
        }
    }
}

/// A stored record: field name to ciphertext value.
pub type EncryptedFieldMap = BTreeMap<FieldName, EncryptedValue>;

// ============================================================================
// Tests
// ============================================================================
