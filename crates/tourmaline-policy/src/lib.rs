//! # tourmaline-policy: Per-field encryption policy
//!
//! Maps `(entity type, field name)` to an encryption class and search
//! parameters. The registry is built once at startup -- from TOML
//! configuration or the builder API -- and is immutable thereafter, so it can
//! be shared process-wide without locking.
//!
//! ## Encryption classes
//!
//! | Class         | Server-side search     | Leakage                    |
//! |---------------|------------------------|----------------------------|
//! | Random        | none                   | length only                |
//! | Deterministic | equality               | equality pattern           |
//! | Range         | order comparison       | relative order in domain   |
//!
//! Reclassifying a field is an explicit re-encryption migration, never a
//! silent registry edit: the registry offers no mutation after build.

pub mod loader;
pub mod registry;

pub use loader::load_policies_from_str;
pub use registry::{
    EncryptionClass, FieldGroup, FieldPolicy, FieldPolicyRegistry, RangeDomain, RegistryBuilder,
};

use thiserror::Error;
use tourmaline_types::{EntityType, FieldName};

/// Errors raised while building or loading the policy registry.
///
/// All of these are configuration errors: fatal at startup, never seen at
/// request time.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("duplicate policy for {entity}.{field}")]
    DuplicatePolicy { entity: EntityType, field: FieldName },

    #[error("invalid range domain for {entity}.{field}: {reason}")]
    InvalidDomain {
        entity: EntityType,
        field: FieldName,
        reason: String,
    },

    #[error("failed to parse policy configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;
