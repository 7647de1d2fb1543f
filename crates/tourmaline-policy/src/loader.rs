//! TOML loader for the field policy registry.
//!
//! Policies are configuration, not per-record state: they load once at
//! process startup and the resulting registry is immutable.
//!
//! ## Format
//!
//! ```toml
//! [[field]]
//! entity = "patient"
//! field = "ssn"
//! class = "deterministic"
//! group = "identifying"
//!
//! [[field]]
//! entity = "patient"
//! field = "birth_date"
//! class = "range"
//! group = "identifying"
//! range = { min = 693596, max = 767010, precision = 1, sparsity = 8 }
//! ```
//!
//! Range bounds are integer ordinals (days-from-CE for dates); the builder
//! API offers [`RangeDomain::dates`](crate::RangeDomain::dates) when
//! constructing domains from calendar dates in code.

use serde::Deserialize;

use crate::registry::{EncryptionClass, FieldGroup, FieldPolicy, FieldPolicyRegistry, RangeDomain};
use crate::{PolicyError, Result};

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    field: Vec<FieldEntry>,
}

#[derive(Debug, Deserialize)]
struct FieldEntry {
    entity: String,
    field: String,
    class: ClassName,
    group: FieldGroup,
    range: Option<RangeDomain>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ClassName {
    Random,
    Deterministic,
    Range,
}

/// Parses a TOML policy document into a registry.
///
/// Fails on parse errors, duplicate fields, invalid domains, and Range
/// entries missing their `range` table.
pub fn load_policies_from_str(input: &str) -> Result<FieldPolicyRegistry> {
    let file: PolicyFile = toml::from_str(input)?;

    let mut builder = FieldPolicyRegistry::builder();
    for entry in file.field {
        let class = match (entry.class, entry.range) {
            (ClassName::Random, None) => EncryptionClass::Random,
            (ClassName::Deterministic, None) => EncryptionClass::Deterministic,
            (ClassName::Range, Some(domain)) => EncryptionClass::Range(domain),
            (ClassName::Range, None) => {
                return Err(PolicyError::InvalidDomain {
                    entity: entry.entity.as_str().into(),
                    field: entry.field.as_str().into(),
                    reason: "range class requires a range table".to_string(),
                });
            }
            (_, Some(_)) => {
                return Err(PolicyError::InvalidDomain {
                    entity: entry.entity.as_str().into(),
                    field: entry.field.as_str().into(),
                    reason: "range table only valid for range class".to_string(),
                });
            }
        };
        builder = builder.policy(FieldPolicy::new(
            entry.entity.as_str(),
            entry.field.as_str(),
            class,
            entry.group,
        ))?;
    }
    Ok(builder.build())
}
