//! # tourmaline-rbac: Role-based access control
//!
//! Answers exactly one question: may this actor perform this action on this
//! resource, and if so, which field groups may the result expose?
//!
//! The decision procedure is deterministic and side-effect free. Permissions
//! live in a data-driven [`PermissionTable`] keyed by `(role, action)`;
//! anything the table does not grant is denied. Actors carrying several
//! roles receive the union of each role's field groups. An actor bound to a
//! specific resource (the subject of the record) additionally gets a
//! self-access grant on that one resource, independent of role.
//!
//! Field-level visibility is enforced by [`masking`]: a granted action never
//! returns fields outside the decision's group set, it silently omits them.

pub mod masking;
pub mod policy;
pub mod roles;

pub use masking::mask_fields;
pub use policy::{AccessDecision, AccessPolicyEngine, PermissionTable};
pub use roles::{Actor, Role};

use thiserror::Error;

/// Errors raised while loading or evaluating access policy.
#[derive(Debug, Error)]
pub enum RbacError {
    /// A permission document referenced a role name that does not exist.
    #[error("unknown role '{0}' in permission table")]
    UnknownRole(String),

    /// A grant entry was structurally invalid.
    #[error("invalid permission grant: {0}")]
    InvalidGrant(String),

    /// The permission document failed to parse.
    #[error("failed to parse permission table: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for RBAC operations.
pub type Result<T> = std::result::Result<T, RbacError>;
