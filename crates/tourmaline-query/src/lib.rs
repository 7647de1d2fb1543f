//! # tourmaline-query: Query planning over encrypted fields
//!
//! Translates plaintext predicates into conditions the store can evaluate
//! on ciphertext alone, plus a residual filter re-checked after decryption.
//!
//! What a field supports follows from its encryption class:
//!
//! | class         | equality              | range                  |
//! |---------------|-----------------------|------------------------|
//! | random        | unsupported           | unsupported            |
//! | deterministic | ciphertext equality   | full scan (opt-in)     |
//! | range         | token range + recheck | token range + recheck  |
//!
//! Every plan carries an honest cost label. Degraded plans are produced,
//! never silently executed: callers see [`ResidualCost::FullScan`] and must
//! opt in before running one.

pub mod planner;
pub mod predicate;

pub use planner::{QueryPlan, QueryPlanner, ServerCondition};
pub use predicate::{Predicate, ResidualCost};

use thiserror::Error;
use tourmaline_crypto::CryptoError;
use tourmaline_types::{EntityType, FieldName};

/// Errors raised during query planning.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No policy is registered for a predicate field.
    #[error("no field policy for {entity}.{field}")]
    UnknownField { entity: EntityType, field: FieldName },

    /// The predicate shape cannot be served for this field, not even by a
    /// degraded plan.
    #[error("unsupported query on {entity}.{field}: {reason}")]
    Unsupported {
        entity: EntityType,
        field: FieldName,
        reason: &'static str,
    },

    /// A range bound lies outside the field's declared domain.
    #[error("query bound for {entity}.{field} outside declared domain")]
    OutOfDomain { entity: EntityType, field: FieldName },

    /// Key resolution or encryption failed while building conditions.
    #[error(transparent)]
    Crypto(CryptoError),
}

impl From<CryptoError> for QueryError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnknownField { entity, field } => QueryError::UnknownField { entity, field },
            CryptoError::OutOfDomain { entity, field } => QueryError::OutOfDomain { entity, field },
            other => QueryError::Crypto(other),
        }
    }
}

/// Result type for query planning.
pub type Result<T> = std::result::Result<T, QueryError>;
