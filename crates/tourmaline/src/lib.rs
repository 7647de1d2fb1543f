//! # tourmaline: the access gateway
//!
//! The one place where policy, keys, authorization, planning, and audit come
//! together. Every read and write of a sensitive record flows through
//! [`RecordGateway`], which runs the synchronous pipeline
//!
//! ```text
//! audit intent -> authorize -> plan / encrypt -> storage -> decrypt -> mask -> audit outcome
//! ```
//!
//! and guarantees, via a drop guard, that each attempt leaves exactly one
//! terminal audit entry even when a stage fails partway.
//!
//! Errors leaving this crate collapse to a deliberately small vocabulary:
//! [`GatewayError::Denied`] is uniform regardless of cause (missing record,
//! missing permission, or missing policy all look identical to the caller),
//! [`GatewayError::Unavailable`] covers infrastructure, and
//! [`GatewayError::InvalidRequest`] covers malformed input such as
//! out-of-domain values or refused full scans.

pub mod config;
pub mod gateway;
pub mod store;

pub use config::GatewayConfig;
pub use gateway::{RecordGateway, RecordGatewayBuilder, SearchOptions};
pub use store::{MemoryRecordStore, RecordStore, RetryPolicy, StorageError, StoredRecord};

use thiserror::Error;
use tourmaline_crypto::CryptoError;
use tourmaline_query::QueryError;

/// Outward-facing error vocabulary of the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request was refused. Deliberately carries no cause: callers
    /// cannot distinguish a missing record, a missing grant, or an
    /// unmanaged field.
    #[error("access denied")]
    Denied,

    /// Infrastructure failure after bounded retry, or an internal fault
    /// that must not leak detail.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The request itself is malformed or refused as posed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<CryptoError> for GatewayError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::UnknownField { .. } => GatewayError::Denied,
            CryptoError::OutOfDomain { entity, field } => GatewayError::InvalidRequest(format!(
                "value for {entity}.{field} outside declared domain"
            )),
            CryptoError::ClassMismatch { entity, field, class } => GatewayError::InvalidRequest(
                format!("value incompatible with {class} class for {entity}.{field}"),
            ),
            // Key trouble, configuration faults, and failed decryption all
            // surface without internal detail.
            CryptoError::Configuration(_)
            | CryptoError::KeyUnavailable { .. }
            | CryptoError::DecryptionFailed => {
                GatewayError::Unavailable("encryption layer failure".to_string())
            }
        }
    }
}

impl From<QueryError> for GatewayError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::UnknownField { .. } => GatewayError::Denied,
            QueryError::Unsupported { entity, field, reason } => GatewayError::InvalidRequest(
                format!("unsupported query on {entity}.{field}: {reason}"),
            ),
            QueryError::OutOfDomain { entity, field } => GatewayError::InvalidRequest(format!(
                "query bound for {entity}.{field} outside declared domain"
            )),
            QueryError::Crypto(inner) => inner.into(),
        }
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        GatewayError::Unavailable(err.to_string())
    }
}

impl From<tourmaline_audit::AuditError> for GatewayError {
    fn from(_: tourmaline_audit::AuditError) -> Self {
        GatewayError::Unavailable("audit trail failure".to_string())
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
