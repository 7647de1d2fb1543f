//! # tourmaline-audit: Append-only access audit trail
//!
//! Every mediated access attempt leaves two entries sharing a correlation
//! id: a PENDING intent appended before evaluation, and exactly one terminal
//! entry (granted, denied, or aborted) appended after. Entries are never
//! updated or deleted; a crash mid-check is visible as an intent with no
//! terminal entry, which is itself evidence.
//!
//! Denial entries identify the field names an actor asked for, never field
//! values, and never say whether a field was absent or merely not permitted.

pub mod trail;

pub use trail::{AuditOutcome, AuditQuery, AuditRecord, AuditTrail, OutcomeKind};

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    /// No pending entry exists for the correlation id.
    #[error("no pending audit entry for correlation id {0}")]
    UnknownCorrelation(Uuid),

    /// A terminal entry was already appended for the correlation id.
    #[error("audit entry {0} already finalized")]
    AlreadyFinalized(Uuid),

    /// A terminal operation was handed a non-terminal outcome.
    #[error("outcome '{0}' is not terminal")]
    NonTerminalOutcome(&'static str),

    /// Export serialization failed.
    #[error("audit export failed: {0}")]
    Export(#[from] serde_json::Error),
}

/// Result type for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
