//! The audit trail, its record type, and query filters.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tourmaline_types::{Action, ActorId, FieldName, ResourceRef};
use uuid::Uuid;

use crate::{AuditError, Result};

/// Outcome recorded for one audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum AuditOutcome {
    /// Intent appended before evaluation.
    Pending,
    /// Access granted; lists the field names actually returned.
    Granted { fields_accessed: Vec<FieldName> },
    /// Access denied; lists the field names requested, never values, and
    /// never whether a field existed.
    Denied { fields_requested: Vec<FieldName> },
    /// The pipeline failed before reaching a grant or denial.
    Aborted { reason: String },
}

impl AuditOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            AuditOutcome::Pending => OutcomeKind::Pending,
            AuditOutcome::Granted { .. } => OutcomeKind::Granted,
            AuditOutcome::Denied { .. } => OutcomeKind::Denied,
            AuditOutcome::Aborted { .. } => OutcomeKind::Aborted,
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, AuditOutcome::Pending)
    }
}

/// Outcome discriminant, used by query filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Pending,
    Granted,
    Denied,
    Aborted,
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: ActorId,
    pub action: Action,
    pub resource: ResourceRef,
    #[serde(flatten)]
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Append-only audit trail.
///
/// `append` (via [`begin`](AuditTrail::begin),
/// [`finalize`](AuditTrail::finalize), and [`record`](AuditTrail::record))
/// is the only mutation; nothing is ever rewritten in place.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Mutex<Vec<AuditRecord>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a PENDING intent and returns its fresh correlation id.
    pub fn begin(&self, actor: &ActorId, action: Action, resource: &ResourceRef) -> Uuid {
        let correlation_id = Uuid::new_v4();
        self.append(AuditRecord {
            correlation_id,
            timestamp: Utc::now(),
            actor: actor.clone(),
            action,
            resource: resource.clone(),
            outcome: AuditOutcome::Pending,
            metadata: BTreeMap::new(),
        });
        correlation_id
    }

    /// Appends the terminal entry for a previously begun attempt.
    ///
    /// Exactly one terminal entry per correlation id: a second call is
    /// [`AuditError::AlreadyFinalized`]. The terminal entry copies actor,
    /// action, and resource from the pending intent.
    pub fn finalize(&self, correlation_id: Uuid, outcome: AuditOutcome) -> Result<()> {
        if !outcome.is_terminal() {
            return Err(AuditError::NonTerminalOutcome("pending"));
        }

        let mut entries = self.lock();
        let mut pending = None;
        for entry in entries.iter() {
            if entry.correlation_id == correlation_id {
                if entry.outcome.is_terminal() {
                    return Err(AuditError::AlreadyFinalized(correlation_id));
                }
                pending = Some((entry.actor.clone(), entry.action, entry.resource.clone()));
            }
        }
        let Some((actor, action, resource)) = pending else {
            return Err(AuditError::UnknownCorrelation(correlation_id));
        };

        let terminal = AuditRecord {
            correlation_id,
            timestamp: Utc::now(),
            actor,
            action,
            resource,
            outcome,
            metadata: BTreeMap::new(),
        };
        tracing::debug!(
            %correlation_id,
            outcome = ?terminal.outcome.kind(),
            "audit entry finalized"
        );
        entries.push(terminal);
        Ok(())
    }

    /// Single-shot append for collaborator-originated events that never go
    /// through the pending/finalize pair (e.g. authentication).
    pub fn record(
        &self,
        actor: &ActorId,
        action: Action,
        resource: &ResourceRef,
        outcome: AuditOutcome,
    ) -> Result<Uuid> {
        if !outcome.is_terminal() {
            return Err(AuditError::NonTerminalOutcome("pending"));
        }
        let correlation_id = Uuid::new_v4();
        self.append(AuditRecord {
            correlation_id,
            timestamp: Utc::now(),
            actor: actor.clone(),
            action,
            resource: resource.clone(),
            outcome,
            metadata: BTreeMap::new(),
        });
        Ok(correlation_id)
    }

    /// Correlation ids with a pending intent but no terminal entry. Evidence
    /// of a crash or an in-flight attempt.
    pub fn unfinalized(&self) -> Vec<Uuid> {
        let entries = self.lock();
        entries
            .iter()
            .filter(|e| !e.outcome.is_terminal())
            .filter(|pending| {
                !entries.iter().any(|e| {
                    e.correlation_id == pending.correlation_id && e.outcome.is_terminal()
                })
            })
            .map(|e| e.correlation_id)
            .collect()
    }

    /// Runs a filter query, returning matching entries in append order.
    pub fn find(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        let entries = self.lock();
        let mut out: Vec<AuditRecord> = entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        out
    }

    /// Exports the full trail as pretty-printed JSON for compliance review.
    pub fn export_json(&self) -> Result<String> {
        let entries = self.lock();
        Ok(serde_json::to_string_pretty(&*entries)?)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn append(&self, record: AuditRecord) {
        self.lock().push(record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AuditRecord>> {
        // A poisoned lock only means a panic elsewhere; the entries are
        // append-only and remain internally consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Conjunctive filters over the audit trail.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    actor: Option<ActorId>,
    action: Option<Action>,
    resource: Option<ResourceRef>,
    correlation_id: Option<Uuid>,
    outcome: Option<OutcomeKind>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn actor(mut self, actor: impl Into<ActorId>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    #[must_use]
    pub fn outcome(mut self, kind: OutcomeKind) -> Self {
        self.outcome = Some(kind);
        self
    }

    #[must_use]
    pub fn since(mut self, t: DateTime<Utc>) -> Self {
        self.since = Some(t);
        self
    }

    #[must_use]
    pub fn until(mut self, t: DateTime<Utc>) -> Self {
        self.until = Some(t);
        self
    }

    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        self.actor.as_ref().is_none_or(|a| a == &record.actor)
            && self.action.is_none_or(|a| a == record.action)
            && self.resource.as_ref().is_none_or(|r| r == &record.resource)
            && self
                .correlation_id
                .is_none_or(|id| id == record.correlation_id)
            && self.outcome.is_none_or(|k| k == record.outcome.kind())
            && self.since.is_none_or(|t| record.timestamp >= t)
            && self.until.is_none_or(|t| record.timestamp <= t)
    }
}
