//! The mediated access pipeline.

use std::collections::BTreeSet;
use std::sync::Arc;

use tourmaline_audit::{AuditOutcome, AuditTrail};
use tourmaline_crypto::EncryptionCodec;
use tourmaline_policy::{FieldGroup, FieldPolicyRegistry};
use tourmaline_query::{Predicate, QueryPlan, QueryPlanner};
use tourmaline_rbac::{AccessDecision, AccessPolicyEngine, Actor, mask_fields};
use tourmaline_types::{
    Action, ActorId, EncryptedFieldMap, EncryptedValue, EntityType, FieldMap, FieldName,
    FieldValue, ResourceId, ResourceRef,
};
use uuid::Uuid;

use crate::store::{RecordStore, RetryPolicy, StoredRecord};
use crate::{GatewayError, Result};

/// Options for [`RecordGateway::search_records`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Execute plans labeled full-scan. Off by default: a degraded plan is
    /// returned to the caller as refused, never silently run.
    pub allow_full_scan: bool,
}

/// Ensures exactly one terminal audit entry per begun attempt.
///
/// If the pipeline returns without reaching an explicit outcome (an early
/// `?`, a panic in a collaborator), dropping the guard appends an ABORTED
/// terminal entry for the intent.
struct AuditGuard<'a> {
    trail: &'a AuditTrail,
    correlation_id: Uuid,
    finished: bool,
}

impl<'a> AuditGuard<'a> {
    fn begin(trail: &'a AuditTrail, actor: &ActorId, action: Action, resource: &ResourceRef) -> Self {
        let correlation_id = trail.begin(actor, action, resource);
        Self {
            trail,
            correlation_id,
            finished: false,
        }
    }

    fn finish(mut self, outcome: AuditOutcome) -> Result<()> {
        self.finished = true;
        self.trail.finalize(self.correlation_id, outcome)?;
        Ok(())
    }
}

impl Drop for AuditGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Nothing useful to do with a failure here; the intent without
            // a terminal entry is itself evidence if this append fails too.
            let _ = self.trail.finalize(
                self.correlation_id,
                AuditOutcome::Aborted {
                    reason: "pipeline aborted before outcome".to_string(),
                },
            );
        }
    }
}

/// The gateway: every mediated operation on sensitive records.
pub struct RecordGateway {
    registry: Arc<FieldPolicyRegistry>,
    codec: Arc<EncryptionCodec>,
    planner: QueryPlanner,
    engine: AccessPolicyEngine,
    trail: Arc<AuditTrail>,
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl RecordGateway {
    pub fn builder() -> RecordGatewayBuilder {
        RecordGatewayBuilder::default()
    }

    /// The audit trail, for compliance queries and export.
    pub fn audit_trail(&self) -> &AuditTrail {
        &self.trail
    }

    /// Checks and audits an access decision without touching storage.
    pub fn check_access(
        &self,
        actor: &Actor,
        action: Action,
        resource: &ResourceRef,
    ) -> Result<AccessDecision> {
        let guard = AuditGuard::begin(&self.trail, &actor.actor_id, action, resource);
        let decision = self.engine.check_access(actor, action, resource);
        let outcome = match &decision {
            AccessDecision::Granted { .. } => AuditOutcome::Granted {
                fields_accessed: vec![],
            },
            AccessDecision::Denied => AuditOutcome::Denied {
                fields_requested: vec![],
            },
        };
        guard.finish(outcome)?;
        Ok(decision)
    }

    /// Reads one record, decrypts it, and masks it to the actor's field
    /// groups. A missing record and a missing grant are the same `Denied`.
    pub fn read_record(&self, actor: &Actor, resource: &ResourceRef) -> Result<FieldMap> {
        let guard = AuditGuard::begin(&self.trail, &actor.actor_id, Action::Read, resource);

        let AccessDecision::Granted { groups } =
            self.engine.check_access(actor, Action::Read, resource)
        else {
            return self.deny(guard, resource);
        };

        let Some(stored) = self.retry.run(|| self.store.fetch(resource))? else {
            return self.deny(guard, resource);
        };

        let plain = self.decrypt_record(&resource.entity_type, &stored.fields)?;
        let masked = mask_fields(&self.registry, &resource.entity_type, &groups, plain);

        let fields_accessed: Vec<FieldName> = masked.keys().cloned().collect();
        tracing::debug!(
            actor = %actor.actor_id,
            resource = %resource.resource_id,
            fields = fields_accessed.len(),
            "record read"
        );
        guard.finish(AuditOutcome::Granted { fields_accessed })?;
        Ok(masked)
    }

    /// Searches an entity by predicate: plans, runs ciphertext conditions
    /// against the store, re-checks residual predicates on decrypted
    /// candidates, and masks each hit.
    pub fn search_records(
        &self,
        actor: &Actor,
        entity: &EntityType,
        predicate: &Predicate,
        options: SearchOptions,
    ) -> Result<Vec<(ResourceId, FieldMap)>> {
        let scope = ResourceRef::new(entity.clone(), "*");
        let guard = AuditGuard::begin(&self.trail, &actor.actor_id, Action::Search, &scope);

        let AccessDecision::Granted { groups } =
            self.engine.check_access(actor, Action::Search, &scope)
        else {
            return self.deny(guard, &scope);
        };

        let plan = self.planner.plan(entity, predicate)?;
        if plan.requires_full_scan() && !options.allow_full_scan {
            guard.finish(AuditOutcome::Aborted {
                reason: "full-scan plan refused without opt-in".to_string(),
            })?;
            return Err(GatewayError::InvalidRequest(
                "query requires a full scan; pass allow_full_scan to accept the cost".to_string(),
            ));
        }

        let candidates = self
            .retry
            .run(|| self.store.find(entity, &plan.conditions))?;

        let mut hits = Vec::new();
        let mut fields_accessed: BTreeSet<FieldName> = BTreeSet::new();
        for candidate in candidates {
            let plain = self.decrypt_record(entity, &candidate.fields)?;
            if !plan.residual.iter().all(|p| p.matches(&plain)) {
                continue;
            }
            let masked = mask_fields(&self.registry, entity, &groups, plain);
            fields_accessed.extend(masked.keys().cloned());
            hits.push((candidate.resource.resource_id, masked));
        }

        tracing::debug!(
            actor = %actor.actor_id,
            entity = %entity,
            hits = hits.len(),
            "search executed"
        );
        guard.finish(AuditOutcome::Granted {
            fields_accessed: fields_accessed.into_iter().collect(),
        })?;
        Ok(hits)
    }

    /// Creates or updates a record. Every written field must lie inside the
    /// actor's granted groups; updates merge into the stored record.
    pub fn write_record(
        &self,
        actor: &Actor,
        action: Action,
        resource: &ResourceRef,
        fields: FieldMap,
    ) -> Result<()> {
        if !matches!(action, Action::Create | Action::Update) {
            return Err(GatewayError::InvalidRequest(format!(
                "write action must be create or update, got {action}"
            )));
        }
        let guard = AuditGuard::begin(&self.trail, &actor.actor_id, action, resource);

        let AccessDecision::Granted { groups } = self.engine.check_access(actor, action, resource)
        else {
            return self.deny_fields(guard, fields.keys().cloned().collect());
        };

        // Field-level editability: a grant on the action does not extend to
        // groups outside the decision.
        if !self.fields_within_groups(&resource.entity_type, fields.keys(), &groups) {
            return self.deny_fields(guard, fields.keys().cloned().collect());
        }

        let mut encrypted = EncryptedFieldMap::new();
        for (field, value) in &fields {
            // Range domains are validated here, before anything is stored.
            let sealed = self.codec.encrypt(&resource.entity_type, field, value)?;
            encrypted.insert(field.clone(), sealed);
        }

        let merged = if action == Action::Update {
            let mut base = match self.retry.run(|| self.store.fetch(resource))? {
                Some(existing) => existing.fields,
                None => return self.deny_fields(guard, fields.keys().cloned().collect()),
            };
            base.extend(encrypted);
            base
        } else {
            encrypted
        };

        self.retry
            .run(|| self.store.upsert(StoredRecord::new(resource.clone(), merged.clone())))?;

        tracing::debug!(
            actor = %actor.actor_id,
            resource = %resource.resource_id,
            %action,
            fields = fields.len(),
            "record written"
        );
        guard.finish(AuditOutcome::Granted {
            fields_accessed: fields.keys().cloned().collect(),
        })?;
        Ok(())
    }

    /// Plans a predicate without executing it. Unaudited: no record data is
    /// touched.
    pub fn plan_query(&self, entity: &EntityType, predicate: &Predicate) -> Result<QueryPlan> {
        Ok(self.planner.plan(entity, predicate)?)
    }

    /// Encrypts one field value for a collaborator that stores ciphertext
    /// out of band.
    pub fn encrypt_field(
        &self,
        entity: &EntityType,
        field: &FieldName,
        value: &FieldValue,
    ) -> Result<EncryptedValue> {
        Ok(self.codec.encrypt(entity, field, value)?)
    }

    /// Decrypts one field value.
    pub fn decrypt_field(
        &self,
        entity: &EntityType,
        field: &FieldName,
        value: &EncryptedValue,
    ) -> Result<FieldValue> {
        Ok(self.codec.decrypt(entity, field, value)?)
    }

    /// Single-shot audit append for collaborator-originated events (for
    /// example authentication), bypassing the access check.
    pub fn record_audit(
        &self,
        actor: &ActorId,
        action: Action,
        resource: &ResourceRef,
        outcome: AuditOutcome,
    ) -> Result<Uuid> {
        Ok(self.trail.record(actor, action, resource, outcome)?)
    }

    fn decrypt_record(
        &self,
        entity: &EntityType,
        fields: &EncryptedFieldMap,
    ) -> Result<FieldMap> {
        let mut plain = FieldMap::new();
        for (field, value) in fields {
            plain.insert(field.clone(), self.codec.decrypt(entity, field, value)?);
        }
        Ok(plain)
    }

    fn fields_within_groups<'a>(
        &self,
        entity: &EntityType,
        mut fields: impl Iterator<Item = &'a FieldName>,
        groups: &BTreeSet<FieldGroup>,
    ) -> bool {
        fields.all(|field| {
            self.registry
                .get(entity, field)
                .is_some_and(|policy| groups.contains(&policy.group))
        })
    }

    /// Uniform denial: audits the field names involved and returns the
    /// cause-free outward error.
    fn deny<T>(&self, guard: AuditGuard<'_>, resource: &ResourceRef) -> Result<T> {
        let requested: Vec<FieldName> = self
            .registry
            .fields_for_entity(&resource.entity_type)
            .map(|p| p.field_name.clone())
            .collect();
        self.deny_fields(guard, requested)
    }

    fn deny_fields<T>(&self, guard: AuditGuard<'_>, fields_requested: Vec<FieldName>) -> Result<T> {
        guard.finish(AuditOutcome::Denied { fields_requested })?;
        Err(GatewayError::Denied)
    }
}

/// Assembles a [`RecordGateway`] from its collaborators.
#[derive(Default)]
pub struct RecordGatewayBuilder {
    registry: Option<Arc<FieldPolicyRegistry>>,
    codec: Option<Arc<EncryptionCodec>>,
    engine: Option<AccessPolicyEngine>,
    trail: Option<Arc<AuditTrail>>,
    store: Option<Arc<dyn RecordStore>>,
    retry: Option<RetryPolicy>,
}

impl RecordGatewayBuilder {
    #[must_use]
    pub fn registry(mut self, registry: Arc<FieldPolicyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: Arc<EncryptionCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: AccessPolicyEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn audit_trail(mut self, trail: Arc<AuditTrail>) -> Self {
        self.trail = Some(trail);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the gateway. Missing collaborators are configuration faults.
    pub fn build(self) -> Result<RecordGateway> {
        let missing =
            |what: &str| GatewayError::Unavailable(format!("gateway misconfigured: no {what}"));
        let codec = self.codec.ok_or_else(|| missing("encryption codec"))?;
        Ok(RecordGateway {
            registry: self.registry.ok_or_else(|| missing("policy registry"))?,
            planner: QueryPlanner::new(Arc::clone(&codec)),
            codec,
            engine: self.engine.unwrap_or_else(AccessPolicyEngine::standard),
            trail: self.trail.unwrap_or_default(),
            store: self.store.ok_or_else(|| missing("record store"))?,
            retry: self.retry.unwrap_or_default(),
        })
    }
}
