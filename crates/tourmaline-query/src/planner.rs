//! Predicate-to-plan translation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tourmaline_crypto::EncryptionCodec;
use tourmaline_policy::EncryptionClass;
use tourmaline_types::{EntityType, FieldName, FieldValue};

use crate::predicate::{Predicate, ResidualCost};
use crate::{QueryError, Result};

/// A condition the store evaluates on ciphertext alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerCondition {
    /// Stored `Exact` ciphertext equals these bytes. Only deterministic
    /// fields produce comparable ciphertext.
    CiphertextEq { field: FieldName, ciphertext: Vec<u8> },
    /// Stored order token lies in `[low, high]` inclusive.
    TokenRange { field: FieldName, low: u64, high: u64 },
}

/// An executable plan: ciphertext conditions for the store, plus residual
/// plaintext predicates re-checked after decryption.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub entity: EntityType,
    pub conditions: Vec<ServerCondition>,
    /// Predicates that must be re-evaluated on decrypted candidates.
    pub residual: Vec<Predicate>,
    pub cost: ResidualCost,
}

impl QueryPlan {
    /// Whether executing this plan means decrypting every stored record.
    pub fn requires_full_scan(&self) -> bool {
        self.cost == ResidualCost::FullScan
    }
}

/// Plans plaintext predicates into ciphertext-capable [`QueryPlan`]s.
///
/// Stateless apart from the codec; safe to share across request handlers.
pub struct QueryPlanner {
    codec: Arc<EncryptionCodec>,
}

impl QueryPlanner {
    pub fn new(codec: Arc<EncryptionCodec>) -> Self {
        Self { codec }
    }

    /// Builds a plan for `predicate` over `entity`.
    ///
    /// Bucket granularity on range fields makes token conditions an
    /// over-approximation, so matching predicates stay in the residual; the
    /// final cost reflects whether any server condition narrows the
    /// candidate set at all.
    pub fn plan(&self, entity: &EntityType, predicate: &Predicate) -> Result<QueryPlan> {
        let mut conditions = Vec::new();
        let mut residual = Vec::new();
        self.plan_into(entity, predicate, &mut conditions, &mut residual)?;

        let cost = if !conditions.is_empty() {
            if residual.is_empty() {
                ResidualCost::None
            } else {
                ResidualCost::PerCandidate
            }
        } else {
            // Nothing narrows server-side: listing or decrypt-everything.
            ResidualCost::FullScan
        };

        tracing::debug!(
            entity = %entity,
            conditions = conditions.len(),
            residual = residual.len(),
            ?cost,
            "query planned"
        );
        Ok(QueryPlan {
            entity: entity.clone(),
            conditions,
            residual,
            cost,
        })
    }

    fn plan_into(
        &self,
        entity: &EntityType,
        predicate: &Predicate,
        conditions: &mut Vec<ServerCondition>,
        residual: &mut Vec<Predicate>,
    ) -> Result<()> {
        match predicate {
            Predicate::And(children) => {
                for child in children {
                    self.plan_into(entity, child, conditions, residual)?;
                }
                Ok(())
            }
            Predicate::Eq { field, value } => self.plan_eq(entity, field, value, conditions, residual),
            Predicate::Range { field, low, high } => {
                self.plan_range(entity, field, low, high, conditions, residual)
            }
        }
    }

    fn plan_eq(
        &self,
        entity: &EntityType,
        field: &FieldName,
        value: &FieldValue,
        conditions: &mut Vec<ServerCondition>,
        residual: &mut Vec<Predicate>,
    ) -> Result<()> {
        match self.class_of(entity, field)? {
            EncryptionClass::Deterministic => {
                let ciphertext = self.codec.equality_ciphertext(entity, field, value)?;
                conditions.push(ServerCondition::CiphertextEq {
                    field: field.clone(),
                    ciphertext,
                });
                Ok(())
            }
            EncryptionClass::Range(_) => {
                // Equality degrades to the value's bucket; exact match is
                // confirmed on the decrypted candidate.
                let token = self.codec.range_token(entity, field, value)?;
                conditions.push(ServerCondition::TokenRange {
                    field: field.clone(),
                    low: token,
                    high: token,
                });
                residual.push(Predicate::Eq {
                    field: field.clone(),
                    value: value.clone(),
                });
                Ok(())
            }
            EncryptionClass::Random => Err(QueryError::Unsupported {
                entity: entity.clone(),
                field: field.clone(),
                reason: "random-class ciphertext has no searchable form",
            }),
        }
    }

    fn plan_range(
        &self,
        entity: &EntityType,
        field: &FieldName,
        low: &FieldValue,
        high: &FieldValue,
        conditions: &mut Vec<ServerCondition>,
        residual: &mut Vec<Predicate>,
    ) -> Result<()> {
        let predicate = Predicate::Range {
            field: field.clone(),
            low: low.clone(),
            high: high.clone(),
        };
        match self.class_of(entity, field)? {
            EncryptionClass::Range(_) => {
                // Out-of-domain bounds are rejected here, never clamped.
                let low_token = self.codec.range_token(entity, field, low)?;
                let high_token = self.codec.range_token(entity, field, high)?;
                conditions.push(ServerCondition::TokenRange {
                    field: field.clone(),
                    low: low_token,
                    high: high_token,
                });
                residual.push(predicate);
                Ok(())
            }
            EncryptionClass::Deterministic => {
                // No order information on ciphertext. Producible, but only
                // as a decrypt-everything residual; the cost label says so.
                residual.push(predicate);
                Ok(())
            }
            EncryptionClass::Random => Err(QueryError::Unsupported {
                entity: entity.clone(),
                field: field.clone(),
                reason: "random-class ciphertext has no searchable form",
            }),
        }
    }

    fn class_of(&self, entity: &EntityType, field: &FieldName) -> Result<EncryptionClass> {
        self.codec
            .registry()
            .get(entity, field)
            .map(|policy| policy.class)
            .ok_or_else(|| QueryError::UnknownField {
                entity: entity.clone(),
                field: field.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tourmaline_crypto::{KeyManager, MasterKey, MemoryKeyStore};
    use tourmaline_policy::{FieldGroup, FieldPolicy, FieldPolicyRegistry, RangeDomain};

    fn planner() -> QueryPlanner {
        let registry = FieldPolicyRegistry::builder()
            .policy(FieldPolicy::new(
                "patient",
                "name",
                EncryptionClass::Deterministic,
                FieldGroup::Identifying,
            ))
            .unwrap()
            .policy(FieldPolicy::new(
                "patient",
                "notes",
                EncryptionClass::Random,
                FieldGroup::Clinical,
            ))
            .unwrap()
            .policy(FieldPolicy::new(
                "patient",
                "birth_date",
                EncryptionClass::Range(RangeDomain::dates(
                    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2100, 12, 31).unwrap(),
                    1,
                    8,
                )),
                FieldGroup::Identifying,
            ))
            .unwrap()
            .build();
        let keys = KeyManager::new(&MasterKey::generate(), Arc::new(MemoryKeyStore::new()));
        QueryPlanner::new(Arc::new(EncryptionCodec::new(
            Arc::new(registry),
            Arc::new(keys),
        )))
    }

    fn date(y: i32, m: u32, d: u32) -> FieldValue {
        FieldValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_deterministic_eq_is_exact() {
        let plan = planner()
            .plan(
                &"patient".into(),
                &Predicate::eq("name", FieldValue::Text("Ada".into())),
            )
            .unwrap();

        assert_eq!(plan.conditions.len(), 1);
        assert!(matches!(
            plan.conditions[0],
            ServerCondition::CiphertextEq { .. }
        ));
        assert!(plan.residual.is_empty());
        assert_eq!(plan.cost, ResidualCost::None);
    }

    #[test]
    fn test_range_query_gets_token_range_and_recheck() {
        let plan = planner()
            .plan(
                &"patient".into(),
                &Predicate::range("birth_date", date(1980, 1, 1), date(1990, 12, 31)),
            )
            .unwrap();

        let [ServerCondition::TokenRange { low, high, .. }] = plan.conditions.as_slice() else {
            panic!("expected one token range condition");
        };
        assert!(low < high);
        assert_eq!(plan.residual.len(), 1);
        assert_eq!(plan.cost, ResidualCost::PerCandidate);
    }

    #[test]
    fn test_eq_on_range_field_degrades_to_bucket() {
        let plan = planner()
            .plan(
                &"patient".into(),
                &Predicate::eq("birth_date", date(1985, 6, 1)),
            )
            .unwrap();

        let [ServerCondition::TokenRange { low, high, .. }] = plan.conditions.as_slice() else {
            panic!("expected one token range condition");
        };
        assert_eq!(low, high);
        // Exact equality confirmed on decrypted candidates
        assert_eq!(plan.residual.len(), 1);
        assert_eq!(plan.cost, ResidualCost::PerCandidate);
    }

    #[test]
    fn test_random_field_predicates_unsupported() {
        let result = planner().plan(
            &"patient".into(),
            &Predicate::eq("notes", FieldValue::Text("x".into())),
        );
        assert!(matches!(result, Err(QueryError::Unsupported { .. })));

        let result = planner().plan(
            &"patient".into(),
            &Predicate::range(
                "notes",
                FieldValue::Text("a".into()),
                FieldValue::Text("z".into()),
            ),
        );
        assert!(matches!(result, Err(QueryError::Unsupported { .. })));
    }

    #[test]
    fn test_range_on_deterministic_is_full_scan() {
        let plan = planner()
            .plan(
                &"patient".into(),
                &Predicate::range(
                    "name",
                    FieldValue::Text("A".into()),
                    FieldValue::Text("M".into()),
                ),
            )
            .unwrap();

        assert!(plan.conditions.is_empty());
        assert_eq!(plan.cost, ResidualCost::FullScan);
        assert!(plan.requires_full_scan());
    }

    #[test]
    fn test_out_of_domain_bound_rejected_not_clamped() {
        let result = planner().plan(
            &"patient".into(),
            &Predicate::range("birth_date", date(1700, 1, 1), date(1990, 12, 31)),
        );
        assert!(matches!(result, Err(QueryError::OutOfDomain { .. })));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = planner().plan(
            &"patient".into(),
            &Predicate::eq("no_such_field", FieldValue::Integer(1)),
        );
        assert!(matches!(result, Err(QueryError::UnknownField { .. })));
    }

    #[test]
    fn test_conjunction_collects_conditions_and_residual() {
        let plan = planner()
            .plan(
                &"patient".into(),
                &Predicate::And(vec![
                    Predicate::eq("name", FieldValue::Text("Ada".into())),
                    Predicate::range("birth_date", date(1980, 1, 1), date(1990, 12, 31)),
                ]),
            )
            .unwrap();

        assert_eq!(plan.conditions.len(), 2);
        assert_eq!(plan.residual.len(), 1);
        assert_eq!(plan.cost, ResidualCost::PerCandidate);
    }

    #[test]
    fn test_conjunction_narrowed_by_one_exact_condition() {
        // A deterministic equality narrows candidates, so the full-scan
        // shaped branch costs per-candidate, not full-scan.
        let plan = planner()
            .plan(
                &"patient".into(),
                &Predicate::And(vec![
                    Predicate::eq("name", FieldValue::Text("Ada".into())),
                    Predicate::range(
                        "name",
                        FieldValue::Text("A".into()),
                        FieldValue::Text("M".into()),
                    ),
                ]),
            )
            .unwrap();

        assert_eq!(plan.conditions.len(), 1);
        assert_eq!(plan.cost, ResidualCost::PerCandidate);
    }

    #[test]
    fn test_empty_conjunction_is_full_scan() {
        let plan = planner()
            .plan(&"patient".into(), &Predicate::And(vec![]))
            .unwrap();
        assert!(plan.conditions.is_empty());
        assert_eq!(plan.cost, ResidualCost::FullScan);
    }
}
