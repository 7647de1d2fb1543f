//! Plaintext predicates and residual-filter evaluation.

use serde::{Deserialize, Serialize};
use tourmaline_types::{FieldMap, FieldName, FieldValue};

/// A search predicate over plaintext field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Field equals the value exactly.
    Eq { field: FieldName, value: FieldValue },
    /// Field lies in the inclusive range `[low, high]`. Both bounds must be
    /// orderable values of the same kind.
    Range {
        field: FieldName,
        low: FieldValue,
        high: FieldValue,
    },
    /// All sub-predicates hold.
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<FieldName>, value: FieldValue) -> Self {
        Predicate::Eq {
            field: field.into(),
            value,
        }
    }

    pub fn range(field: impl Into<FieldName>, low: FieldValue, high: FieldValue) -> Self {
        Predicate::Range {
            field: field.into(),
            low,
            high,
        }
    }

    /// Evaluates the predicate against a decrypted record. A field missing
    /// from the record fails the predicate.
    pub fn matches(&self, record: &FieldMap) -> bool {
        match self {
            Predicate::Eq { field, value } => record.get(field) == Some(value),
            Predicate::Range { field, low, high } => {
                let (Some(v), Some(lo), Some(hi)) =
                    (record.get(field).and_then(FieldValue::ordinal), low.ordinal(), high.ordinal())
                else {
                    return false;
                };
                v >= lo && v <= hi
            }
            Predicate::And(children) => children.iter().all(|child| child.matches(record)),
        }
    }
}

/// Honest cost label of a plan's residual work.
///
/// Ordered by severity so conjunctions can take the maximum over branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResidualCost {
    /// Server conditions are exact; nothing to re-check.
    None,
    /// Candidates returned by the server need a decrypt-and-recheck pass.
    PerCandidate,
    /// No server condition narrows the search: every stored record must be
    /// decrypted. Refused unless the caller opts in.
    FullScan,
}
