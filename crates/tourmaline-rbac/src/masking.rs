//! Field-visibility masking.
//!
//! Once an action is granted, the result must still not expose fields
//! outside the decision's group set. Masking removes them silently: the
//! caller cannot tell a masked field from a field that was never stored,
//! so field existence itself leaks nothing.

use std::collections::BTreeSet;

use tourmaline_policy::{FieldGroup, FieldPolicyRegistry};
use tourmaline_types::{EntityType, FieldMap};

/// Retains only the fields of `record` whose policy group is in `groups`.
///
/// Fields with no registered policy are dropped too: an unmanaged field is
/// treated exactly like a not-permitted one.
pub fn mask_fields(
    registry: &FieldPolicyRegistry,
    entity: &EntityType,
    groups: &BTreeSet<FieldGroup>,
    mut record: FieldMap,
) -> FieldMap {
    record.retain(|field, _| {
        registry
            .get(entity, field)
            .is_some_and(|policy| groups.contains(&policy.group))
    });
    record
}
