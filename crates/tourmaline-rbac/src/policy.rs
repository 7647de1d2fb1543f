//! The data-driven permission table and the access decision procedure.
//!
//! Access rules are rows in a table, not branches in code: adding a role or
//! changing a grant touches configuration, never the decision procedure.
//! A missing `(role, action)` row denies.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tourmaline_policy::FieldGroup;
use tourmaline_types::{Action, ResourceRef};

use crate::roles::{Actor, Role};
use crate::{RbacError, Result};

/// Outcome of an access check.
///
/// A grant carries the field groups the result may expose. Actions that
/// return no field data (delete, authenticate) grant with an empty set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessDecision {
    Granted { groups: BTreeSet<FieldGroup> },
    Denied,
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted { .. })
    }

    /// Field groups the caller may see; `None` when denied.
    pub fn groups(&self) -> Option<&BTreeSet<FieldGroup>> {
        match self {
            AccessDecision::Granted { groups } => Some(groups),
            AccessDecision::Denied => None,
        }
    }
}

/// Grants for one `(role, action)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Grant {
    groups: BTreeSet<FieldGroup>,
}

/// Maps `(role, action)` to the field groups that pair may expose.
///
/// Absence of a row is denial. The table is immutable once built.
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    grants: BTreeMap<(Role, Action), Grant>,
}

impl PermissionTable {
    /// The built-in table. Mirrors the deployment default policy document;
    /// deployments override it by loading their own TOML.
    pub fn standard() -> Self {
        let mut table = Self::default();

        let all: BTreeSet<_> = FieldGroup::ALL.into();
        let clinical: BTreeSet<_> = [
            FieldGroup::Identifying,
            FieldGroup::Contact,
            FieldGroup::Clinical,
        ]
        .into();
        let reception: BTreeSet<_> = [FieldGroup::Identifying, FieldGroup::Contact].into();
        let billing: BTreeSet<_> = [FieldGroup::Identifying, FieldGroup::Financial].into();

        for action in Action::ALL {
            table.grant(Role::Admin, action, all.clone());
        }
        for action in [Action::Read, Action::Search, Action::Create, Action::Update] {
            table.grant(Role::Clinician, action, clinical.clone());
        }
        for action in [Action::Read, Action::Search, Action::Create] {
            table.grant(Role::FrontDesk, action, reception.clone());
        }
        table.grant(Role::FrontDesk, Action::Update, [FieldGroup::Contact].into());
        for action in [Action::Read, Action::Search] {
            table.grant(Role::Billing, action, billing.clone());
        }
        table.grant(Role::Billing, Action::Update, [FieldGroup::Financial].into());
        table.grant(Role::Auditor, Action::Export, all);

        // Every role may authenticate; the grant carries no field data.
        for role in Role::ALL {
            table.grant(role, Action::Authenticate, BTreeSet::new());
        }

        table
    }

    /// Loads a table from a TOML permission document:
    ///
    /// ```toml
    /// [[grant]]
    /// role = "front-desk"
    /// actions = ["read", "search", "create"]
    /// groups = ["identifying", "contact"]
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Document {
            #[serde(default)]
            grant: Vec<GrantEntry>,
        }

        #[derive(Deserialize)]
        struct GrantEntry {
            role: Role,
            actions: Vec<Action>,
            #[serde(default)]
            groups: BTreeSet<FieldGroup>,
        }

        let document: Document = toml::from_str(input)?;
        let mut table = Self::default();
        for entry in document.grant {
            if entry.actions.is_empty() {
                return Err(RbacError::InvalidGrant(format!(
                    "grant for role '{}' lists no actions",
                    entry.role
                )));
            }
            for action in entry.actions {
                table.grant(entry.role, action, entry.groups.clone());
            }
        }
        tracing::debug!(rows = table.grants.len(), "permission table loaded");
        Ok(table)
    }

    fn grant(&mut self, role: Role, action: Action, groups: BTreeSet<FieldGroup>) {
        // Repeated grants for the same pair union rather than replace.
        self.grants
            .entry((role, action))
            .or_default()
            .groups
            .extend(groups);
    }

    /// The grant for one `(role, action)` pair, if the table has a row.
    fn lookup(&self, role: Role, action: Action) -> Option<&Grant> {
        self.grants.get(&(role, action))
    }
}

/// Field groups a subject may read on their own record.
const SELF_READABLE: [FieldGroup; 4] = FieldGroup::ALL;

/// Field groups a subject may update on their own record. Deliberately
/// narrower than readable: clinical and financial entries change only
/// through staff.
const SELF_EDITABLE: [FieldGroup; 1] = [FieldGroup::Contact];

/// The pure access decision procedure.
///
/// Holds the permission table and nothing else; the same inputs always
/// produce the same decision.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicyEngine {
    table: PermissionTable,
}

impl AccessPolicyEngine {
    pub fn new(table: PermissionTable) -> Self {
        Self { table }
    }

    pub fn standard() -> Self {
        Self::new(PermissionTable::standard())
    }

    /// Decides whether `actor` may perform `action` on `resource`.
    ///
    /// Role grants union across the actor's roles. Subjects of the record
    /// get an additional self-access grant regardless of role, read wide and
    /// update narrow. Everything else denies.
    pub fn check_access(
        &self,
        actor: &Actor,
        action: Action,
        resource: &ResourceRef,
    ) -> AccessDecision {
        let mut granted = false;
        let mut groups: BTreeSet<FieldGroup> = BTreeSet::new();

        for role in &actor.roles {
            if let Some(grant) = self.table.lookup(*role, action) {
                granted = true;
                groups.extend(grant.groups.iter().copied());
            }
        }

        if actor.is_subject_of(&resource.resource_id) {
            match action {
                Action::Read => {
                    granted = true;
                    groups.extend(SELF_READABLE);
                }
                Action::Update => {
                    granted = true;
                    groups.extend(SELF_EDITABLE);
                }
                _ => {}
            }
        }

        if granted {
            AccessDecision::Granted { groups }
        } else {
            AccessDecision::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn engine() -> AccessPolicyEngine {
        AccessPolicyEngine::standard()
    }

    fn resource() -> ResourceRef {
        ResourceRef::new("patient", "rec-1")
    }

    fn check(roles: &[Role], action: Action) -> AccessDecision {
        engine().check_access(&Actor::new("staff-1", roles.to_vec()), action, &resource())
    }

    #[test_case(Action::Read ; "read")]
    #[test_case(Action::Search ; "search")]
    #[test_case(Action::Create ; "create")]
    #[test_case(Action::Update ; "update")]
    #[test_case(Action::Delete ; "delete")]
    #[test_case(Action::Export ; "export")]
    fn test_admin_granted_everything(action: Action) {
        let decision = check(&[Role::Admin], action);
        let AccessDecision::Granted { groups } = decision else {
            panic!("admin must be granted {action}");
        };
        assert_eq!(groups.len(), FieldGroup::ALL.len());
    }

    #[test]
    fn test_front_desk_never_sees_financial_or_clinical() {
        let AccessDecision::Granted { groups } = check(&[Role::FrontDesk], Action::Read) else {
            panic!("front desk may read");
        };
        assert!(groups.contains(&FieldGroup::Identifying));
        assert!(groups.contains(&FieldGroup::Contact));
        assert!(!groups.contains(&FieldGroup::Clinical));
        assert!(!groups.contains(&FieldGroup::Financial));
    }

    #[test_case(Role::FrontDesk, Action::Delete ; "front desk delete")]
    #[test_case(Role::FrontDesk, Action::Export ; "front desk export")]
    #[test_case(Role::Clinician, Action::Delete ; "clinician delete")]
    #[test_case(Role::Clinician, Action::Export ; "clinician export")]
    #[test_case(Role::Billing, Action::Create ; "billing create")]
    #[test_case(Role::Billing, Action::Delete ; "billing delete")]
    #[test_case(Role::Auditor, Action::Read ; "auditor read")]
    #[test_case(Role::Auditor, Action::Update ; "auditor update")]
    #[test_case(Role::Auditor, Action::Delete ; "auditor delete")]
    fn test_unmapped_pairs_deny(role: Role, action: Action) {
        assert_eq!(check(&[role], action), AccessDecision::Denied);
    }

    #[test]
    fn test_standard_table_exhaustive_outcomes() {
        // Every (role, action) pair, granted iff listed here.
        let granted: &[(Role, Action)] = &[
            (Role::Admin, Action::Read),
            (Role::Admin, Action::Search),
            (Role::Admin, Action::Create),
            (Role::Admin, Action::Update),
            (Role::Admin, Action::Delete),
            (Role::Admin, Action::Export),
            (Role::Clinician, Action::Read),
            (Role::Clinician, Action::Search),
            (Role::Clinician, Action::Create),
            (Role::Clinician, Action::Update),
            (Role::FrontDesk, Action::Read),
            (Role::FrontDesk, Action::Search),
            (Role::FrontDesk, Action::Create),
            (Role::FrontDesk, Action::Update),
            (Role::Billing, Action::Read),
            (Role::Billing, Action::Search),
            (Role::Billing, Action::Update),
            (Role::Auditor, Action::Export),
        ];

        for role in Role::ALL {
            for action in Action::ALL {
                let expected =
                    action == Action::Authenticate || granted.contains(&(role, action));
                assert_eq!(
                    check(&[role], action).is_granted(),
                    expected,
                    "unexpected outcome for ({role}, {action})"
                );
            }
        }
    }

    #[test]
    fn test_clinician_sees_clinical_not_financial() {
        let AccessDecision::Granted { groups } = check(&[Role::Clinician], Action::Read) else {
            panic!("clinician may read");
        };
        assert!(groups.contains(&FieldGroup::Clinical));
        assert!(!groups.contains(&FieldGroup::Financial));
    }

    #[test]
    fn test_multi_role_unions_groups() {
        // Clinician + billing together see clinical and financial.
        let AccessDecision::Granted { groups } =
            check(&[Role::Clinician, Role::Billing], Action::Read)
        else {
            panic!("multi-role actor may read");
        };
        assert!(groups.contains(&FieldGroup::Clinical));
        assert!(groups.contains(&FieldGroup::Financial));
        assert!(groups.contains(&FieldGroup::Identifying));
    }

    #[test]
    fn test_subject_role_alone_grants_nothing() {
        // The subject role is inert without a resource binding.
        assert_eq!(check(&[Role::Subject], Action::Read), AccessDecision::Denied);
    }

    #[test]
    fn test_no_roles_denied() {
        assert_eq!(check(&[], Action::Read), AccessDecision::Denied);
    }

    #[test]
    fn test_subject_reads_own_record() {
        let actor = Actor::new("pat-1", []).bound_to("rec-1");
        let decision = engine().check_access(&actor, Action::Read, &resource());
        let AccessDecision::Granted { groups } = decision else {
            panic!("subject may read own record");
        };
        assert_eq!(groups.len(), FieldGroup::ALL.len());
    }

    #[test]
    fn test_subject_update_is_contact_only() {
        let actor = Actor::new("pat-1", []).bound_to("rec-1");
        let decision = engine().check_access(&actor, Action::Update, &resource());
        let AccessDecision::Granted { groups } = decision else {
            panic!("subject may update own contact data");
        };
        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec![FieldGroup::Contact]);
    }

    #[test_case(Action::Search ; "search")]
    #[test_case(Action::Delete ; "delete")]
    #[test_case(Action::Export ; "export")]
    fn test_subject_grant_covers_read_and_update_only(action: Action) {
        let actor = Actor::new("pat-1", []).bound_to("rec-1");
        assert_eq!(
            engine().check_access(&actor, action, &resource()),
            AccessDecision::Denied
        );
    }

    #[test]
    fn test_subject_grant_does_not_extend_to_other_records() {
        let actor = Actor::new("pat-1", []).bound_to("rec-1");
        let other = ResourceRef::new("patient", "rec-2");
        assert_eq!(
            engine().check_access(&actor, Action::Read, &other),
            AccessDecision::Denied
        );
    }

    #[test]
    fn test_subject_grant_unions_with_role_grant() {
        // A front-desk employee reading their own record sees everything,
        // not just the front-desk groups.
        let actor = Actor::new("staff-9", [Role::FrontDesk]).bound_to("rec-1");
        let AccessDecision::Granted { groups } =
            engine().check_access(&actor, Action::Read, &resource())
        else {
            panic!("grant expected");
        };
        assert!(groups.contains(&FieldGroup::Clinical));
        assert!(groups.contains(&FieldGroup::Financial));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let actor = Actor::new("staff-1", [Role::Billing, Role::Clinician]);
        let first = engine().check_access(&actor, Action::Read, &resource());
        for _ in 0..8 {
            assert_eq!(engine().check_access(&actor, Action::Read, &resource()), first);
        }
    }

    #[test]
    fn test_table_from_toml() {
        let table = PermissionTable::from_toml_str(
            r#"
            [[grant]]
            role = "front-desk"
            actions = ["read"]
            groups = ["contact"]

            [[grant]]
            role = "front-desk"
            actions = ["read"]
            groups = ["identifying"]
            "#,
        )
        .unwrap();

        let engine = AccessPolicyEngine::new(table);
        let actor = Actor::new("staff-1", [Role::FrontDesk]);
        let AccessDecision::Granted { groups } =
            engine.check_access(&actor, Action::Read, &resource())
        else {
            panic!("grant expected");
        };
        // Repeated rows for a pair union their groups.
        assert!(groups.contains(&FieldGroup::Contact));
        assert!(groups.contains(&FieldGroup::Identifying));
        assert_eq!(
            engine.check_access(&actor, Action::Search, &resource()),
            AccessDecision::Denied
        );
    }

    #[test]
    fn test_toml_grant_without_actions_rejected() {
        let result = PermissionTable::from_toml_str(
            r#"
            [[grant]]
            role = "billing"
            actions = []
            groups = ["financial"]
            "#,
        );
        assert!(matches!(result, Err(RbacError::InvalidGrant(_))));
    }

    #[test]
    fn test_toml_unknown_role_rejected() {
        let result = PermissionTable::from_toml_str(
            r#"
            [[grant]]
            role = "superuser"
            actions = ["read"]
            "#,
        );
        assert!(matches!(result, Err(RbacError::Parse(_))));
    }
}
