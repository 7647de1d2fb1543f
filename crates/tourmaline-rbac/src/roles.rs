//! Roles and authenticated actors.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tourmaline_types::{ActorId, ResourceId};

/// Organizational role of an actor.
///
/// Roles carry no permissions of their own; the permission table maps each
/// `(role, action)` pair to a field-group grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Operational administration, including record deletion.
    Admin,
    /// Treating staff: clinical plus identifying data.
    Clinician,
    /// Reception: scheduling and contact data, no clinical or financial.
    FrontDesk,
    /// Billing staff: financial plus identifying data.
    Billing,
    /// Compliance review: export access to the audit trail only.
    Auditor,
    /// The person a record is about. Carries no table grants of its own;
    /// all of its access flows from [`Actor::bound_resource_id`].
    Subject,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Clinician,
        Role::FrontDesk,
        Role::Billing,
        Role::Auditor,
        Role::Subject,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Clinician => "clinician",
            Role::FrontDesk => "front-desk",
            Role::Billing => "billing",
            Role::Auditor => "auditor",
            Role::Subject => "subject",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = crate::RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "clinician" => Ok(Role::Clinician),
            "front-desk" => Ok(Role::FrontDesk),
            "billing" => Ok(Role::Billing),
            "auditor" => Ok(Role::Auditor),
            "subject" => Ok(Role::Subject),
            other => Err(crate::RbacError::UnknownRole(other.to_string())),
        }
    }
}

/// An authenticated principal, as established by the identity layer.
///
/// Authentication itself happens upstream; by the time an [`Actor`] reaches
/// this crate its identity and role set are trusted facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_id: ActorId,
    pub roles: Vec<Role>,
    /// Resource this actor is the subject of, if any. Patients accessing
    /// their own record authenticate with this bound; staff leave it unset.
    pub bound_resource_id: Option<ResourceId>,
}

impl Actor {
    pub fn new(actor_id: impl Into<ActorId>, roles: impl Into<Vec<Role>>) -> Self {
        Self {
            actor_id: actor_id.into(),
            roles: roles.into(),
            bound_resource_id: None,
        }
    }

    /// Binds the actor to the record they are the subject of.
    #[must_use]
    pub fn bound_to(mut self, resource_id: impl Into<ResourceId>) -> Self {
        self.bound_resource_id = Some(resource_id.into());
        self
    }

    /// Whether this actor is the subject of the given resource. Exact id
    /// match only; no prefix or pattern forms.
    pub fn is_subject_of(&self, resource_id: &ResourceId) -> bool {
        self.bound_resource_id.as_ref() == Some(resource_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Role::Admin, "admin")]
    #[test_case(Role::Clinician, "clinician")]
    #[test_case(Role::FrontDesk, "front-desk")]
    #[test_case(Role::Billing, "billing")]
    #[test_case(Role::Auditor, "auditor")]
    #[test_case(Role::Subject, "subject")]
    fn test_role_name_roundtrip(role: Role, name: &str) {
        assert_eq!(role.as_str(), name);
        assert_eq!(name.parse::<Role>().unwrap(), role);
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(matches!(
            "superuser".parse::<Role>(),
            Err(crate::RbacError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_role_serde_kebab_case() {
        let json = serde_json::to_string(&Role::FrontDesk).unwrap();
        assert_eq!(json, "\"front-desk\"");
        assert_eq!(serde_json::from_str::<Role>(&json).unwrap(), Role::FrontDesk);
    }

    #[test]
    fn test_subject_binding_exact_match() {
        let actor = Actor::new("pat-7", [Role::FrontDesk]).bound_to("rec-7");
        assert!(actor.is_subject_of(&"rec-7".into()));
        assert!(!actor.is_subject_of(&"rec-70".into()));
        assert!(!actor.is_subject_of(&"rec".into()));

        let unbound = Actor::new("staff-1", [Role::Clinician]);
        assert!(!unbound.is_subject_of(&"rec-7".into()));
    }
}
