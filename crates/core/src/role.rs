use serde::{Deserialize, Serialize};

/// A project membership role. `Owner` is a superset of every other role —
/// the Access Guard never needs `Owner` listed explicitly in an operation's
/// required-role set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Operator,
    Viewer,
    Bot,
}

impl Role {
    /// Whether `self` satisfies a required role set, given that `Owner`
    /// always satisfies any requirement.
    pub fn satisfies(self, required: &[Role]) -> bool {
        self == Role::Owner || required.contains(&self)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Owner => "owner",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
            Role::Bot => "bot",
        };
        write!(f, "{s}")
    }
}

/// The resolved identity of a caller, produced once by the Access Guard and
/// passed to handlers. Handlers must never reconstruct this from request
/// parameters — caller identity is derived from ambient auth, never from
/// inputs. `user_id` is `None` only for `Role::Bot`, which authenticates
/// with a shared secret rather than a membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Option<crate::ids::UserId>,
    pub tenant_id: crate::ids::TenantId,
    pub project_id: crate::ids::ProjectId,
    pub role: Role,
}

impl AuthContext {
    pub fn scope(&self) -> crate::ids::Scope {
        crate::ids::Scope::new(self.tenant_id, self.project_id)
    }

    pub fn require(&self, required: &[Role]) -> Result<(), crate::error::CoreError> {
        if self.role.satisfies(required) {
            Ok(())
        } else {
            Err(crate::error::CoreError::InsufficientPermissions {
                required: required.to_vec(),
                actual: self.role,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_satisfies_any_requirement() {
        assert!(Role::Owner.satisfies(&[Role::Bot]));
        assert!(Role::Owner.satisfies(&[]));
    }

    #[test]
    fn non_owner_requires_membership_in_set() {
        assert!(Role::Operator.satisfies(&[Role::Operator, Role::Owner]));
        assert!(!Role::Viewer.satisfies(&[Role::Operator]));
    }
}
