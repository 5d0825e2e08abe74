use std::collections::HashMap;

use async_trait::async_trait;
use ledger_core::{CoreResult, Role, Scope, UserId};
use parking_lot::Mutex;

use crate::{Membership, MembershipStore};
use crate::projects::{Project, ProjectStore};

#[derive(Default)]
pub struct MemoryProjectStore {
    projects: Mutex<HashMap<(uuid::Uuid, uuid::Uuid), Project>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn create(&self, project: Project) -> CoreResult<()> {
        let key = (project.tenant_id.as_uuid(), project.project_id.as_uuid());
        self.projects.lock().insert(key, project);
        Ok(())
    }

    async fn exists(&self, scope: &Scope) -> CoreResult<bool> {
        let key = (scope.tenant_id.as_uuid(), scope.project_id.as_uuid());
        Ok(self.projects.lock().contains_key(&key))
    }
}

#[derive(Default)]
pub struct MemoryMembershipStore {
    rows: Mutex<HashMap<(uuid::Uuid, uuid::Uuid, uuid::Uuid), Role>>,
}

impl MemoryMembershipStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(scope: &Scope, user_id: UserId) -> (uuid::Uuid, uuid::Uuid, uuid::Uuid) {
    (scope.tenant_id.as_uuid(), scope.project_id.as_uuid(), user_id.as_uuid())
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn role_for(&self, scope: &Scope, user_id: UserId) -> CoreResult<Option<Role>> {
        Ok(self.rows.lock().get(&key(scope, user_id)).copied())
    }

    async fn add_member(&self, scope: &Scope, user_id: UserId, role: Role) -> CoreResult<()> {
        self.rows.lock().insert(key(scope, user_id), role);
        Ok(())
    }

    async fn remove_member(&self, scope: &Scope, user_id: UserId) -> CoreResult<()> {
        self.rows.lock().remove(&key(scope, user_id));
        Ok(())
    }

    async fn list_members(&self, scope: &Scope) -> CoreResult<Vec<Membership>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|((t, p, _), _)| *t == scope.tenant_id.as_uuid() && *p == scope.project_id.as_uuid())
            .map(|((_, _, u), role)| Membership {
                scope: *scope,
                user_id: UserId::from_uuid(*u),
                role: *role,
            })
            .collect())
    }

    async fn owner_count(&self, scope: &Scope) -> CoreResult<usize> {
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|((t, p, _), role)| {
                *t == scope.tenant_id.as_uuid() && *p == scope.project_id.as_uuid() && **role == Role::Owner
            })
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::TenantId;

    #[tokio::test]
    async fn unknown_user_resolves_to_none_not_an_error() {
        let store = MemoryMembershipStore::new();
        let scope = Scope::new(TenantId::new(), ledger_core::ProjectId::new());
        assert_eq!(store.role_for(&scope, UserId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn owner_count_scoped_per_project() {
        let store = MemoryMembershipStore::new();
        let scope_a = Scope::new(TenantId::new(), ledger_core::ProjectId::new());
        let scope_b = Scope::new(TenantId::new(), ledger_core::ProjectId::new());
        store.add_member(&scope_a, UserId::new(), Role::Owner).await.unwrap();
        store.add_member(&scope_b, UserId::new(), Role::Owner).await.unwrap();
        assert_eq!(store.owner_count(&scope_a).await.unwrap(), 1);
    }
}
