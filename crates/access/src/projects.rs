//! Project registry: the non-event-sourced `projects` table. Projects and
//! memberships are administrative state, not facts in the coordination
//! log — there is no `ProjectCreated` event type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{CoreError, CoreResult, ProjectId, Role, Scope, TenantId, UserId};

use crate::MembershipStore;

#[derive(Debug, Clone)]
pub struct Project {
    pub tenant_id: TenantId,
    pub project_id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create(&self, project: Project) -> CoreResult<()>;
    async fn exists(&self, scope: &Scope) -> CoreResult<bool>;
}

/// `init_project` — any authenticated caller may create a project that does
/// not yet exist; they become its first `owner`.
pub async fn init_project(
    projects: &dyn ProjectStore,
    members: &dyn MembershipStore,
    scope: Scope,
    name: String,
    created_by: UserId,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    if projects.exists(&scope).await? {
        return Err(CoreError::ProjectExists);
    }
    projects
        .create(Project {
            tenant_id: scope.tenant_id,
            project_id: scope.project_id,
            name,
            created_at: now,
            created_by,
        })
        .await?;
    members.add_member(&scope, created_by, Role::Owner).await
}

/// `my_role` — any member. Distinct from [`crate::resolve`] because a
/// caller asking "what's my role" already has an `AuthContext`; this is a
/// convenience accessor for a UI to render, not an auth check itself.
pub async fn my_role(members: &dyn MembershipStore, scope: &Scope, user_id: UserId) -> CoreResult<Role> {
    members.role_for(scope, user_id).await?.ok_or(CoreError::NotAMember)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMembershipStore, MemoryProjectStore};

    #[tokio::test]
    async fn init_project_makes_creator_the_first_owner() {
        let projects = MemoryProjectStore::new();
        let members = MemoryMembershipStore::new();
        let scope = Scope::new(TenantId::new(), ProjectId::new());
        let owner = UserId::new();

        init_project(&projects, &members, scope, "demo".into(), owner, Utc::now())
            .await
            .unwrap();

        assert_eq!(my_role(&members, &scope, owner).await.unwrap(), Role::Owner);
    }

    #[tokio::test]
    async fn init_project_rejects_a_scope_already_in_use() {
        let projects = MemoryProjectStore::new();
        let members = MemoryMembershipStore::new();
        let scope = Scope::new(TenantId::new(), ProjectId::new());
        let owner = UserId::new();

        init_project(&projects, &members, scope, "demo".into(), owner, Utc::now())
            .await
            .unwrap();
        let second = init_project(&projects, &members, scope, "demo-again".into(), UserId::new(), Utc::now()).await;

        assert!(matches!(second, Err(CoreError::ProjectExists)));
    }

    #[tokio::test]
    async fn my_role_is_not_a_member_for_an_uninvolved_user() {
        let members = MemoryMembershipStore::new();
        let scope = Scope::new(TenantId::new(), ProjectId::new());

        assert!(matches!(
            my_role(&members, &scope, UserId::new()).await,
            Err(CoreError::NotAMember)
        ));
    }
}
