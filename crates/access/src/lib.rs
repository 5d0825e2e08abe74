//! # ledger-access
//!
//! The Access Guard: resolves an [`AuthContext`] from an ambient identity
//! the caller cannot forge — never from anything in a request body — and
//! enforces membership and role requirements against it. `ledger-http`
//! calls [`resolve`] once per request, before any operation in
//! `ledger-engine` runs.

pub mod memory;
pub mod postgres;
pub mod projects;

use async_trait::async_trait;
use ledger_core::{AuthContext, CoreError, CoreResult, Role, Scope, UserId};

pub use memory::{MemoryMembershipStore, MemoryProjectStore};
pub use postgres::{PgMembershipStore, PgProjectStore};
pub use projects::{init_project, my_role, Project, ProjectStore};

/// Who is making the call, established by the transport layer (an HTTP
/// bearer token, a bot shared secret) before the Access Guard ever runs.
/// Never constructed from request body fields.
#[derive(Debug, Clone, Copy)]
pub enum Identity {
    Operator(UserId),
    Bot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub scope: Scope,
    pub user_id: UserId,
    pub role: Role,
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn role_for(&self, scope: &Scope, user_id: UserId) -> CoreResult<Option<Role>>;
    async fn add_member(&self, scope: &Scope, user_id: UserId, role: Role) -> CoreResult<()>;
    async fn remove_member(&self, scope: &Scope, user_id: UserId) -> CoreResult<()>;
    async fn list_members(&self, scope: &Scope) -> CoreResult<Vec<Membership>>;
    async fn owner_count(&self, scope: &Scope) -> CoreResult<usize>;
}

/// Resolves an [`Identity`] plus the `(tenant_id, project_id)` the caller is
/// addressing into an [`AuthContext`]. A caller with no membership row gets
/// `NotFound`, not `Forbidden` — so probing a project id a tenant doesn't
/// belong to reveals nothing about whether that project exists.
pub async fn resolve(
    store: &dyn MembershipStore,
    scope: Scope,
    identity: Identity,
) -> CoreResult<AuthContext> {
    match identity {
        Identity::Bot => Ok(AuthContext {
            user_id: None,
            tenant_id: scope.tenant_id,
            project_id: scope.project_id,
            role: Role::Bot,
        }),
        Identity::Operator(user_id) => {
            let role = store
                .role_for(&scope, user_id)
                .await?
                .ok_or(CoreError::NotFound)?;
            Ok(AuthContext {
                user_id: Some(user_id),
                tenant_id: scope.tenant_id,
                project_id: scope.project_id,
                role,
            })
        }
    }
}

/// Adds `user_id` as a project member, rejecting a duplicate rather than
/// silently upgrading/downgrading their role — a caller who wants to change
/// a role should remove then re-add, so intent is explicit in the log.
pub async fn add_member(
    store: &dyn MembershipStore,
    scope: &Scope,
    user_id: UserId,
    role: Role,
) -> CoreResult<()> {
    if store.role_for(scope, user_id).await?.is_some() {
        return Err(CoreError::DuplicateMember);
    }
    store.add_member(scope, user_id, role).await
}

/// Removes a member, refusing to drop the last `Owner` of a project so a
/// project can never end up with no one who can manage membership.
pub async fn remove_member(store: &dyn MembershipStore, scope: &Scope, user_id: UserId) -> CoreResult<()> {
    let role = store.role_for(scope, user_id).await?.ok_or(CoreError::NotFound)?;
    if role == Role::Owner && store.owner_count(scope).await? <= 1 {
        return Err(CoreError::CannotRemoveLastOwner);
    }
    store.remove_member(scope, user_id).await
}
