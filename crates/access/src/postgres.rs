use async_trait::async_trait;
use ledger_core::{CoreError, CoreResult, Role, Scope, UserId};
use sqlx::{PgPool, Row};

use crate::projects::{Project, ProjectStore};
use crate::{Membership, MembershipStore};

#[derive(Clone)]
pub struct PgProjectStore {
    pool: PgPool,
}

impl PgProjectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn create(&self, project: Project) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO projects (tenant_id, project_id, name, created_at, created_by) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(project.tenant_id.as_uuid())
        .bind(project.project_id.as_uuid())
        .bind(project.name)
        .bind(project.created_at)
        .bind(project.created_by.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn exists(&self, scope: &Scope) -> CoreResult<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM projects WHERE tenant_id = $1 AND project_id = $2")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        Ok(row.is_some())
    }
}

#[derive(Clone)]
pub struct PgMembershipStore {
    pool: PgPool,
}

impl PgMembershipStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("schema.sql")).execute(&self.pool).await?;
        Ok(())
    }
}

fn internal<E: std::error::Error + Send + Sync + 'static>(e: E) -> CoreError {
    CoreError::Internal(e.into())
}

fn role_from_str(s: &str) -> CoreResult<Role> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(internal)
}

fn role_to_str(role: Role) -> String {
    serde_json::to_value(role).unwrap().as_str().unwrap().to_string()
}

#[async_trait]
impl MembershipStore for PgMembershipStore {
    async fn role_for(&self, scope: &Scope, user_id: UserId) -> CoreResult<Option<Role>> {
        let row = sqlx::query("SELECT role FROM memberships WHERE tenant_id = $1 AND project_id = $2 AND user_id = $3")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(|r| role_from_str(r.get::<String, _>("role").as_str())).transpose()
    }

    async fn add_member(&self, scope: &Scope, user_id: UserId, role: Role) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO memberships (tenant_id, project_id, user_id, role) VALUES ($1, $2, $3, $4)",
        )
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(role_to_str(role))
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn remove_member(&self, scope: &Scope, user_id: UserId) -> CoreResult<()> {
        sqlx::query("DELETE FROM memberships WHERE tenant_id = $1 AND project_id = $2 AND user_id = $3")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn list_members(&self, scope: &Scope) -> CoreResult<Vec<Membership>> {
        let rows = sqlx::query("SELECT user_id, role FROM memberships WHERE tenant_id = $1 AND project_id = $2")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter()
            .map(|r| {
                Ok(Membership {
                    scope: *scope,
                    user_id: UserId::from_uuid(r.get("user_id")),
                    role: role_from_str(r.get::<String, _>("role").as_str())?,
                })
            })
            .collect()
    }

    async fn owner_count(&self, scope: &Scope) -> CoreResult<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM memberships WHERE tenant_id = $1 AND project_id = $2 AND role = 'owner'",
        )
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}
