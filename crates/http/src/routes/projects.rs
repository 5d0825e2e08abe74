use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use ledger_core::{ProjectId, Role, Scope, TenantId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{resolve_operator, resolve_scoped};
use crate::error::ApiResult;
use crate::state::AppState;

fn scope_of(tenant_id: Uuid, project_id: Uuid) -> Scope {
    Scope::new(TenantId::from_uuid(tenant_id), ProjectId::from_uuid(project_id))
}

#[derive(Debug, Deserialize)]
pub struct InitProjectBody {
    name: String,
}

pub async fn init_project(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<InitProjectBody>,
) -> ApiResult<()> {
    let caller = resolve_operator(&state, &headers)?;
    ledger_access::init_project(
        state.projects.as_ref(),
        state.members.as_ref(),
        scope_of(tenant_id, project_id),
        body.name,
        caller,
        Utc::now(),
    )
    .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct AddMemberBody {
    user_id: Uuid,
    role: Role,
}

pub async fn add_member(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddMemberBody>,
) -> ApiResult<()> {
    let scope = scope_of(tenant_id, project_id);
    let auth = resolve_scoped(&state, &headers, scope).await?;
    auth.require(&[Role::Owner])?;
    ledger_access::add_member(state.members.as_ref(), &scope, UserId::from_uuid(body.user_id), body.role).await?;
    Ok(())
}

pub async fn remove_member(
    Path((tenant_id, project_id, user_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<()> {
    let scope = scope_of(tenant_id, project_id);
    let auth = resolve_scoped(&state, &headers, scope).await?;
    auth.require(&[Role::Owner])?;
    ledger_access::remove_member(state.members.as_ref(), &scope, UserId::from_uuid(user_id)).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct MemberView {
    user_id: UserId,
    role: Role,
}

pub async fn list_members(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<MemberView>>> {
    let scope = scope_of(tenant_id, project_id);
    let _auth = resolve_scoped(&state, &headers, scope).await?;
    let members = state.members.list_members(&scope).await?;
    Ok(Json(
        members
            .into_iter()
            .map(|m| MemberView { user_id: m.user_id, role: m.role })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct MyRoleResponse {
    role: Role,
}

pub async fn my_role(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<MyRoleResponse>> {
    let scope = scope_of(tenant_id, project_id);
    let auth = resolve_scoped(&state, &headers, scope).await?;
    Ok(Json(MyRoleResponse { role: auth.role }))
}
