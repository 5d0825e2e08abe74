use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use ledger_core::{ProjectId, Scope, TenantId};
use ledger_engine::admission;
use uuid::Uuid;

use crate::auth::resolve_scoped;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn request_command(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<admission::RequestCommandInput>,
) -> ApiResult<Json<admission::RequestCommandOutput>> {
    let scope = Scope::new(TenantId::from_uuid(tenant_id), ProjectId::from_uuid(project_id));
    let auth = resolve_scoped(&state, &headers, scope).await?;
    let output = admission::request_command(state.ledger.as_ref(), &auth, &state.producer, Utc::now(), input).await?;
    Ok(Json(output))
}

pub async fn create_card(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<admission::CreateCardInput>,
) -> ApiResult<Json<ledger_core::Card>> {
    let scope = Scope::new(TenantId::from_uuid(tenant_id), ProjectId::from_uuid(project_id));
    let auth = resolve_scoped(&state, &headers, scope).await?;
    let card = admission::create_card(state.ledger.as_ref(), &auth, &state.producer, Utc::now(), input).await?;
    Ok(Json(card))
}
