use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use ledger_core::decision::Urgency;
use ledger_core::{CoreError, DecisionId, ProjectId, Scope, TenantId};
use ledger_engine::decisions;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::resolve_scoped;
use crate::error::ApiResult;
use crate::state::AppState;

fn scope_of(tenant_id: Uuid, project_id: Uuid) -> Scope {
    Scope::new(TenantId::from_uuid(tenant_id), ProjectId::from_uuid(project_id))
}

pub async fn request_decision(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<decisions::RequestDecisionInput>,
) -> ApiResult<Json<DecisionId>> {
    let auth = resolve_scoped(&state, &headers, scope_of(tenant_id, project_id)).await?;
    let decision_id =
        decisions::request_decision(state.ledger.as_ref(), &auth, &state.producer, Utc::now(), input).await?;
    Ok(Json(decision_id))
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    urgency: Option<Urgency>,
}

pub async fn pending_decisions(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<PendingQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ledger_core::Decision>>> {
    let auth = resolve_scoped(&state, &headers, scope_of(tenant_id, project_id)).await?;
    let decisions = decisions::pending_decisions(state.ledger.as_ref(), &auth, query.urgency).await?;
    Ok(Json(decisions))
}

pub async fn decision_detail(
    Path((tenant_id, project_id, decision_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<decisions::DecisionDetail>> {
    let auth = resolve_scoped(&state, &headers, scope_of(tenant_id, project_id)).await?;
    let detail = decisions::decision_detail(
        state.ledger.as_ref(),
        state.ledger.events(),
        &auth,
        DecisionId::from_uuid(decision_id),
    )
    .await?
    .ok_or(CoreError::NotFound)?;
    Ok(Json(detail))
}

pub async fn claim_decision(
    Path((tenant_id, project_id, decision_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ledger_core::ClaimOutcome>> {
    let auth = resolve_scoped(&state, &headers, scope_of(tenant_id, project_id)).await?;
    let outcome = decisions::claim_decision(
        state.ledger.as_ref(),
        &auth,
        &state.producer,
        Utc::now(),
        state.config.claim_ttl(),
        DecisionId::from_uuid(decision_id),
    )
    .await?;
    Ok(Json(outcome))
}

#[derive(serde::Serialize)]
pub struct RenewResponse {
    claimed_until: chrono::DateTime<Utc>,
}

pub async fn renew_claim(
    Path((tenant_id, project_id, decision_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<RenewResponse>> {
    let auth = resolve_scoped(&state, &headers, scope_of(tenant_id, project_id)).await?;
    let claimed_until = decisions::renew_claim(
        state.ledger.as_ref(),
        &auth,
        Utc::now(),
        state.config.claim_ttl(),
        DecisionId::from_uuid(decision_id),
    )
    .await?;
    Ok(Json(RenewResponse { claimed_until }))
}

#[derive(Debug, Deserialize)]
pub struct RenderBody {
    option_key: String,
    note: Option<String>,
}

pub async fn render_decision(
    Path((tenant_id, project_id, decision_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RenderBody>,
) -> ApiResult<Json<ledger_core::RenderOutcome>> {
    let auth = resolve_scoped(&state, &headers, scope_of(tenant_id, project_id)).await?;
    let outcome = decisions::render_decision(
        state.ledger.as_ref(),
        &auth,
        &state.producer,
        Utc::now(),
        DecisionId::from_uuid(decision_id),
        &body.option_key,
        body.note,
    )
    .await?;
    Ok(Json(outcome))
}

pub async fn await_decision(
    Path((tenant_id, project_id, decision_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ledger_core::decision::AwaitDecisionSnapshot>> {
    let auth = resolve_scoped(&state, &headers, scope_of(tenant_id, project_id)).await?;
    let snapshot =
        decisions::await_decision(state.ledger.as_ref(), &auth, DecisionId::from_uuid(decision_id)).await?;
    Ok(Json(snapshot))
}
