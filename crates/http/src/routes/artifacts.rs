use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use ledger_core::{ArtifactId, CommandId, ProjectId, RunId, Scope, TenantId};
use ledger_engine::artifacts;
use uuid::Uuid;

use crate::auth::resolve_scoped;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn report_artifact(
    Path((tenant_id, project_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<artifacts::ReportArtifactInput>,
) -> ApiResult<Json<artifacts::ReportArtifactOutput>> {
    let scope = Scope::new(TenantId::from_uuid(tenant_id), ProjectId::from_uuid(project_id));
    let auth = resolve_scoped(&state, &headers, scope).await?;
    let output = artifacts::report_artifact(
        state.ledger.as_ref(),
        state.blobs.as_ref(),
        &auth,
        &state.producer,
        Utc::now(),
        input,
    )
    .await?;
    Ok(Json(output))
}

pub async fn get_artifact(
    Path((tenant_id, project_id, artifact_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Option<ledger_core::Artifact>>> {
    let scope = Scope::new(TenantId::from_uuid(tenant_id), ProjectId::from_uuid(project_id));
    let auth = resolve_scoped(&state, &headers, scope).await?;
    let artifact = artifacts::get_artifact(state.ledger.as_ref(), &auth, ArtifactId::from_uuid(artifact_id)).await?;
    Ok(Json(artifact))
}

pub async fn artifacts_for_run(
    Path((tenant_id, project_id, run_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ledger_core::Artifact>>> {
    let scope = Scope::new(TenantId::from_uuid(tenant_id), ProjectId::from_uuid(project_id));
    let auth = resolve_scoped(&state, &headers, scope).await?;
    let artifacts = artifacts::artifacts_for_run(state.ledger.as_ref(), &auth, RunId::from_uuid(run_id)).await?;
    Ok(Json(artifacts))
}

pub async fn artifacts_for_command(
    Path((tenant_id, project_id, command_id)): Path<(Uuid, Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<ledger_core::Artifact>>> {
    let scope = Scope::new(TenantId::from_uuid(tenant_id), ProjectId::from_uuid(project_id));
    let auth = resolve_scoped(&state, &headers, scope).await?;
    let artifacts =
        artifacts::artifacts_for_command(state.ledger.as_ref(), &auth, CommandId::from_uuid(command_id)).await?;
    Ok(Json(artifacts))
}
