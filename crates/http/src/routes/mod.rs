pub mod admission;
pub mod artifacts;
pub mod decisions;
pub mod health;
pub mod projects;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

const SCOPE: &str = "/v1/tenants/{tenant_id}/projects/{project_id}";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route(SCOPE, post(projects::init_project))
        .route(
            &format!("{SCOPE}/members"),
            get(projects::list_members).post(projects::add_member),
        )
        .route(&format!("{SCOPE}/members/{{user_id}}"), delete(projects::remove_member))
        .route(&format!("{SCOPE}/me"), get(projects::my_role))
        .route(&format!("{SCOPE}/commands"), post(admission::request_command))
        .route(&format!("{SCOPE}/cards"), post(admission::create_card))
        .route(&format!("{SCOPE}/artifacts"), post(artifacts::report_artifact))
        .route(&format!("{SCOPE}/artifacts/{{artifact_id}}"), get(artifacts::get_artifact))
        .route(&format!("{SCOPE}/runs/{{run_id}}/artifacts"), get(artifacts::artifacts_for_run))
        .route(
            &format!("{SCOPE}/commands/{{command_id}}/artifacts"),
            get(artifacts::artifacts_for_command),
        )
        .route(
            &format!("{SCOPE}/decisions"),
            get(decisions::pending_decisions).post(decisions::request_decision),
        )
        .route(&format!("{SCOPE}/decisions/{{decision_id}}"), get(decisions::decision_detail))
        .route(
            &format!("{SCOPE}/decisions/{{decision_id}}/claim"),
            post(decisions::claim_decision),
        )
        .route(
            &format!("{SCOPE}/decisions/{{decision_id}}/renew"),
            post(decisions::renew_claim),
        )
        .route(
            &format!("{SCOPE}/decisions/{{decision_id}}/render"),
            post(decisions::render_decision),
        )
        .route(
            &format!("{SCOPE}/decisions/{{decision_id}}/await"),
            get(decisions::await_decision),
        )
        .with_state(state)
}
