//! The same seed scenarios as `seed_scenarios.rs`, re-run against real
//! Postgres-backed stores instead of the in-memory ones. `#[ignore]`d like
//! every other integration test in this workspace that needs a live
//! dependency; run with `cargo test -- --ignored` against a database named
//! by `DATABASE_URL`. Each test opens its own pool and runs migrations
//! against a fresh scope, so tests are independent even though they share
//! one database.

use chrono::Utc;
use ledger_access::{PgMembershipStore, PgProjectStore};
use ledger_core::command::CommandStatus;
use ledger_core::event::{CommandStarted, CommandSucceeded, SubjectIds};
use ledger_core::{AuthContext, CardState, EventBuilder, EventPayload, Role, RunId, Scope, TenantId, UserId};
use ledger_engine::{admission, Ledger, MemoryBlobStore, PgLedger};
use ledger_jobs::{FailureKind, JobQueue, JobStore, PgJobStore};
use ledger_testing::command_input;
use sqlx::PgPool;

async fn pg_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for Postgres-backed integration tests");
    PgPool::connect(&url).await.expect("connect to DATABASE_URL")
}

async fn fresh_scope(pool: &PgPool) -> (Scope, UserId) {
    let projects = PgProjectStore::new(pool.clone());
    let members = PgMembershipStore::new(pool.clone());
    members.migrate().await.expect("migrate access schema");

    let scope = Scope::new(TenantId::new(), ledger_core::ProjectId::new());
    let owner = UserId::new();
    ledger_access::init_project(&projects, &members, scope, "pg integration".into(), owner, Utc::now())
        .await
        .expect("init project");
    (scope, owner)
}

fn bot_auth(scope: Scope) -> AuthContext {
    AuthContext { user_id: None, tenant_id: scope.tenant_id, project_id: scope.project_id, role: Role::Bot }
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn happy_path_decision_against_postgres() {
    let pool = pg_pool().await;
    let ledger = PgLedger::new(pool.clone());
    ledger.migrate().await.expect("migrate event/projection schema");
    let blobs = MemoryBlobStore::new();
    let producer = ledger_core::Producer { service: "pg-integration".into(), version: "0".into() };

    let (scope, _owner) = fresh_scope(&pool).await;
    let bot = bot_auth(scope);
    let now = Utc::now();

    let correlation_id = ledger_core::CorrelationId::new();
    let output = admission::request_command(&ledger, &bot, &producer, now, command_input(correlation_id, "digest.compile", 30))
        .await
        .expect("request command");
    assert!(!output.deduplicated);

    let card = ledger.reads().get_card(&scope, output.card_id).await.unwrap().unwrap();
    assert_eq!(card.state, CardState::Ready);

    ledger_engine::cards::transition_card(
        &ledger,
        &bot,
        &producer,
        now,
        ledger_engine::cards::TransitionRequest {
            card_id: output.card_id,
            to: CardState::Running,
            reason: "run started".into(),
            correlation_id,
            causation_id: None,
            retry_at_ts: None,
        },
    )
    .await
    .expect("transition to running");

    let report = ledger_engine::artifacts::report_artifact(
        &ledger,
        &blobs,
        &bot,
        &producer,
        now,
        ledger_engine::artifacts::ReportArtifactInput {
            correlation_id,
            content: "hello from postgres".into(),
            encoding: ledger_core::Encoding::Utf8,
            media_type: "text/plain".into(),
            logical_name: "out.txt".into(),
            labels: None,
            command_id: Some(output.command_id),
            run_id: None,
            links: None,
        },
    )
    .await
    .expect("report artifact");
    assert!(!report.deduplicated);

    let again = ledger_engine::artifacts::report_artifact(
        &ledger,
        &blobs,
        &bot,
        &producer,
        now,
        ledger_engine::artifacts::ReportArtifactInput {
            correlation_id,
            content: "hello from postgres".into(),
            encoding: ledger_core::Encoding::Utf8,
            media_type: "text/plain".into(),
            logical_name: "out.txt".into(),
            labels: None,
            command_id: Some(output.command_id),
            run_id: None,
            links: None,
        },
    )
    .await
    .expect("report artifact again");
    assert!(again.deduplicated);
    assert_eq!(again.artifact_id, report.artifact_id);

    ledger_engine::cards::transition_card(
        &ledger,
        &bot,
        &producer,
        now,
        ledger_engine::cards::TransitionRequest {
            card_id: output.card_id,
            to: CardState::Done,
            reason: "run finished".into(),
            correlation_id,
            causation_id: None,
            retry_at_ts: None,
        },
    )
    .await
    .expect("transition to done");

    let card = ledger.reads().get_card(&scope, output.card_id).await.unwrap().unwrap();
    assert_eq!(card.state, CardState::Done);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn idempotency_key_dedup_against_postgres() {
    let pool = pg_pool().await;
    let ledger = PgLedger::new(pool.clone());
    ledger.migrate().await.expect("migrate event/projection schema");
    let producer = ledger_core::Producer { service: "pg-integration".into(), version: "0".into() };

    let (scope, _owner) = fresh_scope(&pool).await;
    let bot = bot_auth(scope);
    let now = Utc::now();

    let mut input = command_input(ledger_core::CorrelationId::new(), "digest.compile", 10);
    input.idempotency_key = Some("pg-key".into());
    let first = admission::request_command(&ledger, &bot, &producer, now, input.clone()).await.expect("first request");
    assert!(!first.deduplicated);

    let second = admission::request_command(&ledger, &bot, &producer, now, input).await.expect("second request");
    assert!(second.deduplicated);
    assert_eq!(second.command_id, first.command_id);
    assert_eq!(second.card_id, first.card_id);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn job_primitive_shim_drives_a_command_to_completion_against_postgres() {
    let pool = pg_pool().await;
    let ledger = PgLedger::new(pool.clone());
    ledger.migrate().await.expect("migrate event/projection schema");
    let jobs = PgJobStore::new(pool.clone());
    jobs.migrate().await.expect("migrate jobs schema");
    let producer = ledger_core::Producer { service: "pg-integration".into(), version: "0".into() };

    let (scope, _owner) = fresh_scope(&pool).await;
    let bot = bot_auth(scope);
    let now = Utc::now();
    let tenant_id = scope.tenant_id.as_uuid();
    let project_id = scope.project_id.as_uuid();

    let correlation_id = ledger_core::CorrelationId::new();
    let output = admission::request_command(&ledger, &bot, &producer, now, command_input(correlation_id, "digest.compile", 10))
        .await
        .expect("request command");

    jobs.enqueue(tenant_id, project_id, "digest.compile", serde_json::json!({ "command_id": output.command_id }), now, 0, 3)
        .await
        .expect("enqueue");

    let claimed = jobs.claim_ready(tenant_id, project_id, "worker-1", 10).await.expect("claim");
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].job_type, "digest.compile");

    let run_id = RunId::new();
    let started = EventBuilder::new(scope, correlation_id)
        .subjects(SubjectIds::command(output.command_id))
        .build(
            EventPayload::CommandStarted(CommandStarted { command_id: output.command_id, run_id, attempt: 1, executor: Some("worker-1".into()) }),
            now,
            producer.clone(),
        );
    ledger.commit(vec![started]).await.expect("commit started");

    let command = ledger.reads().get_command(&scope, output.command_id).await.unwrap().unwrap();
    assert_eq!(command.status, CommandStatus::Running);

    let succeeded = EventBuilder::new(scope, correlation_id)
        .subjects(SubjectIds::command(output.command_id))
        .build(EventPayload::CommandSucceeded(CommandSucceeded { command_id: output.command_id, run_id }), now, producer.clone());
    ledger.commit(vec![succeeded]).await.expect("commit succeeded");
    jobs.mark_succeeded(tenant_id, project_id, claimed[0].id).await.expect("mark succeeded");

    let command = ledger.reads().get_command(&scope, output.command_id).await.unwrap().unwrap();
    assert_eq!(command.status, CommandStatus::Succeeded);

    let none_left = jobs.claim_ready(tenant_id, project_id, "worker-1", 10).await.expect("claim again");
    assert!(none_left.is_empty());
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn claim_ready_does_not_cross_tenant_boundaries_against_postgres() {
    let pool = pg_pool().await;
    let jobs = PgJobStore::new(pool.clone());
    jobs.migrate().await.expect("migrate jobs schema");

    let (scope_a, _) = fresh_scope(&pool).await;
    let (scope_b, _) = fresh_scope(&pool).await;
    let now = Utc::now();

    jobs.enqueue(scope_a.tenant_id.as_uuid(), scope_a.project_id.as_uuid(), "render.pdf", serde_json::json!({}), now, 0, 3)
        .await
        .expect("enqueue");

    let claimed_b = jobs.claim_ready(scope_b.tenant_id.as_uuid(), scope_b.project_id.as_uuid(), "worker-1", 10).await.expect("claim b");
    assert!(claimed_b.is_empty());

    let claimed_a = jobs.claim_ready(scope_a.tenant_id.as_uuid(), scope_a.project_id.as_uuid(), "worker-1", 10).await.expect("claim a");
    assert_eq!(claimed_a.len(), 1);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn job_primitive_shim_dead_letters_after_max_retries_against_postgres() {
    let pool = pg_pool().await;
    let jobs = PgJobStore::new(pool.clone());
    jobs.migrate().await.expect("migrate jobs schema");

    let (scope, _owner) = fresh_scope(&pool).await;
    let now = Utc::now();
    let tenant_id = scope.tenant_id.as_uuid();
    let project_id = scope.project_id.as_uuid();

    jobs.enqueue(tenant_id, project_id, "flaky.task", serde_json::json!({}), now, 0, 1).await.expect("enqueue");

    let claimed = jobs.claim_ready(tenant_id, project_id, "worker-1", 10).await.expect("claim");
    jobs.mark_failed(tenant_id, project_id, claimed[0].id, "connection reset", FailureKind::Retryable)
        .await
        .expect("mark failed");

    let retried = jobs.claim_ready(tenant_id, project_id, "worker-1", 10).await.expect("claim retried");
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].attempt, 2);

    jobs.mark_failed(tenant_id, project_id, retried[0].id, "connection reset again", FailureKind::Retryable)
        .await
        .expect("mark failed again");
    let exhausted = jobs.claim_ready(tenant_id, project_id, "worker-1", 10).await.expect("claim exhausted");
    assert!(exhausted.is_empty());
}
