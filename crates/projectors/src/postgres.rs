//! PostgreSQL-backed [`ProjectionStore`]. Each `apply` reads the current row
//! `FOR UPDATE`, runs the same pure rule from [`crate::rules`] used by the
//! in-memory backend, and writes the result back — so the two backends can
//! never silently diverge in behavior, only in storage mechanics.

use async_trait::async_trait;
use ledger_core::{
    Artifact, ArtifactId, Card, CardId, Command, CommandId, CoreError, CoreResult, Decision,
    DecisionId, Event, EventPayload, Run, RunId, Scope,
};
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{rules, ProjectionStore};

#[derive(Clone)]
pub struct PgProjectionStore {
    pool: PgPool,
}

impl PgProjectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("schema.sql")).execute(&self.pool).await?;
        Ok(())
    }

    /// Applies one event's projections within a caller-owned transaction.
    /// `ledger-engine` calls this with the same transaction it used to
    /// append the event.
    pub async fn apply_in_tx(&self, tx: &mut Transaction<'_, Postgres>, event: &Event) -> CoreResult<()> {
        match &event.payload {
            EventPayload::CommandRequested(p) => {
                upsert_command(tx, event, p.command_id).await
            }
            EventPayload::CommandStarted(p) => {
                upsert_command(tx, event, p.command_id).await?;
                upsert_run(tx, event, p.run_id).await
            }
            EventPayload::CommandSucceeded(p) => {
                upsert_command(tx, event, p.command_id).await?;
                upsert_run(tx, event, p.run_id).await
            }
            EventPayload::CommandFailed(p) => {
                upsert_command(tx, event, p.command_id).await?;
                upsert_run(tx, event, p.run_id).await
            }
            EventPayload::CommandCanceled(p) => upsert_command(tx, event, p.command_id).await,
            EventPayload::CommandRetryScheduled(p) => upsert_command(tx, event, p.command_id).await,
            EventPayload::CommandSkippedDuplicate(_) => Ok(()),
            EventPayload::DecisionRequested(p) => upsert_decision(tx, event, p.decision_id).await,
            EventPayload::DecisionClaimed(p) => upsert_decision(tx, event, p.decision_id).await,
            EventPayload::DecisionClaimExpired(p) => upsert_decision(tx, event, p.decision_id).await,
            EventPayload::DecisionRendered(p) => upsert_decision(tx, event, p.decision_id).await,
            EventPayload::DecisionExpired(p) => upsert_decision(tx, event, p.decision_id).await,
            EventPayload::DecisionDeferred(p) => upsert_decision(tx, event, p.decision_id).await,
            EventPayload::DecisionRenderRejected(_) => Ok(()),
            EventPayload::ArtifactProduced(p) => upsert_artifact(tx, event, p.artifact_id).await,
            EventPayload::CardCreated(p) => upsert_card(tx, event, p.card_id).await,
            EventPayload::CardTransitioned(p) => upsert_card(tx, event, p.card_id).await,
            EventPayload::SloBreached(_) | EventPayload::ReconciliationDrift(_) => Ok(()),
        }
    }
}

fn internal<E: std::error::Error + Send + Sync + 'static>(e: E) -> CoreError {
    CoreError::Internal(e.into())
}

async fn fetch_command(tx: &mut Transaction<'_, Postgres>, scope: &Scope, id: CommandId) -> CoreResult<Option<Command>> {
    let row = sqlx::query("SELECT * FROM commands WHERE tenant_id = $1 AND project_id = $2 AND command_id = $3 FOR UPDATE")
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(internal)?;
    row.map(command_from_row).transpose()
}

fn command_from_row(row: sqlx::postgres::PgRow) -> CoreResult<Command> {
    let spec_json: serde_json::Value = row.try_get("command_spec").map_err(internal)?;
    Ok(Command {
        command_id: CommandId::from_uuid(row.try_get("command_id").map_err(internal)?),
        scope: Scope::new(
            ledger_core::TenantId::from_uuid(row.try_get("tenant_id").map_err(internal)?),
            ledger_core::ProjectId::from_uuid(row.try_get("project_id").map_err(internal)?),
        ),
        status: serde_json::from_value(serde_json::Value::String(row.try_get::<String, _>("status").map_err(internal)?)).map_err(internal)?,
        latest_run_id: row.try_get::<Option<uuid::Uuid>, _>("latest_run_id").map_err(internal)?.map(RunId::from_uuid),
        last_event_id: ledger_core::EventId::from_uuid(row.try_get("last_event_id").map_err(internal)?),
        priority: ledger_core::Priority(row.try_get::<i32, _>("priority").map_err(internal)? as u16),
        command_spec: serde_json::from_value(spec_json).map_err(internal)?,
        updated_ts: row.try_get("updated_ts").map_err(internal)?,
    })
}

async fn upsert_command(tx: &mut Transaction<'_, Postgres>, event: &Event, id: CommandId) -> CoreResult<()> {
    let current = fetch_command(tx, &event.scope, id).await?;
    let Some(row) = rules::project_command(event, current) else { return Ok(()) };
    sqlx::query(
        r#"
        INSERT INTO commands (command_id, tenant_id, project_id, status, latest_run_id,
                               last_event_id, priority, command_spec, updated_ts)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (tenant_id, project_id, command_id) DO UPDATE SET
            status = EXCLUDED.status,
            latest_run_id = EXCLUDED.latest_run_id,
            last_event_id = EXCLUDED.last_event_id,
            priority = EXCLUDED.priority,
            command_spec = EXCLUDED.command_spec,
            updated_ts = EXCLUDED.updated_ts
        "#,
    )
    .bind(row.command_id.as_uuid())
    .bind(row.scope.tenant_id.as_uuid())
    .bind(row.scope.project_id.as_uuid())
    .bind(serde_json::to_value(&row.status).unwrap().as_str().unwrap().to_string())
    .bind(row.latest_run_id.map(|id| id.as_uuid()))
    .bind(row.last_event_id.as_uuid())
    .bind(row.priority.0 as i32)
    .bind(serde_json::to_value(&row.command_spec).map_err(internal)?)
    .bind(row.updated_ts)
    .execute(&mut **tx)
    .await
    .map_err(internal)?;
    Ok(())
}

async fn fetch_run(tx: &mut Transaction<'_, Postgres>, scope: &Scope, id: RunId) -> CoreResult<Option<Run>> {
    let row = sqlx::query("SELECT * FROM runs WHERE tenant_id = $1 AND project_id = $2 AND run_id = $3 FOR UPDATE")
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(internal)?;
    row.map(run_from_row).transpose()
}

fn run_from_row(row: sqlx::postgres::PgRow) -> CoreResult<Run> {
    Ok(Run {
        run_id: RunId::from_uuid(row.try_get("run_id").map_err(internal)?),
        scope: Scope::new(
            ledger_core::TenantId::from_uuid(row.try_get("tenant_id").map_err(internal)?),
            ledger_core::ProjectId::from_uuid(row.try_get("project_id").map_err(internal)?),
        ),
        command_id: CommandId::from_uuid(row.try_get("command_id").map_err(internal)?),
        status: serde_json::from_value(serde_json::Value::String(row.try_get::<String, _>("status").map_err(internal)?)).map_err(internal)?,
        attempt: row.try_get::<i32, _>("attempt").map_err(internal)? as u32,
        started_ts: row.try_get("started_ts").map_err(internal)?,
        ended_ts: row.try_get("ended_ts").map_err(internal)?,
        executor: row.try_get("executor").map_err(internal)?,
        error: row.try_get("error").map_err(internal)?,
        last_event_id: ledger_core::EventId::from_uuid(row.try_get("last_event_id").map_err(internal)?),
    })
}

async fn upsert_run(tx: &mut Transaction<'_, Postgres>, event: &Event, id: RunId) -> CoreResult<()> {
    let current = fetch_run(tx, &event.scope, id).await?;
    let Some(row) = rules::project_run(event, current) else { return Ok(()) };
    sqlx::query(
        r#"
        INSERT INTO runs (run_id, tenant_id, project_id, command_id, status, attempt,
                           started_ts, ended_ts, executor, error, last_event_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (tenant_id, project_id, run_id) DO UPDATE SET
            status = EXCLUDED.status,
            attempt = EXCLUDED.attempt,
            started_ts = EXCLUDED.started_ts,
            ended_ts = EXCLUDED.ended_ts,
            executor = EXCLUDED.executor,
            error = EXCLUDED.error,
            last_event_id = EXCLUDED.last_event_id
        "#,
    )
    .bind(row.run_id.as_uuid())
    .bind(row.scope.tenant_id.as_uuid())
    .bind(row.scope.project_id.as_uuid())
    .bind(row.command_id.as_uuid())
    .bind(serde_json::to_value(&row.status).unwrap().as_str().unwrap().to_string())
    .bind(row.attempt as i32)
    .bind(row.started_ts)
    .bind(row.ended_ts)
    .bind(&row.executor)
    .bind(&row.error)
    .bind(row.last_event_id.as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(internal)?;
    Ok(())
}

async fn fetch_card(tx: &mut Transaction<'_, Postgres>, scope: &Scope, id: CardId) -> CoreResult<Option<Card>> {
    let row = sqlx::query("SELECT * FROM cards WHERE tenant_id = $1 AND project_id = $2 AND card_id = $3 FOR UPDATE")
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(internal)?;
    row.map(card_from_row).transpose()
}

fn card_from_row(row: sqlx::postgres::PgRow) -> CoreResult<Card> {
    let spec_json: serde_json::Value = row.try_get("spec").map_err(internal)?;
    Ok(Card {
        card_id: CardId::from_uuid(row.try_get("card_id").map_err(internal)?),
        scope: Scope::new(
            ledger_core::TenantId::from_uuid(row.try_get("tenant_id").map_err(internal)?),
            ledger_core::ProjectId::from_uuid(row.try_get("project_id").map_err(internal)?),
        ),
        state: serde_json::from_value(serde_json::Value::String(row.try_get::<String, _>("state").map_err(internal)?)).map_err(internal)?,
        priority: ledger_core::Priority(row.try_get::<i32, _>("priority").map_err(internal)? as u16),
        title: row.try_get("title").map_err(internal)?,
        spec: serde_json::from_value(spec_json).map_err(internal)?,
        attempt: row.try_get::<i32, _>("attempt").map_err(internal)? as u32,
        retry_at_ts: row.try_get("retry_at_ts").map_err(internal)?,
        capabilities: row
            .try_get::<Option<serde_json::Value>, _>("capabilities")
            .map_err(internal)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(internal)?,
        created_ts: row.try_get("created_ts").map_err(internal)?,
        updated_ts: row.try_get("updated_ts").map_err(internal)?,
        leased_to: row.try_get("leased_to").map_err(internal)?,
        lease_until_ts: row.try_get("lease_until_ts").map_err(internal)?,
        last_heartbeat_ts: row.try_get("last_heartbeat_ts").map_err(internal)?,
        last_event_id: ledger_core::EventId::from_uuid(row.try_get("last_event_id").map_err(internal)?),
    })
}

async fn upsert_card(tx: &mut Transaction<'_, Postgres>, event: &Event, id: CardId) -> CoreResult<()> {
    let current = fetch_card(tx, &event.scope, id).await?;
    let Some(row) = rules::project_card(event, current) else { return Ok(()) };
    sqlx::query(
        r#"
        INSERT INTO cards (card_id, tenant_id, project_id, state, priority, title, spec,
                            attempt, retry_at_ts, capabilities, created_ts, updated_ts,
                            leased_to, lease_until_ts, last_heartbeat_ts, last_event_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (tenant_id, project_id, card_id) DO UPDATE SET
            state = EXCLUDED.state,
            priority = EXCLUDED.priority,
            attempt = EXCLUDED.attempt,
            retry_at_ts = EXCLUDED.retry_at_ts,
            updated_ts = EXCLUDED.updated_ts,
            leased_to = EXCLUDED.leased_to,
            lease_until_ts = EXCLUDED.lease_until_ts,
            last_heartbeat_ts = EXCLUDED.last_heartbeat_ts,
            last_event_id = EXCLUDED.last_event_id
        "#,
    )
    .bind(row.card_id.as_uuid())
    .bind(row.scope.tenant_id.as_uuid())
    .bind(row.scope.project_id.as_uuid())
    .bind(serde_json::to_value(&row.state).unwrap().as_str().unwrap().to_string())
    .bind(row.priority.0 as i32)
    .bind(&row.title)
    .bind(serde_json::to_value(&row.spec).map_err(internal)?)
    .bind(row.attempt as i32)
    .bind(row.retry_at_ts)
    .bind(serde_json::to_value(&row.capabilities).map_err(internal)?)
    .bind(row.created_ts)
    .bind(row.updated_ts)
    .bind(&row.leased_to)
    .bind(row.lease_until_ts)
    .bind(row.last_heartbeat_ts)
    .bind(row.last_event_id.as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(internal)?;
    Ok(())
}

async fn fetch_decision(tx: &mut Transaction<'_, Postgres>, scope: &Scope, id: DecisionId) -> CoreResult<Option<Decision>> {
    let row = sqlx::query("SELECT * FROM decisions WHERE tenant_id = $1 AND project_id = $2 AND decision_id = $3 FOR UPDATE")
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(internal)?;
    row.map(decision_from_row).transpose()
}

fn decision_from_row(row: sqlx::postgres::PgRow) -> CoreResult<Decision> {
    let options_json: serde_json::Value = row.try_get("options").map_err(internal)?;
    Ok(Decision {
        decision_id: DecisionId::from_uuid(row.try_get("decision_id").map_err(internal)?),
        scope: Scope::new(
            ledger_core::TenantId::from_uuid(row.try_get("tenant_id").map_err(internal)?),
            ledger_core::ProjectId::from_uuid(row.try_get("project_id").map_err(internal)?),
        ),
        card_id: CardId::from_uuid(row.try_get("card_id").map_err(internal)?),
        command_id: CommandId::from_uuid(row.try_get("command_id").map_err(internal)?),
        run_id: RunId::from_uuid(row.try_get("run_id").map_err(internal)?),
        state: serde_json::from_value(serde_json::Value::String(row.try_get::<String, _>("state").map_err(internal)?)).map_err(internal)?,
        urgency: serde_json::from_value(serde_json::Value::String(row.try_get::<String, _>("urgency").map_err(internal)?)).map_err(internal)?,
        title: row.try_get("title").map_err(internal)?,
        context_summary: row.try_get("context_summary").map_err(internal)?,
        options: serde_json::from_value(options_json).map_err(internal)?,
        artifact_refs: row
            .try_get::<Option<serde_json::Value>, _>("artifact_refs")
            .map_err(internal)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(internal)?,
        source_thread: row.try_get("source_thread").map_err(internal)?,
        requested_at: row.try_get("requested_at").map_err(internal)?,
        expires_at: row.try_get("expires_at").map_err(internal)?,
        fallback_option: row.try_get("fallback_option").map_err(internal)?,
        claimed_by: row.try_get::<Option<uuid::Uuid>, _>("claimed_by").map_err(internal)?.map(ledger_core::UserId::from_uuid),
        claimed_until: row.try_get("claimed_until").map_err(internal)?,
        rendered_option: row.try_get("rendered_option").map_err(internal)?,
        rendered_by: row.try_get("rendered_by").map_err(internal)?,
        rendered_at: row.try_get("rendered_at").map_err(internal)?,
        last_event_id: ledger_core::EventId::from_uuid(row.try_get("last_event_id").map_err(internal)?),
    })
}

async fn upsert_decision(tx: &mut Transaction<'_, Postgres>, event: &Event, id: DecisionId) -> CoreResult<()> {
    let current = fetch_decision(tx, &event.scope, id).await?;
    let Some(row) = rules::project_decision(event, current) else { return Ok(()) };
    sqlx::query(
        r#"
        INSERT INTO decisions (decision_id, tenant_id, project_id, card_id, command_id, run_id,
                                state, urgency, title, context_summary, options, artifact_refs,
                                source_thread, requested_at, expires_at, fallback_option,
                                claimed_by, claimed_until, rendered_option, rendered_by,
                                rendered_at, last_event_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22)
        ON CONFLICT (tenant_id, project_id, decision_id) DO UPDATE SET
            state = EXCLUDED.state,
            claimed_by = EXCLUDED.claimed_by,
            claimed_until = EXCLUDED.claimed_until,
            rendered_option = EXCLUDED.rendered_option,
            rendered_by = EXCLUDED.rendered_by,
            rendered_at = EXCLUDED.rendered_at,
            expires_at = EXCLUDED.expires_at,
            last_event_id = EXCLUDED.last_event_id
        "#,
    )
    .bind(row.decision_id.as_uuid())
    .bind(row.scope.tenant_id.as_uuid())
    .bind(row.scope.project_id.as_uuid())
    .bind(row.card_id.as_uuid())
    .bind(row.command_id.as_uuid())
    .bind(row.run_id.as_uuid())
    .bind(serde_json::to_value(&row.state).unwrap().as_str().unwrap().to_string())
    .bind(serde_json::to_value(&row.urgency).unwrap().as_str().unwrap().to_string())
    .bind(&row.title)
    .bind(&row.context_summary)
    .bind(serde_json::to_value(&row.options).map_err(internal)?)
    .bind(serde_json::to_value(&row.artifact_refs).map_err(internal)?)
    .bind(&row.source_thread)
    .bind(row.requested_at)
    .bind(row.expires_at)
    .bind(&row.fallback_option)
    .bind(row.claimed_by.map(|id| id.as_uuid()))
    .bind(row.claimed_until)
    .bind(&row.rendered_option)
    .bind(&row.rendered_by)
    .bind(row.rendered_at)
    .bind(row.last_event_id.as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(internal)?;
    Ok(())
}

async fn upsert_artifact(tx: &mut Transaction<'_, Postgres>, event: &Event, id: ArtifactId) -> CoreResult<()> {
    let row_opt = sqlx::query("SELECT 1 FROM artifacts WHERE tenant_id = $1 AND project_id = $2 AND artifact_id = $3")
        .bind(event.scope.tenant_id.as_uuid())
        .bind(event.scope.project_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(internal)?;
    if row_opt.is_some() {
        return Ok(());
    }
    let Some(row) = rules::project_artifact(event, None) else { return Ok(()) };
    sqlx::query(
        r#"
        INSERT INTO artifacts (artifact_id, tenant_id, project_id, content_sha256, media_type,
                                logical_name, byte_size, labels, created_at, provenance,
                                storage_pointer, links)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (tenant_id, project_id, content_sha256) DO NOTHING
        "#,
    )
    .bind(row.artifact_id.as_uuid())
    .bind(row.scope.tenant_id.as_uuid())
    .bind(row.scope.project_id.as_uuid())
    .bind(&row.content_sha256)
    .bind(&row.media_type)
    .bind(&row.logical_name)
    .bind(row.byte_size as i64)
    .bind(&row.labels)
    .bind(row.created_at)
    .bind(serde_json::to_value(&row.provenance).map_err(internal)?)
    .bind(serde_json::to_value(&row.storage_pointer).map_err(internal)?)
    .bind(serde_json::to_value(&row.links).map_err(internal)?)
    .execute(&mut **tx)
    .await
    .map_err(internal)?;
    Ok(())
}

#[async_trait]
impl ProjectionStore for PgProjectionStore {
    async fn apply(&self, event: &Event) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        self.apply_in_tx(&mut tx, event).await?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    async fn get_command(&self, scope: &Scope, command_id: CommandId) -> CoreResult<Option<Command>> {
        let row = sqlx::query("SELECT * FROM commands WHERE tenant_id = $1 AND project_id = $2 AND command_id = $3")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .bind(command_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(command_from_row).transpose()
    }

    async fn get_run(&self, scope: &Scope, run_id: RunId) -> CoreResult<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE tenant_id = $1 AND project_id = $2 AND run_id = $3")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .bind(run_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(run_from_row).transpose()
    }

    async fn get_card(&self, scope: &Scope, card_id: CardId) -> CoreResult<Option<Card>> {
        let row = sqlx::query("SELECT * FROM cards WHERE tenant_id = $1 AND project_id = $2 AND card_id = $3")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .bind(card_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(card_from_row).transpose()
    }

    async fn get_decision(&self, scope: &Scope, decision_id: DecisionId) -> CoreResult<Option<Decision>> {
        let row = sqlx::query("SELECT * FROM decisions WHERE tenant_id = $1 AND project_id = $2 AND decision_id = $3")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .bind(decision_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(decision_from_row).transpose()
    }

    async fn get_artifact(&self, scope: &Scope, artifact_id: ArtifactId) -> CoreResult<Option<Artifact>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE tenant_id = $1 AND project_id = $2 AND artifact_id = $3")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .bind(artifact_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(artifact_from_row).transpose()
    }

    async fn get_artifact_by_hash(&self, scope: &Scope, content_sha256: &str) -> CoreResult<Option<Artifact>> {
        let row = sqlx::query(
            "SELECT * FROM artifacts WHERE tenant_id = $1 AND project_id = $2 AND content_sha256 = $3",
        )
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(content_sha256)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        row.map(artifact_from_row).transpose()
    }

    async fn pending_decisions(&self, scope: &Scope) -> CoreResult<Vec<Decision>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM decisions
            WHERE tenant_id = $1 AND project_id = $2 AND state IN ('pending', 'claimed')
            ORDER BY urgency ASC, requested_at ASC
            "#,
        )
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.into_iter().map(decision_from_row).collect()
    }

    async fn artifacts_for_run(&self, scope: &Scope, run_id: RunId) -> CoreResult<Vec<Artifact>> {
        let rows = sqlx::query(
            "SELECT * FROM artifacts WHERE tenant_id = $1 AND project_id = $2 AND provenance->>'run_id' = $3",
        )
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.into_iter().map(artifact_from_row).collect()
    }

    async fn artifacts_for_command(&self, scope: &Scope, command_id: CommandId) -> CoreResult<Vec<Artifact>> {
        let rows = sqlx::query(
            "SELECT * FROM artifacts WHERE tenant_id = $1 AND project_id = $2 AND provenance->>'command_id' = $3",
        )
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(command_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.into_iter().map(artifact_from_row).collect()
    }

    async fn cards_due_for_retry(&self, now: chrono::DateTime<chrono::Utc>) -> CoreResult<Vec<Card>> {
        let rows = sqlx::query("SELECT * FROM cards WHERE state = 'retry_scheduled' AND retry_at_ts <= $1")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter().map(card_from_row).collect()
    }

    async fn decisions_expiring(&self, now: chrono::DateTime<chrono::Utc>) -> CoreResult<Vec<Decision>> {
        let rows = sqlx::query(
            "SELECT * FROM decisions WHERE state IN ('pending', 'claimed') AND expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.into_iter().map(decision_from_row).collect()
    }

    async fn decisions_with_expired_claims(&self, now: chrono::DateTime<chrono::Utc>) -> CoreResult<Vec<Decision>> {
        let rows = sqlx::query("SELECT * FROM decisions WHERE state = 'claimed' AND claimed_until < $1")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.into_iter().map(decision_from_row).collect()
    }

    async fn now_urgency_backlog(&self) -> CoreResult<Vec<(Scope, usize)>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, project_id, COUNT(*) AS n
            FROM decisions
            WHERE state IN ('pending', 'claimed') AND urgency = 'now'
            GROUP BY tenant_id, project_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.into_iter()
            .map(|row| {
                Ok((
                    Scope::new(
                        ledger_core::TenantId::from_uuid(row.try_get("tenant_id").map_err(internal)?),
                        ledger_core::ProjectId::from_uuid(row.try_get("project_id").map_err(internal)?),
                    ),
                    row.try_get::<i64, _>("n").map_err(internal)? as usize,
                ))
            })
            .collect()
    }
}

fn artifact_from_row(row: sqlx::postgres::PgRow) -> CoreResult<Artifact> {
    let provenance_json: serde_json::Value = row.try_get("provenance").map_err(internal)?;
    let storage_json: serde_json::Value = row.try_get("storage_pointer").map_err(internal)?;
    Ok(Artifact {
        artifact_id: ArtifactId::from_uuid(row.try_get("artifact_id").map_err(internal)?),
        scope: Scope::new(
            ledger_core::TenantId::from_uuid(row.try_get("tenant_id").map_err(internal)?),
            ledger_core::ProjectId::from_uuid(row.try_get("project_id").map_err(internal)?),
        ),
        content_sha256: row.try_get("content_sha256").map_err(internal)?,
        media_type: row.try_get("media_type").map_err(internal)?,
        logical_name: row.try_get("logical_name").map_err(internal)?,
        byte_size: row.try_get::<i64, _>("byte_size").map_err(internal)? as u64,
        labels: row.try_get("labels").map_err(internal)?,
        created_at: row.try_get("created_at").map_err(internal)?,
        provenance: serde_json::from_value(provenance_json).map_err(internal)?,
        storage_pointer: serde_json::from_value(storage_json).map_err(internal)?,
        links: row
            .try_get::<Option<serde_json::Value>, _>("links")
            .map_err(internal)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(internal)?,
    })
}
