//! PostgreSQL-backed [`EventStore`].
//!
//! Idempotent append follows the same shape as a `PgJobStore` claim: one
//! `INSERT ... ON CONFLICT DO NOTHING RETURNING` per event inside a single
//! transaction, so a caller can pass in a whole batch (e.g. a command's
//! `CommandRequested` plus its `CardCreated`) and get back only the rows
//! that actually landed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{secret, CorrelationId, CoreError, CoreResult, Event, EventId, Scope, TenantId};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::{EventStore, ReplayCursor};

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs migrations embedded in `schema.sql`. Idempotent: every
    /// statement is `CREATE ... IF NOT EXISTS`.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("schema.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Appends within a caller-owned transaction. `ledger-engine` uses this
    /// directly so a command's events and the projector writes they trigger
    /// commit or roll back together.
    pub async fn append_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        events: Vec<Event>,
    ) -> CoreResult<Vec<Event>> {
        let mut written = Vec::with_capacity(events.len());
        for event in events {
            if let Some(pattern) = secret::scan_payload_and_tags(&event.payload, &event.tags) {
                tracing::warn!(
                    pattern,
                    event_type = event.event_type(),
                    "rejecting event with secret-shaped payload"
                );
                return Err(CoreError::SecretInPayload);
            }

            let payload_json = serde_json::to_value(&event.payload)
                .map_err(|e| CoreError::Internal(e.into()))?;

            let row = sqlx::query(
                r#"
                INSERT INTO events (
                    event_id, tenant_id, project_id, event_type, version, ts,
                    correlation_id, causation_id, command_id, run_id, card_id,
                    decision_id, idempotency_key, producer, tags, payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (tenant_id, project_id, idempotency_key)
                    WHERE idempotency_key IS NOT NULL
                    DO NOTHING
                RETURNING event_id
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(event.scope.tenant_id.as_uuid())
            .bind(event.scope.project_id.as_uuid())
            .bind(event.event_type())
            .bind(event.version as i32)
            .bind(event.ts)
            .bind(event.correlation_id.0)
            .bind(event.causation_id.map(|id| id.as_uuid()))
            .bind(event.subjects.command_id.map(|id| id.as_uuid()))
            .bind(event.subjects.run_id.map(|id| id.as_uuid()))
            .bind(event.subjects.card_id.map(|id| id.as_uuid()))
            .bind(event.subjects.decision_id.map(|id| id.as_uuid()))
            .bind(&event.idempotency_key)
            .bind(serde_json::to_value(&event.producer).map_err(|e| CoreError::Internal(e.into()))?)
            .bind(&event.tags)
            .bind(&payload_json)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

            if row.is_some() {
                written.push(event);
            }
        }
        Ok(written)
    }
}

fn row_to_event(row: PgRow) -> CoreResult<Event> {
    let payload_json: serde_json::Value = row.try_get("payload").map_err(|e| CoreError::Internal(e.into()))?;
    let payload = serde_json::from_value(payload_json).map_err(|e| CoreError::Internal(e.into()))?;
    let producer_json: serde_json::Value = row.try_get("producer").map_err(|e| CoreError::Internal(e.into()))?;
    let producer = serde_json::from_value(producer_json).map_err(|e| CoreError::Internal(e.into()))?;

    Ok(Event {
        event_id: EventId::from_uuid(row.try_get("event_id").map_err(|e| CoreError::Internal(e.into()))?),
        scope: Scope::new(
            ledger_core::TenantId::from_uuid(row.try_get("tenant_id").map_err(|e| CoreError::Internal(e.into()))?),
            ledger_core::ProjectId::from_uuid(row.try_get("project_id").map_err(|e| CoreError::Internal(e.into()))?),
        ),
        version: row.try_get::<i32, _>("version").map_err(|e| CoreError::Internal(e.into()))? as u32,
        ts: row.try_get("ts").map_err(|e| CoreError::Internal(e.into()))?,
        correlation_id: CorrelationId(row.try_get("correlation_id").map_err(|e| CoreError::Internal(e.into()))?),
        causation_id: row
            .try_get::<Option<uuid::Uuid>, _>("causation_id")
            .map_err(|e| CoreError::Internal(e.into()))?
            .map(EventId::from_uuid),
        subjects: ledger_core::event::SubjectIds {
            command_id: row
                .try_get::<Option<uuid::Uuid>, _>("command_id")
                .map_err(|e| CoreError::Internal(e.into()))?
                .map(ledger_core::CommandId::from_uuid),
            run_id: row
                .try_get::<Option<uuid::Uuid>, _>("run_id")
                .map_err(|e| CoreError::Internal(e.into()))?
                .map(ledger_core::RunId::from_uuid),
            card_id: row
                .try_get::<Option<uuid::Uuid>, _>("card_id")
                .map_err(|e| CoreError::Internal(e.into()))?
                .map(ledger_core::CardId::from_uuid),
            decision_id: row
                .try_get::<Option<uuid::Uuid>, _>("decision_id")
                .map_err(|e| CoreError::Internal(e.into()))?
                .map(ledger_core::DecisionId::from_uuid),
        },
        idempotency_key: row.try_get("idempotency_key").map_err(|e| CoreError::Internal(e.into()))?,
        producer,
        tags: row.try_get("tags").map_err(|e| CoreError::Internal(e.into()))?,
        payload,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, events: Vec<Event>) -> CoreResult<Vec<Event>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        let written = self.append_in_tx(&mut tx, events).await?;
        tx.commit().await.map_err(|e| CoreError::Internal(e.into()))?;
        Ok(written)
    }

    async fn by_correlation(
        &self,
        scope: &Scope,
        correlation_id: CorrelationId,
    ) -> CoreResult<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE tenant_id = $1 AND project_id = $2 AND correlation_id = $3
            ORDER BY ts ASC, event_id ASC
            "#,
        )
        .bind(scope.tenant_id.as_uuid())
        .bind(scope.project_id.as_uuid())
        .bind(correlation_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn by_type(
        &self,
        tenant_id: TenantId,
        event_type: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> CoreResult<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE tenant_id = $1 AND event_type = $2
              AND ($3::timestamptz IS NULL OR ts >= $3)
            ORDER BY ts ASC, event_id ASC
            LIMIT $4
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(event_type)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn by_ts_range(
        &self,
        scope: Option<&Scope>,
        from: DateTime<Utc>,
        after_cursor: Option<ReplayCursor>,
        limit: i64,
    ) -> CoreResult<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
              AND ($2::uuid IS NULL OR project_id = $2)
              AND ts >= $3
              AND ($4::timestamptz IS NULL OR (ts, event_id) > ($4, $5))
            ORDER BY ts ASC, event_id ASC
            LIMIT $6
            "#,
        )
        .bind(scope.map(|s| s.tenant_id.as_uuid()))
        .bind(scope.map(|s| s.project_id.as_uuid()))
        .bind(from)
        .bind(after_cursor.map(|c| c.ts))
        .bind(after_cursor.map(|c| c.event_id.as_uuid()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(e.into()))?;

        rows.into_iter().map(row_to_event).collect()
    }

    async fn get(&self, scope: &Scope, event_id: EventId) -> CoreResult<Option<Event>> {
        let row = sqlx::query("SELECT * FROM events WHERE tenant_id = $1 AND project_id = $2 AND event_id = $3")
            .bind(scope.tenant_id.as_uuid())
            .bind(scope.project_id.as_uuid())
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;

        row.map(row_to_event).transpose()
    }
}
