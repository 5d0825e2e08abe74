//! PostgreSQL-backed [`JobStore`]/[`JobQueue`] for production. Mirrors the
//! claim-and-lease shape an event-log append already uses: `SELECT ...
//! FOR UPDATE SKIP LOCKED` under a `LIMIT`, then an `UPDATE` to mark the
//! claimed rows running, all inside one statement via a CTE.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{ClaimedJob, FailureKind, JobQueue, JobStore};

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
    default_lease_ms: i64,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, default_lease_ms: 60_000 }
    }

    pub fn with_lease_timeout(pool: PgPool, lease_ms: i64) -> Self {
        Self { pool, default_lease_ms: lease_ms }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Idempotent: every statement in `schema.sql` is `CREATE ... IF NOT EXISTS`.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(include_str!("schema.sql")).execute(&self.pool).await?;
        Ok(())
    }

    /// Run periodically alongside the sweeper: rows whose lease expired
    /// without a `mark_succeeded`/`mark_failed` go back to `pending`.
    pub async fn reclaim_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                worker_id = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
              AND lease_expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JobQueue for PgJobStore {
    async fn enqueue(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        job_type: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
        priority: i32,
        max_retries: i32,
    ) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, tenant_id, project_id, job_type, payload, priority, run_at, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(project_id)
        .bind(job_type)
        .bind(payload)
        .bind(priority)
        .bind(run_at)
        .bind(max_retries)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim_ready(&self, tenant_id: Uuid, project_id: Uuid, worker_id: &str, limit: i64) -> anyhow::Result<Vec<ClaimedJob>> {
        let lease_expires_at = Utc::now() + Duration::milliseconds(self.default_lease_ms);

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                  AND run_at <= NOW()
                  AND tenant_id = $4
                  AND project_id = $5
                ORDER BY priority ASC, run_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                worker_id = $2,
                lease_expires_at = $3,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, job_type, payload, version, attempt
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .bind(lease_expires_at)
        .bind(tenant_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClaimedJob {
                id: row.get("id"),
                job_type: row.get("job_type"),
                payload: row.get("payload"),
                version: row.get("version"),
                attempt: row.get("attempt"),
            })
            .collect())
    }

    async fn mark_succeeded(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded', updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND project_id = $3
            "#,
        )
        .bind(job_id)
        .bind(tenant_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid, error: &str, kind: FailureKind) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query("SELECT attempt, max_retries FROM jobs WHERE id = $1 AND tenant_id = $2 AND project_id = $3 FOR UPDATE")
            .bind(job_id)
            .bind(tenant_id)
            .bind(project_id)
            .fetch_one(&mut *tx)
            .await?;
        let attempt: i32 = job.get("attempt");
        let max_retries: i32 = job.get("max_retries");

        match kind {
            FailureKind::Retryable if attempt < max_retries => {
                let delay_secs = 2i64.pow(attempt as u32).min(3600);
                let retry_at = Utc::now() + Duration::seconds(delay_secs);
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'pending',
                        run_at = $1,
                        attempt = attempt + 1,
                        error_message = $2,
                        error_kind = 'retryable',
                        worker_id = NULL,
                        lease_expires_at = NULL,
                        updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(retry_at)
                .bind(error)
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
                tracing::warn!(%job_id, attempt = attempt + 1, %error, "job failed, retry scheduled");
            }
            _ => {
                tracing::error!(%job_id, %error, "job moved to dead letter");
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET status = 'dead_letter',
                        error_message = $1,
                        error_kind = $2,
                        updated_at = NOW()
                    WHERE id = $3
                    "#,
                )
                .bind(error)
                .bind(match kind {
                    FailureKind::Retryable => "retryable",
                    FailureKind::NonRetryable => "non_retryable",
                })
                .bind(job_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn heartbeat(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid) -> anyhow::Result<()> {
        let lease_expires_at = Utc::now() + Duration::milliseconds(self.default_lease_ms);
        sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = $1, updated_at = NOW()
            WHERE id = $2 AND tenant_id = $3 AND project_id = $4 AND status = 'running'
            "#,
        )
        .bind(lease_expires_at)
        .bind(job_id)
        .bind(tenant_id)
        .bind(project_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
