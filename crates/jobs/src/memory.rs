//! In-process job store for tests and the single-node demo binary.
//!
//! `claim_ready` caps how many jobs can be running at once via a
//! `tokio::sync::Semaphore` sized at construction, the in-process analogue
//! of `PgJobStore::claim_ready`'s `LIMIT $1 ... FOR UPDATE SKIP LOCKED`: a
//! claim takes permits up front and they are returned only when the job
//! leaves the running state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{ClaimedJob, FailureKind, JobQueue, JobStore};

#[derive(Debug, Clone, PartialEq, Eq)]
enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
}

#[derive(Debug, Clone)]
struct JobRow {
    id: Uuid,
    tenant_id: Uuid,
    project_id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    version: i32,
    status: JobStatus,
    attempt: i32,
    max_retries: i32,
    priority: i32,
    run_at: DateTime<Utc>,
    worker_id: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
}

pub struct MemoryJobStore {
    rows: Mutex<Vec<JobRow>>,
    concurrency: Arc<Semaphore>,
    default_lease_ms: i64,
}

impl MemoryJobStore {
    /// `concurrency` is the pool-wide cap on rows in `running` at once.
    pub fn new(concurrency: usize) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            concurrency: Arc::new(Semaphore::new(concurrency)),
            default_lease_ms: 60_000,
        }
    }

    pub fn with_lease_timeout(concurrency: usize, lease_ms: i64) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            concurrency: Arc::new(Semaphore::new(concurrency)),
            default_lease_ms: lease_ms,
        }
    }

    /// Abandoned-lease rows (worker died mid-job, never heartbeat or
    /// reported back) go back to `pending` and release their permit.
    pub fn reclaim_expired(&self, now: DateTime<Utc>) -> usize {
        let mut rows = self.rows.lock();
        let mut reclaimed = 0;
        for row in rows.iter_mut() {
            if row.status == JobStatus::Running && row.lease_expires_at.is_some_and(|t| t < now) {
                row.status = JobStatus::Pending;
                row.worker_id = None;
                row.lease_expires_at = None;
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            self.concurrency.add_permits(reclaimed);
        }
        reclaimed
    }
}

#[async_trait]
impl JobQueue for MemoryJobStore {
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
        self.rows.lock().push(JobRow {
            id,
            tenant_id,
            project_id,
            job_type: job_type.to_string(),
            payload,
            version: 1,
            status: JobStatus::Pending,
            attempt: 1,
            max_retries,
            priority,
            run_at,
            worker_id: None,
            lease_expires_at: None,
        });
        Ok(id)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn claim_ready(&self, tenant_id: Uuid, project_id: Uuid, worker_id: &str, limit: i64) -> anyhow::Result<Vec<ClaimedJob>> {
        let available = self.concurrency.available_permits() as i64;
        let effective_limit = limit.min(available).max(0);
        if effective_limit == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        let lease_expires_at = now + Duration::milliseconds(self.default_lease_ms);

        let mut rows = self.rows.lock();
        let mut candidates: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == JobStatus::Pending && r.run_at <= now && r.tenant_id == tenant_id && r.project_id == project_id)
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by_key(|&i| (rows[i].priority, rows[i].run_at));
        candidates.truncate(effective_limit as usize);

        let permit = self.concurrency.try_acquire_many(candidates.len() as u32)?;
        permit.forget();

        let mut claimed = Vec::with_capacity(candidates.len());
        for i in candidates {
            let row = &mut rows[i];
            row.status = JobStatus::Running;
            row.worker_id = Some(worker_id.to_string());
            row.lease_expires_at = Some(lease_expires_at);
            claimed.push(ClaimedJob {
                id: row.id,
                job_type: row.job_type.clone(),
                payload: row.payload.clone(),
                version: row.version,
                attempt: row.attempt,
            });
        }
        Ok(claimed)
    }

    async fn mark_succeeded(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid) -> anyhow::Result<()> {
        let mut rows = self.rows.lock();
        if let Some(row) = rows.iter_mut().find(|r| r.id == job_id && r.tenant_id == tenant_id && r.project_id == project_id) {
            if row.status == JobStatus::Running {
                row.status = JobStatus::Succeeded;
                drop(rows);
                self.concurrency.add_permits(1);
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid, error: &str, kind: FailureKind) -> anyhow::Result<()> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.iter_mut().find(|r| r.id == job_id && r.tenant_id == tenant_id && r.project_id == project_id) else {
            return Ok(());
        };
        if row.status != JobStatus::Running {
            return Ok(());
        }

        if kind == FailureKind::Retryable && row.attempt < row.max_retries {
            let delay_secs = 2i64.pow(row.attempt as u32).min(3600);
            row.status = JobStatus::Pending;
            row.attempt += 1;
            row.run_at = Utc::now() + Duration::seconds(delay_secs);
            row.worker_id = None;
            row.lease_expires_at = None;
            tracing::warn!(job_id = %job_id, attempt = row.attempt, %error, "job failed, retry scheduled");
        } else {
            row.status = JobStatus::DeadLetter;
            tracing::error!(job_id = %job_id, %error, "job moved to dead letter");
        }
        drop(rows);
        self.concurrency.add_permits(1);
        Ok(())
    }

    async fn heartbeat(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid) -> anyhow::Result<()> {
        let mut rows = self.rows.lock();
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == job_id && r.tenant_id == tenant_id && r.project_id == project_id && r.status == JobStatus::Running)
        {
            row.lease_expires_at = Some(Utc::now() + Duration::milliseconds(self.default_lease_ms));
        }
        Ok(())
    }
}
