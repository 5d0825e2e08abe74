//! Job Primitive Shim: stands in for the external durable job framework
//! that actually runs command executions. A bot worker claims a batch of
//! ready jobs, does the work, and reports back; the ledger events those
//! executions produce (`CommandStarted`, `CommandSucceeded`, ...) are
//! appended by the worker directly against `ledger-engine`, not by this
//! crate — `JobStore` only tracks whether a worker got a turn at a job.

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A job row handed to a worker by `claim_ready`. `version` is the job
/// definition's schema version, carried through so a worker can reject a
/// payload shape it no longer understands instead of guessing.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub version: i32,
    pub attempt: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retryable,
    NonRetryable,
}

/// The enqueue side, used by `request_command`'s caller (or the sweeper's
/// retry-release phase) to schedule a unit of work.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        job_type: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
        priority: i32,
        max_retries: i32,
    ) -> anyhow::Result<Uuid>;
}

/// The worker side. `claim_ready` is the only method a concurrency bound
/// applies to — once a job is running, heartbeat/mark_* always succeed
/// against a row the worker already owns.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn claim_ready(&self, tenant_id: Uuid, project_id: Uuid, worker_id: &str, limit: i64) -> anyhow::Result<Vec<ClaimedJob>>;
    async fn mark_succeeded(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid) -> anyhow::Result<()>;
    async fn mark_failed(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid, error: &str, kind: FailureKind) -> anyhow::Result<()>;
    async fn heartbeat(&self, tenant_id: Uuid, project_id: Uuid, job_id: Uuid) -> anyhow::Result<()>;
}
