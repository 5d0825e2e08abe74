//! # ledger-store
//!
//! The Event Log: the one append-only table every read model in the
//! workspace is a projection of. Two backends share the [`EventStore`]
//! trait — [`postgres::PgEventStore`] for production, [`memory::MemoryEventStore`]
//! for tests and the in-process replay harness — plus a lower-level,
//! transaction-scoped append used by `ledger-engine` so a command's events
//! and their projector writes land in the same database transaction.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{CorrelationId, CoreResult, Event, EventId, Scope, TenantId};

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

/// Cursor over the total `(ts, event_id)` order, used by the replay engine
/// and by any caller walking the log end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayCursor {
    pub ts: DateTime<Utc>,
    pub event_id: EventId,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends fully-built events (ids and timestamps already assigned by
    /// `EventBuilder::build`) to the log. Idempotency keys are enforced per
    /// `(tenant_id, project_id)`; an event whose key already exists is
    /// silently skipped rather than erroring, so the caller can always
    /// retry a whole batch safely. Returns only the events actually
    /// written, in the order given. Rejects the whole batch if any payload
    /// or tag value matches a known secret pattern.
    async fn append(&self, events: Vec<Event>) -> CoreResult<Vec<Event>>;

    async fn by_correlation(
        &self,
        scope: &Scope,
        correlation_id: CorrelationId,
    ) -> CoreResult<Vec<Event>>;

    /// Cross-project within the tenant: the sweeper and the bot interface's
    /// audit views look at one tenant's whole event stream, not one
    /// project's, so this does not take a project id.
    async fn by_type(
        &self,
        tenant_id: TenantId,
        event_type: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> CoreResult<Vec<Event>>;

    /// Walks the global `(ts, event_id)` order, optionally scoped to one
    /// tenant/project. Used by the replay engine to rebuild read models and
    /// by the archival job to export completed ranges.
    async fn by_ts_range(
        &self,
        scope: Option<&Scope>,
        from: DateTime<Utc>,
        after_cursor: Option<ReplayCursor>,
        limit: i64,
    ) -> CoreResult<Vec<Event>>;

    async fn get(&self, scope: &Scope, event_id: EventId) -> CoreResult<Option<Event>>;
}
