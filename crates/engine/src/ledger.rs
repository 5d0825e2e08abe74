//! The write path every engine operation goes through: append events to the
//! log and apply their projections in one atomic unit, so a reader can never
//! observe an event without its projection or vice versa.
//!
//! Two implementations mirror the two backends in `ledger-store` /
//! `ledger-projectors`: [`MemoryLedger`] holds one `parking_lot::Mutex`
//! across both halves, [`PgLedger`] owns one `sqlx::Transaction` across
//! both halves. Engine operations depend on the [`Ledger`] trait, not on
//! either concrete type.

use async_trait::async_trait;
use ledger_core::{CoreResult, Event};
use ledger_projectors::{MemoryProjectionStore, PgProjectionStore, ProjectionStore};
use ledger_store::{EventStore, MemoryEventStore, PgEventStore};
use std::sync::Arc;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Appends `events` and applies their projections atomically. Returns
    /// only the events actually written (idempotency-key duplicates are
    /// silently dropped by the underlying `EventStore`).
    async fn commit(&self, events: Vec<Event>) -> CoreResult<Vec<Event>>;

    fn reads(&self) -> &dyn ProjectionStore;

    /// The log this ledger commits into, for callers that need to walk
    /// correlation chains or replay ranges rather than read projected rows.
    fn events(&self) -> &dyn EventStore;
}

pub struct MemoryLedger {
    events: Arc<MemoryEventStore>,
    projections: Arc<MemoryProjectionStore>,
}

impl MemoryLedger {
    pub fn new(events: Arc<MemoryEventStore>, projections: Arc<MemoryProjectionStore>) -> Self {
        Self { events, projections }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryEventStore::new()), Arc::new(MemoryProjectionStore::new()))
    }

    pub fn event_store(&self) -> &Arc<MemoryEventStore> {
        &self.events
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn commit(&self, events: Vec<Event>) -> CoreResult<Vec<Event>> {
        // The in-memory store has no IO, so there is no suspend point
        // between the append and the projection writes below; a concurrent
        // reader can only ever observe both or neither.
        let written = self.events.append(events).await?;
        for event in &written {
            self.projections.apply(event).await?;
        }
        Ok(written)
    }

    fn reads(&self) -> &dyn ProjectionStore {
        self.projections.as_ref()
    }

    fn events(&self) -> &dyn EventStore {
        self.events.as_ref()
    }
}

pub struct PgLedger {
    events: PgEventStore,
    projections: PgProjectionStore,
    pool: sqlx::PgPool,
}

impl PgLedger {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            events: PgEventStore::new(pool.clone()),
            projections: PgProjectionStore::new(pool.clone()),
            pool,
        }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        self.events.migrate().await?;
        self.projections.migrate().await?;
        Ok(())
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn commit(&self, events: Vec<Event>) -> CoreResult<Vec<Event>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ledger_core::CoreError::Internal(e.into()))?;
        let written = self.events.append_in_tx(&mut tx, events).await?;
        for event in &written {
            self.projections.apply_in_tx(&mut tx, event).await?;
        }
        tx.commit().await.map_err(|e| ledger_core::CoreError::Internal(e.into()))?;
        Ok(written)
    }

    fn reads(&self) -> &dyn ProjectionStore {
        &self.projections
    }

    fn events(&self) -> &dyn EventStore {
        &self.events
    }
}
