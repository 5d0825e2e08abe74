//! In-memory [`EventStore`], used by `ledger-testing` fixtures and by any
//! unit test in this workspace that needs a real `EventStore` without a
//! database. Holds everything behind one `parking_lot::Mutex`, which also
//! gives callers a cheap stand-in for "append and project in the same
//! transaction": [`MemoryEventStore::append_and`] runs the projection
//! closure while still holding the lock.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{secret, CorrelationId, CoreError, CoreResult, Event, EventId, Scope, TenantId};
use parking_lot::Mutex;

use crate::{EventStore, ReplayCursor};

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    idempotency_seen: HashSet<(uuid::Uuid, uuid::Uuid, String)>,
}

#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `events`, then invokes `project` with the events that were
    /// actually written while the lock is still held, so a caller building
    /// read models alongside the log sees no interleaving from another
    /// writer on the same store.
    pub fn append_and<F>(&self, events: Vec<Event>, project: F) -> CoreResult<Vec<Event>>
    where
        F: FnOnce(&[Event]) -> CoreResult<()>,
    {
        let mut guard = self.inner.lock();
        let written = append_locked(&mut guard, events)?;
        project(&written)?;
        Ok(written)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn append_locked(inner: &mut Inner, events: Vec<Event>) -> CoreResult<Vec<Event>> {
    let mut written = Vec::with_capacity(events.len());
    for event in events {
        if let Some(pattern) = secret::scan_payload_and_tags(&event.payload, &event.tags) {
            tracing::warn!(pattern, event_type = event.event_type(), "rejecting event with secret-shaped payload");
            return Err(CoreError::SecretInPayload);
        }
        if let Some(key) = &event.idempotency_key {
            let dedup_key = (
                event.scope.tenant_id.as_uuid(),
                event.scope.project_id.as_uuid(),
                key.clone(),
            );
            if !inner.idempotency_seen.insert(dedup_key) {
                continue;
            }
        }
        inner.events.push(event.clone());
        written.push(event);
    }
    Ok(written)
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, events: Vec<Event>) -> CoreResult<Vec<Event>> {
        let mut guard = self.inner.lock();
        append_locked(&mut guard, events)
    }

    async fn by_correlation(
        &self,
        scope: &Scope,
        correlation_id: CorrelationId,
    ) -> CoreResult<Vec<Event>> {
        let guard = self.inner.lock();
        Ok(guard
            .events
            .iter()
            .filter(|e| &e.scope == scope && e.correlation_id == correlation_id)
            .cloned()
            .collect())
    }

    async fn by_type(
        &self,
        tenant_id: TenantId,
        event_type: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> CoreResult<Vec<Event>> {
        let guard = self.inner.lock();
        Ok(guard
            .events
            .iter()
            .filter(|e| e.scope.tenant_id == tenant_id && e.event_type() == event_type)
            .filter(|e| since.map(|s| e.ts >= s).unwrap_or(true))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn by_ts_range(
        &self,
        scope: Option<&Scope>,
        from: DateTime<Utc>,
        after_cursor: Option<ReplayCursor>,
        limit: i64,
    ) -> CoreResult<Vec<Event>> {
        let guard = self.inner.lock();
        let mut matching: Vec<Event> = guard
            .events
            .iter()
            .filter(|e| scope.map(|s| &e.scope == s).unwrap_or(true))
            .filter(|e| e.ts >= from)
            .filter(|e| match after_cursor {
                Some(cursor) => (e.ts, e.event_id) > (cursor.ts, cursor.event_id),
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.ts, e.event_id));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn get(&self, scope: &Scope, event_id: EventId) -> CoreResult<Option<Event>> {
        let guard = self.inner.lock();
        Ok(guard
            .events
            .iter()
            .find(|e| &e.scope == scope && e.event_id == event_id)
            .cloned())
    }
}
