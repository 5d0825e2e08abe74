//! # ledger-replay
//!
//! Rebuilds a read model from the event log from scratch. The projection
//! rules in `ledger-projectors` are already pure and idempotent — a
//! `ProjectionStore::apply` call during live operation and during replay
//! run the exact same code — so this crate's only job is to walk the log
//! in `(ts, event_id)` order and feed it through `apply` one event at a
//! time, plus read back any events that have aged out of the live store
//! into its NDJSON archive.
//!
//! `from_live` covers the common case (rebuild within the retention
//! window); `archive` covers reading a checksum-validated NDJSON file for
//! events that have already been archived and purged.

pub mod archive;

use chrono::{DateTime, Utc};
use ledger_core::{CoreResult, Scope};
use ledger_projectors::ProjectionStore;
use ledger_store::{EventStore, ReplayCursor};

pub use archive::{read_archive_file, write_archive_file, ArchiveError};

/// Batch size for one `by_ts_range` page. Matches the default the sweeper
/// and other full-sweep scans use for bounded memory footprint.
const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub events_applied: usize,
    pub batches: usize,
}

/// Rebuilds `target` from every event in `source` at or after `from`,
/// scoped to `scope` if given. Safe to call against a target that already
/// holds rows for this range: every rule is guarded by `last_event_id`, so
/// re-applying an event already reflected in a row is a no-op.
pub async fn rebuild_from_live(
    source: &dyn EventStore,
    target: &dyn ProjectionStore,
    scope: Option<Scope>,
    from: DateTime<Utc>,
) -> CoreResult<RebuildStats> {
    let mut stats = RebuildStats::default();
    let mut cursor: Option<ReplayCursor> = None;

    loop {
        let mut batch = source.by_ts_range(scope.as_ref(), from, cursor, BATCH_SIZE).await?;
        if batch.is_empty() {
            break;
        }
        // The store contract only promises the rows are returned, not that
        // they arrive pre-sorted; re-sort defensively so a store that can't
        // guarantee ORDER BY (ts, event_id) still satisfies replay order.
        batch.sort_by_key(|event| (event.ts, event.event_id));

        let exhausted = batch.len() < BATCH_SIZE as usize;
        let last = batch.last().expect("checked non-empty above");
        cursor = Some(ReplayCursor { ts: last.ts, event_id: last.event_id });

        for event in &batch {
            target.apply(event).await?;
            stats.events_applied += 1;
        }
        stats.batches += 1;

        if exhausted {
            break;
        }
    }

    tracing::info!(
        events_applied = stats.events_applied,
        batches = stats.batches,
        "replay rebuild complete"
    );
    Ok(stats)
}

/// Replays a set of already-read archived events (oldest first) into
/// `target`, then continues from the live store at `resume_from`. Used
/// when the requested rebuild range starts before the live store's
/// retention window.
pub async fn rebuild_from_archive_then_live(
    archived: Vec<ledger_core::Event>,
    source: &dyn EventStore,
    target: &dyn ProjectionStore,
    scope: Option<Scope>,
    resume_from: DateTime<Utc>,
) -> CoreResult<RebuildStats> {
    let mut stats = RebuildStats::default();
    let mut ordered = archived;
    ordered.sort_by_key(|event| (event.ts, event.event_id));
    for event in &ordered {
        target.apply(event).await?;
        stats.events_applied += 1;
    }
    if !ordered.is_empty() {
        stats.batches += 1;
    }

    let live = rebuild_from_live(source, target, scope, resume_from).await?;
    stats.events_applied += live.events_applied;
    stats.batches += live.batches;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::event::{CardCreated, SubjectIds};
    use ledger_core::{CardId, CardSpec, CorrelationId, EventBuilder, Priority, Producer, TenantId};
    use ledger_projectors::MemoryProjectionStore;
    use ledger_store::MemoryEventStore;

    fn producer() -> Producer {
        Producer { service: "test".into(), version: "0".into() }
    }

    fn card_created(card_id: CardId) -> ledger_core::EventPayload {
        ledger_core::EventPayload::CardCreated(CardCreated {
            card_id,
            title: "t".into(),
            spec: CardSpec { command_type: "x".into(), args: None, constraints: Default::default() },
            priority: Priority::default(),
            capabilities: None,
        })
    }

    #[tokio::test]
    async fn rebuild_from_live_reproduces_the_inline_projection() {
        let events = MemoryEventStore::new();
        let live_projection = MemoryProjectionStore::new();
        let scope = Scope::new(TenantId::new(), ledger_core::ProjectId::new());
        let card_id = CardId::new();
        let now = Utc::now();

        let created = EventBuilder::new(scope, CorrelationId::new())
            .subjects(SubjectIds::card(card_id))
            .build(card_created(card_id), now, producer());
        let written = events.append(vec![created]).await.unwrap();
        for event in &written {
            live_projection.apply(event).await.unwrap();
        }

        let rebuilt = MemoryProjectionStore::new();
        let stats = rebuild_from_live(&events, &rebuilt, Some(scope), now - chrono::Duration::seconds(1))
            .await
            .unwrap();

        assert_eq!(stats.events_applied, 1);
        let live_card = live_projection.get_card(&scope, card_id).await.unwrap();
        let rebuilt_card = rebuilt.get_card(&scope, card_id).await.unwrap();
        assert_eq!(live_card.unwrap().state, rebuilt_card.unwrap().state);
    }

    #[tokio::test]
    async fn rebuild_is_idempotent_against_an_already_populated_target() {
        let events = MemoryEventStore::new();
        let target = MemoryProjectionStore::new();
        let scope = Scope::new(TenantId::new(), ledger_core::ProjectId::new());
        let card_id = CardId::new();
        let now = Utc::now();

        let created = EventBuilder::new(scope, CorrelationId::new())
            .subjects(SubjectIds::card(card_id))
            .build(card_created(card_id), now, producer());
        events.append(vec![created]).await.unwrap();

        let from = now - chrono::Duration::seconds(1);
        rebuild_from_live(&events, &target, Some(scope), from).await.unwrap();
        let second = rebuild_from_live(&events, &target, Some(scope), from).await.unwrap();

        assert_eq!(second.events_applied, 1);
        let card = target.get_card(&scope, card_id).await.unwrap().unwrap();
        assert_eq!(card.state, ledger_core::CardState::Ready);
    }
}
