//! Pure, idempotent projection rules: `(event, current row) -> row`. None of
//! these touch storage; [`crate::memory`] and [`crate::postgres`] are the
//! only places that read a row, call one of these, and write it back.
//!
//! Every rule guards on `last_event_id`: an event whose id is not strictly
//! newer than the row it would update is a no-op. Because event ids are
//! UUIDv7 (time-ordered) this is equivalent to a timestamp guard without
//! needing a second comparison.

use ledger_core::{
    Artifact, Card, CardState, Command, CommandStatus, Decision, DecisionState, Event,
    EventPayload, Run, RunStatus,
};

fn newer(event: &Event, last_event_id: ledger_core::EventId) -> bool {
    event.event_id > last_event_id
}

pub fn project_command(event: &Event, current: Option<Command>) -> Option<Command> {
    if let Some(row) = &current {
        if !newer(event, row.last_event_id) {
            return current;
        }
    }

    match &event.payload {
        EventPayload::CommandRequested(p) => Some(Command {
            command_id: p.command_id,
            scope: event.scope,
            status: CommandStatus::Pending,
            latest_run_id: None,
            last_event_id: event.event_id,
            priority: p.command_spec.constraints.priority.unwrap_or_default(),
            command_spec: p.command_spec.clone(),
            updated_ts: event.ts,
        }),
        EventPayload::CommandStarted(p) => current.map(|mut row| {
            if row.command_id == p.command_id {
                row.status = CommandStatus::Running;
                row.latest_run_id = Some(p.run_id);
                row.last_event_id = event.event_id;
                row.updated_ts = event.ts;
            }
            row
        }),
        EventPayload::CommandSucceeded(p) => current.map(|mut row| {
            if row.command_id == p.command_id {
                row.status = CommandStatus::Succeeded;
                row.last_event_id = event.event_id;
                row.updated_ts = event.ts;
            }
            row
        }),
        EventPayload::CommandFailed(p) => current.map(|mut row| {
            if row.command_id == p.command_id {
                row.status = CommandStatus::Failed;
                row.last_event_id = event.event_id;
                row.updated_ts = event.ts;
            }
            row
        }),
        EventPayload::CommandCanceled(p) => current.map(|mut row| {
            if row.command_id == p.command_id {
                row.status = CommandStatus::Canceled;
                row.last_event_id = event.event_id;
                row.updated_ts = event.ts;
            }
            row
        }),
        // Audit fact only: the paired CardTransitioned(RUNNING->RETRY_SCHEDULED)
        // carries the card-side effect, and the command row stays Failed
        // until the retry's own CommandStarted arrives.
        EventPayload::CommandRetryScheduled(_) => current,
        _ => current,
    }
}

pub fn project_run(event: &Event, current: Option<Run>) -> Option<Run> {
    if let Some(row) = &current {
        if !newer(event, row.last_event_id) {
            return current;
        }
    }

    match &event.payload {
        EventPayload::CommandStarted(p) => Some(Run {
            run_id: p.run_id,
            scope: event.scope,
            command_id: p.command_id,
            status: RunStatus::Running,
            attempt: p.attempt,
            started_ts: Some(event.ts),
            ended_ts: None,
            executor: p.executor.clone(),
            error: None,
            last_event_id: event.event_id,
        }),
        EventPayload::CommandSucceeded(p) => current.map(|mut row| {
            if row.run_id == p.run_id {
                row.status = RunStatus::Succeeded;
                row.ended_ts = Some(event.ts);
                row.last_event_id = event.event_id;
            }
            row
        }),
        EventPayload::CommandFailed(p) => current.map(|mut row| {
            if row.run_id == p.run_id {
                row.status = RunStatus::Failed;
                row.ended_ts = Some(event.ts);
                row.error = Some(p.error.clone());
                row.last_event_id = event.event_id;
            }
            row
        }),
        _ => current,
    }
}

pub fn project_card(event: &Event, current: Option<Card>) -> Option<Card> {
    if let Some(row) = &current {
        if !newer(event, row.last_event_id) {
            return current;
        }
    }

    match &event.payload {
        EventPayload::CardCreated(p) => Some(Card::new(
            p.card_id,
            event.scope,
            p.title.clone(),
            p.spec.clone(),
            p.priority,
            p.capabilities.clone(),
            event.ts,
            event.event_id,
        )),
        EventPayload::CardTransitioned(p) => current.map(|mut row| {
            if row.card_id == p.card_id && row.state.can_transition_to(p.to) {
                let retry_at = if p.to == CardState::RetryScheduled {
                    p.retry_at_ts
                } else {
                    None
                };
                row.apply_transition(p.to, retry_at, event.ts, event.event_id);
            }
            row
        }),
        _ => current,
    }
}

pub fn project_decision(event: &Event, current: Option<Decision>) -> Option<Decision> {
    if let Some(row) = &current {
        if !newer(event, row.last_event_id) {
            return current;
        }
    }

    match &event.payload {
        EventPayload::DecisionRequested(p) => Some(Decision {
            decision_id: p.decision_id,
            scope: event.scope,
            card_id: p.card_id,
            command_id: p.command_id,
            run_id: p.run_id,
            state: DecisionState::Pending,
            urgency: p.urgency,
            title: p.title.clone(),
            context_summary: p.context_summary.clone(),
            options: p.options.clone(),
            artifact_refs: p.artifact_refs.clone(),
            source_thread: p.source_thread.clone(),
            requested_at: event.ts,
            expires_at: p.expires_at,
            fallback_option: p.fallback_option.clone(),
            claimed_by: None,
            claimed_until: None,
            rendered_option: None,
            rendered_by: None,
            rendered_at: None,
            last_event_id: event.event_id,
        }),
        EventPayload::DecisionClaimed(p) => current.map(|mut row| {
            if row.decision_id == p.decision_id {
                row.state = DecisionState::Claimed;
                row.claimed_by = Some(p.claimed_by);
                row.claimed_until = Some(p.claimed_until);
                row.last_event_id = event.event_id;
            }
            row
        }),
        EventPayload::DecisionClaimExpired(p) => current.map(|mut row| {
            if row.decision_id == p.decision_id {
                row.state = DecisionState::Pending;
                row.claimed_by = None;
                row.claimed_until = None;
                row.last_event_id = event.event_id;
            }
            row
        }),
        EventPayload::DecisionRendered(p) => current.map(|mut row| {
            if row.decision_id == p.decision_id {
                row.state = DecisionState::Rendered;
                row.rendered_option = Some(p.selected_option.clone());
                row.rendered_by = Some(p.rendered_by.clone());
                row.rendered_at = Some(event.ts);
                row.claimed_by = None;
                row.claimed_until = None;
                row.last_event_id = event.event_id;
            }
            row
        }),
        EventPayload::DecisionExpired(p) => current.map(|mut row| {
            if row.decision_id == p.decision_id {
                row.state = DecisionState::Expired;
                row.claimed_by = None;
                row.claimed_until = None;
                row.last_event_id = event.event_id;
            }
            row
        }),
        EventPayload::DecisionDeferred(p) => current.map(|mut row| {
            if row.decision_id == p.decision_id {
                if let Some(new_expiry) = p.new_expires_at {
                    row.expires_at = Some(new_expiry);
                }
                row.last_event_id = event.event_id;
            }
            row
        }),
        _ => current,
    }
}

pub fn project_artifact(event: &Event, current: Option<Artifact>) -> Option<Artifact> {
    match &event.payload {
        EventPayload::ArtifactProduced(p) => {
            // Artifacts are immutable once produced; the only legal write is
            // the first one. A duplicate `ArtifactProduced` for an id already
            // on record (e.g. replayed twice) is a no-op rather than an
            // overwrite.
            if current.is_some() {
                return current;
            }
            Some(Artifact {
                artifact_id: p.artifact_id,
                scope: event.scope,
                content_sha256: p.content_sha256.clone(),
                media_type: p.media_type.clone(),
                logical_name: p.logical_name.clone(),
                byte_size: p.byte_size,
                labels: p.labels.clone(),
                created_at: event.ts,
                provenance: p.provenance.clone(),
                storage_pointer: p.storage_pointer.clone(),
                links: p.links.clone(),
            })
        }
        _ => current,
    }
}
