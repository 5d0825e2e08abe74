//! The event envelope and the closed set of event payloads. `Event` is
//! the sole unit the Event Log ever writes; everything else in the system
//! is a read model derived from a stream of these.

use crate::card::CardState;
use crate::decision::Urgency;
use crate::ids::{
    ArtifactId, CardId, CommandId, CorrelationId, DecisionId, EventId, RunId, Scope, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Producer {
    pub service: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectIds {
    pub command_id: Option<CommandId>,
    pub run_id: Option<RunId>,
    pub card_id: Option<CardId>,
    pub decision_id: Option<DecisionId>,
}

impl SubjectIds {
    pub fn none() -> Self {
        Self {
            command_id: None,
            run_id: None,
            card_id: None,
            decision_id: None,
        }
    }

    pub fn command(command_id: CommandId) -> Self {
        Self {
            command_id: Some(command_id),
            ..Self::none()
        }
    }

    pub fn card(card_id: CardId) -> Self {
        Self {
            card_id: Some(card_id),
            ..Self::none()
        }
    }

    pub fn decision(decision_id: DecisionId) -> Self {
        Self {
            decision_id: Some(decision_id),
            ..Self::none()
        }
    }
}

/// The closed set of event payloads. The `type` discriminator (serde's
/// `tag`) *is* the wire-level `type` field on the event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    CommandRequested(CommandRequested),
    CommandStarted(CommandStarted),
    CommandSucceeded(CommandSucceeded),
    CommandFailed(CommandFailed),
    CommandCanceled(CommandCanceled),
    CommandRetryScheduled(CommandRetryScheduled),
    CommandSkippedDuplicate(CommandSkippedDuplicate),

    DecisionRequested(DecisionRequested),
    DecisionClaimed(DecisionClaimed),
    DecisionRendered(DecisionRendered),
    DecisionRenderRejected(DecisionRenderRejected),
    DecisionExpired(DecisionExpired),
    DecisionClaimExpired(DecisionClaimExpired),
    DecisionDeferred(DecisionDeferred),

    ArtifactProduced(ArtifactProduced),

    CardCreated(CardCreated),
    CardTransitioned(CardTransitioned),

    SloBreached(SloBreached),
    ReconciliationDrift(ReconciliationDrift),
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::CommandRequested(_) => "CommandRequested",
            EventPayload::CommandStarted(_) => "CommandStarted",
            EventPayload::CommandSucceeded(_) => "CommandSucceeded",
            EventPayload::CommandFailed(_) => "CommandFailed",
            EventPayload::CommandCanceled(_) => "CommandCanceled",
            EventPayload::CommandRetryScheduled(_) => "CommandRetryScheduled",
            EventPayload::CommandSkippedDuplicate(_) => "CommandSkippedDuplicate",
            EventPayload::DecisionRequested(_) => "DecisionRequested",
            EventPayload::DecisionClaimed(_) => "DecisionClaimed",
            EventPayload::DecisionRendered(_) => "DecisionRendered",
            EventPayload::DecisionRenderRejected(_) => "DecisionRenderRejected",
            EventPayload::DecisionExpired(_) => "DecisionExpired",
            EventPayload::DecisionClaimExpired(_) => "DecisionClaimExpired",
            EventPayload::DecisionDeferred(_) => "DecisionDeferred",
            EventPayload::ArtifactProduced(_) => "ArtifactProduced",
            EventPayload::CardCreated(_) => "CardCreated",
            EventPayload::CardTransitioned(_) => "CardTransitioned",
            EventPayload::SloBreached(_) => "SloBreached",
            EventPayload::ReconciliationDrift(_) => "ReconciliationDrift",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequested {
    pub command_id: CommandId,
    pub card_id: CardId,
    pub title: String,
    pub command_spec: crate::command::CommandSpec,
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStarted {
    pub command_id: CommandId,
    pub run_id: RunId,
    pub attempt: u32,
    pub executor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSucceeded {
    pub command_id: CommandId,
    pub run_id: RunId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFailed {
    pub command_id: CommandId,
    pub run_id: RunId,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandCanceled {
    pub command_id: CommandId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRetryScheduled {
    pub command_id: CommandId,
    pub run_id: RunId,
    pub retry_at_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSkippedDuplicate {
    pub original_command_id: CommandId,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequested {
    pub decision_id: DecisionId,
    pub card_id: CardId,
    pub command_id: CommandId,
    pub run_id: RunId,
    pub urgency: Urgency,
    pub title: String,
    pub context_summary: Option<String>,
    pub options: Vec<crate::decision::DecisionOption>,
    pub artifact_refs: Option<Vec<ArtifactId>>,
    pub source_thread: Option<String>,
    pub fallback_option: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionClaimed {
    pub decision_id: DecisionId,
    pub claimed_by: UserId,
    pub claimed_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRendered {
    pub decision_id: DecisionId,
    pub selected_option: String,
    pub rendered_by: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRenderRejected {
    pub decision_id: DecisionId,
    pub attempted_option: String,
    pub attempted_by: UserId,
    pub current_state: crate::decision::DecisionState,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionExpired {
    pub decision_id: DecisionId,
    pub had_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionClaimExpired {
    pub decision_id: DecisionId,
    pub previous_claimed_by: UserId,
    pub previous_claimed_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferralAction {
    AutoResolvedWithFallback,
    ExtendedExpiry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionDeferred {
    pub decision_id: DecisionId,
    pub action: DeferralAction,
    pub new_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactProduced {
    pub artifact_id: ArtifactId,
    pub content_sha256: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub logical_name: String,
    pub byte_size: u64,
    pub labels: Option<serde_json::Value>,
    pub provenance: crate::artifact::Provenance,
    pub storage_pointer: crate::artifact::StoragePointer,
    pub links: Option<Vec<crate::artifact::ArtifactLinkRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardCreated {
    pub card_id: CardId,
    pub title: String,
    pub spec: crate::card::CardSpec,
    pub priority: crate::card::Priority,
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardTransitioned {
    pub card_id: CardId,
    pub from: CardState,
    pub to: CardState,
    pub reason: String,
    pub retry_at_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloBreached {
    pub project_id: crate::ids::ProjectId,
    pub metric: String,
    pub observed: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationDrift {
    pub description: String,
    pub detail: serde_json::Value,
}

/// The full immutable event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub scope: Scope,
    pub version: u32,
    pub ts: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<EventId>,
    pub subjects: SubjectIds,
    pub idempotency_key: Option<String>,
    pub producer: Producer,
    pub tags: Option<serde_json::Value>,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        self.payload.type_name()
    }
}

/// Builds an `Event` envelope around a payload, filling in ids/timestamps.
/// Every admission/transition/lifecycle operation goes through this rather
/// than constructing `Event` literals by hand, so the envelope fields stay
/// consistent everywhere an event is appended.
pub struct EventBuilder {
    pub scope: Scope,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<EventId>,
    pub subjects: SubjectIds,
    pub idempotency_key: Option<String>,
    pub tags: Option<serde_json::Value>,
}

impl EventBuilder {
    pub fn new(scope: Scope, correlation_id: CorrelationId) -> Self {
        Self {
            scope,
            correlation_id,
            causation_id: None,
            subjects: SubjectIds::none(),
            idempotency_key: None,
            tags: None,
        }
    }

    pub fn causation(mut self, causation_id: EventId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn subjects(mut self, subjects: SubjectIds) -> Self {
        self.subjects = subjects;
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn build(self, payload: EventPayload, now: DateTime<Utc>, producer: Producer) -> Event {
        self.build_with_id(EventId::new(), payload, now, producer)
    }

    /// Builds with a caller-chosen `event_id`, for the rare case where a
    /// payload must reference its own event's id (artifact provenance) and
    /// so the id has to be minted before the payload is assembled.
    pub fn build_with_id(self, event_id: EventId, payload: EventPayload, now: DateTime<Utc>, producer: Producer) -> Event {
        Event {
            event_id,
            scope: self.scope,
            version: 1,
            ts: now,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            subjects: self.subjects,
            idempotency_key: self.idempotency_key,
            producer,
            tags: self.tags,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ProjectId, TenantId};

    #[test]
    fn event_type_matches_payload_variant() {
        let scope = Scope::new(TenantId::new(), ProjectId::new());
        let event = EventBuilder::new(scope, CorrelationId::new()).build(
            EventPayload::CardCreated(CardCreated {
                card_id: CardId::new(),
                title: "t".into(),
                spec: crate::card::CardSpec {
                    command_type: "x".into(),
                    args: None,
                    constraints: Default::default(),
                },
                priority: Default::default(),
                capabilities: None,
            }),
            Utc::now(),
            Producer {
                service: "core".into(),
                version: "0".into(),
            },
        );
        assert_eq!(event.event_type(), "CardCreated");
    }
}
