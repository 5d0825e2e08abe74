//! The card state machine. The transition table is closed: every
//! edge a caller might request is validated against it before anything is
//! written.

use crate::error::{CoreError, CoreResult};
use crate::ids::{CardId, DecisionId, RunId, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    Ready,
    Running,
    NeedsDecision,
    RetryScheduled,
    Done,
    Failed,
}

impl CardState {
    /// Validates `self -> to` against the closed transition table.
    pub fn can_transition_to(self, to: CardState) -> bool {
        use CardState::*;
        matches!(
            (self, to),
            (Ready, Running)
                | (Running, Done)
                | (Running, NeedsDecision)
                | (Running, Failed)
                | (Running, RetryScheduled)
                | (NeedsDecision, Running)
                | (NeedsDecision, Failed)
                | (RetryScheduled, Ready)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CardState::Done | CardState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CardConstraints {
    pub concurrency_key: Option<String>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardSpec {
    pub command_type: String,
    pub args: Option<serde_json::Value>,
    #[serde(default)]
    pub constraints: CardConstraints,
}

/// `0 = most urgent` is enforced at the type level rather than left as an
/// unchecked integer convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u16);

impl Priority {
    pub const DEFAULT: Priority = Priority(50);
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub card_id: CardId,
    pub scope: Scope,
    pub state: CardState,
    pub priority: Priority,
    pub title: String,
    pub spec: CardSpec,
    pub attempt: u32,
    pub retry_at_ts: Option<DateTime<Utc>>,
    pub capabilities: Option<Vec<String>>,
    pub created_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,

    // Reserved for external-worker leasing; always `None` in this design.
    pub leased_to: Option<String>,
    pub lease_until_ts: Option<DateTime<Utc>>,
    pub last_heartbeat_ts: Option<DateTime<Utc>>,

    pub last_event_id: crate::ids::EventId,
}

impl Card {
    pub fn new(
        card_id: CardId,
        scope: Scope,
        title: String,
        spec: CardSpec,
        priority: Priority,
        capabilities: Option<Vec<String>>,
        now: DateTime<Utc>,
        event_id: crate::ids::EventId,
    ) -> Self {
        Self {
            card_id,
            scope,
            state: CardState::Ready,
            priority,
            title,
            spec,
            attempt: 0,
            retry_at_ts: None,
            capabilities,
            created_ts: now,
            updated_ts: now,
            leased_to: None,
            lease_until_ts: None,
            last_heartbeat_ts: None,
            last_event_id: event_id,
        }
    }

    /// Applies a validated transition in place. Callers must have already
    /// confirmed `self.state.can_transition_to(to)`; this only applies the
    /// resulting patch, it does not itself validate.
    pub fn apply_transition(
        &mut self,
        to: CardState,
        retry_at_ts: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        event_id: crate::ids::EventId,
    ) {
        if to == CardState::Running {
            self.attempt += 1;
        }
        if to == CardState::RetryScheduled {
            self.retry_at_ts = retry_at_ts;
        } else if self.state == CardState::RetryScheduled {
            self.retry_at_ts = None;
        }
        self.last_event_id = event_id;
        self.state = to;
        self.updated_ts = now;
    }
}

/// Parameters for `transition_card`, separated from `Card` because a
/// transition request only carries the subject ids relevant to the edge
/// being taken, not the full row.
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub card_id: CardId,
    pub to: CardState,
    pub reason: String,
    pub run_id: Option<RunId>,
    pub decision_id: Option<DecisionId>,
    pub retry_at_ts: Option<DateTime<Utc>>,
}

pub fn validate_transition(from: CardState, to: CardState) -> CoreResult<()> {
    if from.is_terminal() {
        return Err(CoreError::InvalidTransition { from, to });
    }
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}
