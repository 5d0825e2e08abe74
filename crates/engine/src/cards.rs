//! Card State Machine: the only place a card's `state` changes.

use chrono::{DateTime, Utc};
use ledger_core::event::{CardTransitioned, SubjectIds};
use ledger_core::{
    AuthContext, Card, CardId, CardState, CorrelationId, CoreError, CoreResult, EventBuilder,
    EventId, EventPayload, Producer,
};

use crate::ledger::Ledger;

pub struct TransitionRequest {
    pub card_id: CardId,
    pub to: CardState,
    pub reason: String,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<EventId>,
    pub retry_at_ts: Option<DateTime<Utc>>,
}

/// Validates and applies `request.to` against `card_id`'s current state,
/// appending the paired `CardTransitioned` event. Used both by interactive
/// paths (a run completing) and by the sweeper (retry release, decision
/// expiration).
pub async fn transition_card(
    ledger: &dyn Ledger,
    auth: &AuthContext,
    producer: &Producer,
    now: DateTime<Utc>,
    request: TransitionRequest,
) -> CoreResult<Card> {
    let current = ledger
        .reads()
        .get_card(&auth.scope(), request.card_id)
        .await?
        .ok_or(CoreError::CardNotFound)?;

    ledger_core::card::validate_transition(current.state, request.to)?;

    let mut builder = EventBuilder::new(auth.scope(), request.correlation_id)
        .subjects(SubjectIds::card(request.card_id));
    if let Some(causation_id) = request.causation_id {
        builder = builder.causation(causation_id);
    }
    let event = builder.build(
        EventPayload::CardTransitioned(CardTransitioned {
            card_id: request.card_id,
            from: current.state,
            to: request.to,
            reason: request.reason,
            retry_at_ts: request.retry_at_ts,
        }),
        now,
        producer.clone(),
    );

    ledger.commit(vec![event]).await?;

    ledger
        .reads()
        .get_card(&auth.scope(), request.card_id)
        .await?
        .ok_or(CoreError::CardNotFound)
}
