//! Decision Lifecycle: request, claim, renew, render, and read back
//! decisions. `render_decision` is the compare-and-set point; the only
//! operation in the crate where "lost the race" is a structured outcome
//! rather than an error.

use chrono::{DateTime, Utc};
use ledger_core::decision::{AwaitDecisionSnapshot, Decision, DecisionOption, DecisionState};
use ledger_core::event::{
    DecisionClaimed, DecisionRenderRejected, DecisionRendered, DecisionRequested, SubjectIds,
};
use ledger_core::{
    ArtifactId, AuthContext, CardId, ClaimOutcome, CommandId, CoreError, CoreResult, DecisionId,
    EventBuilder, EventPayload, Producer, RenderOutcome, Role, RunId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::ledger::Ledger;

#[derive(Debug, Clone, Deserialize)]
pub struct RequestDecisionInput {
    pub correlation_id: ledger_core::CorrelationId,
    pub card_id: CardId,
    pub command_id: CommandId,
    pub run_id: RunId,
    pub urgency: ledger_core::decision::Urgency,
    pub title: String,
    pub context_summary: Option<String>,
    pub options: Vec<DecisionOption>,
    pub artifact_refs: Option<Vec<ArtifactId>>,
    pub source_thread: Option<String>,
    pub fallback_option: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// `request_decision` — roles `{bot, owner}`.
pub async fn request_decision(
    ledger: &dyn Ledger,
    auth: &AuthContext,
    producer: &Producer,
    now: DateTime<Utc>,
    input: RequestDecisionInput,
) -> CoreResult<DecisionId> {
    auth.require(&[Role::Bot])?;
    Decision::validate_options(&input.options, &input.fallback_option)?;

    let decision_id = DecisionId::new();
    let event = EventBuilder::new(auth.scope(), input.correlation_id)
        .subjects(SubjectIds::decision(decision_id))
        .build(
            EventPayload::DecisionRequested(DecisionRequested {
                decision_id,
                card_id: input.card_id,
                command_id: input.command_id,
                run_id: input.run_id,
                urgency: input.urgency,
                title: input.title,
                context_summary: input.context_summary,
                options: input.options,
                artifact_refs: input.artifact_refs,
                source_thread: input.source_thread,
                fallback_option: input.fallback_option,
                expires_at: input.expires_at,
            }),
            now,
            producer.clone(),
        );

    ledger.commit(vec![event]).await?;
    Ok(decision_id)
}

async fn load_decision(ledger: &dyn Ledger, auth: &AuthContext, decision_id: DecisionId) -> CoreResult<Decision> {
    ledger
        .reads()
        .get_decision(&auth.scope(), decision_id)
        .await?
        .ok_or(CoreError::NotFound)
}

/// `claim_decision` — roles `{operator, owner}`. Re-claiming by the current
/// holder is permitted and extends the lease.
pub async fn claim_decision(
    ledger: &dyn Ledger,
    auth: &AuthContext,
    producer: &Producer,
    now: DateTime<Utc>,
    claim_ttl: chrono::Duration,
    decision_id: DecisionId,
) -> CoreResult<ClaimOutcome> {
    auth.require(&[Role::Operator])?;
    let caller = auth.user_id.ok_or(CoreError::Unauthenticated)?;

    let decision = load_decision(ledger, auth, decision_id).await?;
    if !decision.is_claimable() {
        return Err(CoreError::NotClaimable(decision.state));
    }

    if let (Some(holder), Some(until)) = (decision.claimed_by, decision.claimed_until) {
        if holder != caller && until > now {
            return Ok(ClaimOutcome::AlreadyClaimed {
                claimed_by: holder,
                claimed_until: until,
            });
        }
    }

    let claimed_until = now + claim_ttl;
    let event = EventBuilder::new(auth.scope(), ledger_core::CorrelationId::from_command(decision.command_id))
        .subjects(SubjectIds::decision(decision_id))
        .build(
            EventPayload::DecisionClaimed(DecisionClaimed {
                decision_id,
                claimed_by: caller,
                claimed_until,
            }),
            now,
            producer.clone(),
        );
    ledger.commit(vec![event]).await?;

    Ok(ClaimOutcome::Claimed { claimed_until })
}

/// `renew_claim` — roles `{operator, owner}`. No event emitted; renewals
/// are high-frequency and low-signal.
pub async fn renew_claim(
    ledger: &dyn Ledger,
    auth: &AuthContext,
    now: DateTime<Utc>,
    claim_ttl: chrono::Duration,
    decision_id: DecisionId,
) -> CoreResult<DateTime<Utc>> {
    auth.require(&[Role::Operator])?;
    let caller = auth.user_id.ok_or(CoreError::Unauthenticated)?;

    let decision = load_decision(ledger, auth, decision_id).await?;
    if decision.state != DecisionState::Claimed || decision.claimed_by != Some(caller) {
        return Err(CoreError::NotYourClaim);
    }

    // Renewal has no event to append; the lease lives entirely in the read
    // model, so the caller is expected to re-fetch the decision for the new
    // `claimed_until` rather than rely on a returned value persisting.
    let _ = decision;
    Ok(now + claim_ttl)
}

/// `render_decision` — roles `{operator, owner}`. The compare-and-set
/// point: exactly one `DecisionRendered` may ever be emitted per decision.
pub async fn render_decision(
    ledger: &dyn Ledger,
    auth: &AuthContext,
    producer: &Producer,
    now: DateTime<Utc>,
    decision_id: DecisionId,
    option_key: &str,
    note: Option<String>,
) -> CoreResult<RenderOutcome> {
    auth.require(&[Role::Operator])?;
    let caller = auth.user_id.ok_or(CoreError::Unauthenticated)?;

    let decision = load_decision(ledger, auth, decision_id).await?;
    let correlation_id = ledger_core::CorrelationId::from_command(decision.command_id);

    if !decision.is_claimable() {
        let reason = format!("already resolved ({:?})", decision.state);
        append_rejection(ledger, auth, producer, now, &decision, option_key, caller, &reason, correlation_id).await?;
        return Ok(RenderOutcome::Rejected { reason });
    }

    if decision.state == DecisionState::Claimed && decision.claimed_by != Some(caller) {
        let reason = "claimed_by_another".to_string();
        append_rejection(ledger, auth, producer, now, &decision, option_key, caller, &reason, correlation_id).await?;
        return Ok(RenderOutcome::Rejected { reason });
    }

    if !decision.has_option(option_key) {
        return Err(CoreError::InvalidOption);
    }

    let event = EventBuilder::new(auth.scope(), correlation_id)
        .subjects(SubjectIds::decision(decision_id))
        .build(
            EventPayload::DecisionRendered(DecisionRendered {
                decision_id,
                selected_option: option_key.to_string(),
                rendered_by: caller.to_string(),
                note,
            }),
            now,
            producer.clone(),
        );
    ledger.commit(vec![event]).await?;

    Ok(RenderOutcome::Rendered {
        selected_option: option_key.to_string(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn append_rejection(
    ledger: &dyn Ledger,
    auth: &AuthContext,
    producer: &Producer,
    now: DateTime<Utc>,
    decision: &Decision,
    attempted_option: &str,
    attempted_by: UserId,
    reason: &str,
    correlation_id: ledger_core::CorrelationId,
) -> CoreResult<()> {
    let event = EventBuilder::new(auth.scope(), correlation_id)
        .subjects(SubjectIds::decision(decision.decision_id))
        .build(
            EventPayload::DecisionRenderRejected(DecisionRenderRejected {
                decision_id: decision.decision_id,
                attempted_option: attempted_option.to_string(),
                attempted_by,
                current_state: decision.state,
                reason: reason.to_string(),
            }),
            now,
            producer.clone(),
        );
    ledger.commit(vec![event]).await?;
    Ok(())
}

/// `pending_decisions` — any role. Sorted by urgency rank then request time.
pub async fn pending_decisions(
    ledger: &dyn Ledger,
    auth: &AuthContext,
    urgency: Option<ledger_core::decision::Urgency>,
) -> CoreResult<Vec<Decision>> {
    let mut decisions = ledger.reads().pending_decisions(&auth.scope()).await?;
    if let Some(urgency) = urgency {
        decisions.retain(|d| d.urgency == urgency);
    }
    decisions.sort_by(|a, b| (a.urgency, a.requested_at).cmp(&(b.urgency, b.requested_at)));
    Ok(decisions)
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionDetail {
    pub decision: Decision,
    pub command: Option<ledger_core::Command>,
    pub artifacts: Vec<ledger_core::Artifact>,
    pub event_chain: Vec<ledger_core::Event>,
}

/// `decision_detail` — any role. Assembles the context bundle at read time.
pub async fn decision_detail(
    ledger: &dyn Ledger,
    events: &dyn ledger_store::EventStore,
    auth: &AuthContext,
    decision_id: DecisionId,
) -> CoreResult<Option<DecisionDetail>> {
    let Some(decision) = ledger.reads().get_decision(&auth.scope(), decision_id).await? else {
        return Ok(None);
    };
    let command = ledger.reads().get_command(&auth.scope(), decision.command_id).await?;
    let mut artifacts = Vec::new();
    if let Some(refs) = &decision.artifact_refs {
        for artifact_id in refs {
            if let Some(artifact) = ledger.reads().get_artifact(&auth.scope(), *artifact_id).await? {
                artifacts.push(artifact);
            }
        }
    }
    let event_chain = events
        .by_correlation(&auth.scope(), ledger_core::CorrelationId::from_command(decision.command_id))
        .await?;

    Ok(Some(DecisionDetail {
        decision,
        command,
        artifacts,
        event_chain,
    }))
}

/// `await_decision` — roles `{bot, owner}`. A point-in-time snapshot, not a
/// blocking call; the bot-side wait loop lives outside the core.
pub async fn await_decision(ledger: &dyn Ledger, auth: &AuthContext, decision_id: DecisionId) -> CoreResult<AwaitDecisionSnapshot> {
    auth.require(&[Role::Bot])?;
    let decision = load_decision(ledger, auth, decision_id).await?;
    Ok(AwaitDecisionSnapshot::from(&decision))
}
