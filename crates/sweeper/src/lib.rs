//! # ledger-sweeper
//!
//! The periodic liveness loop: releases retry-scheduled cards whose timer
//! fired, expires decisions past their deadline (applying any fallback),
//! reclaims abandoned claim leases, and sheds load when a project's
//! `now`-urgency backlog grows past a threshold. All four phases write
//! through the same [`ledger_engine::Ledger::commit`] and
//! [`ledger_engine::cards::transition_card`] paths the interactive
//! operations use — the sweeper never patches a read model directly.
//!
//! Each item in a phase is isolated with [`ItemOutcome`]/[`BatchOutcome`]:
//! one item's failure is recorded and the pass continues, the same
//! per-item isolation a job queue's `mark_failed` retry loop gives a
//! failed job without aborting the rest of the batch.

use chrono::{DateTime, Utc};
use ledger_core::decision::SYSTEM_SWEEPER;
use ledger_core::event::{
    DecisionClaimExpired, DecisionDeferred, DecisionExpired, DecisionRendered, DeferralAction,
    SubjectIds,
};
use ledger_core::{
    AuthContext, BatchOutcome, CardState, CorrelationId, CoreResult, Decision, EventBuilder,
    EventPayload, ItemOutcome, Producer, Role, RuntimeConfig, Scope,
};
use ledger_engine::cards::{transition_card, TransitionRequest};
use ledger_engine::Ledger;

/// The four phase outcomes of one sweep pass, run in this order every time.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub retries_released: BatchOutcome,
    pub decisions_expired: BatchOutcome,
    pub claims_reclaimed: BatchOutcome,
    pub load_shed: BatchOutcome,
}

fn system_auth(scope: Scope) -> AuthContext {
    AuthContext {
        user_id: None,
        tenant_id: scope.tenant_id,
        project_id: scope.project_id,
        role: Role::Owner,
    }
}

fn failed(err: ledger_core::CoreError) -> ItemOutcome {
    ItemOutcome::Failed { error: anyhow::Error::new(err) }
}

/// Runs one sweep pass. `now` is threaded in rather than read from the
/// system clock so tests can drive every phase deterministically.
pub async fn sweep(ledger: &dyn Ledger, config: &RuntimeConfig, producer: &Producer, now: DateTime<Utc>) -> SweepReport {
    SweepReport {
        retries_released: release_retries(ledger, producer, now).await,
        decisions_expired: expire_decisions(ledger, producer, now).await,
        claims_reclaimed: reclaim_claims(ledger, producer, now).await,
        load_shed: shed_load(ledger, config, producer, now).await,
    }
}

async fn release_retries(ledger: &dyn Ledger, producer: &Producer, now: DateTime<Utc>) -> BatchOutcome {
    let mut batch = BatchOutcome::default();
    let cards = match ledger.reads().cards_due_for_retry(now).await {
        Ok(cards) => cards,
        Err(e) => {
            batch.record(failed(e));
            return batch;
        }
    };
    for card in cards {
        let auth = system_auth(card.scope);
        let result = transition_card(
            ledger,
            &auth,
            producer,
            now,
            TransitionRequest {
                card_id: card.card_id,
                to: CardState::Ready,
                reason: "retry timer fired".into(),
                correlation_id: CorrelationId::new(),
                causation_id: None,
                retry_at_ts: None,
            },
        )
        .await;
        batch.record(match result {
            Ok(_) => ItemOutcome::Ok,
            Err(e) => failed(e),
        });
    }
    batch
}

async fn expire_decisions(ledger: &dyn Ledger, producer: &Producer, now: DateTime<Utc>) -> BatchOutcome {
    let mut batch = BatchOutcome::default();
    let decisions = match ledger.reads().decisions_expiring(now).await {
        Ok(decisions) => decisions,
        Err(e) => {
            batch.record(failed(e));
            return batch;
        }
    };
    for decision in decisions {
        batch.record(match expire_one(ledger, producer, now, &decision).await {
            Ok(()) => ItemOutcome::Ok,
            Err(e) => failed(e),
        });
    }
    batch
}

async fn expire_one(ledger: &dyn Ledger, producer: &Producer, now: DateTime<Utc>, decision: &Decision) -> CoreResult<()> {
    let correlation_id = CorrelationId::from_command(decision.command_id);
    let expired = EventBuilder::new(decision.scope, correlation_id)
        .subjects(SubjectIds::decision(decision.decision_id))
        .build(
            EventPayload::DecisionExpired(DecisionExpired {
                decision_id: decision.decision_id,
                had_fallback: decision.fallback_option.is_some(),
            }),
            now,
            producer.clone(),
        );
    ledger.commit(vec![expired]).await?;

    match &decision.fallback_option {
        Some(option) => {
            auto_render(ledger, producer, now, decision, correlation_id, option, "auto-resolved via fallback on expiration").await?;
            reopen_card_if_needs_decision(ledger, producer, now, decision, correlation_id, "decision expired, fallback applied").await
        }
        None => fail_card_if_needs_decision(ledger, producer, now, decision, correlation_id, "decision expired, no fallback").await,
    }
}

async fn auto_render(
    ledger: &dyn Ledger,
    producer: &Producer,
    now: DateTime<Utc>,
    decision: &Decision,
    correlation_id: CorrelationId,
    option: &str,
    note: &str,
) -> CoreResult<()> {
    let event = EventBuilder::new(decision.scope, correlation_id)
        .subjects(SubjectIds::decision(decision.decision_id))
        .build(
            EventPayload::DecisionRendered(DecisionRendered {
                decision_id: decision.decision_id,
                selected_option: option.to_string(),
                rendered_by: SYSTEM_SWEEPER.to_string(),
                note: Some(note.to_string()),
            }),
            now,
            producer.clone(),
        );
    ledger.commit(vec![event]).await?;
    Ok(())
}

async fn reopen_card_if_needs_decision(
    ledger: &dyn Ledger,
    producer: &Producer,
    now: DateTime<Utc>,
    decision: &Decision,
    correlation_id: CorrelationId,
    reason: &str,
) -> CoreResult<()> {
    let Some(card) = ledger.reads().get_card(&decision.scope, decision.card_id).await? else {
        return Ok(());
    };
    if card.state != CardState::NeedsDecision {
        return Ok(());
    }
    let auth = system_auth(decision.scope);
    transition_card(
        ledger,
        &auth,
        producer,
        now,
        TransitionRequest {
            card_id: decision.card_id,
            to: CardState::Running,
            reason: reason.to_string(),
            correlation_id,
            causation_id: None,
            retry_at_ts: None,
        },
    )
    .await?;
    Ok(())
}

async fn fail_card_if_needs_decision(
    ledger: &dyn Ledger,
    producer: &Producer,
    now: DateTime<Utc>,
    decision: &Decision,
    correlation_id: CorrelationId,
    reason: &str,
) -> CoreResult<()> {
    let Some(card) = ledger.reads().get_card(&decision.scope, decision.card_id).await? else {
        return Ok(());
    };
    if card.state != CardState::NeedsDecision {
        return Ok(());
    }
    let auth = system_auth(decision.scope);
    transition_card(
        ledger,
        &auth,
        producer,
        now,
        TransitionRequest {
            card_id: decision.card_id,
            to: CardState::Failed,
            reason: reason.to_string(),
            correlation_id,
            causation_id: None,
            retry_at_ts: None,
        },
    )
    .await?;
    Ok(())
}

async fn reclaim_claims(ledger: &dyn Ledger, producer: &Producer, now: DateTime<Utc>) -> BatchOutcome {
    let mut batch = BatchOutcome::default();
    let decisions = match ledger.reads().decisions_with_expired_claims(now).await {
        Ok(decisions) => decisions,
        Err(e) => {
            batch.record(failed(e));
            return batch;
        }
    };
    for decision in decisions {
        let (Some(claimed_by), Some(claimed_until)) = (decision.claimed_by, decision.claimed_until) else {
            batch.record(ItemOutcome::Skipped { reason: format!("decision {} has no active claim", decision.decision_id) });
            continue;
        };
        let correlation_id = CorrelationId::from_command(decision.command_id);
        let event = EventBuilder::new(decision.scope, correlation_id)
            .subjects(SubjectIds::decision(decision.decision_id))
            .build(
                EventPayload::DecisionClaimExpired(DecisionClaimExpired {
                    decision_id: decision.decision_id,
                    previous_claimed_by: claimed_by,
                    previous_claimed_until: claimed_until,
                }),
                now,
                producer.clone(),
            );
        batch.record(match ledger.commit(vec![event]).await {
            Ok(_) => ItemOutcome::Ok,
            Err(e) => failed(e),
        });
    }
    batch
}

async fn shed_load(ledger: &dyn Ledger, config: &RuntimeConfig, producer: &Producer, now: DateTime<Utc>) -> BatchOutcome {
    let mut batch = BatchOutcome::default();
    let backlog = match ledger.reads().now_urgency_backlog().await {
        Ok(backlog) => backlog,
        Err(e) => {
            batch.record(failed(e));
            return batch;
        }
    };
    for (scope, count) in backlog {
        if count <= config.defer_threshold {
            continue;
        }
        if count > config.emergency_threshold {
            tracing::error!(
                tenant_id = %scope.tenant_id,
                project_id = %scope.project_id,
                count,
                threshold = config.emergency_threshold,
                "now-urgency decision backlog exceeds emergency threshold"
            );
            if let Err(e) = emit_slo_breach(ledger, producer, now, scope, count, config.emergency_threshold).await {
                batch.record(failed(e));
            }
        }

        let pending = match ledger.reads().pending_decisions(&scope).await {
            Ok(pending) => pending,
            Err(e) => {
                batch.record(failed(e));
                continue;
            }
        };
        for decision in pending.into_iter().filter(|d| d.urgency == ledger_core::Urgency::Whenever) {
            batch.record(match defer_one(ledger, config, producer, now, &decision).await {
                Ok(()) => ItemOutcome::Ok,
                Err(e) => failed(e),
            });
        }
    }
    batch
}

async fn defer_one(ledger: &dyn Ledger, config: &RuntimeConfig, producer: &Producer, now: DateTime<Utc>, decision: &Decision) -> CoreResult<()> {
    let correlation_id = CorrelationId::from_command(decision.command_id);
    match &decision.fallback_option {
        Some(option) => {
            let deferred = EventBuilder::new(decision.scope, correlation_id)
                .subjects(SubjectIds::decision(decision.decision_id))
                .build(
                    EventPayload::DecisionDeferred(DecisionDeferred {
                        decision_id: decision.decision_id,
                        action: DeferralAction::AutoResolvedWithFallback,
                        new_expires_at: None,
                    }),
                    now,
                    producer.clone(),
                );
            ledger.commit(vec![deferred]).await?;
            auto_render(ledger, producer, now, decision, correlation_id, option, "auto-resolved via fallback under load shedding").await?;
            reopen_card_if_needs_decision(ledger, producer, now, decision, correlation_id, "decision deferred, fallback applied").await
        }
        None => {
            let new_expires_at = decision.expires_at.unwrap_or(now) + config.load_shed_extension();
            let deferred = EventBuilder::new(decision.scope, correlation_id)
                .subjects(SubjectIds::decision(decision.decision_id))
                .build(
                    EventPayload::DecisionDeferred(DecisionDeferred {
                        decision_id: decision.decision_id,
                        action: DeferralAction::ExtendedExpiry,
                        new_expires_at: Some(new_expires_at),
                    }),
                    now,
                    producer.clone(),
                );
            ledger.commit(vec![deferred]).await?;
            Ok(())
        }
    }
}

async fn emit_slo_breach(ledger: &dyn Ledger, producer: &Producer, now: DateTime<Utc>, scope: Scope, count: usize, threshold: usize) -> CoreResult<()> {
    let event = EventBuilder::new(scope, CorrelationId::new()).build(
        EventPayload::SloBreached(ledger_core::event::SloBreached {
            project_id: scope.project_id,
            metric: "now_urgency_decision_backlog".into(),
            observed: count as f64,
            threshold: threshold as f64,
        }),
        now,
        producer.clone(),
    );
    ledger.commit(vec![event]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::card::CardSpec;
    use ledger_core::decision::{DecisionOption, Urgency};
    use ledger_core::event::{CardCreated, CardTransitioned, DecisionRequested};
    use ledger_core::{CardId, CommandId, Priority, ProjectId, RunId, TenantId};
    use ledger_engine::MemoryLedger;

    fn producer() -> Producer {
        Producer { service: "test-sweeper".into(), version: "0".into() }
    }

    fn scope() -> Scope {
        Scope::new(TenantId::new(), ProjectId::new())
    }

    async fn seed_card_in_retry(ledger: &MemoryLedger, scope: Scope, producer: &Producer, now: DateTime<Utc>, retry_at_ts: DateTime<Utc>) -> CardId {
        let card_id = CardId::new();
        let correlation_id = CorrelationId::new();
        let created = EventBuilder::new(scope, correlation_id)
            .subjects(SubjectIds::card(card_id))
            .build(
                EventPayload::CardCreated(CardCreated {
                    card_id,
                    title: "t".into(),
                    spec: CardSpec { command_type: "x".into(), args: None, constraints: Default::default() },
                    priority: Priority::default(),
                    capabilities: None,
                }),
                now,
                producer.clone(),
            );
        ledger.commit(vec![created]).await.unwrap();
        for (from, to) in [(CardState::Ready, CardState::Running), (CardState::Running, CardState::RetryScheduled)] {
            let event = EventBuilder::new(scope, correlation_id)
                .subjects(SubjectIds::card(card_id))
                .build(
                    EventPayload::CardTransitioned(CardTransitioned {
                        card_id,
                        from,
                        to,
                        reason: "test".into(),
                        retry_at_ts: if to == CardState::RetryScheduled { Some(retry_at_ts) } else { None },
                    }),
                    now,
                    producer.clone(),
                );
            ledger.commit(vec![event]).await.unwrap();
        }
        card_id
    }

    #[tokio::test]
    async fn release_retries_reopens_cards_whose_timer_fired() {
        let ledger = MemoryLedger::in_memory();
        let producer = producer();
        let scope = scope();
        let now = Utc::now();
        let card_id = seed_card_in_retry(&ledger, scope, &producer, now, now - chrono::Duration::seconds(1)).await;

        let config = RuntimeConfig::default();
        let report = sweep(&ledger, &config, &producer, now).await;

        assert_eq!(report.retries_released.processed, 1);
        assert_eq!(report.retries_released.failed, 0);
        let card = ledger.reads().get_card(&scope, card_id).await.unwrap().unwrap();
        assert_eq!(card.state, CardState::Ready);
        assert!(card.retry_at_ts.is_none());
    }

    #[tokio::test]
    async fn release_retries_leaves_cards_whose_timer_has_not_fired() {
        let ledger = MemoryLedger::in_memory();
        let producer = producer();
        let scope = scope();
        let now = Utc::now();
        let card_id = seed_card_in_retry(&ledger, scope, &producer, now, now + chrono::Duration::hours(1)).await;

        let config = RuntimeConfig::default();
        let report = sweep(&ledger, &config, &producer, now).await;

        assert_eq!(report.retries_released.processed, 0);
        let card = ledger.reads().get_card(&scope, card_id).await.unwrap().unwrap();
        assert_eq!(card.state, CardState::RetryScheduled);
    }

    #[tokio::test]
    async fn expiring_decision_without_fallback_fails_its_card() {
        let ledger = MemoryLedger::in_memory();
        let producer = producer();
        let scope = scope();
        let now = Utc::now();

        let command_id = CommandId::new();
        let card_id = CardId::new();
        let run_id = RunId::new();
        let decision_id = ledger_core::DecisionId::new();
        let correlation_id = CorrelationId::from_command(command_id);

        let created = EventBuilder::new(scope, correlation_id)
            .subjects(SubjectIds::card(card_id))
            .build(
                EventPayload::CardCreated(CardCreated {
                    card_id,
                    title: "t".into(),
                    spec: CardSpec { command_type: "x".into(), args: None, constraints: Default::default() },
                    priority: Priority::default(),
                    capabilities: None,
                }),
                now,
                producer.clone(),
            );
        ledger.commit(vec![created]).await.unwrap();
        let to_running = EventBuilder::new(scope, correlation_id)
            .subjects(SubjectIds::card(card_id))
            .build(
                EventPayload::CardTransitioned(CardTransitioned {
                    card_id,
                    from: CardState::Ready,
                    to: CardState::Running,
                    reason: "test".into(),
                    retry_at_ts: None,
                }),
                now,
                producer.clone(),
            );
        ledger.commit(vec![to_running]).await.unwrap();
        let to_needs_decision = EventBuilder::new(scope, correlation_id)
            .subjects(SubjectIds::card(card_id))
            .build(
                EventPayload::CardTransitioned(CardTransitioned {
                    card_id,
                    from: CardState::Running,
                    to: CardState::NeedsDecision,
                    reason: "test".into(),
                    retry_at_ts: None,
                }),
                now,
                producer.clone(),
            );
        ledger.commit(vec![to_needs_decision]).await.unwrap();

        let requested = EventBuilder::new(scope, correlation_id)
            .subjects(SubjectIds::decision(decision_id))
            .build(
                EventPayload::DecisionRequested(DecisionRequested {
                    decision_id,
                    card_id,
                    command_id,
                    run_id,
                    urgency: Urgency::Now,
                    title: "pick one".into(),
                    context_summary: None,
                    options: vec![DecisionOption { key: "a".into(), label: "A".into(), consequence: "".into() }],
                    artifact_refs: None,
                    source_thread: None,
                    fallback_option: None,
                    expires_at: Some(now - chrono::Duration::seconds(1)),
                }),
                now,
                producer.clone(),
            );
        ledger.commit(vec![requested]).await.unwrap();

        let config = RuntimeConfig::default();
        let report = sweep(&ledger, &config, &producer, now).await;

        assert_eq!(report.decisions_expired.processed, 1);
        assert_eq!(report.decisions_expired.failed, 0);
        let card = ledger.reads().get_card(&scope, card_id).await.unwrap().unwrap();
        assert_eq!(card.state, CardState::Failed);
        let decision = ledger.reads().get_decision(&scope, decision_id).await.unwrap().unwrap();
        assert_eq!(decision.state, ledger_core::DecisionState::Expired);
    }

    #[tokio::test]
    async fn expiring_decision_with_fallback_auto_renders_and_resumes_the_card() {
        let ledger = MemoryLedger::in_memory();
        let producer = producer();
        let scope = scope();
        let now = Utc::now();

        let command_id = CommandId::new();
        let card_id = CardId::new();
        let run_id = RunId::new();
        let decision_id = ledger_core::DecisionId::new();
        let correlation_id = CorrelationId::from_command(command_id);

        for (from, to) in [
            (None, Some(CardState::Ready)),
            (Some(CardState::Ready), Some(CardState::Running)),
            (Some(CardState::Running), Some(CardState::NeedsDecision)),
        ] {
            match (from, to) {
                (None, Some(_)) => {
                    let created = EventBuilder::new(scope, correlation_id)
                        .subjects(SubjectIds::card(card_id))
                        .build(
                            EventPayload::CardCreated(CardCreated {
                                card_id,
                                title: "t".into(),
                                spec: CardSpec { command_type: "x".into(), args: None, constraints: Default::default() },
                                priority: Priority::default(),
                                capabilities: None,
                            }),
                            now,
                            producer.clone(),
                        );
                    ledger.commit(vec![created]).await.unwrap();
                }
                (Some(from), Some(to)) => {
                    let event = EventBuilder::new(scope, correlation_id)
                        .subjects(SubjectIds::card(card_id))
                        .build(
                            EventPayload::CardTransitioned(CardTransitioned {
                                card_id,
                                from,
                                to,
                                reason: "test".into(),
                                retry_at_ts: None,
                            }),
                            now,
                            producer.clone(),
                        );
                    ledger.commit(vec![event]).await.unwrap();
                }
                _ => unreachable!(),
            }
        }

        let requested = EventBuilder::new(scope, correlation_id)
            .subjects(SubjectIds::decision(decision_id))
            .build(
                EventPayload::DecisionRequested(DecisionRequested {
                    decision_id,
                    card_id,
                    command_id,
                    run_id,
                    urgency: Urgency::Now,
                    title: "pick one".into(),
                    context_summary: None,
                    options: vec![
                        DecisionOption { key: "a".into(), label: "A".into(), consequence: "".into() },
                        DecisionOption { key: "b".into(), label: "B".into(), consequence: "".into() },
                    ],
                    artifact_refs: None,
                    source_thread: None,
                    fallback_option: Some("b".into()),
                    expires_at: Some(now - chrono::Duration::seconds(1)),
                }),
                now,
                producer.clone(),
            );
        ledger.commit(vec![requested]).await.unwrap();

        let config = RuntimeConfig::default();
        let report = sweep(&ledger, &config, &producer, now).await;

        assert_eq!(report.decisions_expired.processed, 1);
        assert_eq!(report.decisions_expired.failed, 0);
        let decision = ledger.reads().get_decision(&scope, decision_id).await.unwrap().unwrap();
        assert_eq!(decision.state, ledger_core::DecisionState::Rendered);
        assert_eq!(decision.rendered_option.as_deref(), Some("b"));
        assert_eq!(decision.rendered_by.as_deref(), Some(SYSTEM_SWEEPER));
        let card = ledger.reads().get_card(&scope, card_id).await.unwrap().unwrap();
        assert_eq!(card.state, CardState::Running);
    }
}
