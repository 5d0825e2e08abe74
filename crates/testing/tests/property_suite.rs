//! Property-based suite for the cross-cutting invariants that no single
//! seed scenario exercises directly: idempotency-key uniqueness,
//! exactly-one-render, card transitions, attempt monotonicity, artifact
//! dedup, scope isolation, replay equivalence, and sweeper safety, each
//! quantified over a randomly generated input rather than one fixed
//! example. Async operations run inside a per-case `tokio` runtime since
//! `proptest!` test bodies are synchronous.

use chrono::{Duration, Utc};
use ledger_core::card::CardState;
use ledger_core::decision::{DecisionState, Urgency, SYSTEM_SWEEPER};
use ledger_core::event::SubjectIds;
use ledger_core::{CoreError, Encoding, EventBuilder, EventPayload, RunId, RuntimeConfig};
use ledger_engine::admission;
use ledger_engine::artifacts::{self, ReportArtifactInput};
use ledger_engine::cards::{transition_card, TransitionRequest};
use ledger_engine::decisions;
use ledger_engine::Ledger;
use ledger_projectors::{MemoryProjectionStore, ProjectionStore};
use ledger_testing::{command_input, decision_input, Harness};
use proptest::prelude::*;

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

proptest! {
    /// For all events with an `idempotency_key`, the key -> command_id map
    /// is injective: the same key always resolves to the same command, and
    /// distinct keys never collide.
    #[test]
    fn idempotency_key_uniqueness(
        keys in prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 1..12),
    ) {
        rt().block_on(async {
            let h = Harness::new();
            let now = Utc::now();
            let (scope, _owner) = h.seed_project(now).await;
            let bot = h.bot_auth(scope);

            let mut seen: std::collections::HashMap<&str, ledger_core::CommandId> = std::collections::HashMap::new();
            for key in &keys {
                let mut input = command_input(ledger_core::CorrelationId::new(), "digest.compile", 10);
                input.idempotency_key = Some(key.to_string());
                let output = admission::request_command(h.ledger(), &bot, &h.producer, now, input).await.unwrap();

                match seen.get(key) {
                    Some(existing) => prop_assert_eq!(*existing, output.command_id, "same key must resolve to the same command"),
                    None => {
                        prop_assert!(seen.values().all(|id| *id != output.command_id), "distinct keys must not collide");
                        seen.insert(*key, output.command_id);
                    }
                }
            }
            Ok(())
        }).unwrap();
    }

    /// Across any sequence of render attempts by different operators
    /// against the same decision, at most one `DecisionRendered` ever
    /// lands in the log; rejections are unbounded.
    #[test]
    fn exactly_one_render(
        attempts in prop::collection::vec((0usize..4, prop::sample::select(vec!["approve", "reject"])), 1..8),
    ) {
        rt().block_on(async {
            let h = Harness::new();
            let now = Utc::now();
            let (scope, _owner) = h.seed_project(now).await;
            let bot = h.bot_auth(scope);

            let mut operators = Vec::with_capacity(4);
            for _ in 0..4 {
                operators.push(h.add_operator(&scope).await);
            }

            let run_id = RunId::new();
            let input = decision_input(ledger_core::CorrelationId::new(), ledger_core::CardId::new(), ledger_core::CommandId::new(), run_id, Urgency::Today);
            let decision_id = decisions::request_decision(h.ledger(), &bot, &h.producer, now, input).await.unwrap();

            for (operator_idx, option) in attempts {
                let operator = operators[operator_idx];
                let auth = h.operator_auth(scope, operator);
                let _ = decisions::claim_decision(h.ledger(), &auth, &h.producer, now, Duration::seconds(30), decision_id).await;
                let _ = decisions::render_decision(h.ledger(), &auth, &h.producer, now, decision_id, option, None).await;
            }

            let rendered: Vec<_> = h
                .ledger
                .events()
                .by_type(scope.tenant_id, "DecisionRendered", None, 100)
                .await
                .unwrap();
            prop_assert!(rendered.len() <= 1, "expected at most one DecisionRendered, got {}", rendered.len());
            Ok(())
        }).unwrap();
    }

    /// Every `CardTransitioned(from, to)` taken through the engine is in
    /// the closed state-machine table, and a card already in a terminal
    /// state accepts no further transition.
    #[test]
    fn card_transitions_follow_the_closed_table(
        attempts in prop::collection::vec(prop::sample::select(vec![
            CardState::Running, CardState::Done, CardState::NeedsDecision,
            CardState::Failed, CardState::RetryScheduled, CardState::Ready,
        ]), 1..10),
    ) {
        rt().block_on(async {
            let h = Harness::new();
            let now = Utc::now();
            let (scope, _owner) = h.seed_project(now).await;
            let bot = h.bot_auth(scope);

            let output = admission::request_command(h.ledger(), &bot, &h.producer, now, command_input(ledger_core::CorrelationId::new(), "digest.compile", 10)).await.unwrap();
            let card_id = output.card_id;

            for to in attempts {
                let before = h.ledger.reads().get_card(&scope, card_id).await.unwrap().unwrap();
                let was_terminal = before.state.is_terminal();
                let allowed = before.state.can_transition_to(to);

                let result = transition_card(
                    h.ledger(),
                    &bot,
                    &h.producer,
                    now,
                    TransitionRequest {
                        card_id,
                        to,
                        reason: "property".into(),
                        correlation_id: ledger_core::CorrelationId::new(),
                        causation_id: None,
                        retry_at_ts: if to == CardState::RetryScheduled { Some(now) } else { None },
                    },
                )
                .await;

                if was_terminal {
                    prop_assert!(result.is_err(), "terminal state {:?} must reject every edge", before.state);
                } else if allowed {
                    prop_assert!(result.is_ok(), "{:?} -> {:?} is in the table and must succeed", before.state, to);
                } else {
                    prop_assert!(matches!(result, Err(CoreError::InvalidTransition { .. })), "{:?} -> {:?} is not in the table and must be rejected", before.state, to);
                }
            }
            Ok(())
        }).unwrap();
    }

    /// A card's `attempt` counter equals the number of `CardTransitioned`
    /// events with `to == Running` observed for it, regardless of how many
    /// other transitions happened in between.
    #[test]
    fn attempt_equals_running_entries(entries in 1usize..6) {
        rt().block_on(async {
            let h = Harness::new();
            let now = Utc::now();
            let (scope, _owner) = h.seed_project(now).await;
            let bot = h.bot_auth(scope);

            let output = admission::request_command(h.ledger(), &bot, &h.producer, now, command_input(ledger_core::CorrelationId::new(), "digest.compile", 10)).await.unwrap();
            let card_id = output.card_id;

            for _ in 0..entries {
                transition_card(h.ledger(), &bot, &h.producer, now, TransitionRequest {
                    card_id, to: CardState::Running, reason: "property".into(),
                    correlation_id: ledger_core::CorrelationId::new(), causation_id: None, retry_at_ts: None,
                }).await.unwrap();
                transition_card(h.ledger(), &bot, &h.producer, now, TransitionRequest {
                    card_id, to: CardState::RetryScheduled, reason: "property".into(),
                    correlation_id: ledger_core::CorrelationId::new(), causation_id: None, retry_at_ts: Some(now),
                }).await.unwrap();
                transition_card(h.ledger(), &bot, &h.producer, now, TransitionRequest {
                    card_id, to: CardState::Ready, reason: "property".into(),
                    correlation_id: ledger_core::CorrelationId::new(), causation_id: None, retry_at_ts: None,
                }).await.unwrap();
            }

            let card = h.ledger.reads().get_card(&scope, card_id).await.unwrap().unwrap();
            prop_assert_eq!(card.attempt as usize, entries);
            Ok(())
        }).unwrap();
    }

    /// Reporting the same content bytes twice never produces a second
    /// `ArtifactProduced`; every repeat resolves to the same artifact id
    /// with `deduplicated: true`.
    #[test]
    fn artifact_dedup_on_identical_content(body in "[a-z]{1,40}", repeats in 1usize..5) {
        rt().block_on(async {
            let h = Harness::new();
            let now = Utc::now();
            let (scope, _owner) = h.seed_project(now).await;
            let bot = h.bot_auth(scope);

            let input = |body: &str| ReportArtifactInput {
                correlation_id: ledger_core::CorrelationId::new(),
                content: body.to_string(),
                encoding: Encoding::Utf8,
                media_type: "text/plain".into(),
                logical_name: "out.txt".into(),
                labels: None,
                command_id: None,
                run_id: None,
                links: None,
            };

            let first = artifacts::report_artifact(h.ledger(), h.blobs(), &bot, &h.producer, now, input(&body)).await.unwrap();
            prop_assert!(!first.deduplicated);

            for _ in 0..repeats {
                let again = artifacts::report_artifact(h.ledger(), h.blobs(), &bot, &h.producer, now, input(&body)).await.unwrap();
                prop_assert!(again.deduplicated);
                prop_assert_eq!(again.artifact_id, first.artifact_id);
            }

            let produced: Vec<_> = h
                .ledger
                .events()
                .by_type(scope.tenant_id, "ArtifactProduced", None, 100)
                .await
                .unwrap();
            prop_assert_eq!(produced.len(), 1);
            Ok(())
        }).unwrap();
    }

    /// A resource fetched under a scope it was not created in yields
    /// `None`/`NotFound`; it never leaks across project boundaries even
    /// within the same tenant.
    #[test]
    fn scope_isolation_across_projects(same_tenant in prop::bool::ANY) {
        rt().block_on(async {
            let h = Harness::new();
            let now = Utc::now();
            let (scope_a, _owner_a) = h.seed_project(now).await;
            let (scope_b, _owner_b) = if same_tenant {
                let scope = ledger_core::Scope::new(scope_a.tenant_id, ledger_core::ProjectId::new());
                let owner = ledger_core::UserId::new();
                ledger_access::init_project(&h.projects, &h.members, scope, "other".into(), owner, now).await.unwrap();
                (scope, owner)
            } else {
                h.seed_project(now).await
            };
            let bot_a = h.bot_auth(scope_a);

            let output = admission::request_command(h.ledger(), &bot_a, &h.producer, now, command_input(ledger_core::CorrelationId::new(), "digest.compile", 10)).await.unwrap();

            let cross_fetch = h.ledger.reads().get_card(&scope_b, output.card_id).await.unwrap();
            prop_assert!(cross_fetch.is_none());

            let cross_command = h.ledger.reads().get_command(&scope_b, output.command_id).await.unwrap();
            prop_assert!(cross_command.is_none());

            let native_fetch = h.ledger.reads().get_card(&scope_a, output.card_id).await.unwrap();
            prop_assert!(native_fetch.is_some());
            Ok(())
        }).unwrap();
    }

    /// Replaying any prefix of the committed log into an empty read model
    /// produces the same card row as live application produced.
    #[test]
    fn replay_equivalence_for_card_rows(transitions in prop::collection::vec(prop::sample::select(vec![
        CardState::Running, CardState::NeedsDecision, CardState::Failed,
    ]), 0..3)) {
        rt().block_on(async {
            let h = Harness::new();
            let now = Utc::now();
            let (scope, _owner) = h.seed_project(now).await;
            let bot = h.bot_auth(scope);

            let output = admission::request_command(h.ledger(), &bot, &h.producer, now, command_input(ledger_core::CorrelationId::new(), "digest.compile", 10)).await.unwrap();
            for to in transitions {
                let current = h.ledger.reads().get_card(&scope, output.card_id).await.unwrap().unwrap();
                if current.state.can_transition_to(to) {
                    let _ = transition_card(h.ledger(), &bot, &h.producer, now, TransitionRequest {
                        card_id: output.card_id, to, reason: "property".into(),
                        correlation_id: ledger_core::CorrelationId::new(), causation_id: None,
                        retry_at_ts: None,
                    }).await;
                }
            }

            let live = h.ledger.reads().get_card(&scope, output.card_id).await.unwrap().unwrap();

            let rebuilt_store = MemoryProjectionStore::new();
            ledger_replay::rebuild_from_live(h.ledger.events(), &rebuilt_store, Some(scope), now - Duration::seconds(1)).await.unwrap();
            let rebuilt = rebuilt_store.get_card(&scope, output.card_id).await.unwrap().unwrap();

            prop_assert_eq!(live.state, rebuilt.state);
            prop_assert_eq!(live.attempt, rebuilt.attempt);
            prop_assert_eq!(live.last_event_id, rebuilt.last_event_id);
            Ok(())
        }).unwrap();
    }

    /// After a sweep, an expired decision is `RENDERED` by the system iff
    /// it had a fallback option, else `EXPIRED`; its card has left
    /// `NEEDS_DECISION` either way.
    #[test]
    fn sweeper_resolves_expired_decisions_by_fallback_presence(has_fallback in prop::bool::ANY) {
        rt().block_on(async {
            let h = Harness::new();
            let now = Utc::now();
            let (scope, _owner) = h.seed_project(now).await;
            let bot = h.bot_auth(scope);

            let output = admission::request_command(h.ledger(), &bot, &h.producer, now, command_input(ledger_core::CorrelationId::new(), "digest.compile", 10)).await.unwrap();
            transition_card(h.ledger(), &bot, &h.producer, now, TransitionRequest {
                card_id: output.card_id, to: CardState::Running, reason: "start".into(),
                correlation_id: ledger_core::CorrelationId::new(), causation_id: None, retry_at_ts: None,
            }).await.unwrap();
            transition_card(h.ledger(), &bot, &h.producer, now, TransitionRequest {
                card_id: output.card_id, to: CardState::NeedsDecision, reason: "blocked".into(),
                correlation_id: ledger_core::CorrelationId::new(), causation_id: None, retry_at_ts: None,
            }).await.unwrap();

            let run_id = RunId::new();
            let mut input = decision_input(ledger_core::CorrelationId::new(), output.card_id, output.command_id, run_id, Urgency::Now);
            input.expires_at = Some(now - Duration::seconds(1));
            if has_fallback {
                input.fallback_option = Some("reject".into());
            }
            let decision_id = decisions::request_decision(h.ledger(), &bot, &h.producer, now, input).await.unwrap();

            let config = RuntimeConfig::default();
            let report = ledger_sweeper::sweep(h.ledger(), &config, &h.producer, now).await;
            prop_assert_eq!(report.decisions_expired.processed, 1);
            prop_assert_eq!(report.decisions_expired.failed, 0);

            let decision = h.ledger.reads().get_decision(&scope, decision_id).await.unwrap().unwrap();
            if has_fallback {
                prop_assert_eq!(decision.state, DecisionState::Rendered);
                prop_assert_eq!(decision.rendered_by.as_deref(), Some(SYSTEM_SWEEPER));
            } else {
                prop_assert_eq!(decision.state, DecisionState::Expired);
            }

            let card = h.ledger.reads().get_card(&scope, output.card_id).await.unwrap().unwrap();
            prop_assert_ne!(card.state, CardState::NeedsDecision);
            Ok(())
        }).unwrap();
    }
}

/// Event immutability: appending the same fully-built event twice (the
/// idempotency-key collision path) never produces a second row for that
/// key, and the first write is never mutated by the second attempt.
#[tokio::test]
async fn event_immutability_under_duplicate_append() {
    let h = Harness::new();
    let now = Utc::now();
    let (scope, _owner) = h.seed_project(now).await;

    let event = EventBuilder::new(scope, ledger_core::CorrelationId::new())
        .subjects(SubjectIds::card(ledger_core::CardId::new()))
        .idempotency_key("fixed-key")
        .build(
            EventPayload::CardCreated(ledger_core::event::CardCreated {
                card_id: ledger_core::CardId::new(),
                title: "t".into(),
                spec: ledger_core::card::CardSpec {
                    command_type: "x".into(),
                    args: None,
                    constraints: Default::default(),
                },
                priority: ledger_core::card::Priority::default(),
                capabilities: None,
            }),
            now,
            h.producer.clone(),
        );

    let first = h.ledger.commit(vec![event.clone()]).await.unwrap();
    assert_eq!(first.len(), 1);

    let second = h.ledger.commit(vec![event.clone()]).await.unwrap();
    assert!(second.is_empty(), "duplicate idempotency key must not append a second row");

    let all = h.ledger.events().by_type(scope.tenant_id, "CardCreated", None, 100).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].event_id, first[0].event_id);
}
