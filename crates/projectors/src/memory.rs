//! In-process [`ProjectionStore`] backed by `dashmap`, one map per read
//! model keyed by `(tenant_id, project_id, entity_id)`. Used by
//! `ledger-testing` fixtures and by any crate exercising the lifecycle
//! operations without a database.

use async_trait::async_trait;
use dashmap::DashMap;
use ledger_core::{
    Artifact, ArtifactId, Card, CardId, Command, CommandId, CoreResult, Decision, DecisionId,
    DecisionState, Event, EventPayload, Run, RunId, Scope,
};

use crate::{rules, ProjectionStore};

type Key<T> = (uuid::Uuid, uuid::Uuid, T);

#[derive(Default)]
pub struct MemoryProjectionStore {
    commands: DashMap<Key<uuid::Uuid>, Command>,
    runs: DashMap<Key<uuid::Uuid>, Run>,
    cards: DashMap<Key<uuid::Uuid>, Card>,
    decisions: DashMap<Key<uuid::Uuid>, Decision>,
    artifacts: DashMap<Key<uuid::Uuid>, Artifact>,
}

fn key(scope: &Scope, id: uuid::Uuid) -> Key<uuid::Uuid> {
    (scope.tenant_id.as_uuid(), scope.project_id.as_uuid(), id)
}

impl MemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionStore for MemoryProjectionStore {
    async fn apply(&self, event: &Event) -> CoreResult<()> {
        match &event.payload {
            EventPayload::CommandRequested(p) => {
                let k = key(&event.scope, p.command_id.as_uuid());
                let current = self.commands.get(&k).map(|r| r.clone());
                if let Some(row) = rules::project_command(event, current) {
                    self.commands.insert(k, row);
                }
            }
            EventPayload::CommandStarted(p) => {
                let ck = key(&event.scope, p.command_id.as_uuid());
                if let Some(row) = rules::project_command(event, self.commands.get(&ck).map(|r| r.clone())) {
                    self.commands.insert(ck, row);
                }
                let rk = key(&event.scope, p.run_id.as_uuid());
                if let Some(row) = rules::project_run(event, self.runs.get(&rk).map(|r| r.clone())) {
                    self.runs.insert(rk, row);
                }
            }
            EventPayload::CommandSucceeded(p) => {
                self.update_command_and_run(event, p.command_id, p.run_id)?;
            }
            EventPayload::CommandFailed(p) => {
                self.update_command_and_run(event, p.command_id, p.run_id)?;
            }
            EventPayload::CommandCanceled(p) => {
                let ck = key(&event.scope, p.command_id.as_uuid());
                if let Some(row) = rules::project_command(event, self.commands.get(&ck).map(|r| r.clone())) {
                    self.commands.insert(ck, row);
                }
            }
            EventPayload::CommandRetryScheduled(p) => {
                let ck = key(&event.scope, p.command_id.as_uuid());
                if let Some(row) = rules::project_command(event, self.commands.get(&ck).map(|r| r.clone())) {
                    self.commands.insert(ck, row);
                }
            }
            EventPayload::CommandSkippedDuplicate(_) => {}
            EventPayload::DecisionRequested(p) => {
                let k = key(&event.scope, p.decision_id.as_uuid());
                if let Some(row) = rules::project_decision(event, self.decisions.get(&k).map(|r| r.clone())) {
                    self.decisions.insert(k, row);
                }
            }
            EventPayload::DecisionClaimed(p) => {
                let k = key(&event.scope, p.decision_id.as_uuid());
                if let Some(row) = rules::project_decision(event, self.decisions.get(&k).map(|r| r.clone())) {
                    self.decisions.insert(k, row);
                }
            }
            EventPayload::DecisionClaimExpired(p) => {
                let k = key(&event.scope, p.decision_id.as_uuid());
                if let Some(row) = rules::project_decision(event, self.decisions.get(&k).map(|r| r.clone())) {
                    self.decisions.insert(k, row);
                }
            }
            EventPayload::DecisionRendered(p) => {
                let k = key(&event.scope, p.decision_id.as_uuid());
                if let Some(row) = rules::project_decision(event, self.decisions.get(&k).map(|r| r.clone())) {
                    self.decisions.insert(k, row);
                }
            }
            EventPayload::DecisionExpired(p) => {
                let k = key(&event.scope, p.decision_id.as_uuid());
                if let Some(row) = rules::project_decision(event, self.decisions.get(&k).map(|r| r.clone())) {
                    self.decisions.insert(k, row);
                }
            }
            EventPayload::DecisionDeferred(p) => {
                let k = key(&event.scope, p.decision_id.as_uuid());
                if let Some(row) = rules::project_decision(event, self.decisions.get(&k).map(|r| r.clone())) {
                    self.decisions.insert(k, row);
                }
            }
            EventPayload::DecisionRenderRejected(_) => {}
            EventPayload::ArtifactProduced(p) => {
                let k = key(&event.scope, p.artifact_id.as_uuid());
                if let Some(row) = rules::project_artifact(event, self.artifacts.get(&k).map(|r| r.clone())) {
                    self.artifacts.insert(k, row);
                }
            }
            EventPayload::CardCreated(p) => {
                let k = key(&event.scope, p.card_id.as_uuid());
                if let Some(row) = rules::project_card(event, self.cards.get(&k).map(|r| r.clone())) {
                    self.cards.insert(k, row);
                }
            }
            EventPayload::CardTransitioned(p) => {
                let k = key(&event.scope, p.card_id.as_uuid());
                if let Some(row) = rules::project_card(event, self.cards.get(&k).map(|r| r.clone())) {
                    self.cards.insert(k, row);
                }
            }
            EventPayload::SloBreached(_) | EventPayload::ReconciliationDrift(_) => {}
        }
        Ok(())
    }

    async fn get_command(&self, scope: &Scope, command_id: CommandId) -> CoreResult<Option<Command>> {
        Ok(self.commands.get(&key(scope, command_id.as_uuid())).map(|r| r.clone()))
    }

    async fn get_run(&self, scope: &Scope, run_id: RunId) -> CoreResult<Option<Run>> {
        Ok(self.runs.get(&key(scope, run_id.as_uuid())).map(|r| r.clone()))
    }

    async fn get_card(&self, scope: &Scope, card_id: CardId) -> CoreResult<Option<Card>> {
        Ok(self.cards.get(&key(scope, card_id.as_uuid())).map(|r| r.clone()))
    }

    async fn get_decision(&self, scope: &Scope, decision_id: DecisionId) -> CoreResult<Option<Decision>> {
        Ok(self.decisions.get(&key(scope, decision_id.as_uuid())).map(|r| r.clone()))
    }

    async fn get_artifact(&self, scope: &Scope, artifact_id: ArtifactId) -> CoreResult<Option<Artifact>> {
        Ok(self.artifacts.get(&key(scope, artifact_id.as_uuid())).map(|r| r.clone()))
    }

    async fn get_artifact_by_hash(&self, scope: &Scope, content_sha256: &str) -> CoreResult<Option<Artifact>> {
        Ok(self
            .artifacts
            .iter()
            .filter(|e| e.key().0 == scope.tenant_id.as_uuid() && e.key().1 == scope.project_id.as_uuid())
            .map(|e| e.value().clone())
            .find(|a| a.content_sha256 == content_sha256))
    }

    async fn pending_decisions(&self, scope: &Scope) -> CoreResult<Vec<Decision>> {
        Ok(self
            .decisions
            .iter()
            .filter(|e| e.key().0 == scope.tenant_id.as_uuid() && e.key().1 == scope.project_id.as_uuid())
            .map(|e| e.value().clone())
            .filter(|d| matches!(d.state, DecisionState::Pending | DecisionState::Claimed))
            .collect())
    }

    async fn artifacts_for_run(&self, scope: &Scope, run_id: RunId) -> CoreResult<Vec<Artifact>> {
        Ok(self
            .artifacts
            .iter()
            .filter(|e| e.key().0 == scope.tenant_id.as_uuid() && e.key().1 == scope.project_id.as_uuid())
            .map(|e| e.value().clone())
            .filter(|a| a.provenance.run_id == Some(run_id))
            .collect())
    }

    async fn artifacts_for_command(&self, scope: &Scope, command_id: CommandId) -> CoreResult<Vec<Artifact>> {
        Ok(self
            .artifacts
            .iter()
            .filter(|e| e.key().0 == scope.tenant_id.as_uuid() && e.key().1 == scope.project_id.as_uuid())
            .map(|e| e.value().clone())
            .filter(|a| a.provenance.command_id == Some(command_id))
            .collect())
    }

    async fn cards_due_for_retry(&self, now: chrono::DateTime<chrono::Utc>) -> CoreResult<Vec<Card>> {
        Ok(self
            .cards
            .iter()
            .map(|e| e.value().clone())
            .filter(|c| c.state == ledger_core::CardState::RetryScheduled && c.retry_at_ts.map(|t| t <= now).unwrap_or(false))
            .collect())
    }

    async fn decisions_expiring(&self, now: chrono::DateTime<chrono::Utc>) -> CoreResult<Vec<Decision>> {
        Ok(self
            .decisions
            .iter()
            .map(|e| e.value().clone())
            .filter(|d| {
                matches!(d.state, DecisionState::Pending | DecisionState::Claimed)
                    && d.expires_at.map(|t| t <= now).unwrap_or(false)
            })
            .collect())
    }

    async fn decisions_with_expired_claims(&self, now: chrono::DateTime<chrono::Utc>) -> CoreResult<Vec<Decision>> {
        Ok(self
            .decisions
            .iter()
            .map(|e| e.value().clone())
            .filter(|d| d.state == DecisionState::Claimed && d.claimed_until.map(|t| t < now).unwrap_or(false))
            .collect())
    }

    async fn now_urgency_backlog(&self) -> CoreResult<Vec<(Scope, usize)>> {
        let mut counts: std::collections::HashMap<(uuid::Uuid, uuid::Uuid), usize> = std::collections::HashMap::new();
        for e in self.decisions.iter() {
            let d = e.value();
            if matches!(d.state, DecisionState::Pending | DecisionState::Claimed) && d.urgency == ledger_core::Urgency::Now {
                *counts.entry((d.scope.tenant_id.as_uuid(), d.scope.project_id.as_uuid())).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|((t, p), n)| (Scope::new(ledger_core::TenantId::from_uuid(t), ledger_core::ProjectId::from_uuid(p)), n))
            .collect())
    }
}

impl MemoryProjectionStore {
    fn update_command_and_run(&self, event: &Event, command_id: CommandId, run_id: RunId) -> CoreResult<()> {
        let ck = key(&event.scope, command_id.as_uuid());
        if let Some(row) = rules::project_command(event, self.commands.get(&ck).map(|r| r.clone())) {
            self.commands.insert(ck, row);
        }
        let rk = key(&event.scope, run_id.as_uuid());
        if let Some(row) = rules::project_run(event, self.runs.get(&rk).map(|r| r.clone())) {
            self.runs.insert(rk, row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::event::{CardCreated, CommandRequested};
    use ledger_core::{CardSpec, CommandSpec, EventBuilder, Priority, Producer, TenantId};

    fn scope() -> Scope {
        Scope::new(TenantId::new(), ledger_core::ProjectId::new())
    }

    fn producer() -> Producer {
        Producer {
            service: "test".into(),
            version: "0".into(),
        }
    }

    #[tokio::test]
    async fn applying_command_requested_twice_is_a_no_op_for_the_second() {
        let store = MemoryProjectionStore::new();
        let scope = scope();
        let command_id = ledger_core::CommandId::new();
        let card_id = CardId::new();

        let mut event = EventBuilder::new(scope, ledger_core::CorrelationId::new()).build(
            EventPayload::CommandRequested(CommandRequested {
                command_id,
                card_id,
                title: "t".into(),
                command_spec: CommandSpec {
                    command_type: "x".into(),
                    command_version: None,
                    args: None,
                    context: None,
                    constraints: Default::default(),
                },
                capabilities: None,
            }),
            chrono::Utc::now(),
            producer(),
        );
        store.apply(&event).await.unwrap();
        let first = store.get_command(&scope, command_id).await.unwrap().unwrap();

        event.event_id = ledger_core::EventId::from_uuid(uuid::Uuid::nil());
        store.apply(&event).await.unwrap();
        let second = store.get_command(&scope, command_id).await.unwrap().unwrap();
        assert_eq!(first.last_event_id, second.last_event_id);
    }

    #[tokio::test]
    async fn card_created_is_queryable_after_apply() {
        let store = MemoryProjectionStore::new();
        let scope = scope();
        let card_id = CardId::new();
        let event = EventBuilder::new(scope, ledger_core::CorrelationId::new()).build(
            EventPayload::CardCreated(CardCreated {
                card_id,
                title: "t".into(),
                spec: CardSpec {
                    command_type: "x".into(),
                    args: None,
                    constraints: Default::default(),
                },
                priority: Priority::default(),
                capabilities: None,
            }),
            chrono::Utc::now(),
            producer(),
        );
        store.apply(&event).await.unwrap();
        let row = store.get_card(&scope, card_id).await.unwrap().unwrap();
        assert_eq!(row.title, "t");
    }
}
