//! Bot Interface: the thin surface a running agent actually calls. Every
//! method here delegates to an operation in [`crate::admission`],
//! [`crate::artifacts`], or [`crate::decisions`]; this module adds nothing
//! but a single `auth`/`now`/`producer` threading point so a bot's call
//! site doesn't have to repeat them on every call.

use chrono::{DateTime, Utc};
use ledger_core::decision::{AwaitDecisionSnapshot, DecisionOption, Urgency};
use ledger_core::{
    ArtifactId, AuthContext, CardId, Clock, CommandId, CorrelationId, CoreResult, DecisionId,
    Encoding, Producer, RunId,
};

use crate::admission::{RequestCommandInput, RequestCommandOutput};
use crate::artifacts::{ReportArtifactInput, ReportArtifactOutput};
use crate::blob::BlobStore;
use crate::decisions::RequestDecisionInput;
use crate::ledger::Ledger;

/// Bundles the handles a bot call needs so call sites pass one value
/// instead of four. Cheap to construct per request; holds only borrows.
pub struct BotSession<'a> {
    pub ledger: &'a dyn Ledger,
    pub blobs: &'a dyn BlobStore,
    pub clock: &'a dyn Clock,
    pub producer: Producer,
    pub auth: AuthContext,
}

impl<'a> BotSession<'a> {
    pub fn new(
        ledger: &'a dyn Ledger,
        blobs: &'a dyn BlobStore,
        clock: &'a dyn Clock,
        producer: Producer,
        auth: AuthContext,
    ) -> Self {
        Self { ledger, blobs, clock, producer, auth }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn request_command(&self, input: RequestCommandInput) -> CoreResult<RequestCommandOutput> {
        crate::admission::request_command(self.ledger, &self.auth, &self.producer, self.now(), input).await
    }

    pub async fn report_artifact(&self, input: ReportArtifactInput) -> CoreResult<ReportArtifactOutput> {
        crate::artifacts::report_artifact(self.ledger, self.blobs, &self.auth, &self.producer, self.now(), input).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn request_decision(
        &self,
        correlation_id: CorrelationId,
        card_id: CardId,
        command_id: CommandId,
        run_id: RunId,
        urgency: Urgency,
        title: String,
        context_summary: Option<String>,
        options: Vec<DecisionOption>,
        artifact_refs: Option<Vec<ArtifactId>>,
        source_thread: Option<String>,
        fallback_option: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<DecisionId> {
        crate::decisions::request_decision(
            self.ledger,
            &self.auth,
            &self.producer,
            self.now(),
            RequestDecisionInput {
                correlation_id,
                card_id,
                command_id,
                run_id,
                urgency,
                title,
                context_summary,
                options,
                artifact_refs,
                source_thread,
                fallback_option,
                expires_at,
            },
        )
        .await
    }

    pub async fn await_decision(&self, decision_id: DecisionId) -> CoreResult<AwaitDecisionSnapshot> {
        crate::decisions::await_decision(self.ledger, &self.auth, decision_id).await
    }
}

/// Decodes a raw artifact payload already shaped as [`ReportArtifactInput`]
/// from an encoding plus content string, for callers building the input by
/// hand rather than from a transport-layer request body.
pub fn artifact_input(
    correlation_id: CorrelationId,
    content: String,
    encoding: Encoding,
    media_type: String,
    logical_name: String,
) -> ReportArtifactInput {
    ReportArtifactInput {
        correlation_id,
        content,
        encoding,
        media_type,
        logical_name,
        labels: None,
        command_id: None,
        run_id: None,
        links: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::command::{CommandConstraints, CommandSpec};
    use ledger_core::{ProjectId, Role, Scope, TenantId};

    fn session<'a>(ledger: &'a dyn Ledger, blobs: &'a dyn BlobStore, clock: &'a dyn Clock) -> BotSession<'a> {
        let scope = Scope::new(TenantId::new(), ProjectId::new());
        BotSession::new(
            ledger,
            blobs,
            clock,
            Producer { service: "test-bot".into(), version: "0.0.0".into() },
            AuthContext { user_id: None, tenant_id: scope.tenant_id, project_id: scope.project_id, role: Role::Bot },
        )
    }

    #[tokio::test]
    async fn request_command_round_trips_through_the_session() {
        let ledger = crate::MemoryLedger::in_memory();
        let blobs = crate::MemoryBlobStore::new();
        let clock = ledger_core::FakeClock::new(Utc::now());
        let bot = session(&ledger, &blobs, &clock);

        let output = bot
            .request_command(RequestCommandInput {
                correlation_id: CorrelationId::new(),
                title: "do the thing".into(),
                spec: CommandSpec {
                    command_type: "demo.task".into(),
                    command_version: None,
                    args: None,
                    context: None,
                    constraints: CommandConstraints::default(),
                },
                capabilities: None,
                idempotency_key: None,
            })
            .await
            .unwrap();

        assert!(!output.deduplicated);
    }
}
