//! # ledger-projectors
//!
//! Pure projection rules ([`rules`]) plus the two backends that apply them
//! against a read-model store: [`memory::MemoryProjectionStore`] for tests,
//! [`postgres::PgProjectionStore`] for production. `ledger-engine` calls
//! [`postgres::PgProjectionStore::apply_in_tx`] in the same transaction as
//! the event append that produced each event, so a reader never observes an
//! event without its projection or vice versa. `ledger-replay` calls the
//! same rules standalone, walking the log from scratch.

pub mod memory;
pub mod postgres;
pub mod rules;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_core::{Artifact, Card, CardId, Command, CommandId, CoreResult, Decision, DecisionId, Event, Run, RunId, Scope};

pub use memory::MemoryProjectionStore;
pub use postgres::PgProjectionStore;

/// Read-model access shared by both backends. `ledger-engine` and
/// `ledger-http` depend on this trait, not on a concrete backend, so tests
/// can swap in [`MemoryProjectionStore`] without touching call sites.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn apply(&self, event: &Event) -> CoreResult<()>;

    async fn get_command(&self, scope: &Scope, command_id: CommandId) -> CoreResult<Option<Command>>;
    async fn get_run(&self, scope: &Scope, run_id: RunId) -> CoreResult<Option<Run>>;
    async fn get_card(&self, scope: &Scope, card_id: CardId) -> CoreResult<Option<Card>>;
    async fn get_decision(&self, scope: &Scope, decision_id: DecisionId) -> CoreResult<Option<Decision>>;
    async fn get_artifact(&self, scope: &Scope, artifact_id: ledger_core::ArtifactId) -> CoreResult<Option<Artifact>>;
    async fn get_artifact_by_hash(&self, scope: &Scope, content_sha256: &str) -> CoreResult<Option<Artifact>>;

    async fn pending_decisions(&self, scope: &Scope) -> CoreResult<Vec<Decision>>;
    async fn artifacts_for_run(&self, scope: &Scope, run_id: RunId) -> CoreResult<Vec<Artifact>>;
    async fn artifacts_for_command(&self, scope: &Scope, command_id: CommandId) -> CoreResult<Vec<Artifact>>;

    /// Cards with `state == RETRY_SCHEDULED` and `retry_at_ts <= now`,
    /// across every project — the sweeper's release-retries phase runs
    /// over the whole active set, not one scope at a time.
    async fn cards_due_for_retry(&self, now: DateTime<Utc>) -> CoreResult<Vec<Card>>;

    /// Decisions in `{PENDING, CLAIMED}` whose `expires_at <= now`, across
    /// every project.
    async fn decisions_expiring(&self, now: DateTime<Utc>) -> CoreResult<Vec<Decision>>;

    /// Decisions in `CLAIMED` whose `claimed_until < now`, across every
    /// project.
    async fn decisions_with_expired_claims(&self, now: DateTime<Utc>) -> CoreResult<Vec<Decision>>;

    /// Every project's current backlog of `now`-urgency decisions in
    /// `{PENDING, CLAIMED}`, for the sweeper's load-shedding phase.
    async fn now_urgency_backlog(&self) -> CoreResult<Vec<(Scope, usize)>>;
}
