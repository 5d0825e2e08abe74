//! # ledger-testing
//!
//! Shared fixtures for the seed-scenario and property suites in `tests/`:
//! one in-memory stack wired the way `ledger-httpd` wires a Postgres one,
//! plus builders for the inputs every scenario needs (a project with an
//! owner and a bot, a minimal command spec, a minimal decision request).
//! Nothing here is exercised by the binary; it exists only for tests.

use ledger_access::{MemoryMembershipStore, MemoryProjectStore};
use ledger_core::card::{CardConstraints, CardSpec};
use ledger_core::command::{CommandConstraints, CommandSpec};
use ledger_core::decision::{DecisionOption, Urgency};
use ledger_core::{AuthContext, CorrelationId, Priority, Producer, Role, Scope, TenantId, UserId};
use ledger_engine::admission::{CreateCardInput, RequestCommandInput};
use ledger_engine::decisions::RequestDecisionInput;
use ledger_engine::{BlobStore, Ledger, MemoryBlobStore, MemoryLedger};

/// One in-memory stack: a ledger, a blob store, and the project registry.
/// Each scenario gets its own so concurrent tests never share state.
pub struct Harness {
    pub ledger: MemoryLedger,
    pub blobs: MemoryBlobStore,
    pub members: MemoryMembershipStore,
    pub projects: MemoryProjectStore,
    pub jobs: ledger_jobs::MemoryJobStore,
    pub producer: Producer,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            ledger: MemoryLedger::in_memory(),
            blobs: MemoryBlobStore::new(),
            members: MemoryMembershipStore::new(),
            projects: MemoryProjectStore::new(),
            jobs: ledger_jobs::MemoryJobStore::new(4),
            producer: Producer { service: "ledger-testing".into(), version: "0".into() },
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> &dyn Ledger {
        &self.ledger
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        &self.blobs
    }

    /// Creates a fresh `(tenant, project)` scope with one owner already a
    /// member, returning the scope and the owner's id.
    pub async fn seed_project(&self, now: chrono::DateTime<chrono::Utc>) -> (Scope, UserId) {
        let scope = Scope::new(TenantId::new(), ledger_core::ProjectId::new());
        let owner = UserId::new();
        ledger_access::init_project(&self.projects, &self.members, scope, "test project".into(), owner, now)
            .await
            .expect("seed project");
        (scope, owner)
    }

    pub async fn add_operator(&self, scope: &Scope) -> UserId {
        let operator = UserId::new();
        ledger_access::add_member(&self.members, scope, operator, Role::Operator).await.expect("add operator");
        operator
    }

    pub fn bot_auth(&self, scope: Scope) -> AuthContext {
        AuthContext { user_id: None, tenant_id: scope.tenant_id, project_id: scope.project_id, role: Role::Bot }
    }

    pub fn owner_auth(&self, scope: Scope, owner: UserId) -> AuthContext {
        AuthContext { user_id: Some(owner), tenant_id: scope.tenant_id, project_id: scope.project_id, role: Role::Owner }
    }

    pub fn operator_auth(&self, scope: Scope, operator: UserId) -> AuthContext {
        AuthContext {
            user_id: Some(operator),
            tenant_id: scope.tenant_id,
            project_id: scope.project_id,
            role: Role::Operator,
        }
    }
}

/// A minimal `request_command` input for `command_type`, at the given
/// priority, correlated under `correlation_id`.
pub fn command_input(correlation_id: CorrelationId, command_type: &str, priority: u16) -> RequestCommandInput {
    RequestCommandInput {
        correlation_id,
        title: command_type.to_string(),
        spec: CommandSpec {
            command_type: command_type.to_string(),
            command_version: None,
            args: None,
            context: None,
            constraints: CommandConstraints { priority: Some(Priority(priority)), card: CardConstraints::default() },
        },
        capabilities: None,
        idempotency_key: None,
    }
}

pub fn card_input(correlation_id: CorrelationId, command_type: &str) -> CreateCardInput {
    CreateCardInput {
        correlation_id,
        title: command_type.to_string(),
        spec: CardSpec { command_type: command_type.to_string(), args: None, constraints: CardConstraints::default() },
        priority: Priority::DEFAULT,
        capabilities: None,
    }
}

/// A decision with two keyed options, no artifacts, no expiry — the base
/// case most render/claim tests start from.
pub fn decision_input(
    correlation_id: CorrelationId,
    card_id: ledger_core::CardId,
    command_id: ledger_core::CommandId,
    run_id: ledger_core::RunId,
    urgency: Urgency,
) -> RequestDecisionInput {
    RequestDecisionInput {
        correlation_id,
        card_id,
        command_id,
        run_id,
        urgency,
        title: "approve or reject".into(),
        context_summary: None,
        options: vec![
            DecisionOption { key: "approve".into(), label: "Approve".into(), consequence: "ships".into() },
            DecisionOption { key: "reject".into(), label: "Reject".into(), consequence: "discards".into() },
        ],
        artifact_refs: None,
        source_thread: None,
        fallback_option: None,
        expires_at: None,
    }
}
