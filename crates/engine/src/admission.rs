//! Command Admission: the entry point bots use to enqueue work.

use chrono::{DateTime, Utc};
use ledger_core::card::{Card, CardSpec};
use ledger_core::event::{CardCreated, CommandRequested, CommandSkippedDuplicate, SubjectIds};
use ledger_core::{
    AuthContext, CardId, CommandId, CoreResult, EventBuilder, EventPayload, Producer, Role,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct RequestCommandInput {
    pub correlation_id: ledger_core::CorrelationId,
    pub title: String,
    pub spec: ledger_core::command::CommandSpec,
    pub capabilities: Option<Vec<String>>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestCommandOutput {
    pub command_id: CommandId,
    pub card_id: CardId,
    pub deduplicated: bool,
}

/// Derives a stable id from `(scope, idempotency_key, salt)` so a retried
/// call with the same key reproduces the same command/card ids without a
/// read-model lookup. `salt` keeps the command and card ids distinct even
/// though they share a key.
fn keyed_id(scope: ledger_core::Scope, key: &str, salt: &str) -> uuid::Uuid {
    let seed = format!("{}:{}:{key}:{salt}", scope.tenant_id, scope.project_id);
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, seed.as_bytes())
}

/// `request_command` — roles `{bot, operator, owner}`. Appends
/// `CommandRequested` and `CardCreated` atomically. A duplicate
/// `idempotency_key` collapses to the original command/card ids, derived
/// deterministically from the key rather than looked up; the collapse is
/// itself recorded as a `CommandSkippedDuplicate` audit event so it is
/// visible in the log, not merely inferred from the missing inserts.
pub async fn request_command(
    ledger: &dyn crate::ledger::Ledger,
    auth: &AuthContext,
    producer: &Producer,
    now: DateTime<Utc>,
    input: RequestCommandInput,
) -> CoreResult<RequestCommandOutput> {
    auth.require(&[Role::Bot, Role::Operator])?;

    let (command_id, card_id) = match &input.idempotency_key {
        Some(key) => (
            CommandId::from_uuid(keyed_id(auth.scope(), key, "command")),
            CardId::from_uuid(keyed_id(auth.scope(), key, "card")),
        ),
        None => (CommandId::new(), CardId::new()),
    };
    let priority = input.spec.constraints.priority.unwrap_or_default();

    let mut builder = EventBuilder::new(auth.scope(), input.correlation_id)
        .subjects(SubjectIds::command(command_id));
    if let Some(key) = &input.idempotency_key {
        builder = builder.idempotency_key(key.clone());
    }
    let requested = builder.build(
        EventPayload::CommandRequested(CommandRequested {
            command_id,
            card_id,
            title: input.title.clone(),
            command_spec: input.spec.clone(),
            capabilities: input.capabilities.clone(),
        }),
        now,
        producer.clone(),
    );

    let card_spec = CardSpec {
        command_type: input.spec.command_type.clone(),
        args: input.spec.args.clone(),
        constraints: input.spec.constraints.card.clone(),
    };
    let mut card_builder = EventBuilder::new(auth.scope(), input.correlation_id)
        .causation(requested.event_id)
        .subjects(SubjectIds::card(card_id));
    if let Some(key) = &input.idempotency_key {
        card_builder = card_builder.idempotency_key(format!("{key}:card"));
    }
    let created = card_builder.build(
        EventPayload::CardCreated(CardCreated {
            card_id,
            title: input.title,
            spec: card_spec,
            priority,
            capabilities: input.capabilities,
        }),
        now,
        producer.clone(),
    );

    let written = ledger.commit(vec![requested, created]).await?;

    if written.is_empty() {
        let skip = EventBuilder::new(auth.scope(), input.correlation_id).build(
            EventPayload::CommandSkippedDuplicate(CommandSkippedDuplicate {
                original_command_id: command_id,
                idempotency_key: input.idempotency_key.clone().unwrap_or_default(),
            }),
            now,
            producer.clone(),
        );
        ledger.commit(vec![skip]).await?;
        return Ok(RequestCommandOutput {
            command_id,
            card_id,
            deduplicated: true,
        });
    }

    Ok(RequestCommandOutput {
        command_id,
        card_id,
        deduplicated: false,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCardInput {
    pub correlation_id: ledger_core::CorrelationId,
    pub title: String,
    pub spec: CardSpec,
    #[serde(default)]
    pub priority: ledger_core::card::Priority,
    pub capabilities: Option<Vec<String>>,
}

/// `create_card` — roles `{bot, owner}`. A lower-level primitive for
/// callers that already have a `command_id`/`run_id` context (the sweeper
/// reopening work) and only need a fresh card, with no paired
/// `CommandRequested`.
pub async fn create_card(
    ledger: &dyn crate::ledger::Ledger,
    auth: &AuthContext,
    producer: &Producer,
    now: DateTime<Utc>,
    input: CreateCardInput,
) -> CoreResult<Card> {
    auth.require(&[Role::Bot])?;

    let card_id = CardId::new();
    let event = EventBuilder::new(auth.scope(), input.correlation_id)
        .subjects(SubjectIds::card(card_id))
        .build(
            EventPayload::CardCreated(CardCreated {
                card_id,
                title: input.title,
                spec: input.spec,
                priority: input.priority,
                capabilities: input.capabilities,
            }),
            now,
            producer.clone(),
        );

    ledger.commit(vec![event]).await?;
    ledger
        .reads()
        .get_card(&auth.scope(), card_id)
        .await?
        .ok_or_else(|| ledger_core::CoreError::Internal(anyhow::anyhow!("card not projected after commit")))
}
