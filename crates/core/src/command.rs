use crate::card::{CardConstraints, Priority};
use crate::ids::{CommandId, RunId, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command_type: String,
    pub command_version: Option<String>,
    pub args: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub constraints: CommandConstraints,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandConstraints {
    pub priority: Option<Priority>,
    #[serde(flatten)]
    pub card: CardConstraints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: CommandId,
    pub scope: Scope,
    pub status: CommandStatus,
    pub latest_run_id: Option<RunId>,
    pub last_event_id: crate::ids::EventId,
    pub priority: Priority,
    pub command_spec: CommandSpec,
    pub updated_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub scope: Scope,
    pub command_id: CommandId,
    pub status: RunStatus,
    pub attempt: u32,
    pub started_ts: Option<DateTime<Utc>>,
    pub ended_ts: Option<DateTime<Utc>>,
    pub executor: Option<String>,
    pub error: Option<String>,
    pub last_event_id: crate::ids::EventId,
}
