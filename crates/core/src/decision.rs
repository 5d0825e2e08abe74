use crate::error::{CoreError, CoreResult};
use crate::ids::{ArtifactId, CardId, CommandId, DecisionId, RunId, Scope, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    Pending,
    Claimed,
    Rendered,
    Expired,
}

/// `now < today < whenever` is the sort rank used by `pending_decisions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Now,
    Today,
    Whenever,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOption {
    pub key: String,
    pub label: String,
    pub consequence: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactLink {
    pub rel: String,
    pub artifact_id: ArtifactId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: DecisionId,
    pub scope: Scope,
    pub card_id: CardId,
    pub command_id: CommandId,
    pub run_id: RunId,
    pub state: DecisionState,
    pub urgency: Urgency,
    pub title: String,
    pub context_summary: Option<String>,
    pub options: Vec<DecisionOption>,
    pub artifact_refs: Option<Vec<ArtifactId>>,
    pub source_thread: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub fallback_option: Option<String>,
    pub claimed_by: Option<UserId>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub rendered_option: Option<String>,
    pub rendered_by: Option<String>,
    pub rendered_at: Option<DateTime<Utc>>,
    pub last_event_id: crate::ids::EventId,
}

/// Identity used for `rendered_by` when the sweeper auto-resolves a
/// decision via fallback or load shedding. Not a real `UserId` — sweeper
/// resolutions are system actions, not impersonation, so the field is a
/// plain string rather than `Option<UserId>`.
pub const SYSTEM_SWEEPER: &str = "system:sweeper";

impl Decision {
    pub fn validate_options(options: &[DecisionOption], fallback: &Option<String>) -> CoreResult<()> {
        if options.is_empty() {
            return Err(CoreError::InvalidOptions);
        }
        let mut seen = std::collections::HashSet::new();
        for opt in options {
            if !seen.insert(opt.key.as_str()) {
                return Err(CoreError::InvalidOptions);
            }
        }
        if let Some(fallback_key) = fallback {
            if !options.iter().any(|o| &o.key == fallback_key) {
                return Err(CoreError::InvalidFallback);
            }
        }
        Ok(())
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self.state, DecisionState::Pending | DecisionState::Claimed)
    }

    pub fn has_option(&self, key: &str) -> bool {
        self.options.iter().any(|o| o.key == key)
    }
}

/// The point-in-time snapshot returned by `await_decision`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AwaitStatus {
    Pending,
    Claimed,
    Rendered,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct AwaitDecisionSnapshot {
    pub status: AwaitStatus,
    pub selected_option: Option<String>,
    pub rendered_by: Option<String>,
}

impl From<&Decision> for AwaitDecisionSnapshot {
    fn from(d: &Decision) -> Self {
        let status = match d.state {
            DecisionState::Pending => AwaitStatus::Pending,
            DecisionState::Claimed => AwaitStatus::Claimed,
            DecisionState::Rendered => AwaitStatus::Rendered,
            DecisionState::Expired => AwaitStatus::Expired,
        };
        Self {
            status,
            selected_option: d.rendered_option.clone(),
            rendered_by: d.rendered_by.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(key: &str) -> DecisionOption {
        DecisionOption {
            key: key.to_string(),
            label: key.to_string(),
            consequence: "".into(),
        }
    }

    #[test]
    fn rejects_empty_options() {
        assert!(Decision::validate_options(&[], &None).is_err());
    }

    #[test]
    fn rejects_duplicate_keys() {
        let opts = vec![opt("a"), opt("a")];
        assert!(Decision::validate_options(&opts, &None).is_err());
    }

    #[test]
    fn rejects_fallback_not_in_options() {
        let opts = vec![opt("a"), opt("b")];
        assert!(Decision::validate_options(&opts, &Some("c".into())).is_err());
        assert!(Decision::validate_options(&opts, &Some("a".into())).is_ok());
    }
}
