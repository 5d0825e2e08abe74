//! The error taxonomy, split via a `Categorizable`/`SafeErrorCategory`
//! idiom: public variants are stable,
//! serializable discriminators a caller can branch on; everything else is
//! wrapped opaquely so infrastructure detail never reaches an HTTP body.

use crate::card::CardState;
use crate::decision::DecisionState;
use crate::role::Role;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no authenticated caller")]
    Unauthenticated,

    #[error("caller is not a member of this project")]
    NotAMember,

    #[error("role {actual} does not satisfy required roles {required:?}")]
    InsufficientPermissions { required: Vec<Role>, actual: Role },

    #[error("entity not found")]
    NotFound,

    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition { from: CardState, to: CardState },

    #[error("card not found")]
    CardNotFound,

    #[error("decision options must be non-empty and have unique keys")]
    InvalidOptions,

    #[error("fallback_option must match one of the decision's option keys")]
    InvalidFallback,

    #[error("option_key does not match any option on this decision")]
    InvalidOption,

    #[error("decision is not claimable in state {0:?}")]
    NotClaimable(DecisionState),

    #[error("caller does not hold the current claim on this decision")]
    NotYourClaim,

    #[error("payload or tags contain a recognized secret pattern")]
    SecretInPayload,

    #[error("project already exists")]
    ProjectExists,

    #[error("user is already a member of this project")]
    DuplicateMember,

    #[error("cannot remove the last owner of a project")]
    CannotRemoveLastOwner,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// A stable, machine-readable discriminator for the HTTP adapter and
    /// for log correlation. Mirrors a `Categorizable` idiom of
    /// separating the Rust enum shape from the wire-stable name.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated => "unauthenticated",
            CoreError::NotAMember => "not_a_member",
            CoreError::InsufficientPermissions { .. } => "insufficient_permissions",
            CoreError::NotFound | CoreError::CardNotFound => "not_found",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::InvalidOptions => "invalid_options",
            CoreError::InvalidFallback => "invalid_fallback",
            CoreError::InvalidOption => "invalid_option",
            CoreError::NotClaimable(_) => "not_claimable",
            CoreError::NotYourClaim => "not_your_claim",
            CoreError::SecretInPayload => "secret_in_payload",
            CoreError::ProjectExists => "project_exists",
            CoreError::DuplicateMember => "duplicate_member",
            CoreError::CannotRemoveLastOwner => "cannot_remove_last_owner",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Whether this variant is safe to echo verbatim to an API caller.
    /// `Internal` never is.
    pub fn is_safe_to_expose(&self) -> bool {
        !matches!(self, CoreError::Internal(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// A non-error, structured outcome for contention-prone operations
/// (`claim_decision`, `render_decision`): observable, not exceptional.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Claimed {
        claimed_until: chrono::DateTime<chrono::Utc>,
    },
    AlreadyClaimed {
        claimed_by: crate::ids::UserId,
        claimed_until: chrono::DateTime<chrono::Utc>,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenderOutcome {
    Rendered { selected_option: String },
    Rejected { reason: String },
}

/// Outcome of one item processed within a sweeper phase: isolates a single
/// item's failure from the rest of the pass.
#[derive(Debug)]
pub enum ItemOutcome {
    Ok,
    Skipped { reason: String },
    Failed { error: anyhow::Error },
}

/// A summary of one sweeper phase's pass over its full active set, used for
/// observability instead of letting a single item's error abort the pass.
#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BatchOutcome {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Ok => self.processed += 1,
            ItemOutcome::Skipped { reason } => {
                self.skipped += 1;
                self.errors.push(reason);
            }
            ItemOutcome::Failed { error } => {
                self.failed += 1;
                self.errors.push(error.to_string());
            }
        }
    }
}
