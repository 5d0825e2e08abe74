//! # ledger-core
//!
//! Domain types for the decision-ledger coordination runtime: the append-only
//! [`Event`] envelope and its closed set of payloads, the read models
//! ([`Command`], [`Run`], [`Card`], [`Decision`], [`Artifact`]), the RBAC
//! [`Role`]/[`AuthContext`] pair, the [`CardState`] transition table, and the
//! error taxonomy every other crate in this workspace builds on.
//!
//! ## Architecture
//!
//! ```text
//! bot/operator
//!     │
//!     ▼ request_command / request_decision / render_decision / ...
//! ledger-access (Access Guard) ──► AuthContext
//!     │
//!     ▼
//! ledger-engine (Command Admission, Card State Machine, Decision Lifecycle,
//!                Artifact Registry)
//!     │
//!     ▼ append()
//! ledger-store (Event Log)
//!     │
//!     ▼ inline, same transaction
//! ledger-projectors ──► commands / runs / cards / decisions / artifacts
//! ```
//!
//! Facts ([`Event`]) are immutable and carry no IO; everything else in the
//! workspace is either a pure projection of the event stream or an
//! operation that validates a precondition and appends exactly one
//! transactional batch of events.

pub mod artifact;
pub mod card;
pub mod clock;
pub mod command;
pub mod config;
pub mod decision;
pub mod error;
pub mod event;
pub mod ids;
pub mod role;
pub mod secret;

pub use artifact::{Artifact, BlobProvider, Encoding, StoragePointer};
pub use clock::{Clock, FakeClock, SystemClock};
pub use card::{Card, CardSpec, CardState, Priority};
pub use command::{Command, CommandSpec, CommandStatus, Run, RunStatus};
pub use config::RuntimeConfig;
pub use decision::{Decision, DecisionOption, DecisionState, Urgency};
pub use error::{BatchOutcome, ClaimOutcome, CoreError, CoreResult, ItemOutcome, RenderOutcome};
pub use event::{Event, EventBuilder, EventPayload, Producer, SubjectIds};
pub use ids::{
    ArtifactId, CardId, CommandId, CorrelationId, DecisionId, EventId, ProjectId, RunId, Scope,
    TenantId, UserId,
};
pub use role::{AuthContext, Role};
