//! # ledger-http
//!
//! The HTTP adapter: every `ledger-engine`/`ledger-access` operation bound to
//! a route, one group per component. Handlers resolve auth, deserialize the
//! operation's own input struct, call straight into the engine, and
//! serialize its own output struct back — no translation layer in between.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
