//! Shared state threaded through every handler via axum's `State` extractor.
//! Holds only trait objects — handlers never know whether they're running
//! against the in-memory backend or Postgres.

use std::sync::Arc;

use ledger_access::{MembershipStore, ProjectStore};
use ledger_core::{Producer, RuntimeConfig};
use ledger_engine::{BlobStore, Ledger};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub blobs: Arc<dyn BlobStore>,
    pub members: Arc<dyn MembershipStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub config: Arc<RuntimeConfig>,
    pub producer: Producer,
    /// `Some` only when running against Postgres; used by `/readyz`.
    pub db_pool: Option<sqlx::PgPool>,
}
