//! # ledger-engine
//!
//! The write path: one [`ledger::Ledger`] trait that every operation in this
//! crate commits through, plus the operations themselves, organized by the
//! entity they act on. `ledger-http` calls these functions directly; none of
//! them know anything about HTTP.

pub mod admission;
pub mod artifacts;
pub mod blob;
pub mod bot;
pub mod cards;
pub mod decisions;
pub mod ledger;

pub use blob::{BlobStore, MemoryBlobStore};
pub use ledger::{Ledger, MemoryLedger, PgLedger};
