//! Core domain types for Xpenza.
//!
//! Holds the ledger/transaction/category model, the record sync state used by
//! optimistic writes, and the contracts for the collaborators the sync store
//! talks to: the remote document store, the identity provider and the local
//! persistent cache.

pub mod analytics;
pub mod categories;
pub mod errors;
pub mod ledgers;
pub mod settings;
pub mod sync;
pub mod transactions;

pub use errors::{Error, Result};
