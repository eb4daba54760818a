//! Sync contracts: record state, remote documents, identity and local cache.

mod cache;
mod document_model;
mod identity_model;
mod record_sync_model;

pub use cache::*;
pub use document_model::*;
pub use identity_model::*;
pub use record_sync_model::*;
