//! Read-only aggregations over a transaction list.
//!
//! These are consumers of the data model; nothing here mutates store state.

mod analytics_service;

pub use analytics_service::*;
