//! REST client for a Firestore-shaped document API.
//!
//! [`RestDocumentStore`] implements [`xpenza_core::sync::DocumentStore`] so the
//! sync store can run against the hosted backend. Live watches are served by
//! polling.

mod client;
mod config;
mod error;
mod poll;
mod values;

pub use client::RestDocumentStore;
pub use config::RestStoreConfig;
pub use error::{ApiRetryClass, RemoteError, Result};
pub use poll::{backoff_seconds, poll_delay};
