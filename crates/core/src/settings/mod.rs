//! User settings persisted in the local cache.

mod settings_model;
mod settings_service;

pub use settings_model::*;
pub use settings_service::*;
