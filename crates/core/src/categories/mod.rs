//! Built-in and user-defined categories.

mod categories_model;

pub use categories_model::*;
