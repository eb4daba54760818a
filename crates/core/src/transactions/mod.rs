//! Income/expense transactions.

mod transactions_model;

pub use transactions_model::*;
