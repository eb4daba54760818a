//! Ledgers ("books") grouping transactions.

mod ledgers_model;

pub use ledgers_model::*;
