//! Client-side sync store for Xpenza.
//!
//! [`SyncStore`] keeps the signed-in user's ledgers, transactions and
//! categories in memory, applies commands optimistically and reconciles them
//! with a [`DocumentStore`](xpenza_core::sync::DocumentStore) in the
//! background.

mod categories;
mod config;
mod in_flight;
mod ledgers;
mod session;
mod state;
mod store;
mod subscription;
mod transactions;

pub use config::SyncStoreConfig;
pub use ledgers::LedgerBootstrap;
pub use state::StoreState;
pub use store::SyncStore;
pub use subscription::SubscriptionHandle;
