//! Local storage backends for Xpenza.
//!
//! `MemoryDocumentStore` implements the remote document contract in process;
//! it backs offline sessions and drives the sync store in tests. The caches
//! implement the local persistent cache contract.

pub mod cache;
pub mod documents;

pub use cache::{FileCache, MemoryCache};
pub use documents::{MemoryDocumentStore, StoreOp};
