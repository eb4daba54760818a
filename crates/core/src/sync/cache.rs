//! Local persistent cache contract.

use crate::errors::Result;

/// Cache key for the sync store state.
pub const STORE_CACHE_KEY: &str = "xpenza-transactions";

/// Cache key for user settings.
pub const SETTINGS_CACHE_KEY: &str = "xpenza-settings";

/// Key-value storage of serialized JSON blobs that survives restarts.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}
