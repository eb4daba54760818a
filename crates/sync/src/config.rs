use xpenza_core::ledgers::{DEFAULT_LEDGER_COLOR, DEFAULT_LEDGER_ICON, DEFAULT_LEDGER_NAME};
use xpenza_core::sync::STORE_CACHE_KEY;

/// Settings for [`crate::SyncStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStoreConfig {
    /// Cache key the store state is written through to.
    pub cache_key: String,
    /// Write state to the local cache after every change.
    pub persist: bool,
    /// Ledger created for accounts that have none.
    pub default_ledger_name: String,
    pub default_ledger_icon: String,
    pub default_ledger_color: String,
}

impl Default for SyncStoreConfig {
    fn default() -> Self {
        Self {
            cache_key: STORE_CACHE_KEY.to_string(),
            persist: true,
            default_ledger_name: DEFAULT_LEDGER_NAME.to_string(),
            default_ledger_icon: DEFAULT_LEDGER_ICON.to_string(),
            default_ledger_color: DEFAULT_LEDGER_COLOR.to_string(),
        }
    }
}
