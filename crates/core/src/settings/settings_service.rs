use std::sync::{Arc, RwLock};

use log::warn;

use super::{find_currency, Currency, Settings};
use crate::errors::{Error, Result};
use crate::sync::{LocalCache, SETTINGS_CACHE_KEY};

/// Holds the user's settings and writes them through to the local cache.
pub struct SettingsService {
    cache: Arc<dyn LocalCache>,
    current: RwLock<Settings>,
}

impl SettingsService {
    /// Loads settings from the cache, falling back to defaults when the
    /// entry is missing or unreadable.
    pub fn load(cache: Arc<dyn LocalCache>) -> Self {
        let current = match cache.get(SETTINGS_CACHE_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("[Settings] Ignoring unreadable cached settings: {}", e);
                Settings::default()
            }),
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!("[Settings] Failed to read cached settings: {}", e);
                Settings::default()
            }
        };
        Self {
            cache,
            current: RwLock::new(current),
        }
    }

    pub fn settings(&self) -> Settings {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn currency(&self) -> Currency {
        self.settings().currency
    }

    /// Switches the display currency. Only supported codes are accepted.
    pub fn set_currency(&self, code: &str) -> Result<Currency> {
        let currency = find_currency(code)
            .ok_or_else(|| Error::InvalidInput(format!("unsupported currency {}", code)))?;
        let snapshot = {
            let mut guard = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.currency = currency.clone();
            guard.clone()
        };
        let raw = serde_json::to_string(&snapshot)?;
        self.cache.set(SETTINGS_CACHE_KEY, &raw)?;
        Ok(currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapCache(Mutex<HashMap<String, String>>);

    impl LocalCache for MapCache {
        fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.0.lock().expect("lock").get(key).cloned())
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0
                .lock()
                .expect("lock")
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.0.lock().expect("lock").remove(key);
            Ok(())
        }
    }

    #[test]
    fn defaults_to_usd() {
        let service = SettingsService::load(Arc::new(MapCache::default()));
        assert_eq!(service.currency().code, "USD");
    }

    #[test]
    fn currency_choice_survives_reload() {
        let cache: Arc<dyn LocalCache> = Arc::new(MapCache::default());
        let service = SettingsService::load(Arc::clone(&cache));
        let chosen = service.set_currency("lkr").expect("supported");
        assert_eq!(chosen.symbol, "Rs");

        let reloaded = SettingsService::load(cache);
        assert_eq!(reloaded.currency().code, "LKR");
    }

    #[test]
    fn unsupported_currency_is_rejected() {
        let service = SettingsService::load(Arc::new(MapCache::default()));
        assert!(matches!(
            service.set_currency("XYZ"),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(service.currency().code, "USD");
    }

    #[test]
    fn corrupt_cache_falls_back_to_defaults() {
        let cache = MapCache::default();
        cache.set(SETTINGS_CACHE_KEY, "{not json").expect("set");
        let service = SettingsService::load(Arc::new(cache));
        assert_eq!(service.settings(), Settings::default());
    }
}
