use std::time::Duration;

use crate::error::{RemoteError, Result};

const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Connection settings for [`crate::RestDocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestStoreConfig {
    pub base_url: String,
    pub project_id: String,
    pub database: String,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl RestStoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            api_key: None,
            auth_token: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(30),
        }
    }

    /// Reads `XPENZA_FIRESTORE_PROJECT` (required), `XPENZA_FIRESTORE_URL`,
    /// `XPENZA_FIRESTORE_API_KEY` and `XPENZA_POLL_INTERVAL_SECS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let project_id = non_empty("XPENZA_FIRESTORE_PROJECT").ok_or_else(|| {
            RemoteError::config("XPENZA_FIRESTORE_PROJECT not configured. Remote sync is disabled.")
        })?;
        let mut config = Self::new(project_id);
        if let Some(url) = non_empty("XPENZA_FIRESTORE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        config.api_key = non_empty("XPENZA_FIRESTORE_API_KEY");
        if let Some(raw) = non_empty("XPENZA_POLL_INTERVAL_SECS") {
            let secs = raw.parse::<u64>().map_err(|_| {
                RemoteError::config(format!("XPENZA_POLL_INTERVAL_SECS is not a number: {}", raw))
            })?;
            config.poll_interval = Duration::from_secs(secs.max(1));
        }
        Ok(config)
    }

    /// `{base}/v1/projects/{project}/databases/{database}/documents`
    pub fn documents_url(&self) -> String {
        format!(
            "{}/v1/{}",
            self.base_url.trim_end_matches('/'),
            self.documents_path()
        )
    }

    /// Resource path used in document names and batch writes.
    pub fn documents_path(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn project_is_required() {
        let err = RestStoreConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, RemoteError::Config(_)));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = RestStoreConfig::from_lookup(lookup(&[
            ("XPENZA_FIRESTORE_PROJECT", "xpenza-dev"),
            ("XPENZA_FIRESTORE_URL", "http://localhost:8080/"),
            ("XPENZA_POLL_INTERVAL_SECS", "0"),
            ("XPENZA_FIRESTORE_API_KEY", "  "),
        ]))
        .expect("config");
        assert_eq!(
            config.documents_url(),
            "http://localhost:8080/v1/projects/xpenza-dev/databases/(default)/documents"
        );
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.api_key, None);
    }

    #[test]
    fn bad_interval_is_a_config_error() {
        let err = RestStoreConfig::from_lookup(lookup(&[
            ("XPENZA_FIRESTORE_PROJECT", "p"),
            ("XPENZA_POLL_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("soon"));
    }
}
