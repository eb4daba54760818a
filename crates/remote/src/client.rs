//! Document API client.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use xpenza_core::sync::{BatchOp, Document, DocumentStore, Fields, Filter, WatchStream};

use crate::config::RestStoreConfig;
use crate::error::{ApiRetryClass, RemoteError, Result};
use crate::poll::poll_delay;
use crate::values::{decode_document, document_id, encode_fields, structured_query};

const MAX_LOG_BODY_CHARS: usize = 512;

/// Client for a Firestore-compatible REST document API.
#[derive(Debug, Clone)]
pub struct RestDocumentStore {
    client: reqwest::Client,
    config: Arc<RestStoreConfig>,
    auth_token: Arc<RwLock<Option<String>>>,
}

impl RestDocumentStore {
    pub fn new(config: RestStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let auth_token = Arc::new(RwLock::new(config.auth_token.clone()));
        Ok(Self {
            client,
            config: Arc::new(config),
            auth_token,
        })
    }

    /// Replaces the bearer token, e.g. after the identity provider refreshes it.
    pub fn set_auth_token(&self, token: Option<String>) {
        match self.auth_token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn current_token(&self) -> Option<String> {
        match self.auth_token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = self.current_token() {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| RemoteError::config("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }
        Ok(headers)
    }

    /// Appends the API key, when configured, to `url`.
    fn with_key(&self, url: String) -> String {
        match &self.config.api_key {
            Some(key) => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", url, separator, urlencoding::encode(key))
            }
            None => url,
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/{}",
            self.config.documents_url(),
            urlencoding::encode(collection)
        )
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(collection),
            urlencoding::encode(id)
        )
    }

    fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{}/{}", self.config.documents_path(), collection, id)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[RemoteStore] API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[RemoteStore] API response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body, mapping non-success statuses to API errors.
    async fn parse_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| format!("Request failed: {}", body));
            return Err(RemoteError::api(status.as_u16(), message));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// POST {collection}
    pub async fn create_document(&self, collection: &str, fields: &Fields) -> Result<String> {
        let url = self.with_key(self.collection_url(collection));
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&json!({ "fields": encode_fields(fields) }))
            .send()
            .await?;

        let body = Self::parse_response(response).await?;
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::invalid_response("create returned no document name"))?;
        document_id(name)
    }

    /// POST :runQuery
    pub async fn run_query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>> {
        let url = self.with_key(format!("{}:runQuery", self.config.documents_url()));
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&structured_query(collection, filters))
            .send()
            .await?;

        let body = Self::parse_response(response).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| RemoteError::invalid_response("runQuery did not return a list"))?;
        // Rows without a document only carry read metadata.
        rows.iter()
            .filter_map(|row| row.get("document"))
            .map(decode_document)
            .collect()
    }

    /// PATCH {collection}/{id} restricted to the given fields; the document
    /// must already exist.
    pub async fn patch_document(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        let mut url = format!("{}?currentDocument.exists=true", self.document_url(collection, id));
        for name in fields.keys() {
            url.push_str("&updateMask.fieldPaths=");
            url.push_str(&urlencoding::encode(name));
        }
        let response = self
            .client
            .patch(&self.with_key(url))
            .headers(self.headers()?)
            .json(&json!({ "fields": encode_fields(fields) }))
            .send()
            .await?;

        Self::parse_response(response).await.map(|_| ())
    }

    /// DELETE {collection}/{id}
    pub async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        let url = self.with_key(self.document_url(collection, id));
        let response = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await?;

        Self::parse_response(response).await.map(|_| ())
    }

    fn batch_write(&self, op: &BatchOp) -> Value {
        match op {
            BatchOp::Update {
                collection,
                id,
                fields,
            } => json!({
                "update": {
                    "name": self.document_name(collection, id),
                    "fields": encode_fields(fields),
                },
                "updateMask": { "fieldPaths": fields.keys().collect::<Vec<_>>() },
                "currentDocument": { "exists": true },
            }),
            BatchOp::Delete { collection, id } => json!({
                "delete": self.document_name(collection, id),
            }),
        }
    }

    /// POST :commit
    pub async fn commit(&self, ops: &[BatchOp]) -> Result<()> {
        let url = self.with_key(format!("{}:commit", self.config.documents_url()));
        let writes: Vec<Value> = ops.iter().map(|op| self.batch_write(op)).collect();
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&json!({ "writes": writes }))
            .send()
            .await?;

        Self::parse_response(response).await.map(|_| ())
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn create(&self, collection: &str, fields: Fields) -> xpenza_core::Result<String> {
        Ok(self.create_document(collection, &fields).await?)
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> xpenza_core::Result<Vec<Document>> {
        Ok(self.run_query(collection, filters).await?)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> xpenza_core::Result<()> {
        match self.patch_document(collection, id, &fields).await {
            Err(err) if err.status_code() == Some(404) => {
                Err(xpenza_core::Error::not_found(collection, id))
            }
            other => Ok(other?),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> xpenza_core::Result<()> {
        Ok(self.delete_document(collection, id).await?)
    }

    async fn commit_batch(&self, ops: Vec<BatchOp>) -> xpenza_core::Result<()> {
        Ok(self.commit(&ops).await?)
    }

    /// Polls the query and pushes a result whenever it differs from the last
    /// one delivered. Polling stops once the receiver is dropped.
    async fn watch(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> xpenza_core::Result<WatchStream> {
        let initial = self.run_query(collection, &filters).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is held right here, so the first send cannot fail.
        let _ = tx.send(initial.clone());

        let store = self.clone();
        let collection = collection.to_string();
        tokio::spawn(async move {
            let mut last = initial;
            let mut failures: u32 = 0;
            loop {
                let delay = poll_delay(store.config.poll_interval, failures);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = tx.closed() => break,
                }

                match store.run_query(&collection, &filters).await {
                    Ok(docs) => {
                        failures = 0;
                        if docs != last {
                            if tx.send(docs.clone()).is_err() {
                                break;
                            }
                            last = docs;
                        }
                    }
                    Err(err) => {
                        failures = failures.saturating_add(1);
                        if err.retry_class() == ApiRetryClass::ReauthRequired {
                            warn!(
                                "[RemoteStore] Watch on {} needs a fresh token: {}",
                                collection, err
                            );
                        } else {
                            warn!(
                                "[RemoteStore] Watch poll on {} failed ({} in a row): {}",
                                collection, failures, err
                            );
                        }
                    }
                }
            }
            debug!("[RemoteStore] Watch on {} stopped", collection);
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(api_key: Option<&str>) -> RestDocumentStore {
        let mut config = RestStoreConfig::new("xpenza-dev");
        config.base_url = "http://localhost:8080".to_string();
        config.api_key = api_key.map(str::to_string);
        RestDocumentStore::new(config).expect("client")
    }

    #[test]
    fn urls_encode_ids_and_append_key() {
        let store = store(Some("k 1"));
        assert_eq!(
            store.with_key(store.document_url("transactions", "a/b")),
            "http://localhost:8080/v1/projects/xpenza-dev/databases/(default)/documents/transactions/a%2Fb?key=k%201"
        );
        assert_eq!(
            store.with_key("http://x/y?currentDocument.exists=true".to_string()),
            "http://x/y?currentDocument.exists=true&key=k%201"
        );
    }

    #[test]
    fn batch_writes_use_resource_names() {
        let store = store(None);
        let mut fields = Fields::new();
        fields.insert("ledgerId".into(), "l1".into());

        let update = store.batch_write(&BatchOp::update("transactions", "t1", fields));
        assert_eq!(
            update["update"]["name"],
            json!("projects/xpenza-dev/databases/(default)/documents/transactions/t1")
        );
        assert_eq!(update["updateMask"]["fieldPaths"], json!(["ledgerId"]));
        assert_eq!(update["currentDocument"]["exists"], json!(true));

        let delete = store.batch_write(&BatchOp::delete("ledgers", "l1"));
        assert_eq!(
            delete["delete"],
            json!("projects/xpenza-dev/databases/(default)/documents/ledgers/l1")
        );
    }

    #[test]
    fn bearer_header_follows_token_updates() {
        let store = store(None);
        assert!(store.headers().expect("headers").get(AUTHORIZATION).is_none());
        store.set_auth_token(Some("abc".into()));
        assert_eq!(
            store.headers().expect("headers").get(AUTHORIZATION),
            Some(&HeaderValue::from_static("Bearer abc"))
        );
    }
}
