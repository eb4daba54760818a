#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use xpenza_core::sync::{CommandOutcome, Fields, SessionIdentity, UserProfile};
use xpenza_core::transactions::{TransactionDraft, TransactionType};
use xpenza_storage_local::{MemoryCache, MemoryDocumentStore};
use xpenza_sync::SyncStore;

pub const USER: &str = "user-1";

pub struct Harness {
    pub remote: Arc<MemoryDocumentStore>,
    pub identity: Arc<SessionIdentity>,
    pub cache: Arc<MemoryCache>,
    pub store: Arc<SyncStore>,
}

impl Harness {
    pub fn signed_in() -> Self {
        Self::build(Arc::new(SessionIdentity::signed_in(UserProfile::new(USER))))
    }

    pub fn signed_out() -> Self {
        Self::build(Arc::new(SessionIdentity::new()))
    }

    fn build(identity: Arc<SessionIdentity>) -> Self {
        let remote = Arc::new(MemoryDocumentStore::new());
        let cache = Arc::new(MemoryCache::new());
        let store = SyncStore::new(remote.clone(), identity.clone(), cache.clone());
        Self {
            remote,
            identity,
            cache,
            store,
        }
    }

    /// A second store sharing this one's cache, as after an app restart.
    pub fn restarted(&self) -> Arc<SyncStore> {
        SyncStore::new(
            Arc::new(MemoryDocumentStore::new()),
            self.identity.clone(),
            self.cache.clone(),
        )
    }

    /// Creates a ledger and waits for its confirmation. Returns the server id.
    pub async fn confirmed_ledger(&self, name: &str) -> String {
        let key = applied(self.store.add_ledger(name, "book", "#000000"));
        self.store.wait_idle().await;
        let ledger = self.store.ledger(&key).expect("ledger is held");
        ledger
            .id
            .server_id()
            .expect("ledger is confirmed")
            .to_string()
    }

    /// Adds a transaction to the active ledger and waits for its confirmation.
    pub async fn confirmed_expense(&self, title: &str, amount: Decimal) -> String {
        let key = applied(self.store.add_transaction(expense(title, amount)));
        self.store.wait_idle().await;
        self.store
            .transaction(&key)
            .and_then(|tx| tx.id.server_id().map(str::to_string))
            .expect("transaction is confirmed")
    }
}

pub fn applied<T: std::fmt::Debug>(outcome: CommandOutcome<T>) -> T {
    match outcome {
        CommandOutcome::Applied(value) => value,
        other => panic!("command not applied: {:?}", other),
    }
}

pub fn expense(title: &str, amount: Decimal) -> TransactionDraft {
    TransactionDraft::new(title, amount, "Food", TransactionType::Expense)
}

/// Transaction fields as another device would write them.
pub fn remote_transaction(owner: &str, ledger: Option<&str>, title: &str, created_at: &str) -> Fields {
    let mut value = json!({
        "ownerId": owner,
        "title": title,
        "amount": 5.0,
        "date": "2026-01-01",
        "category": "Food",
        "type": "expense",
        "createdAt": created_at,
    });
    if let Some(ledger) = ledger {
        value["ledgerId"] = json!(ledger);
    }
    match value {
        serde_json::Value::Object(fields) => fields,
        _ => unreachable!(),
    }
}

pub fn remote_ledger(owner: &str, name: &str) -> Fields {
    match json!({
        "ownerId": owner,
        "name": name,
        "icon": "book",
        "color": "#111111",
        "createdAt": "2026-01-01T00:00:00.000Z",
    }) {
        serde_json::Value::Object(fields) => fields,
        _ => unreachable!(),
    }
}

/// Polls `condition` until it holds, failing after a second.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Gives background tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}
