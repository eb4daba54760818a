//! In-memory collections owned by the sync store and the rules that
//! reconcile them with remote results.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use xpenza_core::categories::{default_categories, Category};
use xpenza_core::ledgers::Ledger;
use xpenza_core::sync::{newest_first, RecordId, LOCAL_ID_PREFIX};
use xpenza_core::transactions::Transaction;

/// Session state. Serialized as-is into the local cache, minus the
/// bookkeeping of in-flight remote work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    /// Newest first by `createdAt`.
    pub transactions: Vec<Transaction>,
    /// Unique by id; built-ins first.
    pub categories: Vec<Category>,
    pub ledgers: Vec<Ledger>,
    pub active_ledger_id: Option<String>,
    /// Client key -> server id for every record confirmed this session.
    #[serde(skip)]
    pub(crate) confirmed: HashMap<String, String>,
    /// Client keys of records whose remote delete has not finished.
    #[serde(skip)]
    pub(crate) pending_deletes: HashSet<String>,
    /// Client key -> remote updates queued but not finished.
    #[serde(skip)]
    pub(crate) pending_updates: HashMap<String, usize>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            transactions: Vec::new(),
            categories: default_categories(),
            ledgers: Vec::new(),
            active_ledger_id: None,
            confirmed: HashMap::new(),
            pending_deletes: HashSet::new(),
            pending_updates: HashMap::new(),
        }
    }
}

impl StoreState {
    pub fn sort_transactions(&mut self) {
        self.transactions
            .sort_by(|a, b| newest_first(&a.created_at, &b.created_at));
    }

    pub fn transaction(&self, token: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.matches(token))
    }

    pub(crate) fn transaction_by_key_mut(&mut self, key: &str) -> Option<&mut Transaction> {
        self.transactions.iter_mut().find(|tx| tx.client_key == key)
    }

    pub fn ledger(&self, token: &str) -> Option<&Ledger> {
        self.ledgers.iter().find(|ledger| ledger.matches(token))
    }

    pub fn active_ledger(&self) -> Option<&Ledger> {
        self.active_ledger_id
            .as_deref()
            .and_then(|id| self.ledger(id))
    }

    /// Transactions belonging to the active ledger, in display order.
    pub fn active_transactions(&self) -> Vec<Transaction> {
        match self.active_ledger() {
            Some(ledger) => self
                .transactions
                .iter()
                .filter(|tx| tx.ledger_id.as_deref().is_some_and(|id| ledger.matches(id)))
                .cloned()
                .collect(),
            None => self.transactions.clone(),
        }
    }

    /// Server id for a client key, whether the record is still held or not.
    pub(crate) fn server_id_for(&self, key: &str) -> Option<String> {
        if let Some(id) = self.confirmed.get(key) {
            return Some(id.clone());
        }
        self.transactions
            .iter()
            .find(|tx| tx.client_key == key)
            .and_then(|tx| tx.id.server_id())
            .or_else(|| {
                self.ledgers
                    .iter()
                    .find(|ledger| ledger.client_key == key)
                    .and_then(|ledger| ledger.id.server_id())
            })
            .map(str::to_string)
    }

    /// Server id of the active ledger, once its create is confirmed.
    pub(crate) fn active_ledger_server_id(&self) -> Option<String> {
        let ledger = self.active_ledger()?;
        self.ledger_server_id(&ledger.client_key)
    }

    /// Resolves a ledger reference held by a transaction to the ledger's
    /// server id. Unknown references that are not client tokens are assumed
    /// to be server ids already.
    pub(crate) fn ledger_server_id(&self, token: &str) -> Option<String> {
        if let Some(ledger) = self.ledger(token) {
            return ledger
                .id
                .server_id()
                .map(str::to_string)
                .or_else(|| self.confirmed.get(&ledger.client_key).cloned());
        }
        if let Some(id) = self.confirmed.get(token) {
            return Some(id.clone());
        }
        if token.starts_with(LOCAL_ID_PREFIX) {
            None
        } else {
            Some(token.to_string())
        }
    }

    pub(crate) fn begin_update(&mut self, key: &str) {
        *self.pending_updates.entry(key.to_string()).or_default() += 1;
    }

    /// Marks one queued update done and clears the syncing flag once none
    /// remain.
    pub(crate) fn finish_update(&mut self, key: &str) {
        if let Some(count) = self.pending_updates.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending_updates.remove(key);
            }
        }
        self.settle_record(key);
    }

    /// Clears the syncing flag unless updates for the record are still queued.
    pub(crate) fn settle_record(&mut self, key: &str) {
        let busy = self.pending_updates.contains_key(key);
        if let Some(tx) = self.transaction_by_key_mut(key) {
            tx.is_syncing = busy;
        }
    }

    fn is_deleting(&self, key: &str) -> bool {
        self.pending_deletes.contains(key)
    }

    /// Records the server id for a created transaction. Returns false when the
    /// record is no longer held.
    pub(crate) fn confirm_transaction(&mut self, key: &str, server_id: &str) -> bool {
        self.confirmed.insert(key.to_string(), server_id.to_string());
        match self.transaction_by_key_mut(key) {
            Some(tx) => {
                tx.id = RecordId::Confirmed(server_id.to_string());
                self.settle_record(key);
                true
            }
            None => false,
        }
    }

    /// Records the server id for a created ledger.
    ///
    /// A live snapshot may already have delivered the ledger; in that case no
    /// second entry is kept and only references are repointed.
    pub(crate) fn confirm_ledger(&mut self, key: &str, server_id: &str) {
        self.confirmed.insert(key.to_string(), server_id.to_string());

        let delivered = self
            .ledgers
            .iter()
            .any(|ledger| ledger.id.server_id() == Some(server_id) && ledger.client_key != key);
        if delivered {
            self.ledgers.retain(|ledger| ledger.client_key != key);
        } else if let Some(ledger) = self.ledgers.iter_mut().find(|l| l.client_key == key) {
            ledger.id = RecordId::Confirmed(server_id.to_string());
        }
        self.remap_ledger_refs(key, server_id);
    }

    /// Repoints the active pointer and transaction ledger references from a
    /// ledger's client key to its server id.
    pub(crate) fn remap_ledger_refs(&mut self, key: &str, server_id: &str) {
        if key == server_id {
            return;
        }
        if self.active_ledger_id.as_deref() == Some(key) {
            self.active_ledger_id = Some(server_id.to_string());
        }
        for tx in &mut self.transactions {
            if tx.ledger_id.as_deref() == Some(key) {
                tx.ledger_id = Some(server_id.to_string());
            }
        }
    }

    /// Keeps the active pointer on an existing ledger, falling back to the
    /// first ledger or `None`. Returns true when the pointer moved.
    pub(crate) fn ensure_active_ledger(&mut self) -> bool {
        let valid = self
            .active_ledger_id
            .as_deref()
            .is_some_and(|id| self.ledger(id).is_some());
        if valid {
            return false;
        }
        let fallback = self.ledgers.first().map(|ledger| ledger.id.to_string());
        let moved = fallback != self.active_ledger_id;
        self.active_ledger_id = fallback;
        moved
    }

    /// Folds a remote result for one ledger's transactions into local state.
    ///
    /// Remote records replace local ones by client key, except records with an
    /// update in flight. Never-confirmed local records absent from the result
    /// stay, and records being deleted are not resurrected.
    pub(crate) fn merge_transactions(&mut self, remote: Vec<Transaction>) {
        let local = std::mem::take(&mut self.transactions);
        let mut merged = Vec::with_capacity(remote.len());
        let mut seen = HashSet::new();

        for incoming in remote {
            if self.is_deleting(&incoming.client_key) || !seen.insert(incoming.client_key.clone())
            {
                continue;
            }
            self.confirmed.insert(
                incoming.client_key.clone(),
                incoming.id.as_str().to_string(),
            );
            match local.iter().find(|tx| tx.client_key == incoming.client_key) {
                Some(existing) if existing.is_syncing && !existing.id.is_pending() => {
                    merged.push(existing.clone())
                }
                _ => merged.push(incoming),
            }
        }

        for existing in local {
            if existing.id.is_pending() && !seen.contains(&existing.client_key) {
                merged.push(existing);
            }
        }

        self.transactions = merged;
        self.sort_transactions();
    }

    /// Folds a remote ledger list into local state and fixes the active
    /// pointer. Returns true when the active pointer moved.
    pub(crate) fn merge_ledgers(&mut self, remote: Vec<Ledger>) -> bool {
        let previous_active = self.active_ledger_id.clone();
        let local = std::mem::take(&mut self.ledgers);
        let mut merged = Vec::with_capacity(remote.len());
        let mut seen = HashSet::new();

        for incoming in remote {
            if self.is_deleting(&incoming.client_key) || !seen.insert(incoming.client_key.clone())
            {
                continue;
            }
            merged.push(incoming);
        }
        for existing in local {
            if existing.id.is_pending() && !seen.contains(&existing.client_key) {
                merged.push(existing);
            }
        }
        merged.sort_by(|a, b| newest_first(&b.created_at, &a.created_at));
        self.ledgers = merged;

        let confirmed: Vec<(String, String)> = self
            .ledgers
            .iter()
            .filter_map(|ledger| {
                ledger
                    .id
                    .server_id()
                    .map(|id| (ledger.client_key.clone(), id.to_string()))
            })
            .collect();
        for (key, server_id) in confirmed {
            self.confirmed.insert(key.clone(), server_id.clone());
            self.remap_ledger_refs(&key, &server_id);
        }

        self.ensure_active_ledger();
        previous_active != self.active_ledger_id
    }

    /// Drops in-flight markers; used for state restored from the cache, where
    /// no remote work survives the restart.
    pub(crate) fn settle(&mut self) {
        for tx in &mut self.transactions {
            tx.is_syncing = false;
        }
        let confirmed: Vec<(String, String)> = self
            .transactions
            .iter()
            .map(|tx| (&tx.client_key, &tx.id))
            .chain(self.ledgers.iter().map(|l| (&l.client_key, &l.id)))
            .filter_map(|(key, id)| id.server_id().map(|sid| (key.clone(), sid.to_string())))
            .collect();
        self.confirmed.extend(confirmed);
        self.sort_transactions();
        self.ensure_active_ledger();
    }

    /// Adds categories not already present by id.
    pub(crate) fn extend_categories(&mut self, categories: Vec<Category>) {
        for category in categories {
            if !self.categories.iter().any(|c| c.id == category.id) {
                self.categories.push(category);
            }
        }
    }
}
