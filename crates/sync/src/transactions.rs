//! Optimistic transaction commands and the transaction subscription.

use std::sync::Arc;

use log::{debug, error, info, warn};
use xpenza_core::sync::{
    new_client_key, now_rfc3339, CommandOutcome, Document, Filter, Precondition, RecordId,
    TRANSACTIONS_COLLECTION,
};
use xpenza_core::transactions::{Transaction, TransactionDraft, TransactionPatch};

use crate::state::StoreState;
use crate::store::SyncStore;
use crate::subscription::SubscriptionHandle;

/// Decodes remote transaction documents, skipping ones that do not parse.
pub(crate) fn decode_transactions(documents: &[Document]) -> Vec<Transaction> {
    documents
        .iter()
        .filter_map(|doc| match Transaction::from_document(doc) {
            Ok(tx) => Some(tx),
            Err(err) => {
                warn!("[SyncStore] Skipping transaction document: {}", err);
                None
            }
        })
        .collect()
}

impl SyncStore {
    /// Inserts a pending transaction into the active ledger and queues its
    /// remote create. Returns the client key, which is also the record's id
    /// until the create is confirmed.
    ///
    /// A create into a ledger that is itself still pending waits for the
    /// ledger's create and is written with the ledger's server id.
    pub fn add_transaction(&self, draft: TransactionDraft) -> CommandOutcome<String> {
        let Some(owner_id) = self.owner_id() else {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        };
        if draft.amount.is_sign_negative() && !draft.amount.is_zero() {
            return CommandOutcome::PreconditionFailed(Precondition::NegativeAmount);
        }
        let Some(ledger) = self.active_ledger() else {
            return CommandOutcome::PreconditionFailed(Precondition::NoActiveLedger);
        };

        let client_key = new_client_key();
        let created_at = now_rfc3339();
        let date = draft
            .date
            .unwrap_or_else(|| created_at.get(..10).unwrap_or_default().to_string());
        let record = Transaction {
            id: RecordId::Pending(client_key.clone()),
            client_key: client_key.clone(),
            owner_id,
            title: draft.title,
            amount: draft.amount,
            date,
            category: draft.category,
            kind: draft.kind,
            ledger_id: Some(ledger.id.to_string()),
            note: draft.note,
            created_at,
            updated_at: None,
            is_syncing: true,
        };
        self.mutate(|state| state.transactions.insert(0, record));
        debug!("[SyncStore] Added transaction {} (pending)", client_key);

        let deps = if ledger.id.is_pending() {
            vec![ledger.client_key.clone()]
        } else {
            Vec::new()
        };
        if let Some(store) = self.handle() {
            let key = client_key.clone();
            self.in_flight.enqueue_after(&client_key, &deps, async move {
                store.push_transaction_create(&key).await;
            });
        }
        CommandOutcome::Applied(client_key)
    }

    /// Queues the create again for pending transactions with no remote work
    /// left, behind their ledger's create when that is pending too.
    pub(crate) fn retry_local_transactions(&self) {
        let stranded: Vec<(String, Vec<String>)> = {
            let state = self.read();
            state
                .transactions
                .iter()
                .filter(|tx| tx.id.is_pending() && !self.in_flight.is_in_flight(&tx.client_key))
                .map(|tx| {
                    let deps = tx
                        .ledger_id
                        .as_deref()
                        .and_then(|token| state.ledger(token))
                        .filter(|ledger| ledger.id.is_pending())
                        .map(|ledger| vec![ledger.client_key.clone()])
                        .unwrap_or_default();
                    (tx.client_key.clone(), deps)
                })
                .collect()
        };
        if stranded.is_empty() {
            return;
        }
        self.mutate(|state| {
            for tx in &mut state.transactions {
                if stranded.iter().any(|(key, _)| *key == tx.client_key) {
                    tx.is_syncing = true;
                }
            }
        });
        let Some(store) = self.handle() else {
            return;
        };
        for (key, deps) in &stranded {
            let store = Arc::clone(&store);
            let task_key = key.clone();
            self.in_flight.enqueue_after(key, deps, async move {
                store.push_transaction_create(&task_key).await;
            });
        }
        info!("[SyncStore] Retrying create of {} transactions", stranded.len());
    }

    /// Writes the current local version of a never-confirmed record.
    async fn push_transaction_create(&self, key: &str) {
        let record = {
            let state = self.read();
            state
                .transactions
                .iter()
                .find(|tx| tx.client_key == key)
                .cloned()
                .map(|tx| {
                    let ledger = tx
                        .ledger_id
                        .as_deref()
                        .map(|token| state.ledger_server_id(token));
                    (tx, ledger)
                })
        };
        let Some((mut record, ledger)) = record else {
            debug!("[SyncStore] Transaction {} removed before create", key);
            return;
        };
        if !record.id.is_pending() {
            return;
        }
        match ledger {
            Some(None) => {
                warn!(
                    "[SyncStore] Ledger of transaction {} was never confirmed, keeping it local",
                    key
                );
                self.mutate(|state| state.settle_record(key));
                return;
            }
            Some(Some(ledger_id)) => record.ledger_id = Some(ledger_id),
            None => {}
        }

        let result = self
            .documents
            .create(TRANSACTIONS_COLLECTION, record.to_fields())
            .await;
        match result {
            Ok(server_id) => {
                info!("[SyncStore] Transaction {} confirmed as {}", key, server_id);
                self.mutate(|state| {
                    if !state.confirm_transaction(key, &server_id) {
                        debug!("[SyncStore] Transaction {} no longer held locally", key);
                    }
                });
            }
            Err(err) => {
                error!("[SyncStore] Failed to create transaction {}: {}", key, err);
                self.mutate(|state| state.settle_record(key));
            }
        }
    }

    /// Applies `patch` locally and queues the remote merge behind any earlier
    /// write for the record. If the record's create failed, the full record is
    /// created instead.
    pub fn update_transaction(&self, token: &str, patch: TransactionPatch) -> CommandOutcome<String> {
        if self.owner_id().is_none() {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        }
        if patch
            .amount
            .is_some_and(|amount| amount.is_sign_negative() && !amount.is_zero())
        {
            return CommandOutcome::PreconditionFailed(Precondition::NegativeAmount);
        }

        let updated_at = now_rfc3339();
        let applied = self.mutate(|state| {
            let tx = state.transactions.iter_mut().find(|tx| tx.matches(token))?;
            patch.apply(tx);
            tx.updated_at = Some(updated_at.clone());
            tx.is_syncing = true;
            let key = tx.client_key.clone();
            state.begin_update(&key);
            Some(key)
        });
        let Some(key) = applied else {
            return CommandOutcome::PreconditionFailed(Precondition::UnknownRecord(
                token.to_string(),
            ));
        };

        if let Some(store) = self.handle() {
            let task_key = key.clone();
            self.in_flight.enqueue(&key, async move {
                store
                    .push_transaction_update(&task_key, &patch, &updated_at)
                    .await;
                store.mutate(|state| state.finish_update(&task_key));
            });
        }
        CommandOutcome::Applied(key)
    }

    async fn push_transaction_update(&self, key: &str, patch: &TransactionPatch, updated_at: &str) {
        let server_id = self.read().server_id_for(key);
        let Some(server_id) = server_id else {
            let still_held = self.read().transaction(key).is_some();
            if still_held {
                info!("[SyncStore] Transaction {} was never created, retrying create", key);
                self.push_transaction_create(key).await;
            }
            return;
        };

        let result = self
            .documents
            .update(TRANSACTIONS_COLLECTION, &server_id, patch.to_fields(updated_at))
            .await;
        match result {
            Ok(()) => debug!("[SyncStore] Updated transaction {}", server_id),
            Err(err) => error!("[SyncStore] Failed to update transaction {}: {}", server_id, err),
        }
    }

    /// Removes the record locally and queues the remote delete. A failed
    /// delete puts the record back where it was.
    pub fn delete_transaction(&self, token: &str) -> CommandOutcome<String> {
        if self.owner_id().is_none() {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        }
        let removed = self.mutate(|state| {
            let index = state.transactions.iter().position(|tx| tx.matches(token))?;
            let before = state.transactions.clone();
            let tx = state.transactions.remove(index);
            state.pending_deletes.insert(tx.client_key.clone());
            if let Some(server_id) = tx.id.server_id() {
                state.confirmed.insert(tx.client_key.clone(), server_id.to_string());
            }
            Some((tx.client_key, before))
        });
        let Some((key, before)) = removed else {
            return CommandOutcome::PreconditionFailed(Precondition::UnknownRecord(
                token.to_string(),
            ));
        };

        if let Some(store) = self.handle() {
            let task_key = key.clone();
            self.in_flight.enqueue(&key, async move {
                store.push_transaction_delete(&task_key, before).await;
            });
        }
        CommandOutcome::Applied(key)
    }

    async fn push_transaction_delete(&self, key: &str, before: Vec<Transaction>) {
        let server_id = self.read().server_id_for(key);
        let Some(server_id) = server_id else {
            debug!("[SyncStore] Transaction {} was never created, deleted locally", key);
            self.mutate(|state| state.pending_deletes.remove(key));
            return;
        };

        let result = self
            .documents
            .delete(TRANSACTIONS_COLLECTION, &server_id)
            .await;
        match result {
            Ok(()) => {
                info!("[SyncStore] Deleted transaction {}", server_id);
                self.mutate(|state| state.pending_deletes.remove(key));
            }
            Err(err) => {
                error!(
                    "[SyncStore] Failed to delete transaction {}, restoring: {}",
                    server_id, err
                );
                self.mutate(|state| {
                    state.pending_deletes.remove(key);
                    restore_transactions(state, before);
                });
            }
        }
    }

    /// One-shot read of the active ledger's transactions.
    pub async fn fetch_transactions(&self) -> CommandOutcome<usize> {
        let (filters, ledger_id) = match self.transaction_filters().await {
            Ok(resolved) => resolved,
            Err(outcome) => return outcome,
        };
        let documents = match self.documents.query(TRANSACTIONS_COLLECTION, &filters).await {
            Ok(documents) => documents,
            Err(err) => {
                error!("[SyncStore] Failed to fetch transactions: {}", err);
                return CommandOutcome::RemoteFailed(err.to_string());
            }
        };
        let fetched = decode_transactions(&documents);
        let count = fetched.len();
        self.mutate(|state| {
            if state.active_ledger_server_id() == Some(ledger_id) {
                state.merge_transactions(fetched);
            }
        });
        debug!("[SyncStore] Fetched {} transactions", count);
        CommandOutcome::Applied(count)
    }

    /// Watches the active ledger's transactions. Any earlier transaction
    /// subscription is cancelled, and the subscription follows the active
    /// ledger until the session is cleared.
    pub async fn subscribe_to_transactions(&self) -> CommandOutcome<Arc<SubscriptionHandle>> {
        if self.owner_id().is_none() {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        }
        self.subscriptions().transactions_wanted = true;
        self.open_transaction_subscription().await
    }

    /// Watches whichever ledger is active once the watch is open, retrying
    /// when the active ledger moves while subscribing.
    pub(crate) async fn open_transaction_subscription(
        &self,
    ) -> CommandOutcome<Arc<SubscriptionHandle>> {
        loop {
            let (filters, ledger_id) = match self.transaction_filters().await {
                Ok(resolved) => resolved,
                Err(outcome) => return outcome,
            };
            let stream = match self.documents.watch(TRANSACTIONS_COLLECTION, filters).await {
                Ok(stream) => stream,
                Err(err) => {
                    error!("[SyncStore] Failed to watch transactions: {}", err);
                    return CommandOutcome::RemoteFailed(err.to_string());
                }
            };

            let handle = SubscriptionHandle::new("transactions");
            let filter_ledger = ledger_id.clone();
            self.spawn_subscription(&handle, stream, move |store, documents| {
                let snapshot = decode_transactions(&documents);
                store.mutate(|state| {
                    // Snapshots for a ledger that is no longer active are stale.
                    if state.active_ledger_server_id().as_deref() == Some(filter_ledger.as_str()) {
                        state.merge_transactions(snapshot);
                    }
                });
                false
            });
            if !self.install_transaction_subscription(ledger_id.clone(), Arc::clone(&handle)) {
                debug!(
                    "[SyncStore] Ledger {} stopped being active while subscribing",
                    ledger_id
                );
                handle.cancel();
                continue;
            }
            info!("[SyncStore] Subscribed to transactions of ledger {}", ledger_id);
            return CommandOutcome::Applied(handle);
        }
    }

    /// Remote filters for the active ledger's transactions, waiting for the
    /// ledger's create when it is still pending.
    async fn transaction_filters<T>(&self) -> Result<(Vec<Filter>, String), CommandOutcome<T>> {
        let Some(owner_id) = self.owner_id() else {
            return Err(CommandOutcome::PreconditionFailed(Precondition::NoSession));
        };
        let Some(ledger) = self.active_ledger() else {
            return Err(CommandOutcome::PreconditionFailed(Precondition::NoActiveLedger));
        };
        if ledger.id.is_pending() {
            self.in_flight.wait(&ledger.client_key).await;
        }
        let ledger_id = self.read().ledger_server_id(&ledger.client_key);
        let Some(ledger_id) = ledger_id else {
            return Err(CommandOutcome::RemoteFailed(format!(
                "ledger {} is not confirmed",
                ledger.client_key
            )));
        };
        Ok((
            vec![
                Filter::eq("ownerId", owner_id),
                Filter::eq("ledgerId", ledger_id.clone()),
            ],
            ledger_id,
        ))
    }
}

/// Puts back the list as it was before a delete, keeping confirmations and
/// inserts that landed since.
fn restore_transactions(state: &mut StoreState, mut before: Vec<Transaction>) {
    before.retain(|tx| !state.pending_deletes.contains(&tx.client_key));
    for tx in &mut before {
        if tx.id.is_pending() {
            if let Some(server_id) = state.confirmed.get(&tx.client_key) {
                tx.id = RecordId::Confirmed(server_id.clone());
                tx.is_syncing = state.pending_updates.contains_key(&tx.client_key);
            }
        }
    }
    let newer: Vec<Transaction> = state
        .transactions
        .iter()
        .filter(|tx| !before.iter().any(|held| held.client_key == tx.client_key))
        .cloned()
        .collect();
    before.extend(newer);
    state.transactions = before;
    state.sort_transactions();
}
