//! Ledger lifecycle: creation, cascading delete, the active pointer and the
//! first-session bootstrap.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use xpenza_core::ledgers::Ledger;
use xpenza_core::sync::{
    new_client_key, now_rfc3339, BatchOp, CommandOutcome, Document, Fields, Filter, Precondition,
    RecordId, LEDGERS_COLLECTION, TRANSACTIONS_COLLECTION,
};
use xpenza_core::transactions::Transaction;

use crate::state::StoreState;
use crate::store::SyncStore;
use crate::subscription::SubscriptionHandle;

/// What [`SyncStore::initialize_ledgers`] found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerBootstrap {
    /// The account already had ledgers.
    Existing { count: usize },
    /// A default ledger was created and ledger-less transactions moved onto it.
    Created { ledger_id: String, migrated: usize },
}

fn decode_ledgers(documents: &[Document]) -> Vec<Ledger> {
    documents
        .iter()
        .filter_map(|doc| match Ledger::from_document(doc) {
            Ok(ledger) => Some(ledger),
            Err(err) => {
                warn!("[SyncStore] Skipping ledger document: {}", err);
                None
            }
        })
        .collect()
}

fn has_ledger(doc: &Document) -> bool {
    match doc.fields.get("ledgerId") {
        Some(Value::String(id)) => !id.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

/// State removed by a ledger delete, kept for rollback.
struct LedgerRemoval {
    ledgers: Vec<Ledger>,
    transactions: Vec<Transaction>,
    active_ledger_id: Option<String>,
    ledger_server_id: Option<String>,
    /// Client keys of the removed transactions.
    transaction_keys: Vec<String>,
}

impl SyncStore {
    /// Inserts a pending ledger and queues its remote create. The ledger
    /// becomes active when no ledger was.
    pub fn add_ledger(&self, name: &str, icon: &str, color: &str) -> CommandOutcome<String> {
        let Some(owner_id) = self.owner_id() else {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        };
        let name = name.trim();
        if name.is_empty() {
            return CommandOutcome::PreconditionFailed(Precondition::EmptyName);
        }

        let client_key = new_client_key();
        let ledger = Ledger {
            id: RecordId::Pending(client_key.clone()),
            client_key: client_key.clone(),
            owner_id,
            name: name.to_string(),
            icon: icon.to_string(),
            color: color.to_string(),
            created_at: now_rfc3339(),
        };
        let activated = self.mutate(|state| {
            state.ledgers.push(ledger);
            state.ensure_active_ledger()
        });
        debug!("[SyncStore] Added ledger {} (pending)", client_key);
        if activated {
            self.restart_transaction_subscription();
        }

        self.queue_ledger_create(&client_key);
        CommandOutcome::Applied(client_key)
    }

    fn queue_ledger_create(&self, key: &str) {
        if let Some(store) = self.handle() {
            let task_key = key.to_string();
            self.in_flight.enqueue(key, async move {
                store.push_ledger_create(&task_key).await;
            });
        }
    }

    /// Queues the create again for pending ledgers with no remote work left,
    /// such as one whose create failed. Returns their client keys.
    fn retry_local_ledgers(&self) -> Vec<String> {
        let stranded: Vec<String> = self
            .read()
            .ledgers
            .iter()
            .filter(|ledger| {
                ledger.id.is_pending() && !self.in_flight.is_in_flight(&ledger.client_key)
            })
            .map(|ledger| ledger.client_key.clone())
            .collect();
        for key in &stranded {
            info!("[SyncStore] Retrying create of ledger {}", key);
            self.queue_ledger_create(key);
        }
        stranded
    }

    async fn push_ledger_create(&self, key: &str) {
        let ledger = self
            .read()
            .ledgers
            .iter()
            .find(|ledger| ledger.client_key == key)
            .cloned();
        let Some(ledger) = ledger else {
            debug!("[SyncStore] Ledger {} removed before create", key);
            return;
        };
        if !ledger.id.is_pending() {
            return;
        }

        let result = self
            .documents
            .create(LEDGERS_COLLECTION, ledger.to_fields())
            .await;
        match result {
            Ok(server_id) => {
                info!("[SyncStore] Ledger {} confirmed as {}", key, server_id);
                self.mutate(|state| state.confirm_ledger(key, &server_id));
            }
            Err(err) => error!("[SyncStore] Failed to create ledger {}: {}", key, err),
        }
    }

    /// Removes a ledger and every transaction in it, locally right away and
    /// remotely in one atomic batch. A failed batch restores ledgers,
    /// transactions and the active pointer.
    pub fn delete_ledger(&self, token: &str) -> CommandOutcome<String> {
        if self.owner_id().is_none() {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        }

        let removed = self.mutate(|state| {
            let ledger = state.ledger(token)?.clone();
            let removal = LedgerRemoval {
                ledgers: state.ledgers.clone(),
                transactions: state.transactions.clone(),
                active_ledger_id: state.active_ledger_id.clone(),
                ledger_server_id: state.ledger_server_id(&ledger.client_key),
                transaction_keys: state
                    .transactions
                    .iter()
                    .filter(|tx| tx.ledger_id.as_deref().is_some_and(|id| ledger.matches(id)))
                    .map(|tx| tx.client_key.clone())
                    .collect(),
            };

            state.ledgers.retain(|l| l.client_key != ledger.client_key);
            state
                .transactions
                .retain(|tx| !removal.transaction_keys.contains(&tx.client_key));
            state.pending_deletes.insert(ledger.client_key.clone());
            state
                .pending_deletes
                .extend(removal.transaction_keys.iter().cloned());
            let moved = state.ensure_active_ledger();
            Some((ledger.client_key, removal, moved))
        });
        let Some((key, removal, moved)) = removed else {
            return CommandOutcome::PreconditionFailed(Precondition::UnknownLedger(
                token.to_string(),
            ));
        };
        info!(
            "[SyncStore] Deleting ledger {} with {} transactions",
            key,
            removal.transaction_keys.len()
        );
        if moved {
            self.restart_transaction_subscription();
        }

        if let Some(store) = self.handle() {
            let task_key = key.clone();
            let deps = removal.transaction_keys.clone();
            self.in_flight.enqueue_after(&key, &deps, async move {
                store.push_ledger_delete(&task_key, removal).await;
            });
        }
        CommandOutcome::Applied(key)
    }

    async fn push_ledger_delete(&self, key: &str, removal: LedgerRemoval) {
        let server_id = removal
            .ledger_server_id
            .clone()
            .or_else(|| self.read().server_id_for(key));
        let Some(server_id) = server_id else {
            debug!("[SyncStore] Ledger {} was never created, deleted locally", key);
            self.mutate(|state| finish_ledger_delete(state, key, &removal));
            return;
        };

        match self.commit_ledger_delete(&server_id, &removal).await {
            Ok(count) => {
                info!(
                    "[SyncStore] Deleted ledger {} and {} transactions",
                    server_id, count
                );
                self.mutate(|state| finish_ledger_delete(state, key, &removal));
            }
            Err(err) => {
                error!(
                    "[SyncStore] Failed to delete ledger {}, restoring: {}",
                    server_id, err
                );
                let moved = self.mutate(|state| {
                    finish_ledger_delete(state, key, &removal);
                    restore_ledger(state, removal)
                });
                if moved {
                    self.restart_transaction_subscription();
                }
            }
        }
    }

    async fn commit_ledger_delete(
        &self,
        server_id: &str,
        removal: &LedgerRemoval,
    ) -> xpenza_core::Result<usize> {
        let mut ids: Vec<String> = removal
            .transaction_keys
            .iter()
            .filter_map(|key| self.read().server_id_for(key))
            .collect();

        if let Some(owner_id) = self.owner_id() {
            let filters = [
                Filter::eq("ownerId", owner_id),
                Filter::eq("ledgerId", server_id),
            ];
            let remote = self.documents.query(TRANSACTIONS_COLLECTION, &filters).await?;
            ids.extend(remote.into_iter().map(|doc| doc.id));
        }
        ids.sort();
        ids.dedup();

        let count = ids.len();
        let mut ops: Vec<BatchOp> = ids
            .into_iter()
            .map(|id| BatchOp::delete(TRANSACTIONS_COLLECTION, id))
            .collect();
        ops.push(BatchOp::delete(LEDGERS_COLLECTION, server_id));
        self.documents.commit_batch(ops).await?;
        Ok(count)
    }

    /// Points the session at another ledger. The transaction subscription, if
    /// live, is cancelled and re-established for the new ledger.
    pub fn set_active_ledger(&self, token: &str) -> CommandOutcome<String> {
        let changed = self.mutate(|state| {
            let id = state.ledger(token)?.id.to_string();
            let changed = state.active_ledger_id.as_deref() != Some(id.as_str());
            state.active_ledger_id = Some(id.clone());
            Some((id, changed))
        });
        let Some((id, changed)) = changed else {
            return CommandOutcome::PreconditionFailed(Precondition::UnknownLedger(
                token.to_string(),
            ));
        };
        if changed {
            debug!("[SyncStore] Active ledger is now {}", id);
            self.restart_transaction_subscription();
        }
        CommandOutcome::Applied(id)
    }

    /// One-shot read of the user's ledgers.
    pub async fn fetch_ledgers(&self) -> CommandOutcome<usize> {
        let Some(owner_id) = self.owner_id() else {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        };
        let documents = match self
            .documents
            .query(LEDGERS_COLLECTION, &[Filter::eq("ownerId", owner_id)])
            .await
        {
            Ok(documents) => documents,
            Err(err) => {
                error!("[SyncStore] Failed to fetch ledgers: {}", err);
                return CommandOutcome::RemoteFailed(err.to_string());
            }
        };
        let fetched = decode_ledgers(&documents);
        let count = fetched.len();
        let moved = self.mutate(|state| state.merge_ledgers(fetched));
        if moved {
            self.restart_transaction_subscription();
        }
        CommandOutcome::Applied(count)
    }

    /// Watches the user's ledgers. Any earlier ledger subscription is
    /// cancelled.
    pub async fn subscribe_to_ledgers(&self) -> CommandOutcome<Arc<SubscriptionHandle>> {
        let Some(owner_id) = self.owner_id() else {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        };
        let stream = match self
            .documents
            .watch(LEDGERS_COLLECTION, vec![Filter::eq("ownerId", owner_id)])
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                error!("[SyncStore] Failed to watch ledgers: {}", err);
                return CommandOutcome::RemoteFailed(err.to_string());
            }
        };

        let handle = SubscriptionHandle::new("ledgers");
        self.spawn_subscription(&handle, stream, |store, documents| {
            let snapshot = decode_ledgers(&documents);
            store.mutate(|state| state.merge_ledgers(snapshot))
        });
        self.install_ledger_subscription(Arc::clone(&handle));
        info!("[SyncStore] Subscribed to ledgers");
        CommandOutcome::Applied(handle)
    }

    /// Makes sure the account has a ledger.
    ///
    /// With no ledger remotely, creates the default ledger and moves the
    /// user's ledger-less transactions onto it in one batch. A local ledger
    /// whose create failed is created again and serves as the default.
    /// Calling it again finds the ledger and does nothing.
    pub async fn initialize_ledgers(&self) -> CommandOutcome<LedgerBootstrap> {
        let _bootstrap = self.bootstrap.lock().await;
        let Some(owner_id) = self.owner_id() else {
            return CommandOutcome::PreconditionFailed(Precondition::NoSession);
        };

        let documents = match self
            .documents
            .query(LEDGERS_COLLECTION, &[Filter::eq("ownerId", owner_id.clone())])
            .await
        {
            Ok(documents) => documents,
            Err(err) => {
                error!("[SyncStore] Failed to load ledgers: {}", err);
                return CommandOutcome::RemoteFailed(err.to_string());
            }
        };
        let remote = decode_ledgers(&documents);
        let (moved, count) = self.mutate(|state| {
            let moved = state.merge_ledgers(remote);
            (moved, state.ledgers.len())
        });
        if moved {
            self.restart_transaction_subscription();
        }
        let retried = self.retry_local_ledgers();
        if count > retried.len() {
            debug!("[SyncStore] Found {} ledgers", count);
            self.retry_local_transactions();
            return CommandOutcome::Applied(LedgerBootstrap::Existing { count });
        }

        let key = match retried.into_iter().next() {
            Some(key) => {
                info!("[SyncStore] No ledgers for user, reusing unsynced ledger {}", key);
                key
            }
            None => {
                info!(
                    "[SyncStore] No ledgers for user, creating '{}'",
                    self.config.default_ledger_name
                );
                match self.add_ledger(
                    &self.config.default_ledger_name,
                    &self.config.default_ledger_icon,
                    &self.config.default_ledger_color,
                ) {
                    CommandOutcome::Applied(key) => key,
                    CommandOutcome::PreconditionFailed(reason) => {
                        return CommandOutcome::PreconditionFailed(reason)
                    }
                    CommandOutcome::RemoteFailed(message) => {
                        return CommandOutcome::RemoteFailed(message)
                    }
                }
            }
        };
        self.in_flight.wait(&key).await;
        let ledger_id = self.read().server_id_for(&key);
        let Some(ledger_id) = ledger_id else {
            return CommandOutcome::RemoteFailed(format!(
                "default ledger {} was not created",
                key
            ));
        };

        let migrated = self.migrate_orphans(&owner_id, &ledger_id).await;
        self.retry_local_transactions();
        CommandOutcome::Applied(LedgerBootstrap::Created {
            ledger_id,
            migrated,
        })
    }

    /// Assigns every transaction without a ledger to `ledger_id`, remotely in
    /// one batch and locally. Returns the number of remote documents moved.
    async fn migrate_orphans(&self, owner_id: &str, ledger_id: &str) -> usize {
        let orphans: Vec<String> = match self
            .documents
            .query(TRANSACTIONS_COLLECTION, &[Filter::eq("ownerId", owner_id)])
            .await
        {
            Ok(documents) => documents
                .into_iter()
                .filter(|doc| !has_ledger(doc))
                .map(|doc| doc.id)
                .collect(),
            Err(err) => {
                warn!("[SyncStore] Could not look for ledger-less transactions: {}", err);
                Vec::new()
            }
        };

        let mut migrated = 0;
        if !orphans.is_empty() {
            let ops = orphans
                .iter()
                .map(|id| {
                    let mut fields = Fields::new();
                    fields.insert("ledgerId".into(), ledger_id.into());
                    BatchOp::update(TRANSACTIONS_COLLECTION, id.clone(), fields)
                })
                .collect();
            match self.documents.commit_batch(ops).await {
                Ok(()) => {
                    migrated = orphans.len();
                    info!(
                        "[SyncStore] Moved {} transactions onto ledger {}",
                        migrated, ledger_id
                    );
                }
                Err(err) => error!("[SyncStore] Failed to migrate transactions: {}", err),
            }
        }

        self.mutate(|state| {
            for tx in &mut state.transactions {
                if tx.ledger_id.is_none() {
                    tx.ledger_id = Some(ledger_id.to_string());
                }
            }
        });
        migrated
    }
}

fn finish_ledger_delete(state: &mut StoreState, key: &str, removal: &LedgerRemoval) {
    state.pending_deletes.remove(key);
    for tx_key in &removal.transaction_keys {
        state.pending_deletes.remove(tx_key);
    }
}

/// Puts back what a failed ledger delete removed. Returns true when the
/// active pointer moved.
fn restore_ledger(state: &mut StoreState, removal: LedgerRemoval) -> bool {
    let previous_active = state.active_ledger_id.clone();

    let mut ledgers = removal.ledgers;
    for ledger in &mut ledgers {
        if let Some(server_id) = state.confirmed.get(&ledger.client_key) {
            ledger.id = RecordId::Confirmed(server_id.clone());
        }
    }
    for ledger in &state.ledgers {
        if !ledgers.iter().any(|held| held.client_key == ledger.client_key) {
            ledgers.push(ledger.clone());
        }
    }
    state.ledgers = ledgers;

    let mut transactions = removal.transactions;
    transactions.retain(|tx| !state.pending_deletes.contains(&tx.client_key));
    for tx in &mut transactions {
        if let Some(server_id) = state.confirmed.get(&tx.client_key) {
            tx.id = RecordId::Confirmed(server_id.clone());
        }
    }
    for tx in &state.transactions {
        if !transactions.iter().any(|held| held.client_key == tx.client_key) {
            transactions.push(tx.clone());
        }
    }
    state.transactions = transactions;
    state.sort_transactions();

    state.active_ledger_id = removal.active_ledger_id;
    let confirmed: Vec<(String, String)> = state
        .ledgers
        .iter()
        .filter_map(|l| l.id.server_id().map(|id| (l.client_key.clone(), id.to_string())))
        .collect();
    for (key, server_id) in confirmed {
        state.remap_ledger_refs(&key, &server_id);
    }
    state.ensure_active_ledger();
    previous_active != state.active_ledger_id
}
