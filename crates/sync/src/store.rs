//! The synchronization store: in-memory session state, write-through to the
//! local cache, and the plumbing shared by every command.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, Weak};

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use xpenza_core::categories::Category;
use xpenza_core::ledgers::Ledger;
use xpenza_core::sync::{Document, DocumentStore, IdentityProvider, LocalCache, WatchStream};
use xpenza_core::transactions::Transaction;

use crate::config::SyncStoreConfig;
use crate::in_flight::InFlightRegistry;
use crate::state::StoreState;
use crate::subscription::SubscriptionHandle;

/// Registry key for re-subscribing after the active ledger moves.
pub(crate) const TRANSACTION_SUBSCRIPTION_KEY: &str = "subscription:transactions";

#[derive(Default)]
pub(crate) struct Subscriptions {
    pub ledgers: Option<Arc<SubscriptionHandle>>,
    /// Handle plus the ledger server id baked into its filter.
    pub transactions: Option<(String, Arc<SubscriptionHandle>)>,
    /// Set once transactions are subscribed to, until the session is cleared.
    /// Survives a failed or pending restart, so later ledger switches still
    /// re-subscribe.
    pub transactions_wanted: bool,
}

/// Owns ledgers, transactions and categories for the signed-in user.
///
/// Commands apply their local change before returning and hand the remote
/// write to a background task. Remote writes for one record run in the order
/// the commands were issued.
///
/// Background work is spawned on the tokio runtime the store was built in, so
/// commands may be issued from threads outside it.
pub struct SyncStore {
    weak_self: Weak<SyncStore>,
    pub(crate) documents: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    cache: Arc<dyn LocalCache>,
    pub(crate) config: SyncStoreConfig,
    state: RwLock<StoreState>,
    pub(crate) in_flight: InFlightRegistry,
    subscriptions: Mutex<Subscriptions>,
    pub(crate) bootstrap: tokio::sync::Mutex<()>,
    revision: watch::Sender<u64>,
    runtime: Handle,
}

impl SyncStore {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        cache: Arc<dyn LocalCache>,
    ) -> Arc<Self> {
        Self::with_config(documents, identity, cache, SyncStoreConfig::default())
    }

    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn with_config(
        documents: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        cache: Arc<dyn LocalCache>,
        config: SyncStoreConfig,
    ) -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        let runtime = Handle::current();
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            documents,
            identity,
            cache,
            config,
            state: RwLock::new(StoreState::default()),
            in_flight: InFlightRegistry::new(runtime.clone()),
            subscriptions: Mutex::new(Subscriptions::default()),
            bootstrap: tokio::sync::Mutex::new(()),
            revision,
            runtime,
        })
    }

    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task)
    }

    /// Owning handle for background tasks. `None` only while the store is
    /// being dropped.
    pub(crate) fn handle(&self) -> Option<Arc<Self>> {
        self.weak_self.upgrade()
    }

    pub(crate) fn downgrade(&self) -> Weak<Self> {
        self.weak_self.clone()
    }

    pub(crate) fn owner_id(&self) -> Option<String> {
        self.identity.current_user_id()
    }

    pub(crate) fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `change` to the state, writes it through to the cache and
    /// signals observers.
    pub(crate) fn mutate<R>(&self, change: impl FnOnce(&mut StoreState) -> R) -> R {
        let result = {
            let mut state = self
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let result = change(&mut state);
            if self.config.persist {
                self.persist(&state);
            }
            result
        };
        self.revision.send_modify(|revision| *revision += 1);
        result
    }

    fn persist(&self, state: &StoreState) {
        let encoded = match serde_json::to_string(state) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!("[SyncStore] Failed to encode state for cache: {}", err);
                return;
            }
        };
        if let Err(err) = self.cache.set(&self.config.cache_key, &encoded) {
            warn!("[SyncStore] Failed to write cache: {}", err);
        }
    }

    pub(crate) fn subscriptions(&self) -> MutexGuard<'_, Subscriptions> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Restores state written by a previous session. Returns true when a
    /// cached state was found.
    pub fn rehydrate(&self) -> bool {
        let cached = match self.cache.get(&self.config.cache_key) {
            Ok(Some(cached)) => cached,
            Ok(None) => return false,
            Err(err) => {
                warn!("[SyncStore] Failed to read cache: {}", err);
                return false;
            }
        };
        let mut restored: StoreState = match serde_json::from_str(&cached) {
            Ok(restored) => restored,
            Err(err) => {
                warn!("[SyncStore] Ignoring unreadable cached state: {}", err);
                return false;
            }
        };
        restored.settle();
        info!(
            "[SyncStore] Rehydrated {} transactions and {} ledgers from cache",
            restored.transactions.len(),
            restored.ledgers.len()
        );
        self.mutate(|state| *state = restored);
        true
    }

    /// Cancels subscriptions and resets to an empty session. The cache is
    /// overwritten with the empty state.
    pub fn clear(&self) {
        let (ledgers, transactions) = {
            let mut subscriptions = self.subscriptions();
            subscriptions.transactions_wanted = false;
            (
                subscriptions.ledgers.take(),
                subscriptions.transactions.take(),
            )
        };
        if let Some(handle) = ledgers {
            handle.cancel();
        }
        if let Some((_, handle)) = transactions {
            handle.cancel();
        }
        self.mutate(|state| *state = StoreState::default());
        debug!("[SyncStore] Cleared session state");
    }

    /// Transactions of the active ledger, newest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.read().active_transactions()
    }

    /// Every transaction held, across ledgers.
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.read().transactions.clone()
    }

    /// Looks a transaction up by its current id or client key.
    pub fn transaction(&self, token: &str) -> Option<Transaction> {
        self.read().transaction(token).cloned()
    }

    pub fn ledgers(&self) -> Vec<Ledger> {
        self.read().ledgers.clone()
    }

    pub fn ledger(&self, token: &str) -> Option<Ledger> {
        self.read().ledger(token).cloned()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.read().categories.clone()
    }

    pub fn active_ledger_id(&self) -> Option<String> {
        self.read().active_ledger_id.clone()
    }

    pub fn active_ledger(&self) -> Option<Ledger> {
        self.read().active_ledger().cloned()
    }

    pub fn state_snapshot(&self) -> StoreState {
        self.read().clone()
    }

    /// Revision counter bumped on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// True while remote work for the record with this client key is queued.
    pub fn is_in_flight(&self, client_key: &str) -> bool {
        self.in_flight.is_in_flight(client_key)
    }

    /// Waits for every queued remote write, including writes queued while
    /// waiting.
    pub async fn wait_idle(&self) {
        self.in_flight.wait_idle().await;
    }

    /// Current transaction subscription, if one is live.
    pub fn transaction_subscription(&self) -> Option<Arc<SubscriptionHandle>> {
        self.subscriptions()
            .transactions
            .as_ref()
            .map(|(_, handle)| Arc::clone(handle))
    }

    pub fn ledger_subscription(&self) -> Option<Arc<SubscriptionHandle>> {
        self.subscriptions().ledgers.clone()
    }

    /// Forwards snapshots from `stream` into `apply` until the handle is
    /// cancelled or the stream ends. `apply` returns true when the active
    /// ledger moved, which restarts the transaction subscription.
    pub(crate) fn spawn_subscription<F>(
        &self,
        handle: &Arc<SubscriptionHandle>,
        mut stream: WatchStream,
        apply: F,
    ) where
        F: Fn(&SyncStore, Vec<Document>) -> bool + Send + 'static,
    {
        let store = self.weak_self.clone();
        let subscription = Arc::downgrade(handle);
        let name = handle.name().to_string();

        let task = self.spawn(async move {
            while let Some(documents) = stream.recv().await {
                let (Some(store), Some(subscription)) = (store.upgrade(), subscription.upgrade())
                else {
                    break;
                };
                let moved = subscription.deliver(|| apply(&store, documents));
                if moved == Some(true) {
                    store.restart_transaction_subscription();
                }
            }
            debug!("[SyncStore] {} stream ended", name);
        });
        handle.attach(task);
    }

    /// Cancels the live transaction subscription, if any, and subscribes again
    /// against the current active ledger when transactions are subscribed to.
    pub(crate) fn restart_transaction_subscription(&self) {
        let (wanted, previous) = {
            let mut subscriptions = self.subscriptions();
            (
                subscriptions.transactions_wanted,
                subscriptions.transactions.take(),
            )
        };
        if let Some((_, handle)) = previous {
            handle.cancel();
        }
        if wanted {
            self.resubscribe_transactions();
        }
    }

    fn resubscribe_transactions(&self) {
        let Some(store) = self.handle() else {
            return;
        };
        self.in_flight
            .enqueue(TRANSACTION_SUBSCRIPTION_KEY, async move {
                if !store.subscriptions().transactions_wanted {
                    debug!("[SyncStore] Transaction subscription no longer wanted");
                    return;
                }
                let outcome = store.open_transaction_subscription().await;
                if !outcome.is_applied() {
                    debug!("[SyncStore] Transaction subscription not restarted: {:?}", outcome);
                }
            });
    }

    /// Stores `handle` as the transaction subscription, cancelling the
    /// previous one outside the lock. Returns false, storing nothing, when
    /// `ledger_id` is no longer the active ledger.
    pub(crate) fn install_transaction_subscription(
        &self,
        ledger_id: String,
        handle: Arc<SubscriptionHandle>,
    ) -> bool {
        let previous = {
            let mut subscriptions = self.subscriptions();
            let active = self.read().active_ledger_server_id();
            if active.as_deref() != Some(ledger_id.as_str()) {
                return false;
            }
            subscriptions.transactions.replace((ledger_id, handle))
        };
        if let Some((_, previous)) = previous {
            previous.cancel();
        }
        true
    }

    pub(crate) fn install_ledger_subscription(&self, handle: Arc<SubscriptionHandle>) {
        let previous = self.subscriptions().ledgers.replace(handle);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("SyncStore")
            .field("transactions", &state.transactions.len())
            .field("ledgers", &state.ledgers.len())
            .field("active_ledger_id", &state.active_ledger_id)
            .finish()
    }
}
