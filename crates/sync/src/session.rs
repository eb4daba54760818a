use log::{debug, info};
use tokio::task::JoinHandle;
use xpenza_core::sync::UserProfile;

use crate::store::SyncStore;

impl SyncStore {
    /// Follows the identity provider for the lifetime of the store.
    ///
    /// On sign-in the ledgers are bootstrapped, both subscriptions started and
    /// custom categories loaded. State left by a different account is dropped
    /// first. On sign-out everything is cleared.
    pub fn attach_session(&self) -> JoinHandle<()> {
        let store = self.downgrade();
        let mut sessions = self.identity().subscribe();

        self.spawn(async move {
            // Signed-out at startup keeps rehydrated state until a session resolves.
            let mut current: Option<String> = None;
            loop {
                let user = sessions.borrow_and_update().clone();
                let uid = user.as_ref().map(|user| user.uid.clone());
                if uid != current {
                    current = uid;
                    let Some(store) = store.upgrade() else {
                        break;
                    };
                    match &user {
                        Some(user) => store.start_session(user).await,
                        None => store.end_session(),
                    }
                }
                if sessions.changed().await.is_err() {
                    break;
                }
            }
            debug!("[SyncStore] Session listener stopped");
        })
    }

    async fn start_session(&self, user: &UserProfile) {
        let foreign = self
            .read()
            .ledgers
            .iter()
            .any(|ledger| ledger.owner_id != user.uid);
        if foreign {
            info!("[SyncStore] Dropping state of a previous account");
            self.clear();
        }
        info!("[SyncStore] Session started for {}", user.uid);

        let bootstrap = self.initialize_ledgers().await;
        debug!("[SyncStore] Ledger bootstrap: {:?}", bootstrap);
        let ledgers = self.subscribe_to_ledgers().await;
        if !ledgers.is_applied() {
            debug!("[SyncStore] Ledger subscription not started: {:?}", ledgers);
        }
        let transactions = self.subscribe_to_transactions().await;
        if !transactions.is_applied() {
            debug!(
                "[SyncStore] Transaction subscription not started: {:?}",
                transactions
            );
        }
        let categories = self.fetch_categories().await;
        if !categories.is_applied() {
            debug!("[SyncStore] Categories not loaded: {:?}", categories);
        }
    }

    fn end_session(&self) {
        info!("[SyncStore] Session ended");
        self.clear();
    }
}
