use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use tokio::task::JoinHandle;

/// Handle to a live remote subscription.
///
/// Cancelling stops delivery immediately: a snapshot that is being applied
/// when `cancel` is called finishes first, and none is applied afterwards.
/// Dropping the last handle cancels the subscription.
pub struct SubscriptionHandle {
    name: String,
    /// Held while a snapshot is applied and while cancelling.
    cancelled: Mutex<bool>,
    deliveries: AtomicUsize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            cancelled: Mutex::new(false),
            deliveries: AtomicUsize::new(0),
            task: Mutex::new(None),
        })
    }

    fn gate(&self) -> MutexGuard<'_, bool> {
        self.cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the subscription. Returns true only for the call that actually
    /// cancelled it.
    pub fn cancel(&self) -> bool {
        {
            let mut cancelled = self.gate();
            if *cancelled {
                return false;
            }
            *cancelled = true;
        }
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        debug!("[SyncStore] Cancelled {} subscription", self.name);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        *self.gate()
    }

    /// Snapshots applied so far.
    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self, task: JoinHandle<()>) {
        let cancelled = self.gate();
        if *cancelled {
            task.abort();
            return;
        }
        *self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
    }

    /// Runs `apply` unless the subscription has been cancelled.
    pub(crate) fn deliver<R>(&self, apply: impl FnOnce() -> R) -> Option<R> {
        let cancelled = self.gate();
        if *cancelled {
            return None;
        }
        let result = apply();
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        Some(result)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .field("deliveries", &self.deliveries())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let handle = SubscriptionHandle::new("transactions");
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn nothing_is_delivered_after_cancel() {
        let handle = SubscriptionHandle::new("ledgers");
        let mut applied = 0;
        assert!(handle.deliver(|| applied += 1).is_some());
        handle.cancel();
        assert!(handle.deliver(|| applied += 1).is_none());
        assert_eq!(applied, 1);
        assert_eq!(handle.deliveries(), 1);
    }

    #[tokio::test]
    async fn cancel_aborts_the_attached_task() {
        let handle = SubscriptionHandle::new("ledgers");
        let (alive, stopped) = tokio::sync::oneshot::channel::<()>();
        handle.attach(tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await;
        }));
        handle.cancel();
        assert!(stopped.await.is_err());
    }
}
