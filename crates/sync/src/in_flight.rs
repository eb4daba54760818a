//! Per-record chains of remote work.
//!
//! Every remote write for a record is queued behind the previous write for the
//! same client key, so an update issued while the create is still in flight
//! runs against the confirmed server id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use tokio::runtime::Handle;

type SharedTask = Shared<BoxFuture<'static, ()>>;
type TaskMap = HashMap<String, (u64, SharedTask)>;

fn lock(tasks: &Mutex<TaskMap>) -> MutexGuard<'_, TaskMap> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct InFlightRegistry {
    tasks: Arc<Mutex<TaskMap>>,
    generation: AtomicU64,
    runtime: Handle,
}

impl InFlightRegistry {
    pub fn new(runtime: Handle) -> Self {
        Self {
            tasks: Arc::default(),
            generation: AtomicU64::new(0),
            runtime,
        }
    }

    pub fn enqueue<F>(&self, key: &str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.enqueue_after(key, &[], work);
    }

    /// Spawns `work` once the current task for `key` and for each of `deps`
    /// has finished.
    pub fn enqueue_after<F>(&self, key: &str, deps: &[String], work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.tasks);
        let owned_key = key.to_string();

        let mut tasks = lock(&self.tasks);
        let predecessors: Vec<SharedTask> = std::iter::once(key)
            .chain(deps.iter().map(String::as_str).filter(|dep| *dep != key))
            .filter_map(|k| tasks.get(k).map(|(_, task)| task.clone()))
            .collect();

        let task = async move {
            join_all(predecessors).await;
            work.await;
            let mut tasks = lock(&registry);
            if tasks
                .get(&owned_key)
                .is_some_and(|(current, _)| *current == generation)
            {
                tasks.remove(&owned_key);
            }
        }
        .boxed()
        .shared();

        tasks.insert(key.to_string(), (generation, task.clone()));
        drop(tasks);
        self.runtime.spawn(task);
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.tasks).contains_key(key)
    }

    /// Resolves once the latest task queued for `key` has finished.
    pub async fn wait(&self, key: &str) {
        let task = lock(&self.tasks).get(key).map(|(_, task)| task.clone());
        if let Some(task) = task {
            task.await;
        }
    }

    /// Resolves once no task is queued, including tasks queued while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<SharedTask> = lock(&self.tasks)
                .values()
                .map(|(_, task)| task.clone())
                .collect();
            if pending.is_empty() {
                return;
            }
            join_all(pending).await;
            tokio::task::yield_now().await;
        }
    }
}
