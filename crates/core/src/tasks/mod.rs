//! In-flight fetch tracking with cancellation by owner.
//!
//! Maps an owning group key to the set of in-flight task handles so a
//! removed article can cancel all of its downloads at once. One mutex
//! guards the whole map: cancellation needs a consistent snapshot of "all
//! tasks currently attributed to this owner". A task finishing between
//! snapshot and cancel is fine (abort-after-completion is a no-op); a task
//! started after cancellation was issued is a caller bug, the owner is
//! already being torn down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;

/// Tracks in-flight fetches per owning group key.
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    inner: Arc<Mutex<HashMap<String, HashMap<String, AbortHandle>>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute a task to an owner under a task key.
    pub fn track(&self, owner_key: &str, task_key: &str, handle: AbortHandle) {
        let mut tasks = self.inner.lock().expect("task map poisoned");
        tasks
            .entry(owner_key.to_string())
            .or_default()
            .insert(task_key.to_string(), handle);
        tracing::debug!(owner_key, task_key, "tracking task");
    }

    /// Forget a task without cancelling it, typically on completion.
    pub fn untrack(&self, owner_key: &str, task_key: &str) {
        let mut tasks = self.inner.lock().expect("task map poisoned");
        if let Some(group) = tasks.get_mut(owner_key) {
            group.remove(task_key);
            if group.is_empty() {
                tasks.remove(owner_key);
            }
        }
    }

    /// Cancel one task and forget it.
    pub fn cancel(&self, owner_key: &str, task_key: &str) {
        let mut tasks = self.inner.lock().expect("task map poisoned");
        if let Some(group) = tasks.get_mut(owner_key) {
            if let Some(handle) = group.remove(task_key) {
                handle.abort();
            }
            if group.is_empty() {
                tasks.remove(owner_key);
            }
        }
    }

    /// Cancel every task attributed to an owner. All-or-nothing per owner.
    pub fn cancel_all(&self, owner_key: &str) {
        let mut tasks = self.inner.lock().expect("task map poisoned");
        if let Some(group) = tasks.remove(owner_key) {
            tracing::debug!(owner_key, count = group.len(), "cancelling tasks");
            for handle in group.into_values() {
                handle.abort();
            }
        }
    }

    /// Cancel everything, e.g. on shutdown.
    pub fn cancel_everything(&self) {
        let mut tasks = self.inner.lock().expect("task map poisoned");
        for group in tasks.values() {
            for handle in group.values() {
                handle.abort();
            }
        }
        tasks.clear();
    }

    /// Number of tracked tasks for an owner.
    pub fn task_count(&self, owner_key: &str) -> usize {
        let tasks = self.inner.lock().expect("task map poisoned");
        tasks.get(owner_key).map_or(0, HashMap::len)
    }
}
