//! Registry of in-flight transfers addressable by task id

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct TaskEntry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<String, TaskEntry>>,
    next_generation: AtomicU64,
}

/// Maps caller supplied task ids to the cancellation handle of the call.
///
/// At most one live call exists per id. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task_id` with `token` before the call is started.
    ///
    /// A live call already registered under the same id is cancelled and
    /// replaced. The entry is removed when the returned guard drops.
    pub fn register(&self, task_id: &str, token: CancellationToken) -> TaskGuard {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock().insert(
            task_id.to_string(),
            TaskEntry {
                generation,
                token: token.clone(),
            },
        );

        if let Some(previous) = previous {
            tracing::debug!("Task {} replaced while in flight, cancelling previous", task_id);
            previous.token.cancel();
        }

        TaskGuard {
            registry: self.clone(),
            task_id: task_id.to_string(),
            generation,
            token,
        }
    }

    /// Cancel and forget `task_id`. Unknown ids are ignored.
    pub fn cancel(&self, task_id: &str) {
        let entry = self.lock().remove(task_id);
        match entry {
            Some(entry) => {
                tracing::debug!("Cancelling task {}", task_id);
                entry.token.cancel();
            }
            None => tracing::debug!("Cancel for unknown task {} ignored", task_id),
        }
    }

    /// Whether a call is registered under `task_id`
    pub fn is_active(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    /// Number of registered calls
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no calls are registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel every registered call
    pub fn cancel_all(&self) {
        let entries: Vec<TaskEntry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            entry.token.cancel();
        }
    }

    fn remove_if_current(&self, task_id: &str, generation: u64) {
        let mut entries = self.lock();
        if entries
            .get(task_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(task_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TaskEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a task registered for as long as it lives
#[derive(Debug)]
pub struct TaskGuard {
    registry: TaskRegistry,
    task_id: String,
    generation: u64,
    token: CancellationToken,
}

impl TaskGuard {
    /// Token cancelled when the task is cancelled
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Task id this guard was registered under
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.registry
            .remove_if_current(&self.task_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_removes_entry() {
        let registry = TaskRegistry::new();
        let guard = registry.register("t1", CancellationToken::new());
        assert!(registry.is_active("t1"));
        assert_eq!(registry.len(), 1);
        drop(guard);
        assert!(!registry.is_active("t1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_unknown_and_twice() {
        let registry = TaskRegistry::new();
        registry.cancel("missing");

        let guard = registry.register("t1", CancellationToken::new());
        registry.cancel("t1");
        registry.cancel("t1");
        assert!(guard.token().is_cancelled());
        assert!(!registry.is_active("t1"));
    }

    #[test]
    fn test_duplicate_id_cancels_previous() {
        let registry = TaskRegistry::new();
        let first = registry.register("t1", CancellationToken::new());
        let second = registry.register("t1", CancellationToken::new());

        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());

        // the replaced guard must not remove its successor
        drop(first);
        assert!(registry.is_active("t1"));
        drop(second);
        assert!(!registry.is_active("t1"));
    }

    #[test]
    fn test_cancel_all() {
        let registry = TaskRegistry::new();
        let a = registry.register("a", CancellationToken::new());
        let b = registry.register("b", CancellationToken::new());
        registry.cancel_all();
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
        assert!(registry.is_empty());
    }
}
