//! Registry of running thread tasks.
//!
//! `/halt` looks threads up here. Entries are inserted by the stream
//! handler when it spawns a worker and removed by the worker itself on
//! completion (or by the disconnect guard). All operations are O(1)
//! under a mutex.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Default)]
pub struct ActiveTaskRegistry {
    tasks: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl ActiveTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, thread_id: Uuid, cancel: CancellationToken) {
        self.tasks.lock().insert(thread_id, cancel);
    }

    /// Signal cancellation for a thread. Returns `true` when the thread
    /// was active. The entry stays until the worker's cleanup removes it.
    pub fn cancel(&self, thread_id: &Uuid) -> bool {
        match self.tasks.lock().get(thread_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, thread_id: &Uuid) {
        self.tasks.lock().remove(thread_id);
    }

    pub fn is_active(&self, thread_id: &Uuid) -> bool {
        self.tasks.lock().contains_key(thread_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_cancel_remove() {
        let registry = ActiveTaskRegistry::new();
        let thread_id = Uuid::new_v4();
        let token = CancellationToken::new();

        registry.register(thread_id, token.clone());
        assert!(registry.is_active(&thread_id));

        assert!(registry.cancel(&thread_id));
        assert!(token.is_cancelled());
        // Cancel leaves the entry; the worker removes it during cleanup.
        assert!(registry.is_active(&thread_id));

        registry.remove(&thread_id);
        assert!(!registry.is_active(&thread_id));
        assert!(!registry.cancel(&thread_id));
    }

    #[test]
    fn cancel_unknown_thread_returns_false() {
        let registry = ActiveTaskRegistry::new();
        assert!(!registry.cancel(&Uuid::new_v4()));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ActiveTaskRegistry::new();
        let thread_id = Uuid::new_v4();
        registry.register(thread_id, CancellationToken::new());
        registry.remove(&thread_id);
        registry.remove(&thread_id);
        assert!(registry.is_empty());
    }
}
