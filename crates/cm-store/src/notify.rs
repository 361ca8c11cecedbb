use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::error;

/// Subscribe to this name to see every change.
pub const ANY_CHANGE: &str = "*";

#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    /// Key that changed (`"customers"`, `"settings"`, ...) or a whole-store
    /// event name.
    pub key: String,
    /// New value of the key, `Null` for whole-store events.
    pub value: Value,
}

type Callback = Arc<dyn Fn(&StoreChange) + Send + Sync>;

struct Entry {
    id: u64,
    event: String,
    callback: Callback,
}

#[derive(Default)]
pub(crate) struct Subscribers {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl Subscribers {
    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add(self: &Arc<Self>, event: &str, callback: Callback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().push(Entry {
            id,
            event: event.to_owned(),
            callback,
        });
        Subscription {
            id,
            owner: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut guard = self.entries();
        let before = guard.len();
        guard.retain(|entry| entry.id != id);
        guard.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    pub(crate) fn notify(&self, change: &StoreChange) {
        let callbacks: Vec<Callback> = self
            .entries()
            .iter()
            .filter(|entry| entry.event == change.key || entry.event == ANY_CHANGE)
            .map(|entry| entry.callback.clone())
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                error!(key = %change.key, "store subscriber panicked");
            }
        }
    }
}

/// Handle returned by `Store::subscribe`.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    owner: Weak<Subscribers>,
}

impl Subscription {
    /// Remove the callback. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.owner.upgrade() {
            Some(owner) => owner.remove(self.id),
            None => false,
        }
    }
}
