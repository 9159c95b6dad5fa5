//! EventBus: pub/sub for `ChangeEvent`s, keyed by table name.
//!
//! Listeners either watch one table or every table. Snapshot-on-emit:
//!   - A listener removed *during* emission is still called in that round.
//!   - A listener added *during* emission is NOT called until the next emit.
//!
//! A panicking listener is logged and skipped; the remaining listeners still
//! run and the write that triggered the event is unaffected.
//!
//! The listener list sits behind a `parking_lot::Mutex` that is never held
//! while callbacks run, so listeners may subscribe or unsubscribe from inside
//! a callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::ChangeEvent;

/// Returned by [`EventBus::subscribe`]; pass to [`EventBus::unsubscribe`].
pub type ListenerId = u64;

/// Closure type for change listeners.
pub type ListenerFn = dyn Fn(&ChangeEvent) + Send + Sync;

struct Listener {
    id: ListenerId,
    /// `None` = every table.
    table: Option<String>,
    callback: Arc<ListenerFn>,
}

pub struct EventBus {
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Listen to changes of one table (`Some`) or all tables (`None`).
    pub fn subscribe(
        &self,
        table: Option<&str>,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Listener {
            id,
            table: table.map(str::to_string),
            callback: Arc::new(callback),
        });
        id
    }

    /// Does nothing if `id` is not present (safe to call multiple times).
    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.lock().retain(|l| l.id != id);
    }

    /// Deliver `event` to every listener watching its table.
    pub fn emit(&self, event: &ChangeEvent) {
        let snapshot: Vec<Arc<ListenerFn>> = {
            let guard = self.listeners.lock();
            guard
                .iter()
                .filter(|l| l.table.as_deref().map_or(true, |t| t == event.table()))
                .map(|l| Arc::clone(&l.callback))
                .collect()
        };
        for cb in snapshot {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(event)));
            if outcome.is_err() {
                tracing::warn!(table = event.table(), "change listener panicked");
            }
        }
    }

    /// Number of currently registered listeners.
    pub fn size(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
