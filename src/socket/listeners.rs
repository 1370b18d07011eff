//! Event listener registry.
//!
//! Listeners are stored per event name as `(id, callback)` pairs; the
//! [`ListenerId`] returned on registration is the only removal handle.
//! Dispatch iterates a snapshot taken under the lock and runs callbacks with
//! the lock released, so a listener may register or remove listeners
//! (including itself) without skipping or duplicating the others. A
//! listener removed by another listener during a dispatch still runs for that
//! dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::error;

/// Callback invoked with an event's positional arguments.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle identifying one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Entry {
    id: ListenerId,
    /// Set for once-listeners; shared by every snapshot of the entry.
    fired: Option<Arc<AtomicBool>>,
    callback: Listener,
}

impl Entry {
    /// Claims the entry for one invocation. Once-listeners are claimed at
    /// most once across all dispatches.
    fn claim(&self) -> bool {
        self.fired
            .as_ref()
            .map_or(true, |fired| !fired.swap(true, Ordering::SeqCst))
    }
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    events: HashMap<String, Vec<Entry>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&mut self, event: &str, callback: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.events.entry(event.to_string()).or_default().push(Entry {
            id,
            fired: once.then(|| Arc::new(AtomicBool::new(false))),
            callback,
        });
        id
    }

    /// Removes a registration. Returns `false` when it was not present.
    pub(crate) fn remove(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(entries) = self.events.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.events.remove(event);
        }
        removed
    }

    pub(crate) fn len(&self, event: &str) -> usize {
        self.events.get(event).map_or(0, Vec::len)
    }

    fn snapshot(&self, event: &str) -> Vec<Entry> {
        self.events.get(event).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("events", &self.events.len())
            .field(
                "listeners",
                &self.events.values().map(Vec::len).sum::<usize>(),
            )
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Shared registry handle used by the client and its packet hook.
#[derive(Clone, Debug, Default)]
pub(crate) struct SharedListeners(Arc<Mutex<ListenerRegistry>>);

impl SharedListeners {
    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, ListenerRegistry> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invokes every listener registered for `event` at the time of the call.
    ///
    /// Once-listeners are claimed and unregistered before they run, so each
    /// fires at most once even when dispatch re-enters. A panicking listener
    /// is logged and does not stop the rest. Returns the number of listeners
    /// invoked.
    pub(crate) fn dispatch(&self, event: &str, args: &[Value]) -> usize {
        let snapshot = self.lock().snapshot(event);

        let mut invoked = 0;
        for entry in snapshot {
            if !entry.claim() {
                continue;
            }
            if entry.fired.is_some() {
                // Already gone when another listener removed it mid-dispatch.
                self.lock().remove(event, entry.id);
            }
            invoked += 1;
            let callback = &entry.callback;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(args))) {
                error!(
                    event = "listener_panicked",
                    event_name = event,
                    message = panic_message(payload.as_ref())
                );
            }
        }
        invoked
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
