//! Listener Registry
//!
//! Keyed multicast of decoded payloads. Callbacks registered under an event
//! name run synchronously, in registration order, on every dispatch of that
//! name. A callback that fails or panics is logged and skipped; the rest of
//! the dispatch still runs.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, trace};

/// Callback invoked with the payload of a matching envelope
pub type ListenerCallback = Box<dyn FnMut(&Value) -> anyhow::Result<()> + Send>;

/// Handle returned by `add_listener`, used to remove the callback again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct ListenerEntry {
    id: ListenerId,
    callback: ListenerCallback,
}

/// Outcome of a single dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<String, Vec<ListenerEntry>>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to the sequence for `event`
    pub fn add_listener<F>(&mut self, event: impl Into<String>, callback: F) -> ListenerId
    where
        F: FnMut(&Value) -> anyhow::Result<()> + Send + 'static,
    {
        self.next_id += 1;
        let id = ListenerId(self.next_id);

        self.listeners.entry(event.into()).or_default().push(ListenerEntry {
            id,
            callback: Box::new(callback),
        });

        id
    }

    /// Remove a callback. Returns `false` when it was not registered under `event`.
    pub fn remove_listener(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(entries) = self.listeners.get_mut(event) else {
            return false;
        };

        let Some(position) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        entries.remove(position);

        if entries.is_empty() {
            self.listeners.remove(event);
        }

        true
    }

    /// Invoke every callback registered for `event`, in registration order
    pub fn dispatch(&mut self, event: &str, payload: &Value) -> DispatchReport {
        let mut report = DispatchReport::default();

        let Some(entries) = self.listeners.get_mut(event) else {
            trace!(event = %event, "No listeners for event");
            return report;
        };

        for entry in entries.iter_mut() {
            report.invoked += 1;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.callback)(payload)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(event = %event, listener = %entry.id, error = %e, "Listener failed");
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        event = %event,
                        listener = %entry.id,
                        panic = %panic_message(panic.as_ref()),
                        "Listener panicked"
                    );
                }
            }
        }

        report
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
