//! Listener registry for measurement fan-out
//!
//! Listeners are registered from any thread and notified on the ingestion
//! reader thread. Each notification pass works on a snapshot of the
//! registered listeners, taken under a short read lock that is released
//! before any callback runs, so callbacks may register or unregister
//! listeners (including themselves) without deadlocking.
//!
//! A listener that panics is isolated: the panic is caught, logged and
//! returned as a [`ListenerFault`], and the remaining listeners still run.
//!
//! Callbacks run synchronously on the reader thread. A slow callback delays
//! every following line, so listeners that do real work should hand it off
//! (for example over a channel).

use crate::types::ListenerHandle;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

/// Receiver of parsed measurements
pub trait MeasurementListener: Send + Sync {
    /// Called once per measurement, in parse order
    fn on_measurement(&self, bpm: i32, timestamp: Option<&str>);
}

/// Adapter turning a closure into a [`MeasurementListener`]
struct FnListener<F>(F);

impl<F> MeasurementListener for FnListener<F>
where
    F: Fn(i32, Option<&str>) + Send + Sync,
{
    fn on_measurement(&self, bpm: i32, timestamp: Option<&str>) {
        (self.0)(bpm, timestamp)
    }
}

/// A listener callback that panicked during a notification pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFault {
    /// Listener that faulted
    pub handle: ListenerHandle,
    /// Panic message, if it carried one
    pub message: String,
}

/// Thread-safe set of measurement listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerHandle, Arc<dyn MeasurementListener>)>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning the handle used to remove it
    pub fn register(&self, listener: Arc<dyn MeasurementListener>) -> ListenerHandle {
        let handle = ListenerHandle::next();
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((handle, listener));
        tracing::debug!("Registered {}", handle);
        handle
    }

    /// Register a closure as a listener
    pub fn register_fn<F>(&self, f: F) -> ListenerHandle
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.register(Arc::new(FnListener(f)))
    }

    /// Remove a listener. Returns false if the handle was not registered.
    ///
    /// A pass that already took its snapshot may still call the listener once.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!("Unregistered {}", handle);
        }
        removed
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no listeners are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Notify every listener registered at the start of the pass.
    ///
    /// Never panics; faults are returned for the caller to report.
    pub fn notify_all(&self, bpm: i32, timestamp: Option<&str>) -> Vec<ListenerFault> {
        let snapshot = self.snapshot();
        let mut faults = Vec::new();

        for (handle, listener) in snapshot {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                listener.on_measurement(bpm, timestamp);
            }));

            if let Err(payload) = result {
                let message = panic_message(payload.as_ref());
                tracing::warn!("{} panicked on {} bpm: {}", handle, bpm, message);
                faults.push(ListenerFault { handle, message });
            }
        }

        faults
    }

    fn snapshot(&self) -> Vec<(ListenerHandle, Arc<dyn MeasurementListener>)> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
