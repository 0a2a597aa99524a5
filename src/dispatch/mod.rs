//! Fan-out of classified events to subscribers.

pub mod classify;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::ErrorKind;

pub use classify::classify;

type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(u64, Handler<E>)>>,
}

/// Synchronous publish/subscribe with per-handler fault isolation.
///
/// Events published with no subscribers are dropped.
pub struct EventDispatcher<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability to remove one subscription.
pub struct Subscription<E> {
    id: u64,
    registry: std::sync::Weak<Registry<E>>,
}

impl<E> Subscription<E> {
    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut handlers = registry.handlers.write();
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != self.id);
        handlers.len() != before
    }
}

impl<E> EventDispatcher<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                handlers: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription<E>
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.write().push((id, Arc::new(handler)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every current subscriber in registration order.
    ///
    /// A handler that returns an error or panics is logged and skipped; the
    /// remaining handlers still run. Returns how many handlers failed.
    pub fn publish(&self, event: &E) -> usize {
        // snapshot so handlers may subscribe/unsubscribe while being called
        let handlers: Vec<(u64, Handler<E>)> = self.registry.handlers.read().clone();
        let mut faults = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    faults += 1;
                    warn!(subscriber = id, kind = ?ErrorKind::Handler, error = %format!("{err:#}"), "event handler failed");
                }
                Err(_) => {
                    faults += 1;
                    warn!(subscriber = id, kind = ?ErrorKind::Handler, "event handler panicked");
                }
            }
        }
        faults
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.handlers.read().len()
    }
}
