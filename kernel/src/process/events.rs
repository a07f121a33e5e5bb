/*!
 * Event Handler Registry
 * Kernel-wide subscribers to process lifecycle events
 */

use super::types::{EventHandler, ProcEvent, ProcEventKind};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Registry of global handlers, keyed by registration id
#[derive(Clone)]
pub(crate) struct EventRegistry {
    handlers: Arc<DashMap<u64, (ProcEventKind, EventHandler), RandomState>>,
    next_id: Arc<AtomicU64>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(DashMap::with_hasher(RandomState::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn register(&self, kind: ProcEventKind, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.handlers.insert(id, (kind, handler));
        debug!(handler_id = id, ?kind, "registered global event handler");
        id
    }

    pub fn unregister(&self, id: u64) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Handlers for `kind` in registration order
    pub fn matching(&self, kind: ProcEventKind) -> Vec<EventHandler> {
        let mut matching: Vec<(u64, EventHandler)> = self
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == kind)
            .map(|entry| (*entry.key(), entry.value().1.clone()))
            .collect();
        matching.sort_by_key(|(id, _)| *id);
        matching.into_iter().map(|(_, handler)| handler).collect()
    }
}

/// Invoke handlers with no kernel locks held
pub(crate) fn fire(handlers: &[EventHandler], event: &ProcEvent) {
    for handler in handlers {
        handler(event);
    }
}
