//! Interaction events that steer prefetching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::prediction::Context;

/// Receives interaction signals from an event source.
pub trait InteractionListener: Send + Sync {
    /// The user is likely about to act in `context` (hover, scroll, focus).
    fn on_focus_hint(&self, subject_id: &str, context: &Context);

    /// The surface became visible (`true`) or hidden (`false`).
    fn on_visibility_change(&self, visible: bool);
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Something interaction listeners can register with.
pub trait InteractionEventSource: Send + Sync {
    fn subscribe(&self, listener: Arc<dyn InteractionListener>) -> SubscriptionId;

    /// Returns false if the subscription was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

// == Interaction Hub ==
/// In-process event source; UI bindings push signals in and every
/// subscriber receives them in subscription order.
#[derive(Default)]
pub struct InteractionHub {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn InteractionListener>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for InteractionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl InteractionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn focus_hint(&self, subject_id: &str, context: &Context) {
        debug!("Focus hint for subject '{}'", subject_id);
        for listener in self.snapshot() {
            listener.on_focus_hint(subject_id, context);
        }
    }

    pub fn visibility_change(&self, visible: bool) {
        debug!("Visibility changed: visible={}", visible);
        for listener in self.snapshot() {
            listener.on_visibility_change(visible);
        }
    }

    // Listeners are called outside the lock so they may subscribe/unsubscribe.
    fn snapshot(&self) -> Vec<Arc<dyn InteractionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}

impl InteractionEventSource for InteractionHub {
    fn subscribe(&self, listener: Arc<dyn InteractionListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}
