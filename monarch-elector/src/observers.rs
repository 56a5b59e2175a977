//! State-change listeners.
//!
//! State changes are queued while the election machine is locked and
//! delivered after it is released. Delivery is strictly in queue order even
//! when a listener triggers further changes from inside its callback: the
//! nested flush finds dispatch already in progress and leaves the new entries
//! to the outer loop.

use monarch_core::{ElectionState, SubscriptionId};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Callback invoked with every externally visible state change.
pub type StateListener = Arc<dyn Fn(&ElectionState) + Send + Sync>;

#[derive(Default)]
pub struct ObserverRegistry {
    listeners: RwLock<Vec<(SubscriptionId, StateListener)>>,
    pending: Mutex<VecDeque<ElectionState>>,
    dispatch: Mutex<()>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: StateListener) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enqueue(&self, state: ElectionState) {
        self.pending.lock().push_back(state);
    }

    /// Deliver queued states to every listener registered at delivery time.
    pub fn flush(&self) {
        loop {
            let Some(guard) = self.dispatch.try_lock() else {
                return;
            };

            while let Some(state) = self.pop() {
                let listeners: Vec<StateListener> = self
                    .listeners
                    .read()
                    .iter()
                    .map(|(_, listener)| Arc::clone(listener))
                    .collect();

                for listener in listeners {
                    invoke(&listener, &state);
                }
            }

            drop(guard);

            // A state queued between the last pop and the release of the
            // guard would otherwise wait for the next transition.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn pop(&self) -> Option<ElectionState> {
        self.pending.lock().pop_front()
    }
}

/// Call one listener, containing any panic it raises.
pub fn invoke(listener: &StateListener, state: &ElectionState) {
    if catch_unwind(AssertUnwindSafe(|| listener(state))).is_err() {
        warn!("State listener panicked; continuing with remaining listeners");
    }
}
