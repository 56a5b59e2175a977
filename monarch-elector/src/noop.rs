use crate::observers::{invoke, StateListener};
use crate::Elector;
use monarch_core::{ElectionState, ParticipantId, SubscriptionId};
use tracing::debug;

/// Stand-in elector for environments without a shared store or bus.
///
/// It never leads, never changes state and keeps no listeners: a subscriber
/// receives the detached state once and is then forgotten.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopElector;

impl NoopElector {
    pub fn new() -> Self {
        Self
    }
}

impl Elector for NoopElector {
    fn start(&self) {
        debug!("No-op elector started; leadership is unavailable");
    }

    fn stop(&self) {}

    fn is_leader(&self) -> bool {
        false
    }

    fn state(&self) -> ElectionState {
        ElectionState::detached()
    }

    fn participant_id(&self) -> ParticipantId {
        ParticipantId::detached()
    }

    fn subscribe(&self, listener: StateListener) -> SubscriptionId {
        invoke(&listener, &self.state());
        SubscriptionId::new()
    }

    fn unsubscribe(&self, _id: SubscriptionId) -> bool {
        false
    }
}
