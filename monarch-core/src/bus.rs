//! Broadcast bus contract.

use crate::{ElectionMessage, MonarchResult, Subscription, SubscriptionId};

/// Best-effort, unordered publish/subscribe medium.
///
/// Delivery to the publishing participant is unspecified and must not be
/// relied upon.
pub trait BroadcastBus: Send + Sync {
    /// Publish `message` on `channel`. Success means "handed to the medium",
    /// not "delivered".
    fn publish(&self, channel: &str, message: &ElectionMessage) -> MonarchResult<()>;

    /// Receive messages published on `channel` from now on.
    fn subscribe(&self, channel: &str) -> MonarchResult<Subscription<ElectionMessage>>;

    /// Cancel a subscription obtained from [`BroadcastBus::subscribe`].
    fn unsubscribe(&self, channel: &str, id: SubscriptionId);
}
