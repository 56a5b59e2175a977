//! Shared record store contract.
//!
//! Reads and writes are synchronous: the election state machine calls them
//! from inside a single transition and never awaits. Change notifications
//! arrive on an unbounded channel that the participant's reactor drains.

use crate::{LeaderRecord, MonarchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a subscription on a store or bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live subscription: dropping the receiver is enough to stop delivery,
/// explicit unsubscription releases the sender on the producer side too.
pub struct Subscription<T> {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn new(id: SubscriptionId, receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self { id, receiver }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// The slot every participant in a coordination domain reads and writes.
///
/// Writes are last-writer-wins; there is no conditional write. Change
/// notifications reach every *other* handle watching the key, never the
/// handle that performed the write. A value that cannot be decoded is
/// reported as `Ok(None)` on the change feed and as `Err` from [`read`].
///
/// [`read`]: RecordStore::read
pub trait RecordStore: Send + Sync {
    /// Read the record under `key`, `Ok(None)` if the slot is empty.
    fn read(&self, key: &str) -> MonarchResult<Option<LeaderRecord>>;

    /// Overwrite the record under `key`.
    fn write(&self, key: &str, record: &LeaderRecord) -> MonarchResult<()>;

    /// Follow writes made to `key` by other participants.
    fn watch(&self, key: &str) -> MonarchResult<Subscription<Option<LeaderRecord>>>;

    /// Stop a change feed obtained from [`RecordStore::watch`].
    fn unwatch(&self, id: SubscriptionId);
}
