//! # Change Notification System
//!
//! Fan-out of slot writes to the participants watching them. A write is
//! never echoed back to the handle that made it.

use monarch_core::{LeaderRecord, Subscription, SubscriptionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

/// Identity of one participant's view onto the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Origin used for writes made outside any participant (tests, tooling).
    pub fn external() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Types of changes that can occur in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Updated,
    Removed,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Created => write!(f, "CREATED"),
            ChangeType::Updated => write!(f, "UPDATED"),
            ChangeType::Removed => write!(f, "REMOVED"),
        }
    }
}

/// Notification about a write to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub key: String,
    pub change_type: ChangeType,
    /// Raw value as written, `None` after removal.
    pub new_value: Option<String>,
    /// Decoded record, `None` after removal or if the value is not a record.
    pub record: Option<LeaderRecord>,
    pub origin: HandleId,
    pub version: u64,
    pub timestamp: u64,
}

/// Filter for notifications
#[derive(Debug, Clone)]
pub enum NotificationFilter {
    /// All notifications
    All,
    /// Only notifications for a specific key
    Key(String),
    /// Only notifications for keys with a specific prefix
    KeyPrefix(String),
    /// Everything not written by the given handle
    NotFrom(HandleId),
    /// Combined filters (all must match)
    And(Vec<NotificationFilter>),
}

impl NotificationFilter {
    /// Check if a notification matches this filter
    pub fn matches(&self, notification: &ChangeNotification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Key(key) => notification.key == *key,
            NotificationFilter::KeyPrefix(prefix) => notification.key.starts_with(prefix),
            NotificationFilter::NotFrom(origin) => notification.origin != *origin,
            NotificationFilter::And(filters) => filters.iter().all(|f| f.matches(notification)),
        }
    }

    /// Writes to `key` made by anyone except `handle`.
    pub fn foreign_writes(key: &str, handle: HandleId) -> Self {
        NotificationFilter::And(vec![
            NotificationFilter::Key(key.to_string()),
            NotificationFilter::NotFrom(handle),
        ])
    }
}

/// Statistics about the change feed
#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    pub total_notifications_sent: u64,
    pub total_deliveries: u64,
    pub dropped_notifications: u64,
    pub active_watchers: usize,
}

type WatcherMap = HashMap<
    SubscriptionId,
    (
        NotificationFilter,
        mpsc::UnboundedSender<Option<LeaderRecord>>,
    ),
>;

/// Distributes slot changes to watchers.
pub struct ChangeFeed {
    /// Every change, unfiltered, for auditing
    audit_tx: broadcast::Sender<ChangeNotification>,

    /// Individual watcher channels
    watchers: Arc<RwLock<WatcherMap>>,

    stats: Arc<RwLock<FeedStats>>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create with a custom audit buffer size
    pub fn with_capacity(capacity: usize) -> Self {
        let (audit_tx, _) = broadcast::channel(capacity);

        Self {
            audit_tx,
            watchers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(FeedStats::default())),
        }
    }

    /// Watch records matching `filter`.
    pub fn subscribe(&self, filter: NotificationFilter) -> Subscription<Option<LeaderRecord>> {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut watchers = self.watchers.write();
            watchers.insert(id, (filter.clone(), tx));
            self.stats.write().active_watchers = watchers.len();
        }

        debug!("New watcher created: {} with filter: {:?}", id, filter);
        Subscription::new(id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut watchers = self.watchers.write();
        if watchers.remove(&id).is_some() {
            self.stats.write().active_watchers = watchers.len();
            debug!("Watcher removed: {}", id);
        }
    }

    /// Deliver a change to every matching watcher.
    pub fn publish(&self, notification: ChangeNotification) {
        // No audit receivers is fine
        let _ = self.audit_tx.send(notification.clone());

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let watchers = self.watchers.read();
            for (id, (filter, sender)) in watchers.iter() {
                if !filter.matches(&notification) {
                    continue;
                }
                match sender.send(notification.record.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut watchers = self.watchers.write();
            for id in &closed {
                watchers.remove(id);
            }
            debug!("Pruned {} closed watchers", closed.len());
        }

        let mut stats = self.stats.write();
        stats.total_notifications_sent += 1;
        stats.total_deliveries += delivered;
        stats.dropped_notifications += closed.len() as u64;
        stats.active_watchers = self.watchers.read().len();

        debug!(
            "Published change: key={}, type={}, origin={}, delivered={}",
            notification.key, notification.change_type, notification.origin, delivered
        );
    }

    /// Receiver for every change, including a watcher's own writes.
    pub fn audit_receiver(&self) -> broadcast::Receiver<ChangeNotification> {
        self.audit_tx.subscribe()
    }

    pub fn get_stats(&self) -> FeedStats {
        self.stats.read().clone()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monarch_core::ParticipantId;

    fn change(key: &str, origin: HandleId, epoch: u64) -> ChangeNotification {
        let record = LeaderRecord::new(ParticipantId::from("p"), epoch, 100);
        ChangeNotification {
            key: key.to_string(),
            change_type: ChangeType::Updated,
            new_value: Some(serde_json::to_string(&record).unwrap()),
            record: Some(record),
            origin,
            version: epoch,
            timestamp: 123456789,
        }
    }

    #[tokio::test]
    async fn test_foreign_writes_only() {
        let feed = ChangeFeed::new();
        let me = HandleId::new();
        let other = HandleId::new();
        let mut subscription = feed.subscribe(NotificationFilter::foreign_writes("leader", me));

        feed.publish(change("leader", me, 1));
        feed.publish(change("other-key", other, 2));
        feed.publish(change("leader", other, 3));

        let received = subscription.receiver.recv().await.unwrap().unwrap();
        assert_eq!(received.epoch, 3);
        assert!(subscription.receiver.try_recv().is_err());
    }

    #[test]
    fn test_filter_logic() {
        let origin = HandleId::new();
        let notification = change("app:leader", origin, 1);

        assert!(NotificationFilter::All.matches(&notification));
        assert!(NotificationFilter::Key("app:leader".to_string()).matches(&notification));
        assert!(!NotificationFilter::Key("app".to_string()).matches(&notification));
        assert!(NotificationFilter::KeyPrefix("app:".to_string()).matches(&notification));
        assert!(!NotificationFilter::NotFrom(origin).matches(&notification));
        assert!(NotificationFilter::NotFrom(HandleId::external()).matches(&notification));
    }

    #[test]
    fn test_closed_watchers_are_pruned() {
        let feed = ChangeFeed::new();
        let subscription = feed.subscribe(NotificationFilter::All);
        assert_eq!(feed.watcher_count(), 1);

        drop(subscription);
        feed.publish(change("k", HandleId::new(), 1));

        let stats = feed.get_stats();
        assert_eq!(feed.watcher_count(), 0);
        assert_eq!(stats.dropped_notifications, 1);
        assert_eq!(stats.total_notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_audit_sees_every_write() {
        let feed = ChangeFeed::new();
        let mut audit = feed.audit_receiver();
        let me = HandleId::new();

        feed.publish(change("k", me, 1));

        let seen = audit.recv().await.unwrap();
        assert_eq!(seen.origin, me);
        assert_eq!(seen.version, 1);
    }
}
