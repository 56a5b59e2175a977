//! # Shared Record Store
//!
//! An in-process coordination domain: a map of JSON-encoded slots that every
//! participant reaches through its own [`StoreHandle`], the way every tab of
//! one origin sees the same local storage.

use crate::notifications::{ChangeFeed, ChangeNotification, ChangeType, HandleId, NotificationFilter};
use dashmap::DashMap;
use monarch_core::{
    LeaderRecord, MonarchError, MonarchResult, RecordStore, Subscription, SubscriptionId,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Configuration for the shared store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Deliver change notifications to watchers
    pub enable_notifications: bool,
    /// Maximum encoded value size in bytes
    pub max_value_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enable_notifications: true,
            max_value_size: 64 * 1024,
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub rejected_writes: u64,
    pub handles_connected: u64,
}

/// The coordination domain's slot map. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SharedRecordStore {
    config: StoreConfig,
    data: Arc<DashMap<String, String>>,
    feed: Arc<ChangeFeed>,
    version: Arc<AtomicU64>,
    stats: Arc<RwLock<StoreStats>>,
}

impl Default for SharedRecordStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl SharedRecordStore {
    pub fn new(config: StoreConfig) -> Self {
        info!("Shared record store initialized with config: {:?}", config);
        Self {
            config,
            data: Arc::new(DashMap::new()),
            feed: Arc::new(ChangeFeed::new()),
            version: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(RwLock::new(StoreStats::default())),
        }
    }

    /// Open a participant's view onto the store.
    pub fn connect(&self) -> StoreHandle {
        self.stats.write().handles_connected += 1;
        let handle = StoreHandle {
            id: HandleId::new(),
            store: self.clone(),
        };
        debug!("Store handle {} connected", handle.id);
        handle
    }

    /// Raw value under `key`, exactly as written.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.stats.write().reads += 1;
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Write a raw value on behalf of `origin`.
    pub fn set_raw(&self, key: &str, value: &str, origin: HandleId) -> MonarchResult<()> {
        if key.is_empty() {
            self.stats.write().rejected_writes += 1;
            return Err(MonarchError::store("key must not be empty"));
        }
        if value.len() > self.config.max_value_size {
            self.stats.write().rejected_writes += 1;
            return Err(MonarchError::store(format!(
                "value of {} bytes exceeds limit of {}",
                value.len(),
                self.config.max_value_size
            )));
        }

        let previous = self.data.insert(key.to_string(), value.to_string());
        self.stats.write().writes += 1;
        let change_type = if previous.is_some() {
            ChangeType::Updated
        } else {
            ChangeType::Created
        };

        debug!("SET slot: key={}, value_len={}, origin={}", key, value.len(), origin);
        self.notify(key, change_type, Some(value.to_string()), origin);
        Ok(())
    }

    /// Empty a slot, as a host clearing its storage would.
    pub fn remove(&self, key: &str) -> bool {
        let existed = self.data.remove(key).is_some();
        if existed {
            info!("Slot {} removed", key);
            self.notify(key, ChangeType::Removed, None, HandleId::external());
        }
        existed
    }

    /// Every change made to the store, including each writer's own.
    pub fn audit(&self) -> broadcast::Receiver<ChangeNotification> {
        self.feed.audit_receiver()
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn get_stats(&self) -> StoreStats {
        self.stats.read().clone()
    }

    fn notify(&self, key: &str, change_type: ChangeType, new_value: Option<String>, origin: HandleId) {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        if !self.config.enable_notifications {
            return;
        }

        // Foreign or corrupt values reach watchers as "no record"
        let record = new_value
            .as_deref()
            .and_then(|raw| serde_json::from_str::<LeaderRecord>(raw).ok());

        self.feed.publish(ChangeNotification {
            key: key.to_string(),
            change_type,
            new_value,
            record,
            origin,
            version,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as u64)
                .unwrap_or(0),
        });
    }
}

/// One participant's view onto a [`SharedRecordStore`].
#[derive(Clone)]
pub struct StoreHandle {
    id: HandleId,
    store: SharedRecordStore,
}

impl StoreHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn store(&self) -> &SharedRecordStore {
        &self.store
    }
}

impl RecordStore for StoreHandle {
    fn read(&self, key: &str) -> MonarchResult<Option<LeaderRecord>> {
        match self.store.get_raw(key) {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, record: &LeaderRecord) -> MonarchResult<()> {
        let raw = serde_json::to_string(record)?;
        self.store.set_raw(key, &raw, self.id)
    }

    fn watch(&self, key: &str) -> MonarchResult<Subscription<Option<LeaderRecord>>> {
        Ok(self
            .store
            .feed
            .subscribe(NotificationFilter::foreign_writes(key, self.id)))
    }

    fn unwatch(&self, id: SubscriptionId) {
        self.store.feed.unsubscribe(id);
    }
}
