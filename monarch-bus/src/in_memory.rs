use dashmap::DashMap;
use monarch_core::{BroadcastBus, ElectionMessage, MonarchError, MonarchResult, Subscription, SubscriptionId};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one participant's attachment to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(Uuid);

impl EndpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Deliver a publisher's messages to its own subscriptions
    pub deliver_to_self: bool,
    /// Probability in `[0, 1]` that any single delivery is lost
    pub loss_rate: f64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            deliver_to_self: false,
            loss_rate: 0.0,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct BusStats {
    pub messages_published: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub undecodable_payloads: u64,
}

struct Subscriber {
    endpoint: EndpointId,
    isolated: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<ElectionMessage>,
}

type ChannelMap = DashMap<String, HashMap<SubscriptionId, Subscriber>>;

/// Named broadcast channels shared by every endpoint of one domain.
///
/// Messages cross the bus as JSON text and are decoded once on arrival.
#[derive(Clone)]
pub struct InMemoryBus {
    config: Arc<RwLock<BusConfig>>,
    channels: Arc<ChannelMap>,
    stats: Arc<RwLock<BusStats>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl InMemoryBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            channels: Arc::new(DashMap::new()),
            stats: Arc::new(RwLock::new(BusStats::default())),
        }
    }

    /// Attach a new participant.
    pub fn endpoint(&self) -> BusEndpoint {
        BusEndpoint {
            id: EndpointId::new(),
            isolated: Arc::new(AtomicBool::new(false)),
            bus: self.clone(),
        }
    }

    pub fn set_loss_rate(&self, rate: f64) {
        self.config.write().loss_rate = rate.clamp(0.0, 1.0);
        debug!("Bus loss rate set to {}", rate);
    }

    /// Publish a raw payload as an anonymous sender would.
    pub fn inject_raw(&self, channel: &str, payload: &str) {
        self.deliver(channel, None, payload);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|subs| subs.len()).unwrap_or(0)
    }

    pub fn get_stats(&self) -> BusStats {
        self.stats.read().clone()
    }

    fn deliver(&self, channel: &str, from: Option<EndpointId>, payload: &str) {
        let message = match ElectionMessage::from_json(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable payload on {}: {}", channel, e);
                self.stats.write().undecodable_payloads += 1;
                return;
            }
        };

        let config = self.config.read().clone();
        let mut delivered = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        if let Some(subscribers) = self.channels.get(channel) {
            for (id, subscriber) in subscribers.iter() {
                if from == Some(subscriber.endpoint) && !config.deliver_to_self {
                    continue;
                }
                if subscriber.isolated.load(Ordering::Acquire) {
                    dropped += 1;
                    continue;
                }
                if config.loss_rate > 0.0 && rand::thread_rng().gen::<f64>() < config.loss_rate {
                    debug!("Delivery on {} to {} lost", channel, subscriber.endpoint);
                    dropped += 1;
                    continue;
                }

                match subscriber.sender.send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            if let Some(mut subscribers) = self.channels.get_mut(channel) {
                for id in &closed {
                    subscribers.remove(id);
                }
            }
        }

        let mut stats = self.stats.write();
        stats.messages_published += 1;
        stats.messages_delivered += delivered;
        stats.messages_dropped += dropped + closed.len() as u64;
    }
}

/// One participant's attachment to an [`InMemoryBus`].
///
/// Clones share the isolation switch, so a test can keep a clone and cut a
/// participant off the medium after handing the endpoint over.
#[derive(Clone)]
pub struct BusEndpoint {
    id: EndpointId,
    isolated: Arc<AtomicBool>,
    bus: InMemoryBus,
}

impl BusEndpoint {
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Silently drop everything this endpoint sends or should receive.
    pub fn set_isolated(&self, isolated: bool) {
        self.isolated.store(isolated, Ordering::Release);
        if isolated {
            warn!("Bus endpoint {} isolated", self.id);
        } else {
            debug!("Bus endpoint {} reconnected", self.id);
        }
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated.load(Ordering::Acquire)
    }
}

impl BroadcastBus for BusEndpoint {
    fn publish(&self, channel: &str, message: &ElectionMessage) -> MonarchResult<()> {
        if self.is_isolated() {
            debug!("Endpoint {} isolated, {} not sent", self.id, message.kind());
            self.bus.stats.write().messages_dropped += 1;
            return Ok(());
        }

        let payload = message.to_json()?;
        self.bus.deliver(channel, Some(self.id), &payload);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> MonarchResult<Subscription<ElectionMessage>> {
        if channel.is_empty() {
            return Err(MonarchError::bus("channel name must not be empty"));
        }

        let id = SubscriptionId::new();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.bus.channels.entry(channel.to_string()).or_default().insert(
            id,
            Subscriber {
                endpoint: self.id,
                isolated: Arc::clone(&self.isolated),
                sender,
            },
        );

        debug!("Endpoint {} subscribed to {} ({})", self.id, channel, id);
        Ok(Subscription::new(id, receiver))
    }

    fn unsubscribe(&self, channel: &str, id: SubscriptionId) {
        if let Some(mut subscribers) = self.bus.channels.get_mut(channel) {
            if subscribers.remove(&id).is_some() {
                debug!("Endpoint {} unsubscribed from {} ({})", self.id, channel, id);
            }
        }
    }
}
