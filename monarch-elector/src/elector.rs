//! The running elector: an [`ElectionMachine`] driven by a tokio task.
//!
//! All inputs of one participant (bus messages, store changes, timer
//! deadlines) are funneled through a single reactor task and applied to
//! the machine one at a time. The handle methods (`start`, `stop`, the
//! state accessors) are synchronous and may be called from any thread.

use crate::config::ElectorConfig;
use crate::machine::{ElectionMachine, ElectionStats, Role};
use crate::observers::{invoke, ObserverRegistry, StateListener};
use crate::Elector;
use monarch_core::{
    BroadcastBus, Clock, ElectionMessage, ElectionState, IdGenerator, LeaderRecord,
    MonarchResult, ParticipantId, RandomIdGenerator, RecordStore, SubscriptionId, SystemClock,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

struct Shared {
    config: ElectorConfig,
    participant_id: ParticipantId,
    store: Arc<dyn RecordStore>,
    bus: Arc<dyn BroadcastBus>,
    clock: Arc<dyn Clock>,
    machine: Mutex<ElectionMachine>,
    state: RwLock<ElectionState>,
    observers: ObserverRegistry,
}

impl Shared {
    /// Run one transition and queue the resulting state if it changed.
    fn transition<R>(&self, f: impl FnOnce(&mut ElectionMachine) -> R) -> R {
        let result = {
            let mut machine = self.machine.lock();
            let result = f(&mut machine);

            let snapshot = machine.state();
            let mut current = self.state.write();
            if *current != snapshot {
                *current = snapshot.clone();
                self.observers.enqueue(snapshot);
            }
            result
        };

        self.observers.flush();
        result
    }
}

enum Lifecycle {
    Idle,
    Running {
        task: JoinHandle<()>,
        shutdown: watch::Sender<bool>,
        bus_subscription: Option<SubscriptionId>,
        store_subscription: Option<SubscriptionId>,
    },
    Stopped,
}

enum Event {
    Shutdown(bool),
    Message(Option<ElectionMessage>),
    StoreChange(Option<Option<LeaderRecord>>),
    Deadline,
}

/// Leader election participant backed by a shared store and broadcast bus.
///
/// # Examples
///
/// ```rust,no_run
/// use monarch_bus::InMemoryBus;
/// use monarch_core::ElectionState;
/// use monarch_elector::{Elector, ElectorConfig, LeaderElector};
/// use monarch_store::{SharedRecordStore, StoreConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> monarch_core::MonarchResult<()> {
/// let store = SharedRecordStore::new(StoreConfig::default());
/// let bus = InMemoryBus::default();
///
/// let elector = LeaderElector::new(
///     ElectorConfig::default(),
///     Arc::new(store.connect()),
///     Arc::new(bus.endpoint()),
/// )?;
/// elector.start();
///
/// elector.subscribe(Arc::new(|state: &ElectionState| {
///     println!("leader: {} (epoch {})", state.is_leader, state.epoch);
/// }));
/// # Ok(())
/// # }
/// ```
pub struct LeaderElector {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl LeaderElector {
    /// Elector with the system clock and a random identity.
    pub fn new(
        config: ElectorConfig,
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn BroadcastBus>,
    ) -> MonarchResult<Self> {
        Self::with_capabilities(
            config,
            store,
            bus,
            Arc::new(SystemClock),
            &RandomIdGenerator::new(),
        )
    }

    pub fn with_capabilities(
        config: ElectorConfig,
        store: Arc<dyn RecordStore>,
        bus: Arc<dyn BroadcastBus>,
        clock: Arc<dyn Clock>,
        ids: &dyn IdGenerator,
    ) -> MonarchResult<Self> {
        config.validate()?;

        let participant_id = ids.generate();
        let machine = ElectionMachine::new(
            config.clone(),
            participant_id.clone(),
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&clock),
        );
        let state = machine.state();

        debug!("Created elector {} on {}", participant_id, config.record_key);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                participant_id,
                store,
                bus,
                clock,
                machine: Mutex::new(machine),
                state: RwLock::new(state),
                observers: ObserverRegistry::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    pub fn config(&self) -> &ElectorConfig {
        &self.shared.config
    }

    pub fn role(&self) -> Role {
        self.shared.machine.lock().role()
    }

    pub fn stats(&self) -> ElectionStats {
        self.shared.machine.lock().stats().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running { .. })
    }

    fn launch(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(
                    "Elector {} cannot start outside a tokio runtime: {}",
                    self.shared.participant_id, e
                );
                return;
            }
        };

        let shared = &self.shared;
        let (bus_subscription, bus_rx) = match shared.bus.subscribe(&shared.config.channel_name) {
            Ok(subscription) => (Some(subscription.id), Some(subscription.receiver)),
            Err(e) => {
                warn!("Bus unavailable, relying on the store alone: {}", e);
                (None, None)
            }
        };
        let (store_subscription, store_rx) = match shared.store.watch(&shared.config.record_key) {
            Ok(subscription) => (Some(subscription.id), Some(subscription.receiver)),
            Err(e) => {
                warn!("Store change feed unavailable: {}", e);
                (None, None)
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let span = info_span!("elector", participant = %shared.participant_id);
        let task = runtime.spawn(
            run_reactor(Arc::clone(shared), bus_rx, store_rx, shutdown_rx).instrument(span),
        );

        *lifecycle = Lifecycle::Running {
            task,
            shutdown,
            bus_subscription,
            store_subscription,
        };
    }

    fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);

        self.shared.transition(|machine| machine.stop());

        if let Lifecycle::Running {
            task,
            shutdown,
            bus_subscription,
            store_subscription,
        } = previous
        {
            if let Some(id) = bus_subscription {
                self.shared
                    .bus
                    .unsubscribe(&self.shared.config.channel_name, id);
            }
            if let Some(id) = store_subscription {
                self.shared.store.unwatch(id);
            }
            let _ = shutdown.send(true);
            drop(task);
            info!("Elector {} stopped", self.shared.participant_id);
        }
    }
}

impl Elector for LeaderElector {
    fn start(&self) {
        self.launch();
    }

    fn stop(&self) {
        self.shutdown();
    }

    fn is_leader(&self) -> bool {
        self.shared.state.read().is_leader
    }

    fn state(&self) -> ElectionState {
        self.shared.state.read().clone()
    }

    fn participant_id(&self) -> ParticipantId {
        self.shared.participant_id.clone()
    }

    fn subscribe(&self, listener: StateListener) -> SubscriptionId {
        let id = self.shared.observers.add(Arc::clone(&listener));
        let current = self.state();
        invoke(&listener, &current);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers.remove(id)
    }
}

impl Drop for LeaderElector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_reactor(
    shared: Arc<Shared>,
    mut bus_rx: Option<mpsc::UnboundedReceiver<ElectionMessage>>,
    mut store_rx: Option<mpsc::UnboundedReceiver<Option<LeaderRecord>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    shared.transition(|machine| machine.start());

    loop {
        let (deadline, closed) = {
            let machine = shared.machine.lock();
            (machine.next_deadline(), machine.is_closed())
        };
        if closed || *shutdown.borrow() {
            break;
        }

        let now = shared.clock.now_millis();
        let event = tokio::select! {
            biased;

            changed = shutdown.changed() => Event::Shutdown(changed.is_err()),
            message = next_input(&mut bus_rx) => Event::Message(message),
            change = next_input(&mut store_rx) => Event::StoreChange(change),
            _ = sleep_until(deadline, now) => Event::Deadline,
        };

        match event {
            Event::Shutdown(sender_gone) => {
                if sender_gone || *shutdown.borrow() {
                    break;
                }
            }
            Event::Message(Some(message)) => shared.transition(|m| m.handle_message(message)),
            Event::Message(None) => {
                warn!("Bus subscription closed");
                bus_rx = None;
            }
            Event::StoreChange(Some(record)) => {
                shared.transition(|m| m.handle_store_change(record))
            }
            Event::StoreChange(None) => {
                warn!("Store change feed closed");
                store_rx = None;
            }
            Event::Deadline => shared.transition(|m| m.fire_due_timers()),
        }
    }

    debug!("Reactor exiting");
}

async fn next_input<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<u64>, now: u64) {
    match deadline {
        Some(at) => tokio::time::sleep(Duration::from_millis(at.saturating_sub(now))).await,
        None => std::future::pending().await,
    }
}
