//! Process-wide sharing of electors.
//!
//! Components that ask for leadership of the same domain with the same
//! settings share one elector, so the domain sees one participant per
//! process rather than one per component.

use crate::config::ElectorConfig;
use crate::Elector;
use monarch_core::MonarchResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
pub struct ElectorRegistry {
    electors: Mutex<HashMap<String, Arc<dyn Elector>>>,
}

impl ElectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the elector registered for `config`, creating and starting
    /// it with `factory` on first use.
    pub fn get_or_start<F>(&self, config: &ElectorConfig, factory: F) -> MonarchResult<Arc<dyn Elector>>
    where
        F: FnOnce(&ElectorConfig) -> MonarchResult<Arc<dyn Elector>>,
    {
        let key = config.fingerprint();
        let created = {
            let mut electors = self.electors.lock();
            if let Some(existing) = electors.get(&key) {
                debug!("Reusing elector for {}", key);
                return Ok(Arc::clone(existing));
            }

            let elector = factory(config)?;
            electors.insert(key.clone(), Arc::clone(&elector));
            elector
        };

        info!("Starting shared elector for {}", key);
        created.start();
        Ok(created)
    }

    pub fn get(&self, config: &ElectorConfig) -> Option<Arc<dyn Elector>> {
        self.electors.lock().get(&config.fingerprint()).cloned()
    }

    /// Stop and forget the elector registered for `config`.
    pub fn remove(&self, config: &ElectorConfig) -> Option<Arc<dyn Elector>> {
        let removed = self.electors.lock().remove(&config.fingerprint());
        if let Some(elector) = &removed {
            elector.stop();
        }
        removed
    }

    pub fn stop_all(&self) {
        let electors: Vec<_> = self.electors.lock().drain().map(|(_, e)| e).collect();
        for elector in electors {
            elector.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.electors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::StateListener;
    use monarch_core::{ElectionState, MonarchError, ParticipantId, SubscriptionId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingElector {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl Elector for CountingElector {
        fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn is_leader(&self) -> bool {
            false
        }

        fn state(&self) -> ElectionState {
            ElectionState::new(ParticipantId::from("counting"))
        }

        fn participant_id(&self) -> ParticipantId {
            ParticipantId::from("counting")
        }

        fn subscribe(&self, _listener: StateListener) -> SubscriptionId {
            SubscriptionId::new()
        }

        fn unsubscribe(&self, _id: SubscriptionId) -> bool {
            false
        }
    }

    #[test]
    fn test_same_config_starts_once() {
        let registry = ElectorRegistry::new();
        let config = ElectorConfig::default();
        let counting = Arc::new(CountingElector::default());
        let built = AtomicUsize::new(0);

        for _ in 0..3 {
            let handle = Arc::clone(&counting);
            registry
                .get_or_start(&config, |_| {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok(handle as Arc<dyn Elector>)
                })
                .unwrap();
        }

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_configs_get_distinct_electors() {
        let registry = ElectorRegistry::new();
        let a = ElectorConfig::default();
        let b = ElectorConfig::default().with_lease_duration(Duration::from_secs(20));

        registry
            .get_or_start(&a, |_| Ok(Arc::new(CountingElector::default()) as Arc<dyn Elector>))
            .unwrap();
        registry
            .get_or_start(&b, |_| Ok(Arc::new(CountingElector::default()) as Arc<dyn Elector>))
            .unwrap();

        assert_eq!(registry.len(), 2);
        registry.stop_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_stops_elector() {
        let registry = ElectorRegistry::new();
        let config = ElectorConfig::default();
        let counting = Arc::new(CountingElector::default());
        let handle = Arc::clone(&counting);

        registry
            .get_or_start(&config, move |_| Ok(handle as Arc<dyn Elector>))
            .unwrap();
        assert!(registry.get(&config).is_some());

        assert!(registry.remove(&config).is_some());
        assert_eq!(counting.stops.load(Ordering::SeqCst), 1);
        assert!(registry.remove(&config).is_none());
    }

    #[test]
    fn test_factory_error_is_not_cached() {
        let registry = ElectorRegistry::new();
        let config = ElectorConfig::default();

        let result = registry.get_or_start(&config, |_| Err(MonarchError::config("nope")));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
