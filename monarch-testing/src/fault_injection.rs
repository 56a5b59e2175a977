use monarch_core::{LeaderRecord, MonarchError, MonarchResult, RecordStore, Subscription, SubscriptionId};
use monarch_store::StoreHandle;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A fault applied to a running cluster at a given offset.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultType {
    /// Cut a participant off the bus in both directions
    IsolateParticipant { index: usize },
    /// Reattach an isolated participant
    ReconnectParticipant { index: usize },
    /// Stop a participant; an abrupt stop sends nothing
    StopParticipant { index: usize, graceful: bool },
    /// Lose each bus delivery with the given probability
    BusLoss { rate: f64 },
    /// Make one participant's store reads fail
    StoreReadFailure { index: usize, failing: bool },
    /// Make one participant's store writes fail
    StoreWriteFailure { index: usize, failing: bool },
    /// Write a claim into the slot from outside the cluster
    ForeignClaim { leader: String, epoch: u64, lease: Duration },
}

/// Record store wrapper whose reads and writes can be made to fail.
///
/// Clones share the failure switches, so a test can keep one and hand the
/// other to an elector.
#[derive(Clone)]
pub struct FlakyStore {
    inner: StoreHandle,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    injected_failures: Arc<AtomicU64>,
}

impl FlakyStore {
    pub fn new(inner: StoreHandle) -> Self {
        Self {
            inner,
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            injected_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_fail_reads(&self, failing: bool) {
        debug!("Store reads failing: {}", failing);
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, failing: bool) {
        debug!("Store writes failing: {}", failing);
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn injected_failures(&self) -> u64 {
        self.injected_failures.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> &StoreHandle {
        &self.inner
    }

    fn fail(&self, operation: &str) -> MonarchError {
        self.injected_failures.fetch_add(1, Ordering::SeqCst);
        MonarchError::store(format!("injected {} failure", operation))
    }
}

impl RecordStore for FlakyStore {
    fn read(&self, key: &str) -> MonarchResult<Option<LeaderRecord>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(self.fail("read"));
        }
        self.inner.read(key)
    }

    fn write(&self, key: &str, record: &LeaderRecord) -> MonarchResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.fail("write"));
        }
        self.inner.write(key, record)
    }

    fn watch(&self, key: &str) -> MonarchResult<Subscription<Option<LeaderRecord>>> {
        self.inner.watch(key)
    }

    fn unwatch(&self, id: SubscriptionId) {
        self.inner.unwatch(id)
    }
}
