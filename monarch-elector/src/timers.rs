//! Cancelable timers owned by one participant's reactor.
//!
//! Deadlines are absolute milliseconds on the domain clock. Each kind of
//! timer is armed at most once; scheduling it again replaces the deadline.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Closes the candidacy collection window
    ElectionWindow,
    /// Checks that an election winner actually claimed
    Recheck,
    /// Leader's heartbeat and fencing check
    Renewal,
    /// Fires when the followed lease runs out
    Watchdog,
}

#[derive(Debug, Default)]
pub struct TimerSet {
    deadlines: HashMap<TimerKind, u64>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TimerKind, at: u64) {
        self.deadlines.insert(kind, at);
    }

    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.deadlines.remove(&kind).is_some()
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<u64> {
        self.deadlines.get(&kind).copied()
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.values().copied().min()
    }

    /// Disarm and return the earliest timer due at `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<TimerKind> {
        let (kind, _) = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .min_by_key(|(_, at)| **at)
            .map(|(kind, at)| (*kind, *at))?;
        self.deadlines.remove(&kind);
        Some(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
