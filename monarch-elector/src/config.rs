use monarch_core::{MonarchError, MonarchResult};
use std::time::Duration;

/// Configuration for one elector instance.
///
/// Every participant of a coordination domain must use the same
/// `record_key` and `channel_name`; the timing fields may differ but
/// normally do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectorConfig {
    /// Store key holding the leadership record
    pub record_key: String,

    /// Bus channel carrying election traffic
    pub channel_name: String,

    /// How long a written claim stays valid without renewal
    pub lease_duration: Duration,

    /// Period of the leader's renewal heartbeat
    pub renew_interval: Duration,

    /// Shortest candidacy collection window
    pub election_min_backoff: Duration,

    /// Longest candidacy collection window
    pub election_max_backoff: Duration,

    /// Delay before a losing candidate checks that the winner claimed
    pub recheck_delay: Duration,

    /// Seed for window lengths; `None` draws from entropy
    pub randomization_seed: Option<u64>,
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            record_key: "monarch:leader".to_string(),
            channel_name: "monarch_leadership".to_string(),
            lease_duration: Duration::from_millis(8000),
            renew_interval: Duration::from_millis(3000),
            election_min_backoff: Duration::from_millis(80),
            election_max_backoff: Duration::from_millis(200),
            recheck_delay: Duration::from_millis(250),
            randomization_seed: None,
        }
    }
}

impl ElectorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record_key(mut self, key: impl Into<String>) -> Self {
        self.record_key = key.into();
        self
    }

    pub fn with_channel_name(mut self, channel: impl Into<String>) -> Self {
        self.channel_name = channel.into();
        self
    }

    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_election_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.election_min_backoff = min;
        self.election_max_backoff = max;
        self
    }

    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }

    pub fn with_randomization_seed(mut self, seed: u64) -> Self {
        self.randomization_seed = Some(seed);
        self
    }

    pub fn validate(&self) -> MonarchResult<()> {
        if self.record_key.is_empty() {
            return Err(MonarchError::config("record_key must not be empty"));
        }
        if self.channel_name.is_empty() {
            return Err(MonarchError::config("channel_name must not be empty"));
        }
        if self.lease_duration.is_zero() || self.renew_interval.is_zero() {
            return Err(MonarchError::config(
                "lease_duration and renew_interval must be non-zero",
            ));
        }
        if self.renew_interval >= self.lease_duration {
            return Err(MonarchError::config(format!(
                "renew_interval ({:?}) must be shorter than lease_duration ({:?})",
                self.renew_interval, self.lease_duration
            )));
        }
        if self.election_min_backoff > self.election_max_backoff {
            return Err(MonarchError::config(format!(
                "election backoff range is empty: {:?} > {:?}",
                self.election_min_backoff, self.election_max_backoff
            )));
        }
        Ok(())
    }

    /// Stable key identifying electors that would behave identically.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.record_key,
            self.channel_name,
            self.lease_duration.as_millis(),
            self.renew_interval.as_millis(),
            self.election_min_backoff.as_millis(),
            self.election_max_backoff.as_millis(),
            self.recheck_delay.as_millis(),
        )
    }

    pub(crate) fn lease_millis(&self) -> u64 {
        self.lease_duration.as_millis() as u64
    }

    pub(crate) fn renew_millis(&self) -> u64 {
        self.renew_interval.as_millis() as u64
    }

    pub(crate) fn recheck_millis(&self) -> u64 {
        self.recheck_delay.as_millis() as u64
    }

    pub(crate) fn backoff_millis(&self) -> (u64, u64) {
        (
            self.election_min_backoff.as_millis() as u64,
            self.election_max_backoff.as_millis() as u64,
        )
    }
}
