//! # Monarch Elector
//!
//! Lease-based leader election among participants sharing a record store
//! and a broadcast bus.
//!
//! A participant joins by reading the shared record. If a live claim is
//! found it follows it and watches for the lease to run out; otherwise it
//! announces its candidacy, collects other candidacies for a randomized
//! window and, if its identity is the greatest it saw, writes a claim with
//! the next epoch. The leader renews its claim periodically and checks on
//! every renewal that the slot still names it, stepping aside if it does
//! not.
//!
//! ## Components
//!
//! - [`LeaderElector`]: a running participant driven by a tokio task
//! - [`ElectionMachine`]: the synchronous state machine underneath it
//! - [`NoopElector`]: an elector that never leads
//! - [`ElectorRegistry`]: one shared elector per configuration
//! - [`ElectorConfig`]: lease, renewal and backoff settings
//!
//! Every elector implements [`Elector`], so callers can hold either kind
//! behind `Arc<dyn Elector>`.

pub mod config;
pub mod elector;
pub mod machine;
pub mod noop;
pub mod observers;
pub mod registry;
pub mod timers;

pub use config::ElectorConfig;
pub use elector::LeaderElector;
pub use machine::{ElectionMachine, ElectionStats, Role};
pub use noop::NoopElector;
pub use observers::{ObserverRegistry, StateListener};
pub use registry::ElectorRegistry;
pub use timers::{TimerKind, TimerSet};

use monarch_core::{ElectionState, ParticipantId, SubscriptionId};

/// Operations shared by every elector.
pub trait Elector: Send + Sync {
    /// Begin participating. Calling it again has no effect.
    fn start(&self);

    /// Leave the election for good, stepping down first if leading.
    fn stop(&self);

    fn is_leader(&self) -> bool;

    fn state(&self) -> ElectionState;

    fn participant_id(&self) -> ParticipantId;

    /// Register a listener. It is called at once with the current state and
    /// then after every change.
    fn subscribe(&self, listener: StateListener) -> SubscriptionId;

    /// Returns `false` if `id` was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}
