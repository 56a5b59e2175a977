//! # Monarch Core - Lease-Based Leader Election
//!
//! Core building blocks shared by every crate of the Monarch workspace.
//!
//! Monarch elects exactly one leader among peers that share two things: a
//! record store holding a single leadership claim, and a best-effort broadcast
//! bus. There is no coordinator; leadership is a lease that the holder renews
//! and that anyone may take over once it expires.
//!
//! ## Components
//!
//! - **Data model**: [`ParticipantId`], [`LeaderRecord`], [`ElectionState`]
//! - **Wire messages**: [`ElectionMessage`] (`ELECT`, `LEADER`, `HEARTBEAT`, `STEP_DOWN`)
//! - **Seams**: [`RecordStore`] and [`BroadcastBus`], implemented by
//!   `monarch-store` and `monarch-bus`
//! - **Capabilities**: [`IdGenerator`] and [`Clock`], injectable for tests
//! - **Error Handling**: [`MonarchError`] and [`MonarchResult`]
//!
//! ## Example
//!
//! ```rust
//! use monarch_core::{ElectionMessage, LeaderRecord, ParticipantId};
//!
//! let record = LeaderRecord::new(ParticipantId::from("tab-1"), 1, 10_000);
//! let wire = ElectionMessage::leader(record.clone()).to_json().unwrap();
//!
//! let decoded = ElectionMessage::from_json(&wire).unwrap();
//! assert_eq!(decoded.record(), Some(&record));
//! ```

pub mod bus;
pub mod clock;
pub mod error;
pub mod identity;
pub mod messages;
pub mod store;
pub mod types;

pub use bus::BroadcastBus;
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use error::{MonarchError, MonarchResult};
pub use identity::{IdGenerator, RandomIdGenerator, SequenceIdGenerator};
pub use messages::ElectionMessage;
pub use store::{RecordStore, Subscription, SubscriptionId};
pub use types::{ElectionState, LeaderRecord, ParticipantId};
