//! # Monarch Bus
//!
//! In-memory broadcast bus for Monarch coordination domains.
//!
//! The bus behaves like a same-origin broadcast channel: named channels,
//! best-effort fan-out, no delivery to the publisher unless asked for, and
//! JSON on the wire. Endpoints can be isolated and deliveries randomly lost
//! to exercise the protocol's tolerance of a lossy medium.

pub mod in_memory;

pub use in_memory::{BusConfig, BusEndpoint, BusStats, EndpointId, InMemoryBus};

/// Re-export commonly used types
pub use monarch_core::{BroadcastBus, ElectionMessage};
