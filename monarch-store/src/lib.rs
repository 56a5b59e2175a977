//! # Monarch Store
//!
//! In-memory shared record store for Monarch coordination domains.
//!
//! ## Features
//!
//! - **Shared slots**: one [`SharedRecordStore`] per domain, one
//!   [`StoreHandle`] per participant
//! - **Change Notifications**: writes reach every other handle watching the
//!   key; the writer never sees its own change
//! - **Wire-faithful values**: records are stored as JSON text, so corrupt or
//!   foreign values surface exactly as they would from a real host store
//! - **Auditing**: an unfiltered feed of every write for tests and tooling

pub mod notifications;
pub mod store;

pub use notifications::{
    ChangeFeed, ChangeNotification, ChangeType, FeedStats, HandleId, NotificationFilter,
};
pub use store::{SharedRecordStore, StoreConfig, StoreHandle, StoreStats};

/// Re-export commonly used types
pub use monarch_core::{LeaderRecord, RecordStore};

#[cfg(test)]
mod tests {
    use super::*;
    use monarch_core::ParticipantId;

    #[tokio::test]
    async fn test_audit_tracks_successive_writes() {
        let store = SharedRecordStore::default();
        let handle = store.connect();
        let mut audit = store.audit();

        for epoch in 1..=3 {
            let record = LeaderRecord::new(ParticipantId::from("p"), epoch, 100 * epoch);
            handle.write("k", &record).unwrap();
        }

        let mut versions = Vec::new();
        for _ in 0..3 {
            let change = audit.recv().await.unwrap();
            assert_eq!(change.origin, handle.id());
            versions.push(change.version);
        }
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(store.get_stats().writes, 3);
    }
}
