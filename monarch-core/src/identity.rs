//! Participant identity generation.

use crate::ParticipantId;
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Source of participant identities.
///
/// Injected into the elector so tests can supply deterministic identities.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> ParticipantId;
}

/// Random v4 UUIDs drawn from the operating system's entropy source.
///
/// If the OS source is unavailable the generator falls back to a
/// `participant-<millis>-<suffix>` string whose suffix comes from a
/// time-seeded PRNG. Such identities are unique only with modest
/// probability, which is acceptable for a degraded host.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl RandomIdGenerator {
    pub fn new() -> Self {
        Self
    }

    fn fallback() -> ParticipantId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let seed = now.as_nanos() as u64 ^ u64::from(std::process::id());
        let mut rng = StdRng::seed_from_u64(seed);
        let suffix: String = (0..8)
            .map(|_| {
                let digit = rng.gen_range(0..36u32);
                char::from_digit(digit, 36).unwrap_or('0')
            })
            .collect();

        ParticipantId::new(format!("participant-{}-{}", now.as_millis(), suffix))
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> ParticipantId {
        let mut bytes = [0u8; 16];
        match OsRng.try_fill_bytes(&mut bytes) {
            Ok(()) => {
                let uuid = uuid::Builder::from_random_bytes(bytes).into_uuid();
                ParticipantId::new(uuid.hyphenated().to_string())
            }
            Err(_) => Self::fallback(),
        }
    }
}

/// Hands out a fixed list of identities, then random ones.
///
/// ```rust
/// use monarch_core::{IdGenerator, SequenceIdGenerator};
///
/// let ids = SequenceIdGenerator::new(["aaa", "zzz"]);
/// assert_eq!(ids.generate().as_str(), "aaa");
/// assert_eq!(ids.generate().as_str(), "zzz");
/// assert!(!ids.generate().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    queue: Mutex<VecDeque<String>>,
}

impl SequenceIdGenerator {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate(&self) -> ParticipantId {
        let next = self.queue.lock().pop_front();
        match next {
            Some(id) => ParticipantId::new(id),
            None => ParticipantId::new(format!("uuid-{}", Uuid::new_v4().simple())),
        }
    }
}
