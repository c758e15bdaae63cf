//! Per-key write generations for the memory tier.
//!
//! A remote read remembers the generation of its key before the round trip
//! and only promotes its result if no write, delete or invalidation of that
//! key happened meanwhile. Keys hash onto a fixed set of stripes, so memory
//! stays bounded; two keys sharing a stripe can only cause a skipped
//! promotion, never a stale one.

use std::hash::{BuildHasher, RandomState};

use parking_lot::Mutex;

const STRIPES: usize = 256;

pub(crate) struct KeyGenerations {
    hasher: RandomState,
    stripes: Box<[Mutex<u64>]>,
}

impl Default for KeyGenerations {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerations {
    pub(crate) fn new() -> Self {
        Self {
            hasher: RandomState::new(),
            stripes: (0..STRIPES).map(|_| Mutex::new(0)).collect(),
        }
    }

    fn stripe(&self, key: &str) -> &Mutex<u64> {
        let index = self.hasher.hash_one(key) as usize % self.stripes.len();
        &self.stripes[index]
    }

    /// Generation to hand back to [`Self::apply_if_current`].
    pub(crate) fn current(&self, key: &str) -> u64 {
        *self.stripe(key).lock()
    }

    /// Advance the key's generation and run `update` while holding its stripe.
    pub(crate) fn advance(&self, key: &str, update: impl FnOnce()) {
        let mut generation = self.stripe(key).lock();
        *generation = generation.wrapping_add(1);
        update();
    }

    /// Run `update` only if the key's generation is still `seen`.
    pub(crate) fn apply_if_current(&self, key: &str, seen: u64, update: impl FnOnce()) -> bool {
        let generation = self.stripe(key).lock();
        if *generation != seen {
            return false;
        }
        update();
        true
    }
}
