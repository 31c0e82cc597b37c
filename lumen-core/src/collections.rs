//! Collection aliases used across the workspace.
//!
//! Maps and sets are `hashbrown` containers hashed with `foldhash`. Cache keys that must be
//! reproducible between runs go through [`StableHasher`] instead of the randomly seeded default.

use std::hash::{BuildHasher, Hash, Hasher};

pub use smallvec::{smallvec, SmallVec};

pub type DefaultHashBuilder = foldhash::fast::RandomState;

pub mod hashmap {
    pub use hashbrown::hash_map::{Entry, OccupiedEntry, VacantEntry};

    pub type HashMap<K, V> = hashbrown::HashMap<K, V, super::DefaultHashBuilder>;
}

pub mod hashset {
    pub type HashSet<T> = hashbrown::HashSet<T, super::DefaultHashBuilder>;
}

/// Seed for every content hash produced by [`StableHasher`].
const STABLE_HASH_SEED: u64 = 0x6c75_6d65_6e5f_7268;

/// Deterministic hasher for content-addressed cache keys.
///
/// The seed is fixed, so the same input produces the same key in every process.
pub struct StableHasher {
    inner: foldhash::fast::FoldHasher,
}

impl StableHasher {
    pub fn new() -> Self {
        Self {
            inner: foldhash::fast::FixedState::with_seed(STABLE_HASH_SEED).build_hasher(),
        }
    }

    /// Hash a single value in one go.
    pub fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
        let mut hasher = Self::new();
        value.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for StableHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.inner.finish()
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.inner.write(bytes)
    }

    #[inline]
    fn write_u8(&mut self, i: u8) {
        self.inner.write_u8(i)
    }

    #[inline]
    fn write_u32(&mut self, i: u32) {
        self.inner.write_u32(i)
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.inner.write_u64(i)
    }

    #[inline]
    fn write_usize(&mut self, i: usize) {
        self.inner.write_usize(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hasher_is_deterministic() {
        let a = StableHasher::hash_one(&(1u32, 2u64, "set"));
        let b = StableHasher::hash_one(&(1u32, 2u64, "set"));
        assert_eq!(a, b);
        assert_ne!(a, StableHasher::hash_one(&(2u32, 1u64, "set")));
    }

    #[test]
    fn hashmap_alias_round_trips() {
        let mut map: hashmap::HashMap<u64, &str> = hashmap::HashMap::default();
        map.insert(7, "seven");
        assert_eq!(map.get(&7), Some(&"seven"));
    }
}
