//! Fixed-width set of index ordinals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bitmap of index ordinals of one table.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyMap(u64);

impl KeyMap {
    /// Largest number of indexes a table may carry.
    pub const MAX_KEYS: usize = 64;

    pub fn new() -> Self {
        KeyMap(0)
    }

    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < Self::MAX_KEYS);
        self.0 |= 1 << idx;
    }

    pub fn clear(&mut self, idx: usize) {
        self.0 &= !(1 << idx);
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx < Self::MAX_KEYS && self.0 & (1 << idx) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn intersect(self, other: KeyMap) -> KeyMap {
        KeyMap(self.0 & other.0)
    }

    pub fn union(self, other: KeyMap) -> KeyMap {
        KeyMap(self.0 | other.0)
    }

    pub fn subtract(self, other: KeyMap) -> KeyMap {
        KeyMap(self.0 & !other.0)
    }

    /// Iterate over the set ordinals in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let bits = self.0;
        (0..Self::MAX_KEYS).filter(move |i| bits & (1 << i) != 0)
    }
}

impl fmt::Debug for KeyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for KeyMap {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut map = KeyMap::new();
        for idx in iter {
            map.set(idx);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_algebra() {
        let a: KeyMap = [0, 2, 5].into_iter().collect();
        let b: KeyMap = [2, 3].into_iter().collect();
        assert_eq!(a.intersect(b).iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(a.union(b).len(), 4);
        assert_eq!(a.subtract(b).iter().collect::<Vec<_>>(), vec![0, 5]);
        assert!(!a.contains(63));
    }

    #[test]
    fn test_highest_bit() {
        let mut m = KeyMap::new();
        m.set(63);
        assert!(m.contains(63));
        m.clear(63);
        assert!(m.is_empty());
    }
}
