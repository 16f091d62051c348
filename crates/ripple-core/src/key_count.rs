//! Ordered key → count mapping.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Per-key counts in the order keys were resolved.
///
/// Serializes as a JSON object whose members keep that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCount<K> {
    entries: Vec<(K, u64)>,
}

impl<K> Default for KeyCount<K> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<K: PartialEq> KeyCount<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(key: K, count: u64) -> Self {
        Self {
            entries: vec![(key, count)],
        }
    }

    /// Set the count for `key`, keeping its original position if present.
    pub fn insert(&mut self, key: K, count: u64) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = count,
            None => self.entries.push((key, count)),
        }
    }

    /// Combine two mappings into a new one. Counts in `other` win.
    pub fn merge(self, other: Self) -> Self {
        other.entries.into_iter().fold(self, |mut merged, (key, count)| {
            merged.insert(key, count);
            merged
        })
    }

    pub fn get(&self, key: &K) -> Option<u64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, count)| *count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &u64)> {
        self.entries.iter().map(|(key, count)| (key, count))
    }
}

impl<K: PartialEq> FromIterator<(K, u64)> for KeyCount<K> {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |mut counts, (key, count)| {
            counts.insert(key, count);
            counts
        })
    }
}

impl<K: Serialize> Serialize for KeyCount<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, count) in &self.entries {
            map.serialize_entry(key, count)?;
        }
        map.end()
    }
}
