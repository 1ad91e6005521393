//! Ordered, de-duplicated registries of named items.
//!
//! A [`FeatureSet`] holds tools, prompts, resources, or resource templates
//! keyed by name/URI. Later insertions replace earlier ones, iteration is
//! lexicographic by key, and `above(k)` yields the items whose key is
//! strictly greater than `k`.

use std::collections::BTreeMap;
use std::ops::Bound;

/// Ordered registry of named items.
///
/// The set itself is not synchronized; owners wrap it in a mutex and snapshot
/// under the lock (iteration returns owned clones for that reason).
pub struct FeatureSet<T> {
    items: BTreeMap<String, T>,
    key_of: fn(&T) -> &str,
}

impl<T> std::fmt::Debug for FeatureSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureSet")
            .field("len", &self.items.len())
            .finish()
    }
}

impl<T: Clone> FeatureSet<T> {
    /// Create a registry with the given key extractor.
    pub fn new(key_of: fn(&T) -> &str) -> Self {
        Self {
            items: BTreeMap::new(),
            key_of,
        }
    }

    /// Insert an item, replacing any existing item with the same key.
    pub fn add(&mut self, item: T) {
        let key = (self.key_of)(&item).to_string();
        self.items.insert(key, item);
    }

    /// Remove the item with the given key. Returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        self.items.remove(key).is_some()
    }

    /// Look up an item by key.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.get(key)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Snapshot of all items in key order.
    pub fn all(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }

    /// Snapshot of items whose key is strictly greater than `key`, in order.
    ///
    /// `key` does not need to exist in the set; the range starts at the first
    /// key lexicographically after it.
    pub fn above(&self, key: &str) -> Vec<T> {
        self.items
            .range::<str, _>((Bound::Excluded(key), Bound::Unbounded))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// The key of an item, per this registry's extractor.
    pub fn key_of(&self, item: &T) -> String {
        (self.key_of)(item).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Named(String);

    fn set_of(names: &[&str]) -> FeatureSet<Named> {
        let mut set = FeatureSet::new(|n: &Named| n.0.as_str());
        for name in names {
            set.add(Named(name.to_string()));
        }
        set
    }

    fn names(items: &[Named]) -> Vec<&str> {
        items.iter().map(|n| n.0.as_str()).collect()
    }

    #[test]
    fn iteration_is_sorted_and_deduplicated() {
        let set = set_of(&["delta", "bravo", "alpha", "bravo", "charlie"]);
        assert_eq!(set.len(), 4);
        assert_eq!(names(&set.all()), vec!["alpha", "bravo", "charlie", "delta"]);
    }

    #[test]
    fn later_insertions_replace_earlier() {
        let mut set = FeatureSet::new(|pair: &(String, u32)| pair.0.as_str());
        set.add(("x".to_string(), 1));
        set.add(("x".to_string(), 2));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("x").unwrap().1, 2);
    }

    #[test]
    fn above_is_strictly_greater() {
        let set = set_of(&["alpha", "bravo", "charlie", "delta"]);
        assert_eq!(names(&set.above("bravo")), vec!["charlie", "delta"]);
        assert_eq!(names(&set.above("delta")), Vec::<&str>::new());
        assert_eq!(
            names(&set.above("")),
            vec!["alpha", "bravo", "charlie", "delta"]
        );
    }

    #[test]
    fn above_a_nonexistent_key() {
        let set = set_of(&["alpha", "charlie", "echo"]);
        assert_eq!(names(&set.above("bravo")), vec!["charlie", "echo"]);
        assert_eq!(names(&set.above("zulu")), Vec::<&str>::new());
    }

    #[test]
    fn remove_reports_presence() {
        let mut set = set_of(&["alpha"]);
        assert!(set.remove("alpha"));
        assert!(!set.remove("alpha"));
        assert!(set.is_empty());
    }
}
