//! Ordered multimap used for invocation attributes.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};

/// A map where each key holds an ordered list of values.
///
/// Keys iterate in sorted order; values keep their insertion order per key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MultiMap {
    entries: BTreeMap<String, Vec<String>>,
}

impl MultiMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` under `key`.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(key.into()).or_default().push(value.into());
    }

    /// Append every value of `other`, preserving its per-key order.
    pub fn put_all(&mut self, other: &MultiMap) {
        for (key, values) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove a key and all of its values.
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<String>> {
        self.entries.iter()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a MultiMap {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = btree_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MultiMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.put(key, value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::MultiMap;

    #[test]
    fn values_keep_insertion_order_per_key() {
        let mut map = MultiMap::new();
        map.put("branch", "main");
        map.put("tag", "b");
        map.put("tag", "a");
        assert_eq!(map.get("tag"), Some(&["b".to_string(), "a".to_string()][..]));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn put_all_appends_rather_than_replaces() {
        let mut map: MultiMap = [("k", "1")].into_iter().collect();
        let other: MultiMap = [("k", "2"), ("j", "3")].into_iter().collect();
        map.put_all(&other);
        assert_eq!(map.get("k"), Some(&["1".to_string(), "2".to_string()][..]));
        assert_eq!(map.get("j"), Some(&["3".to_string()][..]));
    }

    #[test]
    fn remove_drops_every_value() {
        let mut map: MultiMap = [("k", "1"), ("k", "2")].into_iter().collect();
        assert_eq!(map.remove("k").map(|v| v.len()), Some(2));
        assert!(map.is_empty());
        assert!(map.get("k").is_none());
    }

    #[test]
    fn serializes_as_plain_object() {
        let map: MultiMap = [("k", "v")].into_iter().collect();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"k":["v"]}"#);
        let back: MultiMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
