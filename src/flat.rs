//! Flat configuration map.
//!
//! `FlatConfig` is the value applications consume: string keys mapped to string
//! values, with keys compared case-insensitively. It is ordered by the
//! case-folded key so iteration and serialization are deterministic.
//!
//! Keys are folded by lowercasing each character independently, so two keys
//! match when their per-character lowercase forms are equal.
//!
//! # Insert contract
//! `insert` always overwrites on a case-insensitive collision. The new value
//! wins and the most recent key spelling is kept. The merger relies on this
//! for last-write-wins across rule collections.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// Lowercases each char on its own. `str::to_lowercase` maps a word-final
// 'Σ' to 'ς', which would make the fold depend on position.
fn fold(key: &str) -> String {
    key.chars().flat_map(char::to_lowercase).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: String,
}

/// Ordered, case-insensitive string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatConfig {
    entries: BTreeMap<String, Entry>,
}

impl FlatConfig {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`, overwriting any case-insensitive match.
    ///
    /// Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let entry = Entry {
            value: value.into(),
            key: key.clone(),
        };
        self.entries.insert(fold(&key), entry).map(|old| old.value)
    }

    /// Looks up a value, ignoring key case.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&fold(key)).map(|e| e.value.as_str())
    }

    /// Returns true if the key is present, ignoring case.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&fold(key))
    }

    /// Removes a key, ignoring case. Returns the removed value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&fold(key)).map(|e| e.value)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(key, value)` pairs ordered by case-folded key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|e| (e.key.as_str(), e.value.as_str()))
    }

    /// Iterates keys in their stored spelling.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.key.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlatConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for FlatConfig {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl Serialize for FlatConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter() {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct FlatConfigVisitor;

impl<'de> Visitor<'de> for FlatConfigVisitor {
    type Value = FlatConfig;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of string keys to string values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FlatConfig, A::Error> {
        let mut out = FlatConfig::new();
        while let Some((k, v)) = access.next_entry::<String, String>()? {
            out.insert(k, v);
        }
        Ok(out)
    }
}

impl<'de> Deserialize<'de> for FlatConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(FlatConfigVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let mut cfg = FlatConfig::new();
        cfg.insert("Api:Endpoint", "10.0.0.1:8080");
        assert_eq!(cfg.get("api:endpoint"), Some("10.0.0.1:8080"));
        assert_eq!(cfg.get("API:ENDPOINT"), Some("10.0.0.1:8080"));
        assert!(cfg.contains_key("aPi:EndPoint"));
    }

    #[test]
    fn test_insert_overwrites_case_insensitive_collision() {
        let mut cfg = FlatConfig::new();
        assert_eq!(cfg.insert("Feature:X", "on"), None);
        assert_eq!(cfg.insert("feature:x", "off"), Some("on".to_string()));
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg.get("FEATURE:X"), Some("off"));
        assert_eq!(cfg.keys().collect::<Vec<_>>(), vec!["feature:x"]);
    }

    #[test]
    fn test_iteration_is_ordered_by_folded_key() {
        let cfg: FlatConfig = [("b", "2"), ("A", "1"), ("c", "3")].into_iter().collect();
        let keys: Vec<_> = cfg.keys().collect();
        assert_eq!(keys, vec!["A", "b", "c"]);
    }

    #[test]
    fn test_equality_is_by_content() {
        let a: FlatConfig = [("x", "1"), ("y", "2")].into_iter().collect();
        let b: FlatConfig = [("y", "2"), ("x", "1")].into_iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_shape() {
        let cfg: FlatConfig = [("Api:Endpoint", "h:1"), ("Feature:x", "on")].into_iter().collect();
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(json, r#"{"Api:Endpoint":"h:1","Feature:x":"on"}"#);

        let back: FlatConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get("api:endpoint"), Some("h:1"));
    }

    #[test]
    fn test_fold_ignores_final_sigma_context() {
        let cfg: FlatConfig = [("ΟΔΟΣ", "street")].into_iter().collect();
        assert_eq!(cfg.get("οδοσ"), Some("street"));
        assert_eq!(cfg.get("ΟΔΟΣ"), Some("street"));
        assert_eq!(cfg.keys().collect::<Vec<_>>(), vec!["ΟΔΟΣ"]);
    }

    #[test]
    fn test_remove() {
        let mut cfg: FlatConfig = [("Key", "v")].into_iter().collect();
        assert_eq!(cfg.remove("KEY"), Some("v".to_string()));
        assert!(cfg.is_empty());
    }
}
