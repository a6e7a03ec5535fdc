//! Keyed request map shared by the query and get batches

use std::collections::HashMap;

/// Ordered map from caller key to request payload
///
/// Iteration follows first-insertion order. Re-inserting a key replaces its
/// payload in place, so the key keeps its original position.
#[derive(Debug, Clone)]
pub struct CorrelatedRequestMap<T> {
    entries: Vec<(String, T)>,
    positions: HashMap<String, usize>,
}

impl<T> Default for CorrelatedRequestMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<T> CorrelatedRequestMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns the replaced payload
    pub fn insert(&mut self, key: impl Into<String>, payload: T) -> Option<T> {
        let key = key.into();
        match self.positions.get(&key) {
            Some(&position) => Some(std::mem::replace(&mut self.entries[position].1, payload)),
            None => {
                self.positions.insert(key.clone(), self.entries.len());
                self.entries.push((key, payload));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.positions.get(key).map(|&position| &self.entries[position].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(key, payload)| (key.as_str(), payload))
    }

    /// Entries in key order
    pub fn into_entries(self) -> Vec<(String, T)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order() {
        let mut map = CorrelatedRequestMap::new();
        map.insert("b", 1);
        map.insert("a", 2);
        map.insert("c", 3);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let mut map = CorrelatedRequestMap::new();
        map.insert("x", 1);
        map.insert("y", 2);
        assert_eq!(map.insert("x", 10), Some(1));

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("x"), Some(&10));
        assert_eq!(
            map.into_entries(),
            vec![("x".to_string(), 10), ("y".to_string(), 2)]
        );
    }

    #[test]
    fn test_empty() {
        let map: CorrelatedRequestMap<()> = CorrelatedRequestMap::default();
        assert!(map.is_empty());
        assert!(!map.contains_key("x"));
        assert_eq!(map.get("x"), None);
    }
}
