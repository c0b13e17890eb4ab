//! Flat string key/value snapshot of a namespace.

use std::collections::HashMap;

/// A point-in-time key/value view of one namespace.
///
/// Insertion order of keys is tracked only for ordered snapshots
/// (see [`Properties::ordered`]); equality never depends on order.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
    order: Option<Vec<String>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot that remembers the order keys were first inserted in.
    pub fn ordered() -> Self {
        Self {
            values: HashMap::new(),
            order: Some(Vec::new()),
        }
    }

    pub fn with_order(ordered: bool) -> Self {
        if ordered {
            Self::ordered()
        } else {
            Self::new()
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.order.is_some()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let previous = self.values.insert(key.clone(), value.into());
        if previous.is_none() {
            if let Some(order) = self.order.as_mut() {
                order.push(key);
            }
        }
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            if let Some(order) = self.order.as_mut() {
                order.retain(|k| k != key);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys in insertion order for ordered snapshots, arbitrary order otherwise.
    pub fn keys(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match &self.order {
            Some(order) => Box::new(order.iter().map(String::as_str)),
            None => Box::new(self.values.keys().map(String::as_str)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.keys()
            .filter_map(move |k| self.values.get(k).map(|v| (k, v.as_str())))
    }

    pub fn property_names(&self) -> Vec<String> {
        self.keys().map(str::to_string).collect()
    }
}

impl PartialEq for Properties {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Properties {}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Properties::new();
        properties.extend(iter);
        properties
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Properties {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_keys_follow_insertion() {
        let mut props = Properties::ordered();
        props.insert("b", "2");
        props.insert("a", "1");
        props.insert("c", "3");
        props.insert("b", "22");
        props.remove("a");

        assert_eq!(props.property_names(), vec!["b", "c"]);
        assert_eq!(props.get("b"), Some("22"));
    }

    #[test]
    fn test_equality_ignores_order() {
        let mut ordered = Properties::ordered();
        ordered.insert("x", "1");
        ordered.insert("y", "2");
        let unordered: Properties = [("y", "2"), ("x", "1")].into_iter().collect();

        assert_eq!(ordered, unordered);
        assert_ne!(Properties::new(), unordered);
    }
}
