use crate::model::{ConfigChange, PropertyChangeType};
use crate::properties::Properties;

/// Computes the key-level changes that turn `previous` into `current`.
///
/// Keys only in `current` are ADDED, keys only in `previous` are DELETED, keys
/// in both with different values are MODIFIED. Unchanged keys are omitted, so
/// identical snapshots yield an empty list.
pub fn calculate_changes(
    app_id: &str,
    namespace: &str,
    previous: &Properties,
    current: &Properties,
) -> Vec<ConfigChange> {
    let mut changes = Vec::new();

    for (key, new_value) in current.iter() {
        match previous.get(key) {
            None => changes.push(ConfigChange::new(
                app_id,
                namespace,
                key,
                None,
                Some(new_value.to_string()),
                PropertyChangeType::Added,
            )),
            Some(old_value) if old_value != new_value => changes.push(ConfigChange::new(
                app_id,
                namespace,
                key,
                Some(old_value.to_string()),
                Some(new_value.to_string()),
                PropertyChangeType::Modified,
            )),
            Some(_) => {}
        }
    }

    for (key, old_value) in previous.iter() {
        if !current.contains_key(key) {
            changes.push(ConfigChange::new(
                app_id,
                namespace,
                key,
                Some(old_value.to_string()),
                None,
                PropertyChangeType::Deleted,
            ));
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs.iter().copied().collect()
    }

    fn by_key(changes: Vec<ConfigChange>) -> HashMap<String, ConfigChange> {
        changes
            .into_iter()
            .map(|c| (c.property_name.clone(), c))
            .collect()
    }

    #[test]
    fn test_classifies_added_modified_deleted() {
        let old = props(&[("kept", "1"), ("changed", "a"), ("gone", "x")]);
        let new = props(&[("kept", "1"), ("changed", "b"), ("fresh", "y")]);

        let changes = by_key(calculate_changes("app", "ns", &old, &new));

        assert_eq!(changes.len(), 3);
        assert_eq!(changes["changed"].change_type, PropertyChangeType::Modified);
        assert_eq!(changes["changed"].old_value.as_deref(), Some("a"));
        assert_eq!(changes["changed"].new_value.as_deref(), Some("b"));
        assert_eq!(changes["gone"].change_type, PropertyChangeType::Deleted);
        assert_eq!(changes["gone"].new_value, None);
        assert_eq!(changes["fresh"].change_type, PropertyChangeType::Added);
        assert_eq!(changes["fresh"].old_value, None);
        assert!(!changes.contains_key("kept"));
    }

    #[test]
    fn test_identical_snapshots_produce_no_changes() {
        let old = props(&[("a", "1"), ("b", "2")]);
        assert!(calculate_changes("app", "ns", &old, &old.clone()).is_empty());
        assert!(calculate_changes("app", "ns", &Properties::new(), &Properties::new()).is_empty());
    }

    #[test]
    fn test_reverse_diff_swaps_values_and_types() {
        let old = props(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let new = props(&[("b", "20"), ("c", "3"), ("d", "4")]);

        let forward = by_key(calculate_changes("app", "ns", &old, &new));
        let backward = by_key(calculate_changes("app", "ns", &new, &old));

        assert_eq!(forward.len(), backward.len());
        for (key, change) in &forward {
            let reversed = &backward[key];
            assert_eq!(change.old_value, reversed.new_value);
            assert_eq!(change.new_value, reversed.old_value);
            let expected = match change.change_type {
                PropertyChangeType::Added => PropertyChangeType::Deleted,
                PropertyChangeType::Deleted => PropertyChangeType::Added,
                PropertyChangeType::Modified => PropertyChangeType::Modified,
            };
            assert_eq!(reversed.change_type, expected);
        }
    }
}
