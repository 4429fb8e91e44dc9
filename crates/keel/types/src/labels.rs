//! Labels and label transformations

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A set of key/value labels carried through policy resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    pub labels: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Adds labels, overwriting existing values
    pub fn add_labels(&mut self, labels: &BTreeMap<String, String>) {
        for (k, v) in labels {
            self.labels.insert(k.clone(), v.clone());
        }
    }

    /// Applies a set of operations and returns whether anything changed
    pub fn apply_transform(&mut self, ops: &LabelOperations) -> bool {
        let mut changed = false;

        // Removal wins over a set of the same label
        for (k, v) in &ops.set {
            if ops.remove.contains(k) {
                continue;
            }
            if self.labels.get(k) != Some(v) {
                self.labels.insert(k.clone(), v.clone());
                changed = true;
            }
        }

        for k in &ops.remove {
            if self.labels.remove(k).is_some() {
                changed = true;
            }
        }

        changed
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl From<BTreeMap<String, String>> for LabelSet {
    fn from(labels: BTreeMap<String, String>) -> Self {
        Self::new(labels)
    }
}

/// Label mutations: values to set, then names to remove
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelOperations {
    #[serde(default)]
    pub set: BTreeMap<String, String>,

    #[serde(default)]
    pub remove: BTreeSet<String>,
}

impl LabelOperations {
    pub fn new(set: BTreeMap<String, String>, remove: BTreeSet<String>) -> Self {
        Self { set, remove }
    }

    /// Operations setting a single label
    pub fn set_single(name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut set = BTreeMap::new();
        set.insert(name.into(), value.into());
        Self {
            set,
            remove: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        LabelSet::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_apply_transform() {
        let mut set = labels(&[("l1", "1"), ("l2", "2"), ("l3", "3")]);
        let ops = LabelOperations::new(
            [("a", "b"), ("c", "d")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ["l1".to_string()].into_iter().collect(),
        );

        assert!(set.apply_transform(&ops));
        assert_eq!(set.len(), 4);
        assert_eq!(set.get("a"), Some("b"));
        assert_eq!(set.get("l1"), None);

        // Applying the same operations again is a no-op
        assert!(!set.apply_transform(&ops));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_set_single_label() {
        let mut set = labels(&[("l1", "1")]);
        assert!(set.apply_transform(&LabelOperations::set_single("name", "value")));
        assert_eq!(set, labels(&[("l1", "1"), ("name", "value")]));
    }

    #[test]
    fn test_add_labels_overwrites() {
        let mut set = labels(&[("a", "1"), ("c", "3")]);
        set.add_labels(&labels(&[("c", "4"), ("d", "5")]).labels);
        assert_eq!(set, labels(&[("a", "1"), ("c", "4"), ("d", "5")]));
    }

    proptest! {
        #[test]
        fn prop_transform_is_idempotent(
            base in proptest::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..8),
            set in proptest::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..4),
            remove in proptest::collection::btree_set("[a-z]{1,4}", 0..4),
        ) {
            let ops = LabelOperations::new(set, remove);
            let mut labels = LabelSet::new(base);
            labels.apply_transform(&ops);
            let snapshot = labels.clone();
            prop_assert!(!labels.apply_transform(&ops));
            prop_assert_eq!(labels, snapshot);
        }
    }
}
