//! Property-based tests for the persistent linked map.
//!
//! The map is driven with random operation sequences and compared against
//! a plain ordered-association-list model; every intermediate version is
//! kept and re-checked at the end, which exercises the structural-sharing
//! engine rather than just the newest version.

use lomap::{Mode, PersistentLinkedMap};
use proptest::prelude::*;

// =============================================================================
// Model and Operations
// =============================================================================

/// One mutation of the driven map.
#[derive(Debug, Clone)]
enum Operation {
    Set(u8, i32),
    SetPrepend(u8, i32),
    Unset(u8),
    Replace(u8, u8, i32),
    Empty,
}

fn arbitrary_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        (0..12u8, any::<i32>()).prop_map(|(key, value)| Operation::Set(key, value)),
        (0..12u8, any::<i32>()).prop_map(|(key, value)| Operation::SetPrepend(key, value)),
        (0..12u8).prop_map(Operation::Unset),
        (0..12u8, 0..12u8, any::<i32>())
            .prop_map(|(old_key, key, value)| Operation::Replace(old_key, key, value)),
        Just(Operation::Empty),
    ]
}

/// Ordered association list mirroring the map's insertion-order semantics.
#[derive(Debug, Clone, Default, PartialEq)]
struct Model {
    entries: Vec<(u8, i32)>,
}

impl Model {
    fn position(&self, key: u8) -> Option<usize> {
        self.entries.iter().position(|(stored, _)| *stored == key)
    }

    fn apply(&mut self, operation: &Operation) {
        match *operation {
            Operation::Set(key, value) => match self.position(key) {
                Some(index) => self.entries[index].1 = value,
                None => self.entries.push((key, value)),
            },
            Operation::SetPrepend(key, value) => match self.position(key) {
                Some(index) => self.entries[index].1 = value,
                None => self.entries.insert(0, (key, value)),
            },
            Operation::Unset(key) => {
                if let Some(index) = self.position(key) {
                    self.entries.remove(index);
                }
            }
            Operation::Replace(old_key, key, value) => {
                let Some(old_index) = self.position(old_key) else {
                    return;
                };
                match self.position(key) {
                    Some(existing_index) if existing_index != old_index => {
                        self.entries[existing_index] = (key, value);
                        self.entries.remove(old_index);
                    }
                    _ => self.entries[old_index] = (key, value),
                }
            }
            Operation::Empty => self.entries.clear(),
        }
    }
}

fn apply(
    map: &PersistentLinkedMap<u8, i32>,
    operation: &Operation,
) -> PersistentLinkedMap<u8, i32> {
    match operation.clone() {
        Operation::Set(key, value) => map.set(key, value).unwrap(),
        Operation::SetPrepend(key, value) => {
            map.set_entries(vec![(key, value)], true).unwrap()
        }
        Operation::Unset(key) => map.unset(&key).unwrap(),
        Operation::Replace(old_key, key, value) => map.replace(&old_key, key, value).unwrap(),
        Operation::Empty => map.empty().unwrap(),
    }
}

// =============================================================================
// Model Agreement Laws
// =============================================================================

proptest! {
    /// Law: after any operation sequence, the newest version agrees with
    /// the model on ordered entries, length and keyed lookups.
    #[test]
    fn prop_newest_version_matches_model(
        operations in prop::collection::vec(arbitrary_operation(), 0..40)
    ) {
        let mut model = Model::default();
        let mut map: PersistentLinkedMap<u8, i32> = PersistentLinkedMap::new(Mode::Multiway);

        for operation in &operations {
            map = apply(&map, operation);
            model.apply(operation);
        }

        prop_assert_eq!(map.keys_values().unwrap(), model.entries.clone());
        prop_assert_eq!(map.len().unwrap(), model.entries.len());
        for key in 0..12u8 {
            let expected = model
                .entries
                .iter()
                .find(|(stored, _)| *stored == key)
                .map(|(_, value)| *value);
            prop_assert_eq!(map.get(&key).unwrap(), expected);
        }
    }

    /// Law: every intermediate version keeps answering exactly as it did
    /// when it was the newest one (persistence under descendant mutations).
    #[test]
    fn prop_ancestor_versions_stay_intact(
        operations in prop::collection::vec(arbitrary_operation(), 1..25)
    ) {
        let mut model = Model::default();
        let mut map: PersistentLinkedMap<u8, i32> = PersistentLinkedMap::new(Mode::Multiway);
        let mut snapshots = vec![(map.clone(), model.clone())];

        for operation in &operations {
            map = apply(&map, operation);
            model.apply(operation);
            snapshots.push((map.clone(), model.clone()));
        }

        for (version, expected) in &snapshots {
            prop_assert_eq!(version.keys_values().unwrap(), expected.entries.clone());
        }
    }

    /// Law: forward and reverse traversal are mirrors of each other on
    /// every intermediate version.
    #[test]
    fn prop_reverse_iteration_mirrors_forward(
        operations in prop::collection::vec(arbitrary_operation(), 0..25)
    ) {
        let mut map: PersistentLinkedMap<u8, i32> = PersistentLinkedMap::new(Mode::Multiway);
        let mut versions = vec![map.clone()];
        for operation in &operations {
            map = apply(&map, operation);
            versions.push(map.clone());
        }

        for version in &versions {
            let forward: Vec<(u8, i32)> = version.iter().unwrap().collect();
            let mut backward: Vec<(u8, i32)> = version.iter_reversed().unwrap().collect();
            backward.reverse();
            prop_assert_eq!(forward, backward);
        }
    }

    /// Law: keys visible from any version are unique, and their count is
    /// the version's length.
    #[test]
    fn prop_keys_are_unique(
        operations in prop::collection::vec(arbitrary_operation(), 0..25)
    ) {
        let mut map: PersistentLinkedMap<u8, i32> = PersistentLinkedMap::new(Mode::Multiway);
        for operation in &operations {
            map = apply(&map, operation);
        }

        let keys = map.keys().unwrap();
        prop_assert_eq!(keys.len(), map.len().unwrap());
        let mut deduplicated = keys.clone();
        deduplicated.sort_unstable();
        deduplicated.dedup();
        prop_assert_eq!(deduplicated.len(), keys.len());
    }
}

// =============================================================================
// Branch Isolation Laws
// =============================================================================

proptest! {
    /// Law: two branches forked from one base never observe each other's
    /// writes, and the base observes neither.
    #[test]
    fn prop_multiway_branches_are_isolated(
        base_operations in prop::collection::vec(arbitrary_operation(), 0..15),
        left_operations in prop::collection::vec(arbitrary_operation(), 1..15),
        right_operations in prop::collection::vec(arbitrary_operation(), 1..15)
    ) {
        let mut base_model = Model::default();
        let mut base: PersistentLinkedMap<u8, i32> = PersistentLinkedMap::new(Mode::Multiway);
        for operation in &base_operations {
            base = apply(&base, operation);
            base_model.apply(operation);
        }

        let mut left = base.clone();
        let mut left_model = base_model.clone();
        for operation in &left_operations {
            left = apply(&left, operation);
            left_model.apply(operation);
        }

        let mut right = base.clone();
        let mut right_model = base_model.clone();
        for operation in &right_operations {
            right = apply(&right, operation);
            right_model.apply(operation);
        }

        prop_assert_eq!(base.keys_values().unwrap(), base_model.entries);
        prop_assert_eq!(left.keys_values().unwrap(), left_model.entries);
        prop_assert_eq!(right.keys_values().unwrap(), right_model.entries);
    }

    /// Law: no-op mutations return the same logical version.
    #[test]
    fn prop_noop_mutations_return_receiver(
        operations in prop::collection::vec(arbitrary_operation(), 0..15),
        key in 0..12u8
    ) {
        let mut map: PersistentLinkedMap<u8, i32> = PersistentLinkedMap::new(Mode::Multiway);
        for operation in &operations {
            map = apply(&map, operation);
        }

        if let Some(value) = map.get(&key).unwrap() {
            prop_assert!(map.set(key, value).unwrap().same_version(&map));
            prop_assert!(map.replace(&key, key, value).unwrap().same_version(&map));
        } else {
            prop_assert!(map.unset(&key).unwrap().same_version(&map));
            prop_assert!(map.replace(&key, key, 0).unwrap().same_version(&map));
        }
        if map.is_empty().unwrap() {
            prop_assert!(map.empty().unwrap().same_version(&map));
        }
    }
}
