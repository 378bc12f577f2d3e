//! Unit tests for the mutable ordered-link primitive.

use std::ops::ControlFlow;

use lomap::{LinkedOrderedMap, LinkedOrderedMapUnknownKeyError};
use rstest::rstest;

// =============================================================================
// Insertion and Lookup Tests
// =============================================================================

#[rstest]
fn test_set_and_get() {
    let mut map = LinkedOrderedMap::new();
    assert_eq!(map.set(1, "one", false), None);
    assert_eq!(map.get(&1), Some(&"one"));
    assert_eq!(map.get(&2), None);
}

#[rstest]
fn test_insertion_order_is_preserved() {
    let mut map = LinkedOrderedMap::new();
    map.set("c", 3, false);
    map.set("a", 1, false);
    map.set("b", 2, false);

    let keys: Vec<&str> = map.keys().copied().collect();
    assert_eq!(keys, vec!["c", "a", "b"]);
}

#[rstest]
fn test_prepend_overrides_append() {
    let mut map = LinkedOrderedMap::new();
    map.set(1, (), false);
    map.set(2, (), false);
    map.set(0, (), true);

    let keys: Vec<i32> = map.keys().copied().collect();
    assert_eq!(keys, vec![0, 1, 2]);
}

#[rstest]
fn test_overwrite_keeps_position_and_returns_previous() {
    let mut map = LinkedOrderedMap::new();
    map.set(1, "one", false);
    map.set(2, "two", false);

    assert_eq!(map.set(1, "ONE", true), Some("one"));
    let keys: Vec<i32> = map.keys().copied().collect();
    assert_eq!(keys, vec![1, 2]);
}

#[rstest]
fn test_get_mut_updates_value() {
    let mut map = LinkedOrderedMap::new();
    map.set(1, 10, false);
    *map.get_mut(&1).unwrap() += 5;
    assert_eq!(map.get(&1), Some(&15));
}

// =============================================================================
// Removal Tests
// =============================================================================

#[rstest]
fn test_remove_returns_value_and_relinks() {
    let mut map: LinkedOrderedMap<i32, &str> =
        vec![(1, "a"), (2, "b"), (3, "c")].into_iter().collect();

    assert_eq!(map.remove(&2), Ok("b"));
    assert_eq!(map.len(), 2);
    let keys: Vec<i32> = map.keys().copied().collect();
    assert_eq!(keys, vec![1, 3]);
}

#[rstest]
fn test_remove_unknown_key_is_an_invariant_breach() {
    let mut map: LinkedOrderedMap<i32, ()> = LinkedOrderedMap::new();
    assert_eq!(map.remove(&1), Err(LinkedOrderedMapUnknownKeyError));
}

#[rstest]
fn test_remove_all_then_reinsert() {
    let mut map: LinkedOrderedMap<i32, i32> = (0..5).map(|index| (index, index)).collect();
    for key in 0..5 {
        map.remove(&key).unwrap();
    }
    assert!(map.is_empty());

    map.set(9, 9, false);
    let keys: Vec<i32> = map.keys().copied().collect();
    assert_eq!(keys, vec![9]);
}

// =============================================================================
// Traversal Tests
// =============================================================================

#[rstest]
fn test_reverse_iteration() {
    let map: LinkedOrderedMap<i32, i32> = (0..4).map(|index| (index, index)).collect();
    let reversed: Vec<i32> = map.iter_reversed().map(|(key, _)| *key).collect();
    assert_eq!(reversed, vec![3, 2, 1, 0]);
}

#[rstest]
fn test_for_each_aborts_on_break() {
    let map: LinkedOrderedMap<i32, i32> = (0..100).map(|index| (index, index)).collect();
    let mut visited = 0;
    map.for_each(|key, _| {
        visited += 1;
        if *key == 9 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    assert_eq!(visited, 10);
}

#[rstest]
fn test_extend_and_equality() {
    let mut map: LinkedOrderedMap<i32, i32> = LinkedOrderedMap::new();
    map.extend(vec![(1, 10), (2, 20)]);

    let expected: LinkedOrderedMap<i32, i32> = vec![(1, 10), (2, 20)].into_iter().collect();
    assert_eq!(map, expected);
}
