//! Change records describing the last mutation of a map version.
//!
//! Every mutation that produces a new map attaches one [`Change`] to the
//! result; a map that was never produced by a mutation carries none. The
//! record is never modified after attachment.

/// Description of the mutation that produced a map version.
///
/// # Examples
///
/// ```rust
/// use lomap::{Change, Mode, PersistentLinkedMap};
///
/// let map = PersistentLinkedMap::new(Mode::Multiway);
/// let grown = map.set(1, "one").unwrap();
///
/// match grown.change() {
///     Some(Change::Set { inserted, .. }) => assert_eq!(inserted, vec![(1, "one")]),
///     other => panic!("unexpected change record: {other:?}"),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<K, V> {
    /// One or more entries were inserted and/or updated.
    Set {
        /// Newly inserted entries, ordered by final position in the map.
        inserted: Vec<(K, V)>,
        /// Entries whose value changed, ordered by final position in the map.
        updated: Vec<(K, V)>,
        /// Whether missing keys were spliced at the head instead of the tail.
        prepend_missing: bool,
    },
    /// An entry was replaced, possibly under a new key.
    Replace {
        /// The key whose position was targeted.
        old_key: K,
        /// The key of the replacement entry.
        key: K,
        /// The value of the replacement entry.
        value: V,
        /// Whether a node for `key` was added where none was visible before.
        was_inserted: bool,
        /// Whether a previously visible node for `key` had its value changed.
        was_updated: bool,
        /// Whether `key` was already present somewhere else in the map.
        had_existing_node_for_key: bool,
        /// Whether a missing entry would have been spliced at the head.
        prepend_missing: bool,
    },
    /// An entry was removed.
    Unset {
        /// The removed key.
        key: K,
        /// The value the removed entry held.
        value: V,
    },
    /// The map was emptied.
    Empty,
}
