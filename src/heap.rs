//! The shared heap index.
//!
//! One heap index is created per root map and shared by reference across
//! every version forked from that root. It answers "which node is current
//! for this key, seen from this version?": each key maps to an append-only
//! stack of `(Tag, node)` entries, scanned newest-first until the viewing
//! map's visibility predicate hits. In lightweight mode the stack collapses
//! to a single overwritable slot.
//!
//! The index is monotonic in single/multiway modes: entries are only ever
//! added, so ancestor views keep resolving exactly as they did when they
//! were created.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use crate::mode::{Mode, Tag, VersionPath};
use crate::node::NodeRef;

/// Per-key storage: a version-tagged stack, or a flat slot in lightweight
/// mode.
enum Slot<K, V> {
    Layered(Vec<(Tag, NodeRef<K, V>)>),
    Flat(NodeRef<K, V>),
}

/// Process-internal store mapping keys to version-tagged nodes; shared via
/// `Rc` by all descendants of one root.
pub(crate) struct HeapIndex<K, V> {
    slots: RefCell<HashMap<K, Slot<K, V>>>,
}

impl<K, V> HeapIndex<K, V>
where
    K: Clone + Eq + Hash,
{
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new(HashMap::new()),
        })
    }

    /// Records `node` as the newest entry for `key` under `tag`.
    ///
    /// Single/multiway append to the key's stack; lightweight overwrites
    /// the slot, which is safe because the predecessor map is unusable by
    /// contract.
    pub(crate) fn record(&self, mode: Mode, key: K, tag: &Tag, node: NodeRef<K, V>) {
        let mut slots = self.slots.borrow_mut();
        match mode {
            Mode::Single | Mode::Multiway => {
                let slot = slots.entry(key).or_insert_with(|| Slot::Layered(Vec::new()));
                match slot {
                    Slot::Layered(entries) => entries.push((tag.clone(), node)),
                    Slot::Flat(_) => *slot = Slot::Flat(node),
                }
            }
            Mode::Lightweight => {
                slots.insert(key, Slot::Flat(node));
            }
        }
    }

    /// Resolves the node current for `key` as seen from `(depth, version)`.
    ///
    /// Returns `None` when no entry is visible or when the newest visible
    /// entry is a tombstone.
    pub(crate) fn resolve(
        &self,
        mode: Mode,
        depth: u64,
        version: &VersionPath,
        key: &K,
    ) -> Option<NodeRef<K, V>> {
        let slots = self.slots.borrow();
        let node = match slots.get(key)? {
            Slot::Layered(entries) => entries
                .iter()
                .rev()
                .find(|(tag, _)| tag.visible_from(mode, depth, version))
                .map(|(_, node)| Rc::clone(node))?,
            Slot::Flat(node) => Rc::clone(node),
        };
        if node.orphan {
            None
        } else {
            Some(node)
        }
    }
}
