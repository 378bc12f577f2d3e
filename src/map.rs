//! Persistent (immutable) insertion-ordered map.
//!
//! This module provides [`PersistentLinkedMap`], an immutable map that
//! preserves insertion order and uses version-tagged structural sharing:
//! every mutation returns a new logical map while unchanged ordering links
//! are shared with the ancestors.
//!
//! # Overview
//!
//! - O(1) keyed lookup through the shared heap index
//! - O(1) amortized insertion, replacement and removal (plus the fork)
//! - O(n) ordered traversal, forward and reverse
//! - Ranged access around any key
//!
//! Mutations never copy the surviving chain. A mutation forks a child
//! version that inherits the ancestor's endpoints and shared heap index,
//! then installs only the nodes it actually changes, tagged with the
//! child's `(depth, version)` coordinates. Reads resolve "which node is
//! current for this key?" with the reading map's own coordinates, so
//! sibling versions never observe each other's writes.
//!
//! # Operating Modes
//!
//! | Mode | History | After the first effectful mutation |
//! |------|---------|------------------------------------|
//! | [`Mode::Single`] | one linear branch | further mutations of the old version error |
//! | [`Mode::Multiway`] | arbitrary branching | everything stays usable |
//! | [`Mode::Lightweight`] | none | every operation on the old version errors |
//!
//! # Examples
//!
//! ```rust
//! use lomap::{Mode, PersistentLinkedMap};
//!
//! let map = PersistentLinkedMap::from_entries(
//!     vec![(1, "one"), (2, "two")],
//!     Mode::Multiway,
//! );
//!
//! let grown = map.set(3, "three").unwrap();
//! assert_eq!(grown.keys().unwrap(), vec![1, 2, 3]);
//!
//! // Structural sharing: the original map is preserved
//! assert_eq!(map.keys().unwrap(), vec![1, 2]);
//! assert_eq!(map.get(&3).unwrap(), None);
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::iter::FromIterator;
use std::ops::ControlFlow;
use std::rc::Rc;

use crate::change::Change;
use crate::error::{MapError, ReduceEmptyNoInitialValueError};
use crate::heap::HeapIndex;
use crate::linked::LinkedOrderedMap;
use crate::mode::{Mode, Tag, VersionPath};
use crate::node::{bind, Direction, Node, NodeRef};

/// The per-version state behind a map handle.
///
/// Handles share cores: cloning a [`PersistentLinkedMap`] clones the `Rc`,
/// so the mode gate and the multiway child counter are per version, not per
/// handle. The engine mutates `head`/`tail`/`length` only between forking a
/// core and handing it to the caller (and during lazy materialization,
/// which happens before the first observation by contract).
struct VersionCore<K, V> {
    heap: Rc<HeapIndex<K, V>>,
    mode: Mode,
    depth: u64,
    version: VersionPath,
    head: RefCell<Option<NodeRef<K, V>>>,
    tail: RefCell<Option<NodeRef<K, V>>>,
    length: Cell<usize>,
    ancestor: Option<PersistentLinkedMap<K, V>>,
    change: RefCell<Option<Change<K, V>>>,
    /// Armed when a mutation of this version produced a different map.
    mutated: Cell<bool>,
    /// Multiway child counter; allocates version-path extensions.
    children: Cell<u32>,
    /// Deferred initial entries of a lazily built map.
    pending: RefCell<Option<Vec<(K, V)>>>,
}

impl<K, V> VersionCore<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    fn tag(&self) -> Tag {
        Tag {
            depth: self.depth,
            version: self.version.clone(),
        }
    }

    fn resolve(&self, key: &K) -> Option<NodeRef<K, V>> {
        self.heap.resolve(self.mode, self.depth, &self.version, key)
    }

    /// Resolves the neighbor of `from` as seen from this version.
    ///
    /// The version's own endpoints terminate the walk: the head has no
    /// previous and the tail has no next, whatever older link entries say.
    fn find_neighbor(&self, from: &NodeRef<K, V>, direction: Direction) -> Option<NodeRef<K, V>> {
        let at_endpoint = match direction {
            Direction::Previous => self.is_head(from),
            Direction::Next => self.is_tail(from),
        };
        if at_endpoint {
            return None;
        }
        from.neighbor(direction, self.mode, self.depth, &self.version)
    }

    fn is_head(&self, node: &NodeRef<K, V>) -> bool {
        self.head
            .borrow()
            .as_ref()
            .is_some_and(|head| Rc::ptr_eq(head, node))
    }

    fn is_tail(&self, node: &NodeRef<K, V>) -> bool {
        self.tail
            .borrow()
            .as_ref()
            .is_some_and(|tail| Rc::ptr_eq(tail, node))
    }

    fn set_head(&self, node: Option<NodeRef<K, V>>) {
        *self.head.borrow_mut() = node;
    }

    fn set_tail(&self, node: Option<NodeRef<K, V>>) {
        *self.tail.borrow_mut() = node;
    }

    /// Installs `replacement` in the chain position of `old`: binds it to
    /// both surviving neighbors and takes over the endpoints `old` held.
    fn swap_in_place(&self, tag: &Tag, old: &NodeRef<K, V>, replacement: &NodeRef<K, V>) {
        let previous = self.find_neighbor(old, Direction::Previous);
        let next = self.find_neighbor(old, Direction::Next);
        if let Some(previous) = &previous {
            bind(tag, previous, replacement);
        }
        if let Some(next) = &next {
            bind(tag, replacement, next);
        }
        if self.is_head(old) {
            self.set_head(Some(Rc::clone(replacement)));
        }
        if self.is_tail(old) {
            self.set_tail(Some(Rc::clone(replacement)));
        }
    }

    /// Removes `node`'s position from the chain, repairing the neighbors
    /// around it (head, tail, interior and sole-element cases).
    fn drop_position(&self, tag: &Tag, node: &NodeRef<K, V>) {
        let previous = self.find_neighbor(node, Direction::Previous);
        let next = self.find_neighbor(node, Direction::Next);
        match (previous, next) {
            (None, None) => {
                self.set_head(None);
                self.set_tail(None);
            }
            (None, Some(next)) => self.set_head(Some(next)),
            (Some(previous), None) => self.set_tail(Some(previous)),
            (Some(previous), Some(next)) => bind(tag, &previous, &next),
        }
    }

    /// Applies a batch of entries to this core, recording every new node
    /// under this core's tag.
    ///
    /// The batch is walked in reverse index order so that the first (lowest
    /// index) occurrence of a duplicated key wins the value. Missing keys
    /// are collected into an append chain stitched behind the old tail (or
    /// spliced at the head under `prepend_missing`); present keys with a
    /// changed value are replaced in place.
    ///
    /// Returns the touched keys, each classified as previously present
    /// (`true`, an update) or previously absent (`false`, an insert).
    fn write_entries(
        &self,
        entries: Vec<(K, V)>,
        prepend_missing: bool,
    ) -> LinkedOrderedMap<K, bool> {
        let tag = self.tag();
        let mode = self.mode;
        let mut touched: LinkedOrderedMap<K, bool> = LinkedOrderedMap::new();
        // Append chain, built front-first during the reverse walk.
        let mut chain_front: Option<NodeRef<K, V>> = None;
        let mut chain_tail: Option<NodeRef<K, V>> = None;

        for (key, value) in entries.into_iter().rev() {
            let first_touch = !touched.contains_key(&key);
            match self.resolve(&key) {
                Some(existing) if existing.value == value => {
                    // Present with an equal value: contributes nothing.
                }
                Some(existing) => {
                    let node = Node::new(key.clone(), value, mode);
                    self.heap.record(mode, key.clone(), &tag, Rc::clone(&node));
                    self.swap_in_place(&tag, &existing, &node);
                    if chain_front
                        .as_ref()
                        .is_some_and(|front| Rc::ptr_eq(front, &existing))
                    {
                        chain_front = Some(Rc::clone(&node));
                    }
                    if chain_tail
                        .as_ref()
                        .is_some_and(|last| Rc::ptr_eq(last, &existing))
                    {
                        chain_tail = Some(Rc::clone(&node));
                    }
                    if first_touch {
                        touched.set(key, true, false);
                    }
                }
                None => {
                    let node = Node::new(key.clone(), value, mode);
                    self.heap.record(mode, key.clone(), &tag, Rc::clone(&node));
                    if prepend_missing {
                        let old_head = self.head.borrow().clone();
                        match old_head {
                            Some(old_head) => bind(&tag, &node, &old_head),
                            None => self.set_tail(Some(Rc::clone(&node))),
                        }
                        self.set_head(Some(Rc::clone(&node)));
                    } else {
                        match &chain_front {
                            Some(front) => bind(&tag, &node, front),
                            None => chain_tail = Some(Rc::clone(&node)),
                        }
                        chain_front = Some(Rc::clone(&node));
                    }
                    self.length.set(self.length.get() + 1);
                    if first_touch {
                        touched.set(key, false, false);
                    }
                }
            }
        }

        // Stitch the append chain behind the old tail.
        if let Some(front) = chain_front {
            let old_tail = self.tail.borrow().clone();
            match old_tail {
                Some(old_tail) => bind(&tag, &old_tail, &front),
                None => self.set_head(Some(front)),
            }
            self.set_tail(chain_tail);
        }

        touched
    }
}

/// A persistent (immutable) insertion-ordered map.
///
/// Every mutation (`set`, `replace`, `unset`, `empty`) returns a new
/// logical map sharing unchanged structure with its ancestors; the
/// receiver stays observable according to its [`Mode`]. Mutations whose
/// semantic effect is nil return the receiver itself (same version).
///
/// # Time Complexity
///
/// | Operation       | Complexity        |
/// |-----------------|-------------------|
/// | `get`           | O(h) ¹            |
/// | `set`           | O(h) per entry    |
/// | `unset`         | O(h)              |
/// | `replace`       | O(h)              |
/// | `first`/`last`  | O(1)              |
/// | `len`           | O(1)              |
/// | `iter`          | O(n · h)          |
///
/// ¹ `h` is the number of writes recorded for the key since the root;
/// lookups scan newest-first, so a map reading its own writes resolves in
/// one step.
///
/// # Examples
///
/// ```rust
/// use lomap::{Mode, PersistentLinkedMap};
///
/// let map = PersistentLinkedMap::new(Mode::Multiway)
///     .set(1, "one")
///     .unwrap()
///     .set(2, "two")
///     .unwrap();
///
/// assert_eq!(map.get(&1).unwrap(), Some("one"));
/// assert_eq!(map.first().unwrap(), Some((1, "one")));
/// assert_eq!(map.last().unwrap(), Some((2, "two")));
/// ```
pub struct PersistentLinkedMap<K, V> {
    core: Rc<VersionCore<K, V>>,
}

impl<K, V> Clone for PersistentLinkedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<K, V> PersistentLinkedMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    /// Creates a new empty root map in the given mode.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map: PersistentLinkedMap<i32, String> = PersistentLinkedMap::new(Mode::Single);
    /// assert!(map.is_empty().unwrap());
    /// ```
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            core: Rc::new(VersionCore {
                heap: HeapIndex::new(),
                mode,
                depth: 0,
                version: VersionPath::new(),
                head: RefCell::new(None),
                tail: RefCell::new(None),
                length: Cell::new(0),
                ancestor: None,
                change: RefCell::new(None),
                mutated: Cell::new(false),
                children: Cell::new(0),
                pending: RefCell::new(None),
            }),
        }
    }

    /// Creates a root map populated with `entries`.
    ///
    /// Duplicate keys follow batch semantics: the first occurrence wins the
    /// value, the last occurrence wins the position.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map = PersistentLinkedMap::from_entries(vec![(1, "a"), (2, "b")], Mode::Multiway);
    /// assert_eq!(map.keys().unwrap(), vec![1, 2]);
    /// ```
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (K, V)>, mode: Mode) -> Self {
        let map = Self::new(mode);
        let entries: Vec<(K, V)> = entries.into_iter().collect();
        if !entries.is_empty() {
            map.core.write_entries(entries, false);
        }
        map
    }

    /// Creates a root map whose population is deferred to the first
    /// operation.
    ///
    /// `len` and `is_empty` answer from the batch size without populating;
    /// any other operation materializes the entries first.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map = PersistentLinkedMap::lazy_from_entries(vec![(1, "a")], Mode::Multiway);
    /// assert!(map.is_lazy_pending());
    /// assert_eq!(map.len().unwrap(), 1);
    /// assert!(map.is_lazy_pending());
    ///
    /// assert_eq!(map.get(&1).unwrap(), Some("a"));
    /// assert!(!map.is_lazy_pending());
    /// ```
    #[must_use]
    pub fn lazy_from_entries(entries: Vec<(K, V)>, mode: Mode) -> Self {
        let map = Self::new(mode);
        map.core.length.set(entries.len());
        *map.core.pending.borrow_mut() = Some(entries);
        map
    }

    /// Returns the operating mode fixed at construction.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.core.mode
    }

    /// Returns the map this version was forked from, if any.
    #[must_use]
    pub fn ancestor(&self) -> Option<Self> {
        self.core.ancestor.clone()
    }

    /// Returns the change record attached by the mutation that produced
    /// this map, if any.
    pub fn change(&self) -> Option<Change<K, V>> {
        self.core.change.borrow().clone()
    }

    /// Returns `true` if this map was built lazily and has not been
    /// populated yet.
    #[must_use]
    pub fn is_lazy_pending(&self) -> bool {
        self.core.pending.borrow().is_some()
    }

    /// Returns `true` if `other` is the same logical version as `self`.
    ///
    /// No-op mutations return the receiver, which this probe detects.
    #[must_use]
    pub fn same_version(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    /// Returns the number of entries.
    ///
    /// Lazily built maps answer from the deferred batch size without
    /// populating.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn len(&self) -> Result<usize, MapError> {
        if self.core.mode == Mode::Lightweight && self.core.mutated.get() {
            return Err(MapError::lightweight("len"));
        }
        Ok(self.core.length.get())
    }

    /// Returns `true` if the map holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn is_empty(&self) -> Result<bool, MapError> {
        Ok(self.len()? == 0)
    }

    /// Returns the value stored for `key`, if visible from this version.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn get(&self, key: &K) -> Result<Option<V>, MapError> {
        self.guard("get", false)?;
        Ok(self.core.resolve(key).map(|node| node.value.clone()))
    }

    /// Returns `true` if `key` is visible from this version.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn contains_key(&self, key: &K) -> Result<bool, MapError> {
        self.guard("contains_key", false)?;
        Ok(self.core.resolve(key).is_some())
    }

    /// Returns the first entry in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn first(&self) -> Result<Option<(K, V)>, MapError> {
        self.guard("first", false)?;
        Ok(self
            .core
            .head
            .borrow()
            .as_ref()
            .map(|node| (node.key.clone(), node.value.clone())))
    }

    /// Returns the last entry in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn last(&self) -> Result<Option<(K, V)>, MapError> {
        self.guard("last", false)?;
        Ok(self
            .core
            .tail
            .borrow()
            .as_ref()
            .map(|node| (node.key.clone(), node.value.clone())))
    }

    /// Inserts or updates a single entry, appending missing keys at the
    /// tail.
    ///
    /// Returns the receiver itself when `key` is already stored with an
    /// equal value.
    ///
    /// # Errors
    ///
    /// Returns the mode-gate errors described on [`Mode`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map = PersistentLinkedMap::new(Mode::Multiway);
    /// let grown = map.set(1, "one").unwrap();
    /// assert_eq!(grown.keys().unwrap(), vec![1]);
    ///
    /// // Equal value: the same version comes back
    /// let same = grown.set(1, "one").unwrap();
    /// assert!(same.same_version(&grown));
    /// ```
    pub fn set(&self, key: K, value: V) -> Result<Self, MapError> {
        self.set_entries(vec![(key, value)], false)
    }

    /// Inserts or updates a batch of entries.
    ///
    /// The batch is walked in reverse index order, so when several entries
    /// share a key the first (lowest index) occurrence wins the value.
    /// Missing keys are appended behind the old tail in batch order, or
    /// spliced at the head when `prepend_missing` is `true`; present keys
    /// with a changed value are replaced in place. Entries that change
    /// nothing contribute nothing; a batch with no effect returns the
    /// receiver itself.
    ///
    /// The attached [`Change::Set`] record lists inserted and updated
    /// entries ordered by their final position in the new map.
    ///
    /// # Errors
    ///
    /// Returns the mode-gate errors described on [`Mode`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map = PersistentLinkedMap::from_entries(vec![(1, "a"), (2, "b")], Mode::Multiway);
    /// let prepended = map.set_entries(vec![(0, "z")], true).unwrap();
    /// assert_eq!(prepended.keys().unwrap(), vec![0, 1, 2]);
    /// ```
    pub fn set_entries(
        &self,
        entries: Vec<(K, V)>,
        prepend_missing: bool,
    ) -> Result<Self, MapError> {
        self.guard("set", true)?;
        if entries.is_empty() {
            return Ok(self.clone());
        }
        let effectful = entries.iter().any(|(key, value)| {
            !self
                .core
                .resolve(key)
                .is_some_and(|node| node.value == *value)
        });
        if !effectful {
            return Ok(self.clone());
        }

        let child = self.fork();
        let touched = child.core.write_entries(entries, prepend_missing);

        // Assemble the change record in final-position order.
        let mut inserted = Vec::new();
        let mut updated = Vec::new();
        let mut cursor = child.core.head.borrow().clone();
        while let Some(node) = cursor {
            if let Some(was_present) = touched.get(&node.key) {
                let entry = (node.key.clone(), node.value.clone());
                if *was_present {
                    updated.push(entry);
                } else {
                    inserted.push(entry);
                }
            }
            cursor = child.core.find_neighbor(&node, Direction::Next);
        }
        *child.core.change.borrow_mut() = Some(Change::Set {
            inserted,
            updated,
            prepend_missing,
        });
        self.core.mutated.set(true);
        Ok(child)
    }

    /// Replaces the entry at `old_key` with a `(key, value)` entry.
    ///
    /// Returns the receiver itself when `old_key` is absent, or when
    /// `key == old_key` and the stored value equals `value`. When the key
    /// changes, a tombstone shadows `old_key` for this version and its
    /// descendants; if `key` was already present elsewhere, that position
    /// survives and the `old_key` position is dropped, shrinking the map.
    ///
    /// # Errors
    ///
    /// Returns the mode-gate errors described on [`Mode`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map = PersistentLinkedMap::from_entries(vec![(1, "a"), (2, "b")], Mode::Multiway);
    /// let swapped = map.replace(&1, 9, "x").unwrap();
    /// assert_eq!(swapped.keys().unwrap(), vec![9, 2]);
    /// assert_eq!(swapped.get(&1).unwrap(), None);
    /// ```
    pub fn replace(&self, old_key: &K, key: K, value: V) -> Result<Self, MapError> {
        self.replace_impl(old_key, key, value, false, false)
    }

    /// Replaces the entry at `old_key`, adding the entry when `old_key` is
    /// absent.
    ///
    /// With `old_key` absent: if `key` already exists with a different
    /// value it is replaced in place; if it exists with an equal value the
    /// receiver comes back; otherwise a fresh entry is appended (or
    /// prepended when `prepend_missing` is `true`).
    ///
    /// # Errors
    ///
    /// Returns the mode-gate errors described on [`Mode`].
    pub fn replace_or_insert(
        &self,
        old_key: &K,
        key: K,
        value: V,
        prepend_missing: bool,
    ) -> Result<Self, MapError> {
        self.replace_impl(old_key, key, value, true, prepend_missing)
    }

    fn replace_impl(
        &self,
        old_key: &K,
        key: K,
        value: V,
        add_missing: bool,
        prepend_missing: bool,
    ) -> Result<Self, MapError> {
        self.guard("replace", true)?;
        let Some(old_node) = self.core.resolve(old_key) else {
            if !add_missing {
                return Ok(self.clone());
            }
            return self.replace_missing(old_key, key, value, prepend_missing);
        };

        if key == *old_key && old_node.value == value {
            return Ok(self.clone());
        }
        let key_changed = key != *old_key;
        let existing_elsewhere = if key_changed {
            self.core.resolve(&key)
        } else {
            None
        };

        let child = self.fork();
        let tag = child.core.tag();
        let mode = child.core.mode;
        let replacement = Node::new(key.clone(), value.clone(), mode);
        child
            .core
            .heap
            .record(mode, key.clone(), &tag, Rc::clone(&replacement));
        if key_changed {
            child.core.heap.record(
                mode,
                old_key.clone(),
                &tag,
                Node::tombstone(old_key.clone(), old_node.value.clone(), mode),
            );
        }

        match &existing_elsewhere {
            None => child.core.swap_in_place(&tag, &old_node, &replacement),
            Some(existing) => {
                // The existing position for `key` survives; the old-key
                // position is dropped.
                child.core.swap_in_place(&tag, existing, &replacement);
                child.core.drop_position(&tag, &old_node);
                child.core.length.set(child.core.length.get() - 1);
            }
        }

        *child.core.change.borrow_mut() = Some(Change::Replace {
            old_key: old_key.clone(),
            key,
            value,
            was_inserted: key_changed && existing_elsewhere.is_none(),
            was_updated: !key_changed || existing_elsewhere.is_some(),
            had_existing_node_for_key: existing_elsewhere.is_some(),
            prepend_missing,
        });
        self.core.mutated.set(true);
        Ok(child)
    }

    /// The `add_missing` arm of replace: `old_key` is absent, the item's
    /// own key decides what happens.
    fn replace_missing(
        &self,
        old_key: &K,
        key: K,
        value: V,
        prepend_missing: bool,
    ) -> Result<Self, MapError> {
        match self.core.resolve(&key) {
            Some(existing) if existing.value == value => Ok(self.clone()),
            Some(existing) => {
                let child = self.fork();
                let tag = child.core.tag();
                let mode = child.core.mode;
                let replacement = Node::new(key.clone(), value.clone(), mode);
                child
                    .core
                    .heap
                    .record(mode, key.clone(), &tag, Rc::clone(&replacement));
                child.core.swap_in_place(&tag, &existing, &replacement);
                *child.core.change.borrow_mut() = Some(Change::Replace {
                    old_key: old_key.clone(),
                    key,
                    value,
                    was_inserted: false,
                    was_updated: true,
                    had_existing_node_for_key: true,
                    prepend_missing,
                });
                self.core.mutated.set(true);
                Ok(child)
            }
            None => {
                let child = self.fork();
                let tag = child.core.tag();
                let mode = child.core.mode;
                let node = Node::new(key.clone(), value.clone(), mode);
                child
                    .core
                    .heap
                    .record(mode, key.clone(), &tag, Rc::clone(&node));
                if prepend_missing {
                    let old_head = child.core.head.borrow().clone();
                    match old_head {
                        Some(old_head) => bind(&tag, &node, &old_head),
                        None => child.core.set_tail(Some(Rc::clone(&node))),
                    }
                    child.core.set_head(Some(Rc::clone(&node)));
                } else {
                    let old_tail = child.core.tail.borrow().clone();
                    match old_tail {
                        Some(old_tail) => bind(&tag, &old_tail, &node),
                        None => child.core.set_head(Some(Rc::clone(&node))),
                    }
                    child.core.set_tail(Some(Rc::clone(&node)));
                }
                child.core.length.set(child.core.length.get() + 1);
                *child.core.change.borrow_mut() = Some(Change::Replace {
                    old_key: old_key.clone(),
                    key,
                    value,
                    was_inserted: true,
                    was_updated: false,
                    had_existing_node_for_key: false,
                    prepend_missing,
                });
                self.core.mutated.set(true);
                Ok(child)
            }
        }
    }

    /// Removes the entry stored for `key`.
    ///
    /// Returns the receiver itself when `key` is absent. A tombstone
    /// shadows the key for this version and its descendants while
    /// ancestors keep seeing the entry.
    ///
    /// # Errors
    ///
    /// Returns the mode-gate errors described on [`Mode`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map =
    ///     PersistentLinkedMap::from_entries(vec![(1, "a"), (2, "b"), (3, "c")], Mode::Multiway);
    /// let shrunk = map.unset(&2).unwrap();
    /// assert_eq!(shrunk.keys().unwrap(), vec![1, 3]);
    /// assert_eq!(map.keys().unwrap(), vec![1, 2, 3]);
    /// ```
    pub fn unset(&self, key: &K) -> Result<Self, MapError> {
        self.guard("unset", true)?;
        let Some(node) = self.core.resolve(key) else {
            return Ok(self.clone());
        };

        let child = self.fork();
        let tag = child.core.tag();
        let mode = child.core.mode;
        let value = node.value.clone();
        child.core.heap.record(
            mode,
            key.clone(),
            &tag,
            Node::tombstone(key.clone(), value.clone(), mode),
        );
        child.core.drop_position(&tag, &node);
        child.core.length.set(child.core.length.get() - 1);
        *child.core.change.borrow_mut() = Some(Change::Unset {
            key: key.clone(),
            value,
        });
        self.core.mutated.set(true);
        Ok(child)
    }

    /// Removes a sequence of keys, folding left over the intermediate
    /// versions.
    ///
    /// # Errors
    ///
    /// Returns the mode-gate errors described on [`Mode`].
    pub fn unset_many(&self, keys: impl IntoIterator<Item = K>) -> Result<Self, MapError> {
        let mut current = self.clone();
        for key in keys {
            current = current.unset(&key)?;
        }
        Ok(current)
    }

    /// Produces an empty successor map.
    ///
    /// Returns the receiver itself when already empty. The successor keeps
    /// the mode and the ancestry link but starts a fresh shared store, so
    /// traversal sees nothing.
    ///
    /// # Errors
    ///
    /// Returns the mode-gate errors described on [`Mode`].
    pub fn empty(&self) -> Result<Self, MapError> {
        self.guard("empty", true)?;
        if self.core.length.get() == 0 {
            return Ok(self.clone());
        }
        let child = Self {
            core: Rc::new(VersionCore {
                heap: HeapIndex::new(),
                mode: self.core.mode,
                depth: self.core.depth + 1,
                version: self.next_child_version(),
                head: RefCell::new(None),
                tail: RefCell::new(None),
                length: Cell::new(0),
                ancestor: Some(self.clone()),
                change: RefCell::new(Some(Change::Empty)),
                mutated: Cell::new(false),
                children: Cell::new(0),
                pending: RefCell::new(None),
            }),
        };
        self.core.mutated.set(true);
        Ok(child)
    }

    /// Returns an iterator over entries in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn iter(&self) -> Result<PersistentLinkedMapIterator<'_, K, V>, MapError> {
        self.guard("iter", false)?;
        Ok(PersistentLinkedMapIterator {
            core: &self.core,
            cursor: self.core.head.borrow().clone(),
            remaining: self.core.length.get(),
            direction: Direction::Next,
        })
    }

    /// Returns an iterator over entries in reverse insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn iter_reversed(&self) -> Result<PersistentLinkedMapIterator<'_, K, V>, MapError> {
        self.guard("iter", false)?;
        Ok(PersistentLinkedMapIterator {
            core: &self.core,
            cursor: self.core.tail.borrow().clone(),
            remaining: self.core.length.get(),
            direction: Direction::Previous,
        })
    }

    /// Returns the keys in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn keys(&self) -> Result<Vec<K>, MapError> {
        Ok(self.iter()?.map(|(key, _)| key).collect())
    }

    /// Returns the values in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn values(&self) -> Result<Vec<V>, MapError> {
        Ok(self.iter()?.map(|(_, value)| value).collect())
    }

    /// Returns the `(key, value)` entries in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn keys_values(&self) -> Result<Vec<(K, V)>, MapError> {
        Ok(self.iter()?.collect())
    }

    /// Visits entries in insertion order until `action` breaks.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::ops::ControlFlow;
    ///
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map =
    ///     PersistentLinkedMap::from_entries(vec![(1, "a"), (2, "b"), (3, "c")], Mode::Multiway);
    /// let mut seen = Vec::new();
    /// map.for_each(|key, _| {
    ///     seen.push(*key);
    ///     if *key == 2 {
    ///         ControlFlow::Break(())
    ///     } else {
    ///         ControlFlow::Continue(())
    ///     }
    /// })
    /// .unwrap();
    /// assert_eq!(seen, vec![1, 2]);
    /// ```
    pub fn for_each<F>(&self, action: F) -> Result<(), MapError>
    where
        F: FnMut(&K, &V) -> ControlFlow<()>,
    {
        self.guard("for_each", false)?;
        self.walk(Direction::Next, action);
        Ok(())
    }

    /// Visits entries in reverse insertion order until `action` breaks.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn for_each_reversed<F>(&self, action: F) -> Result<(), MapError>
    where
        F: FnMut(&K, &V) -> ControlFlow<()>,
    {
        self.guard("for_each", false)?;
        self.walk(Direction::Previous, action);
        Ok(())
    }

    /// Applies `transform` to every entry in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn map<U, F>(&self, mut transform: F) -> Result<Vec<U>, MapError>
    where
        F: FnMut(&K, &V) -> U,
    {
        self.guard("map", false)?;
        let mut collected = Vec::with_capacity(self.core.length.get());
        self.walk(Direction::Next, |key, value| {
            collected.push(transform(key, value));
            ControlFlow::Continue(())
        });
        Ok(collected)
    }

    /// Returns the entries satisfying `predicate`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn filter<F>(&self, mut predicate: F) -> Result<Vec<(K, V)>, MapError>
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.guard("filter", false)?;
        let mut collected = Vec::new();
        self.walk(Direction::Next, |key, value| {
            if predicate(key, value) {
                collected.push((key.clone(), value.clone()));
            }
            ControlFlow::Continue(())
        });
        Ok(collected)
    }

    /// Returns `true` if every entry satisfies `predicate` (vacuously true
    /// on an empty map).
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn every<F>(&self, mut predicate: F) -> Result<bool, MapError>
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.guard("every", false)?;
        let mut holds = true;
        self.walk(Direction::Next, |key, value| {
            if predicate(key, value) {
                ControlFlow::Continue(())
            } else {
                holds = false;
                ControlFlow::Break(())
            }
        });
        Ok(holds)
    }

    /// Returns `true` if at least one entry satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn some<F>(&self, mut predicate: F) -> Result<bool, MapError>
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.guard("some", false)?;
        let mut holds = false;
        self.walk(Direction::Next, |key, value| {
            if predicate(key, value) {
                holds = true;
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        Ok(holds)
    }

    /// Folds the entries in insertion order onto `initial`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    pub fn fold<A, F>(&self, initial: A, mut combine: F) -> Result<A, MapError>
    where
        F: FnMut(A, &K, &V) -> A,
    {
        self.guard("fold", false)?;
        let mut accumulator = initial;
        for (key, value) in self.iter()? {
            accumulator = combine(accumulator, &key, &value);
        }
        Ok(accumulator)
    }

    /// Folds the entries without a seed: the first value becomes the
    /// accumulator and `combine` runs from the second entry on.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::ReduceEmptyNoInitialValue`] on an empty map, and
    /// the lightweight gate error on a consumed map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map = PersistentLinkedMap::from_entries(
    ///     vec![("a", 1), ("b", 2), ("c", 3)],
    ///     Mode::Multiway,
    /// );
    /// let total = map.reduce(|accumulator, _, value| accumulator + value).unwrap();
    /// assert_eq!(total, 6);
    /// ```
    pub fn reduce<F>(&self, mut combine: F) -> Result<V, MapError>
    where
        F: FnMut(V, &K, &V) -> V,
    {
        self.guard("reduce", false)?;
        let mut entries = self.iter()?;
        let Some((_, first)) = entries.next() else {
            return Err(MapError::ReduceEmptyNoInitialValue(
                ReduceEmptyNoInitialValueError,
            ));
        };
        let mut accumulator = first;
        for (key, value) in entries {
            accumulator = combine(accumulator, &key, &value);
        }
        Ok(accumulator)
    }

    /// Collects up to `limit` entries ending at `key`, walking backwards,
    /// returned in forward order.
    ///
    /// The entry at `key` itself is included when `inclusive` is `true`.
    /// Returns an empty vector when `key` is absent or `limit` is zero.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map = PersistentLinkedMap::from_entries(
    ///     (1..=5).map(|index| (index, index * 10)),
    ///     Mode::Multiway,
    /// );
    /// assert_eq!(map.range_before(&4, 2, true).unwrap(), vec![(3, 30), (4, 40)]);
    /// ```
    pub fn range_before(
        &self,
        key: &K,
        limit: usize,
        inclusive: bool,
    ) -> Result<Vec<(K, V)>, MapError> {
        self.guard("range_before", false)?;
        let mut collected = self.range_from(key, limit, inclusive, Direction::Previous);
        collected.reverse();
        Ok(collected)
    }

    /// Collects up to `limit` entries starting at `key`, walking forwards.
    ///
    /// The entry at `key` itself is included when `inclusive` is `true`.
    /// Returns an empty vector when `key` is absent or `limit` is zero.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
    /// lightweight-mode map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lomap::{Mode, PersistentLinkedMap};
    ///
    /// let map = PersistentLinkedMap::from_entries(
    ///     (1..=5).map(|index| (index, index * 10)),
    ///     Mode::Multiway,
    /// );
    /// assert_eq!(map.range_after(&2, 2, false).unwrap(), vec![(3, 30), (4, 40)]);
    /// ```
    pub fn range_after(
        &self,
        key: &K,
        limit: usize,
        inclusive: bool,
    ) -> Result<Vec<(K, V)>, MapError> {
        self.guard("range_after", false)?;
        Ok(self.range_from(key, limit, inclusive, Direction::Next))
    }

    fn range_from(
        &self,
        key: &K,
        limit: usize,
        inclusive: bool,
        direction: Direction,
    ) -> Vec<(K, V)> {
        let Some(start) = self.core.resolve(key) else {
            return Vec::new();
        };
        if limit == 0 {
            return Vec::new();
        }
        let mut collected = Vec::new();
        let mut cursor = if inclusive {
            Some(start)
        } else {
            self.core.find_neighbor(&start, direction)
        };
        while let Some(node) = cursor {
            collected.push((node.key.clone(), node.value.clone()));
            if collected.len() == limit {
                break;
            }
            cursor = self.core.find_neighbor(&node, direction);
        }
        collected
    }

    /// Checks the mode gate and materializes deferred entries.
    ///
    /// Gate checks run before any fork, so a refused operation leaves no
    /// partial state behind.
    fn guard(&self, operation: &'static str, is_mutation: bool) -> Result<(), MapError> {
        match self.core.mode {
            Mode::Lightweight if self.core.mutated.get() => {
                return Err(MapError::lightweight(operation));
            }
            Mode::Single if is_mutation && self.core.mutated.get() => {
                return Err(MapError::single_mode(operation));
            }
            _ => {}
        }
        self.materialize();
        Ok(())
    }

    fn materialize(&self) {
        let pending = self.core.pending.borrow_mut().take();
        if let Some(entries) = pending {
            // The pre-set length counted the raw batch; the walk recounts.
            self.core.length.set(0);
            if !entries.is_empty() {
                self.core.write_entries(entries, false);
            }
        }
    }

    fn fork(&self) -> Self {
        Self {
            core: Rc::new(VersionCore {
                heap: Rc::clone(&self.core.heap),
                mode: self.core.mode,
                depth: self.core.depth + 1,
                version: self.next_child_version(),
                head: RefCell::new(self.core.head.borrow().clone()),
                tail: RefCell::new(self.core.tail.borrow().clone()),
                length: Cell::new(self.core.length.get()),
                ancestor: Some(self.clone()),
                change: RefCell::new(None),
                mutated: Cell::new(false),
                children: Cell::new(0),
                pending: RefCell::new(None),
            }),
        }
    }

    fn next_child_version(&self) -> VersionPath {
        match self.core.mode {
            Mode::Multiway => {
                let child_index = self.core.children.get() + 1;
                self.core.children.set(child_index);
                let mut version = self.core.version.clone();
                version.push(child_index);
                version
            }
            Mode::Single | Mode::Lightweight => self.core.version.clone(),
        }
    }

    fn walk<F>(&self, direction: Direction, mut action: F)
    where
        F: FnMut(&K, &V) -> ControlFlow<()>,
    {
        let mut cursor = match direction {
            Direction::Next => self.core.head.borrow().clone(),
            Direction::Previous => self.core.tail.borrow().clone(),
        };
        while let Some(node) = cursor {
            if action(&node.key, &node.value).is_break() {
                return;
            }
            cursor = self.core.find_neighbor(&node, direction);
        }
    }
}

impl<K, V> Default for PersistentLinkedMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

impl<K, V> FromIterator<(K, V)> for PersistentLinkedMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_entries(iter, Mode::default())
    }
}

impl<K, V> fmt::Debug for PersistentLinkedMap<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug,
    V: Clone + PartialEq + fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.iter() {
            Ok(entries) => formatter.debug_map().entries(entries).finish(),
            Err(_) => formatter.write_str("PersistentLinkedMap(<consumed>)"),
        }
    }
}

impl<K, V> PartialEq for PersistentLinkedMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    /// Two maps are equal when their ordered entries are equal. A consumed
    /// lightweight-mode map compares unequal to everything.
    fn eq(&self, other: &Self) -> bool {
        let (Ok(left), Ok(right)) = (self.iter(), other.iter()) else {
            return false;
        };
        if self.core.length.get() != other.core.length.get() {
            return false;
        }
        left.zip(right).all(|(mine, theirs)| mine == theirs)
    }
}

/// Iterator over the entries of a [`PersistentLinkedMap`], yielding cloned
/// `(key, value)` pairs.
pub struct PersistentLinkedMapIterator<'a, K, V> {
    core: &'a VersionCore<K, V>,
    cursor: Option<NodeRef<K, V>>,
    remaining: usize,
    direction: Direction,
}

impl<K, V> Iterator for PersistentLinkedMapIterator<'_, K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor.take()?;
        self.cursor = self.core.find_neighbor(&node, self.direction);
        self.remaining = self.remaining.saturating_sub(1);
        Some((node.key.clone(), node.value.clone()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for PersistentLinkedMapIterator<'_, K, V>
where
    K: Clone + Eq + Hash,
    V: Clone + PartialEq,
{
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for PersistentLinkedMap<K, V>
where
    K: Clone + Eq + Hash + serde::Serialize,
    V: Clone + PartialEq + serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::Error;
        let entries = self.keys_values().map_err(S::Error::custom)?;
        serializer.collect_seq(entries)
    }
}

#[cfg(feature = "serde")]
struct PersistentLinkedMapVisitor<K, V> {
    key_marker: std::marker::PhantomData<K>,
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<K, V> PersistentLinkedMapVisitor<K, V> {
    const fn new() -> Self {
        Self {
            key_marker: std::marker::PhantomData,
            value_marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for PersistentLinkedMapVisitor<K, V>
where
    K: Clone + Eq + Hash + serde::Deserialize<'de>,
    V: Clone + PartialEq + serde::Deserialize<'de>,
{
    type Value = PersistentLinkedMap<K, V>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a sequence of key-value pairs")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut entries: Vec<(K, V)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(entry) = access.next_element()? {
            entries.push(entry);
        }
        Ok(PersistentLinkedMap::from_entries(entries, Mode::default()))
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for PersistentLinkedMap<K, V>
where
    K: Clone + Eq + Hash + serde::Deserialize<'de>,
    V: Clone + PartialEq + serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(PersistentLinkedMapVisitor::new())
    }
}

// =============================================================================
// Tests
// =============================================================================
