//! Per-element cells of the persistent map.
//!
//! A [`Node`] is immutable except for its neighbor links. In single and
//! multiway modes a link is not a plain pointer but an append-only vector
//! of `(Tag, node)` entries: every bind performed by a descendant map adds
//! an entry under that descendant's coordinates and never rewrites an
//! existing one, so ancestor views stay intact. Lookups scan the vector
//! newest-first and stop at the first entry visible from the viewing map.
//! In lightweight mode the predecessor map is unusable by contract, so
//! links are raw overwritable references.
//!
//! Orphan nodes are tombstones: they are planted in the heap index to
//! shadow a key and never participate in the neighbor chain.
//!
//! Ownership: every created node is recorded in the heap index, which
//! holds the strong handle (as do the endpoint fields of each map
//! version). Neighbor links hold weak handles only, so the mutual
//! previous/next references of adjacent nodes cannot form a cycle.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::mode::{Mode, Tag, VersionPath};

/// Shared handle to a node; a node outlives every map version that can see
/// it because heap slots and version endpoints keep it alive.
pub(crate) type NodeRef<K, V> = Rc<Node<K, V>>;

/// Weak handle stored inside neighbor links.
type WeakNodeRef<K, V> = Weak<Node<K, V>>;

/// Walk direction through the neighbor chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Previous,
    Next,
}

/// A neighbor field: tag-indexed in single/multiway, raw in lightweight.
enum Links<K, V> {
    Layered(RefCell<Vec<(Tag, WeakNodeRef<K, V>)>>),
    Raw(RefCell<Option<WeakNodeRef<K, V>>>),
}

impl<K, V> Links<K, V> {
    fn new(mode: Mode) -> Self {
        match mode {
            Mode::Single | Mode::Multiway => Self::Layered(RefCell::new(Vec::new())),
            Mode::Lightweight => Self::Raw(RefCell::new(None)),
        }
    }

    fn record(&self, tag: &Tag, node: &NodeRef<K, V>) {
        match self {
            Self::Layered(entries) => entries
                .borrow_mut()
                .push((tag.clone(), Rc::downgrade(node))),
            Self::Raw(cell) => *cell.borrow_mut() = Some(Rc::downgrade(node)),
        }
    }

    fn resolve(&self, mode: Mode, depth: u64, version: &VersionPath) -> Option<NodeRef<K, V>> {
        match self {
            Self::Layered(entries) => entries
                .borrow()
                .iter()
                .rev()
                .find(|(tag, _)| tag.visible_from(mode, depth, version))
                .and_then(|(_, node)| node.upgrade()),
            Self::Raw(cell) => cell.borrow().as_ref().and_then(Weak::upgrade),
        }
    }
}

/// One `(key, value)` cell of the ordered chain.
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    /// Tombstone marker; set at creation, never flipped afterwards.
    pub(crate) orphan: bool,
    previous: Links<K, V>,
    next: Links<K, V>,
}

impl<K, V> Node<K, V> {
    /// Creates a live node for the given mode.
    pub(crate) fn new(key: K, value: V, mode: Mode) -> NodeRef<K, V> {
        Rc::new(Self {
            key,
            value,
            orphan: false,
            previous: Links::new(mode),
            next: Links::new(mode),
        })
    }

    /// Creates a tombstone node for the given mode.
    pub(crate) fn tombstone(key: K, value: V, mode: Mode) -> NodeRef<K, V> {
        Rc::new(Self {
            key,
            value,
            orphan: true,
            previous: Links::new(mode),
            next: Links::new(mode),
        })
    }

    fn links(&self, direction: Direction) -> &Links<K, V> {
        match direction {
            Direction::Previous => &self.previous,
            Direction::Next => &self.next,
        }
    }

    /// Resolves the newest neighbor visible from `(depth, version)`.
    ///
    /// Endpoint guards (head going previous, tail going next) belong to the
    /// caller: only the viewing map knows its own endpoints. Orphans are
    /// filtered at heap-lookup call sites, never here.
    pub(crate) fn neighbor(
        &self,
        direction: Direction,
        mode: Mode,
        depth: u64,
        version: &VersionPath,
    ) -> Option<NodeRef<K, V>> {
        self.links(direction).resolve(mode, depth, version)
    }
}

/// Records a neighbor relationship between two nodes under `tag`.
///
/// This is the only mutation ever performed on existing nodes: in single
/// and multiway modes it appends to both link vectors, in lightweight mode
/// it overwrites the raw references.
pub(crate) fn bind<K, V>(tag: &Tag, previous: &NodeRef<K, V>, next: &NodeRef<K, V>) {
    previous.next.record(tag, next);
    next.previous.record(tag, previous);
}
