//! Operating modes and version-visibility machinery.
//!
//! Every mutation of a persistent map forks a child version. The three
//! operating modes trade branching freedom against lookup cost:
//!
//! - [`Mode::Single`]: at most one mutation per version, one linear branch
//!   of history; visibility is a depth comparison.
//! - [`Mode::Multiway`]: arbitrary branching; visibility is an ancestry
//!   test on version paths.
//! - [`Mode::Lightweight`]: at most one mutation, after which the
//!   predecessor is unusable; shared state is overwritten in place and no
//!   visibility test is needed.
//!
//! A version path is a vector of child indices (the root is the empty
//! path); ancestry is the slice-prefix relation, so no separator character
//! can ever collide with key material.

use smallvec::SmallVec;

/// Operating mode of a persistent map, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// One mutation per version; one linear branch of history.
    Single,
    /// Arbitrary branching of history.
    #[default]
    Multiway,
    /// One mutation per version; the predecessor becomes unusable.
    Lightweight,
}

/// A path in the branching history: the child indices walked from the root.
pub(crate) type VersionPath = SmallVec<[u32; 8]>;

/// Returns `true` if `ancestor` is a prefix of `descendant` (inclusive).
#[inline]
pub(crate) fn is_ancestor_path(ancestor: &VersionPath, descendant: &VersionPath) -> bool {
    ancestor.len() <= descendant.len() && descendant[..ancestor.len()] == ancestor[..]
}

/// The `(depth, version)` coordinates a node entry was written under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tag {
    pub(crate) depth: u64,
    pub(crate) version: VersionPath,
}

impl Tag {
    /// Returns `true` if an entry written under this tag is visible from a
    /// viewer at `(depth, version)` in the given mode.
    pub(crate) fn visible_from(&self, mode: Mode, depth: u64, version: &VersionPath) -> bool {
        match mode {
            Mode::Single => self.depth <= depth,
            Mode::Multiway => is_ancestor_path(&self.version, version),
            // Lightweight state is overwritten in place; whatever is stored
            // is current by contract.
            Mode::Lightweight => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_default_mode_is_multiway() {
        assert_eq!(Mode::default(), Mode::Multiway);
    }

    #[test]
    fn test_root_path_is_ancestor_of_everything() {
        let root: VersionPath = SmallVec::new();
        let deep: VersionPath = smallvec![1, 3, 2];
        assert!(is_ancestor_path(&root, &deep));
        assert!(is_ancestor_path(&root, &root));
    }

    #[test]
    fn test_prefix_relation_defines_ancestry() {
        let parent: VersionPath = smallvec![1, 2];
        let child: VersionPath = smallvec![1, 2, 1];
        let sibling: VersionPath = smallvec![1, 3];

        assert!(is_ancestor_path(&parent, &child));
        assert!(!is_ancestor_path(&child, &parent));
        assert!(!is_ancestor_path(&sibling, &child));
        assert!(!is_ancestor_path(&parent, &sibling));
    }

    #[test]
    fn test_single_mode_visibility_is_depth_bounded() {
        let tag = Tag { depth: 3, version: SmallVec::new() };
        let version: VersionPath = SmallVec::new();

        assert!(tag.visible_from(Mode::Single, 3, &version));
        assert!(tag.visible_from(Mode::Single, 5, &version));
        assert!(!tag.visible_from(Mode::Single, 2, &version));
    }

    #[test]
    fn test_multiway_visibility_follows_lineage() {
        let tag = Tag { depth: 2, version: smallvec![1] };
        let own_branch: VersionPath = smallvec![1, 4];
        let other_branch: VersionPath = smallvec![2, 4];

        assert!(tag.visible_from(Mode::Multiway, 5, &own_branch));
        assert!(!tag.visible_from(Mode::Multiway, 5, &other_branch));
    }
}
