//! # lomap
//!
//! A persistent (immutable) insertion-ordered map with version-tagged
//! structural sharing.
//!
//! ## Overview
//!
//! [`PersistentLinkedMap`] preserves insertion order and answers keyed
//! lookups in O(1); every mutation returns a new logical map that shares
//! its unchanged ordering links with the ancestors. Three operating modes
//! trade branching freedom against lookup cost:
//!
//! - [`Mode::Single`]: at most one mutation per version, giving one
//!   linear branch of history.
//! - [`Mode::Multiway`]: arbitrary branching of history (the default).
//! - [`Mode::Lightweight`]: at most one mutation, after which the
//!   predecessor becomes unusable; no history at all.
//!
//! The crate also exports [`LinkedOrderedMap`], the mutable ordered-link
//! primitive the engine builds on.
//!
//! ## Feature Flags
//!
//! - `serde`: `Serialize`/`Deserialize` for [`PersistentLinkedMap`]
//! - `json`: the item layer and JSON blob codec
//!   (`ItemMapFactory`, `to_json`, `from_json`); implies `serde`
//! - `full`: enable all features
//!
//! ## Example
//!
//! ```rust
//! use lomap::{Mode, PersistentLinkedMap};
//!
//! let map = PersistentLinkedMap::from_entries(
//!     vec![(1, "one"), (2, "two")],
//!     Mode::Multiway,
//! );
//!
//! // Mutations fork; the original stays intact
//! let left = map.set(3, "three").unwrap();
//! let right = map.unset(&1).unwrap();
//!
//! assert_eq!(map.keys().unwrap(), vec![1, 2]);
//! assert_eq!(left.keys().unwrap(), vec![1, 2, 3]);
//! assert_eq!(right.keys().unwrap(), vec![2]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod change;
mod error;
mod heap;
mod linked;
mod map;
mod mode;
mod node;

#[cfg(feature = "json")]
mod item;
#[cfg(feature = "json")]
mod json;

pub use change::Change;
pub use error::LightweightModePostMutationUseError;
pub use error::LinkedOrderedMapUnknownKeyError;
pub use error::MapError;
pub use error::ReduceEmptyNoInitialValueError;
pub use error::SingleModeMutationAlreadyOccurredError;
pub use linked::LinkedOrderedMap;
pub use linked::LinkedOrderedMapIterator;
pub use map::PersistentLinkedMap;
pub use map::PersistentLinkedMapIterator;
pub use mode::Mode;

#[cfg(feature = "json")]
pub use item::ItemMapFactory;
#[cfg(feature = "json")]
pub use item::MapKey;
#[cfg(feature = "json")]
pub use item::DEFAULT_KEY_PROP_NAME;
#[cfg(feature = "json")]
pub use json::from_json;
#[cfg(feature = "json")]
pub use json::to_json;
#[cfg(feature = "json")]
pub use json::FromJsonError;
