//! Error types for map operations.
//!
//! The taxonomy is small and caller-visible. Mode gates are checked before
//! any fork, so a returned error never leaves partially mutated state
//! behind. Inputs that are merely useless (empty batches, absent keys,
//! malformed items) are absorbed: the operation returns the receiver
//! unchanged instead of failing.

use std::fmt;

/// Represents an error when a single-mode map is mutated a second time.
///
/// A single-mode map permits exactly one effectful mutation. Once a
/// mutation has produced a different map, the original stays readable but
/// every further `set`/`replace`/`unset`/`empty` on it returns this error.
/// No-op mutations do not arm the gate.
///
/// # Examples
///
/// ```rust
/// use lomap::SingleModeMutationAlreadyOccurredError;
///
/// let error = SingleModeMutationAlreadyOccurredError { operation: "set" };
/// assert_eq!(
///     format!("{}", error),
///     "set: single-mode map was already mutated; mutate the newest version instead"
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleModeMutationAlreadyOccurredError {
    /// The name of the operation that was refused.
    pub operation: &'static str,
}

impl fmt::Display for SingleModeMutationAlreadyOccurredError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}: single-mode map was already mutated; mutate the newest version instead",
            self.operation
        )
    }
}

impl std::error::Error for SingleModeMutationAlreadyOccurredError {}

/// Represents an error when a mutated lightweight-mode map is used again.
///
/// A lightweight-mode map is consumed by its first effectful mutation:
/// afterwards every operation on the predecessor, reads included, returns
/// this error. Only the successor map remains usable.
///
/// # Examples
///
/// ```rust
/// use lomap::LightweightModePostMutationUseError;
///
/// let error = LightweightModePostMutationUseError { operation: "get" };
/// assert_eq!(
///     format!("{}", error),
///     "get: lightweight-mode map was consumed by a mutation; use the successor map"
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightweightModePostMutationUseError {
    /// The name of the operation that was refused.
    pub operation: &'static str,
}

impl fmt::Display for LightweightModePostMutationUseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}: lightweight-mode map was consumed by a mutation; use the successor map",
            self.operation
        )
    }
}

impl std::error::Error for LightweightModePostMutationUseError {}

/// Represents an error when `reduce` is called on an empty map without a
/// seed value.
///
/// The unseeded `reduce` uses the first element as the accumulator, so an
/// empty map has nothing to start from. Use `fold` with an explicit initial
/// accumulator instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReduceEmptyNoInitialValueError;

impl fmt::Display for ReduceEmptyNoInitialValueError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("reduce of an empty map with no initial value")
    }
}

impl std::error::Error for ReduceEmptyNoInitialValueError {}

/// Represents an error when a key scheduled for removal is not present in a
/// [`LinkedOrderedMap`](crate::LinkedOrderedMap).
///
/// The persistent engine always checks presence before removing, so this
/// error crossing the engine boundary indicates an invariant breach rather
/// than bad caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkedOrderedMapUnknownKeyError;

impl fmt::Display for LinkedOrderedMapUnknownKeyError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("removal of a key that is not present in the linked ordered map")
    }
}

impl std::error::Error for LinkedOrderedMapUnknownKeyError {}

/// Represents errors that can occur when operating on a persistent map.
///
/// This enum provides a unified error type for everything the map façade
/// can refuse to do.
///
/// # Examples
///
/// ```rust
/// use lomap::{MapError, SingleModeMutationAlreadyOccurredError};
///
/// let error = MapError::SingleModeMutationAlreadyOccurred(
///     SingleModeMutationAlreadyOccurredError { operation: "unset" },
/// );
/// println!("{}", error);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// A single-mode map was mutated after its one permitted mutation.
    SingleModeMutationAlreadyOccurred(SingleModeMutationAlreadyOccurredError),
    /// A lightweight-mode map was used after the mutation that consumed it.
    LightweightModePostMutationUse(LightweightModePostMutationUseError),
    /// `reduce` was called on an empty map without a seed.
    ReduceEmptyNoInitialValue(ReduceEmptyNoInitialValueError),
    /// A linked-ordered-map removal targeted an unknown key.
    LinkedOrderedMapUnknownKey(LinkedOrderedMapUnknownKeyError),
}

impl MapError {
    pub(crate) const fn single_mode(operation: &'static str) -> Self {
        Self::SingleModeMutationAlreadyOccurred(SingleModeMutationAlreadyOccurredError {
            operation,
        })
    }

    pub(crate) const fn lightweight(operation: &'static str) -> Self {
        Self::LightweightModePostMutationUse(LightweightModePostMutationUseError { operation })
    }
}

impl fmt::Display for MapError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleModeMutationAlreadyOccurred(error) => write!(formatter, "{error}"),
            Self::LightweightModePostMutationUse(error) => write!(formatter, "{error}"),
            Self::ReduceEmptyNoInitialValue(error) => write!(formatter, "{error}"),
            Self::LinkedOrderedMapUnknownKey(error) => write!(formatter, "{error}"),
        }
    }
}

impl std::error::Error for MapError {}

impl From<SingleModeMutationAlreadyOccurredError> for MapError {
    fn from(error: SingleModeMutationAlreadyOccurredError) -> Self {
        Self::SingleModeMutationAlreadyOccurred(error)
    }
}

impl From<LightweightModePostMutationUseError> for MapError {
    fn from(error: LightweightModePostMutationUseError) -> Self {
        Self::LightweightModePostMutationUse(error)
    }
}

impl From<ReduceEmptyNoInitialValueError> for MapError {
    fn from(error: ReduceEmptyNoInitialValueError) -> Self {
        Self::ReduceEmptyNoInitialValue(error)
    }
}

impl From<LinkedOrderedMapUnknownKeyError> for MapError {
    fn from(error: LinkedOrderedMapUnknownKeyError) -> Self {
        Self::LinkedOrderedMapUnknownKey(error)
    }
}
