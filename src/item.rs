//! Item interpretation over JSON values.
//!
//! The engine is generic over keys and values; this module pins it to the
//! string-or-integer key domain and teaches it the two item shapes callers
//! hand over as loose JSON objects:
//!
//! - An object carrying the configured key property
//!   (`{"id": 1, "name": "first"}` with `key_prop_name = "id"`): the key is
//!   read from that property and the whole object is the stored value.
//!   This shape always wins, even for single-property objects.
//! - A single-property object (`{"first": 1}`): the property name is the
//!   key and the property value is the stored value.
//!
//! Items matching neither shape are skipped, not errors.
//!
//! # Examples
//!
//! ```rust
//! use lomap::{ItemMapFactory, MapKey};
//! use serde_json::json;
//!
//! let factory = ItemMapFactory::default();
//! let map = factory.build(&[
//!     json!({"id": 1, "name": "first"}),
//!     json!({"id": 2, "name": "second"}),
//! ]);
//!
//! assert_eq!(map.keys().unwrap(), vec![MapKey::from(1), MapKey::from(2)]);
//! assert_eq!(
//!     map.get(&MapKey::from(1)).unwrap(),
//!     Some(json!({"id": 1, "name": "first"})),
//! );
//! ```

use std::fmt;

use serde_json::Value;

use crate::map::PersistentLinkedMap;
use crate::mode::Mode;

/// Default name of the property items carry their key under.
pub const DEFAULT_KEY_PROP_NAME: &str = "id";

/// A map key of the item layer: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    /// An integer key.
    Integer(i64),
    /// A string key.
    Text(String),
}

impl fmt::Display for MapKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(key) => write!(formatter, "{key}"),
            Self::Text(key) => formatter.write_str(key),
        }
    }
}

impl From<i64> for MapKey {
    fn from(key: i64) -> Self {
        Self::Integer(key)
    }
}

impl From<&str> for MapKey {
    fn from(key: &str) -> Self {
        Self::Text(key.to_owned())
    }
}

impl From<String> for MapKey {
    fn from(key: String) -> Self {
        Self::Text(key)
    }
}

impl MapKey {
    /// Reads a key out of a JSON value; only strings and integers qualify.
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self::Text(text.clone())),
            Value::Number(number) => number.as_i64().map(Self::Integer),
            _ => None,
        }
    }
}

impl serde::Serialize for MapKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Integer(key) => serializer.serialize_i64(*key),
            Self::Text(key) => serializer.serialize_str(key),
        }
    }
}

struct MapKeyVisitor;

impl serde::de::Visitor<'_> for MapKeyVisitor {
    type Value = MapKey;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or integer key")
    }

    fn visit_i64<E: serde::de::Error>(self, key: i64) -> Result<Self::Value, E> {
        Ok(MapKey::Integer(key))
    }

    fn visit_u64<E: serde::de::Error>(self, key: u64) -> Result<Self::Value, E> {
        i64::try_from(key)
            .map(MapKey::Integer)
            .map_err(|_| E::custom("integer key out of range"))
    }

    fn visit_str<E: serde::de::Error>(self, key: &str) -> Result<Self::Value, E> {
        Ok(MapKey::Text(key.to_owned()))
    }

    fn visit_string<E: serde::de::Error>(self, key: String) -> Result<Self::Value, E> {
        Ok(MapKey::Text(key))
    }
}

impl<'de> serde::Deserialize<'de> for MapKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(MapKeyVisitor)
    }
}

/// Factory building persistent maps out of loose JSON items.
///
/// Carries the key property name and the operating mode; both default to
/// the conventional `"id"` / [`Mode::Multiway`].
///
/// # Examples
///
/// ```rust
/// use lomap::{ItemMapFactory, MapKey, Mode};
/// use serde_json::json;
///
/// let factory = ItemMapFactory::new("code", Mode::Single);
/// let map = factory.build(&[json!({"code": "a", "label": 1}), json!({"answer": 42})]);
///
/// assert_eq!(
///     map.keys().unwrap(),
///     vec![MapKey::from("a"), MapKey::from("answer")],
/// );
/// assert_eq!(map.get(&MapKey::from("answer")).unwrap(), Some(json!(42)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMapFactory {
    key_prop_name: String,
    mode: Mode,
}

impl Default for ItemMapFactory {
    fn default() -> Self {
        Self {
            key_prop_name: DEFAULT_KEY_PROP_NAME.to_owned(),
            mode: Mode::default(),
        }
    }
}

impl ItemMapFactory {
    /// Creates a factory with the given key property name and mode.
    #[must_use]
    pub fn new(key_prop_name: impl Into<String>, mode: Mode) -> Self {
        Self {
            key_prop_name: key_prop_name.into(),
            mode,
        }
    }

    /// Returns the property name items carry their key under.
    #[must_use]
    pub fn key_prop_name(&self) -> &str {
        &self.key_prop_name
    }

    /// Returns the mode maps built by this factory operate in.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Interprets one item, returning its `(key, value)` entry.
    ///
    /// Returns `None` for items matching neither shape: non-objects,
    /// objects without the key property and with more than one field, and
    /// objects whose key material is neither a string nor an integer.
    #[must_use]
    pub fn entry(&self, item: &Value) -> Option<(MapKey, Value)> {
        let object = item.as_object()?;
        if let Some(key_property) = object.get(&self.key_prop_name) {
            let key = MapKey::from_value(key_property)?;
            return Some((key, item.clone()));
        }
        if object.len() == 1 {
            let (name, value) = object.iter().next()?;
            return Some((MapKey::Text(name.clone()), value.clone()));
        }
        None
    }

    /// Interprets a batch of items, skipping the ones that match neither
    /// shape.
    #[must_use]
    pub fn entries(&self, items: &[Value]) -> Vec<(MapKey, Value)> {
        items.iter().filter_map(|item| self.entry(item)).collect()
    }

    /// Builds a populated map out of `items`.
    #[must_use]
    pub fn build(&self, items: &[Value]) -> PersistentLinkedMap<MapKey, Value> {
        PersistentLinkedMap::from_entries(self.entries(items), self.mode)
    }

    /// Builds a map whose population is deferred to the first operation.
    #[must_use]
    pub fn build_lazy(&self, items: &[Value]) -> PersistentLinkedMap<MapKey, Value> {
        PersistentLinkedMap::lazy_from_entries(self.entries(items), self.mode)
    }
}
