//! JSON textual form of a persistent map.
//!
//! The blob carries the key property name alongside the ordered entries,
//! so a consumer can rebuild an equivalent map without out-of-band
//! configuration:
//!
//! ```json
//! {"keyPropName": "id", "keysValues": [{"key": 1, "value": {"id": 1}}]}
//! ```
//!
//! Rebuilding goes through the lazy factory: the returned map defers
//! population until its first operation.
//!
//! # Examples
//!
//! ```rust
//! use lomap::{from_json, to_json, ItemMapFactory};
//! use serde_json::json;
//!
//! let factory = ItemMapFactory::default();
//! let map = factory.build(&[json!({"id": 1, "name": "first"})]);
//!
//! let blob = to_json(&factory, &map).unwrap();
//! let (rebuilt_factory, rebuilt) = from_json(&blob).unwrap();
//!
//! assert_eq!(rebuilt_factory.key_prop_name(), "id");
//! assert_eq!(rebuilt.keys_values().unwrap(), map.keys_values().unwrap());
//! ```

use std::fmt;

use serde_json::{json, Value};

use crate::error::MapError;
use crate::item::{ItemMapFactory, MapKey};
use crate::map::PersistentLinkedMap;

/// Represents errors that can occur while rebuilding a map from its JSON
/// textual form.
#[derive(Debug)]
pub enum FromJsonError {
    /// The blob is not valid JSON.
    Parse(serde_json::Error),
    /// The blob is valid JSON but misses a required field.
    MissingField(&'static str),
    /// An entry carries key material that is neither a string nor an
    /// integer.
    InvalidKey,
}

impl fmt::Display for FromJsonError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(error) => write!(formatter, "malformed JSON blob: {error}"),
            Self::MissingField(field) => {
                write!(formatter, "JSON blob misses the \"{field}\" field")
            }
            Self::InvalidKey => {
                formatter.write_str("JSON blob entry carries a non-string, non-integer key")
            }
        }
    }
}

impl std::error::Error for FromJsonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(error) => Some(error),
            Self::MissingField(_) | Self::InvalidKey => None,
        }
    }
}

impl From<serde_json::Error> for FromJsonError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error)
    }
}

/// Emits the JSON textual form of `map`, carrying the factory's key
/// property name.
///
/// # Errors
///
/// Returns [`MapError::LightweightModePostMutationUse`] on a consumed
/// lightweight-mode map.
pub fn to_json(
    factory: &ItemMapFactory,
    map: &PersistentLinkedMap<MapKey, Value>,
) -> Result<String, MapError> {
    let keys_values: Vec<Value> = map
        .keys_values()?
        .into_iter()
        .map(|(key, value)| json!({"key": key, "value": value}))
        .collect();
    let blob = json!({
        "keyPropName": factory.key_prop_name(),
        "keysValues": keys_values,
    });
    Ok(blob.to_string())
}

/// Rebuilds a factory and a lazily populated map from a JSON blob emitted
/// by [`to_json`].
///
/// # Errors
///
/// Returns [`FromJsonError`] when the blob is not valid JSON, misses the
/// `keyPropName`/`keysValues` fields, or carries invalid key material.
pub fn from_json(
    source: &str,
) -> Result<(ItemMapFactory, PersistentLinkedMap<MapKey, Value>), FromJsonError> {
    let blob: Value = serde_json::from_str(source)?;
    let key_prop_name = blob
        .get("keyPropName")
        .and_then(Value::as_str)
        .ok_or(FromJsonError::MissingField("keyPropName"))?;
    let raw_entries = blob
        .get("keysValues")
        .and_then(Value::as_array)
        .ok_or(FromJsonError::MissingField("keysValues"))?;

    let mut entries = Vec::with_capacity(raw_entries.len());
    for raw_entry in raw_entries {
        let key = raw_entry
            .get("key")
            .ok_or(FromJsonError::MissingField("key"))?;
        let key = MapKey::from_value(key).ok_or(FromJsonError::InvalidKey)?;
        let value = raw_entry
            .get("value")
            .ok_or(FromJsonError::MissingField("value"))?;
        entries.push((key, value.clone()));
    }

    let factory = ItemMapFactory::new(key_prop_name, crate::Mode::default());
    let map = PersistentLinkedMap::lazy_from_entries(entries, factory.mode());
    Ok((factory, map))
}
