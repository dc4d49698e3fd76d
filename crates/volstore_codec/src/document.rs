//! Transport documents.
//!
//! A transport document is a map with a `class` entry naming the entity
//! kind and one entry per declared field that is set on the entity:
//!
//! ```text
//! {"class": "Volume", "id": "...", "size": 1, "volume_type": {"class": ...}}
//! ```

use crate::error::{CodecError, CodecResult};
use crate::value::{Map, Value};

/// Key holding the entity kind of a document.
pub const CLASS_KEY: &str = "class";

/// A transport document under construction or being consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    class: String,
    fields: Map,
}

impl Document {
    /// Creates an empty document of the given class.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: Map::new(),
        }
    }

    /// Splits a decoded value into its class and fields.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedType` if the value is not a map and `MissingClass`
    /// if it has no text `class` entry.
    pub fn from_value(value: Value) -> CodecResult<Self> {
        let mut fields = value.into_map()?;
        let class = match fields.remove(CLASS_KEY) {
            Some(Value::Text(class)) => class,
            _ => return Err(CodecError::MissingClass),
        };
        Ok(Self { class, fields })
    }

    /// The entity kind named by this document.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Sets a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Returns a field, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Removes and returns a field.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Whether a field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterates over the fields, excluding the class entry.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the remaining fields, excluding the class entry.
    pub fn into_fields(self) -> Map {
        self.fields
    }

    /// Builds the map value, including the class entry.
    pub fn into_value(self) -> Value {
        let mut map = self.fields;
        map.insert(CLASS_KEY.to_string(), Value::Text(self.class));
        Value::Map(map)
    }
}

/// Returns the class named by a document value without consuming it.
///
/// # Errors
///
/// Returns `MissingClass` if the value has no text `class` entry.
pub fn class_of(value: &Value) -> CodecResult<&str> {
    value
        .get(CLASS_KEY)
        .and_then(Value::as_text)
        .ok_or(CodecError::MissingClass)
}
