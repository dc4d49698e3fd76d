//! Dynamic transport value type.

use crate::error::{CodecError, CodecResult};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// String-keyed map of values, ordered by key.
pub type Map = BTreeMap<String, Value>;

/// A dynamic transport value.
///
/// This is the value model shared by entity field storage and transport
/// documents. Floats are intentionally not supported. Maps are keyed by
/// text and kept sorted so encodings are deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string.
    Text(String),
    /// UTC timestamp. Encodes as RFC 3339 text.
    Timestamp(DateTime<Utc>),
    /// Array of values.
    Array(Vec<Value>),
    /// String-keyed map of values.
    Map(Map),
}

impl Value {
    /// Create a map value from key/value pairs.
    pub fn map<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Create an empty map value.
    pub fn empty_map() -> Self {
        Value::Map(Map::new())
    }

    /// Create a map value from a string-to-string mapping.
    pub fn from_string_map(map: &BTreeMap<String, String>) -> Self {
        Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::Text(v.clone())))
                .collect(),
        )
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a timestamp.
    ///
    /// Text is parsed with [`parse_timestamp`], so a decoded document can be
    /// read back without first coercing its fields.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => parse_timestamp(s).ok(),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Consume this value and return the inner map.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedType` if the value is not a map.
    pub fn into_map(self) -> CodecResult<Map> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(CodecError::unexpected_type("map", other.type_name())),
        }
    }

    /// Convert a map of text values into a string-to-string mapping.
    ///
    /// Returns `None` if this is not a map or if any entry is not text.
    pub fn to_string_map(&self) -> Option<BTreeMap<String, String>> {
        let map = self.as_map()?;
        map.iter()
            .map(|(k, v)| v.as_text().map(|s| (k.clone(), s.to_string())))
            .collect()
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
        }
    }
}

/// Format a timestamp the way transport documents carry it.
///
/// Always six fractional digits and a `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a transport timestamp.
///
/// Accepts RFC 3339 text with any offset, and zone-less ISO 8601 or SQL
/// style text which is taken as UTC. Missing sub-second digits decode as
/// zero.
///
/// # Errors
///
/// Returns `InvalidTimestamp` if none of the accepted forms match.
pub fn parse_timestamp(text: &str) -> CodecResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(CodecError::invalid_timestamp(text))
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => serializer.serialize_str(&format_timestamp(ts)),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a transport value (null, bool, integer, text, array or text-keyed map)")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v)
            .map(Value::Integer)
            .map_err(|_| E::custom(format!("integer {v} is out of range")))
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> Result<Value, E> {
        Err(E::custom(CodecError::FloatForbidden))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Text(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = Map::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn map_keys_are_sorted() {
        let map = Value::map([
            ("z", Value::Integer(1)),
            ("a", Value::Integer(2)),
            ("m", Value::Integer(3)),
        ]);
        let keys: Vec<_> = map.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "m", "z"]);
    }

    #[test]
    fn value_accessors() {
        assert!(Value::Null.is_null());
        assert!(!Value::Bool(true).is_null());

        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(42).as_bool(), None);

        assert_eq!(Value::Integer(42).as_integer(), Some(42));
        assert_eq!(Value::Text("42".to_string()).as_integer(), None);

        assert_eq!(Value::Text("hello".to_string()).as_text(), Some("hello"));
        assert_eq!(Value::Integer(1).type_name(), "integer");
    }

    #[test]
    fn map_get() {
        let map = Value::map([
            ("name", Value::from("disk")),
            ("size", Value::Integer(1)),
        ]);

        assert_eq!(map.get("name"), Some(&Value::from("disk")));
        assert_eq!(map.get("size"), Some(&Value::Integer(1)));
        assert_eq!(map.get("missing"), None);
        assert_eq!(Value::Integer(1).get("name"), None);
    }

    #[test]
    fn string_map_conversion() {
        let mut specs = BTreeMap::new();
        specs.insert("k1".to_string(), "v1".to_string());
        let value = Value::from_string_map(&specs);
        assert_eq!(value.to_string_map(), Some(specs));

        let mixed = Value::map([("k", Value::Integer(1))]);
        assert_eq!(mixed.to_string_map(), None);
    }

    #[test]
    fn into_map_rejects_other_types() {
        let err = Value::Integer(3).into_map().unwrap_err();
        assert_eq!(err, CodecError::unexpected_type("map", "integer"));
    }

    #[test]
    fn timestamp_keeps_microseconds() {
        let ts = parse_timestamp("2021-06-28T17:14:59.123456Z").unwrap();
        assert_eq!(ts.nanosecond(), 123_456_000);
        assert_eq!(format_timestamp(&ts), "2021-06-28T17:14:59.123456Z");
    }

    #[test]
    fn timestamp_without_subseconds_is_zero() {
        let ts = parse_timestamp("2021-06-28T17:14:59Z").unwrap();
        assert_eq!(ts.nanosecond(), 0);
        assert_eq!(ts.second(), 59);
    }

    #[test]
    fn timestamp_without_zone_is_utc() {
        let a = parse_timestamp("2021-06-28T17:14:59.5").unwrap();
        let b = parse_timestamp("2021-06-28 17:14:59.500000").unwrap();
        let c = parse_timestamp("2021-06-28T19:14:59.5+02:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn timestamp_garbage_fails() {
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(CodecError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn text_reads_as_timestamp() {
        let text = Value::from("2021-06-28T17:14:59Z");
        assert!(text.as_timestamp().is_some());
        assert!(Value::from("nope").as_timestamp().is_none());
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Integer(42));
        assert_eq!(Value::from(42i32), Value::Integer(42));
        assert_eq!(Value::from("hello"), Value::Text("hello".to_string()));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
        assert_eq!(Value::from(()), Value::Null);
    }

    mod prop {
        use super::*;
        use chrono::TimeZone;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn microsecond_timestamps_survive_text(
                secs in 0i64..4_102_444_800,
                micros in 0u32..1_000_000,
            ) {
                let ts = Utc.timestamp_opt(secs, micros * 1_000).unwrap();
                prop_assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
            }
        }
    }
}
