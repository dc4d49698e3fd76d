//! Free-form key/value pairs.

use serde::{Deserialize, Serialize};

/// A key/value pair persisted alongside the entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Unique key.
    pub key: String,
    /// Stored value.
    pub value: Option<String>,
}

impl KeyValue {
    /// Creates a pair.
    pub fn new(key: impl Into<String>, value: impl Into<Option<String>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction() {
        let kv = KeyValue::new("key", Some("value".to_string()));
        assert_eq!(kv.key, "key");
        assert_eq!(kv.value.as_deref(), Some("value"));
        assert_eq!(KeyValue::new("k", None).value, None);
    }
}
