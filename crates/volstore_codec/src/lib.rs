//! # volstore Codec
//!
//! Transport value model and encodings for volstore.
//!
//! Entities are exchanged as *transport documents*: string-keyed maps with a
//! `class` entry naming the entity kind. This crate provides:
//! - [`Value`], the dynamic value model used for entity fields and documents
//! - [`Document`], a helper for building and consuming documents
//! - JSON encoding through `serde_json` and CBOR encoding through `ciborium`
//!
//! ## Usage
//!
//! ```
//! use volstore_codec::{from_json, to_json, Document, Value};
//!
//! let mut doc = Document::new("KeyValue");
//! doc.insert("key", "k");
//! doc.insert("value", "v");
//!
//! let text = to_json(&doc.into_value()).unwrap();
//! let decoded = Document::from_value(from_json(&text).unwrap()).unwrap();
//! assert_eq!(decoded.class(), "KeyValue");
//! assert_eq!(decoded.get("key"), Some(&Value::from("k")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod encoding;
mod error;
mod value;

pub use document::{class_of, Document, CLASS_KEY};
pub use encoding::{from_cbor, from_json, to_cbor, to_json, to_json_pretty};
pub use error::{CodecError, CodecResult};
pub use value::{format_timestamp, parse_timestamp, Map, Value};

/// Types that can be encoded to a transport encoding.
pub trait Encode {
    /// Encode this value to CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that can be decoded from a transport encoding.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
