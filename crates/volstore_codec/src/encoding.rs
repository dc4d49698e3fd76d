//! JSON and CBOR encodings of transport values.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Encode a value as compact JSON text.
///
/// # Errors
///
/// Returns `EncodingFailed` if serialization fails.
pub fn to_json(value: &Value) -> CodecResult<String> {
    serde_json::to_string(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Encode a value as indented JSON text.
///
/// # Errors
///
/// Returns `EncodingFailed` if serialization fails.
pub fn to_json_pretty(value: &Value) -> CodecResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Decode a value from JSON text.
///
/// # Errors
///
/// Returns `DecodingFailed` for malformed JSON or floats.
pub fn from_json(text: &str) -> CodecResult<Value> {
    serde_json::from_str(text).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Encode a value as CBOR bytes.
///
/// # Errors
///
/// Returns `EncodingFailed` if serialization fails.
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns `DecodingFailed` for malformed input or unsupported items.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_timestamp;

    fn sample() -> Value {
        Value::map([
            ("class", Value::from("Connection")),
            ("attach_mode", Value::from("rw")),
            ("deleted", Value::Bool(false)),
            ("size", Value::Integer(-3)),
            ("instance_uuid", Value::Null),
            (
                "connection_info",
                Value::map([("conn", Value::map([("data", Value::empty_map())]))]),
            ),
            ("paths", Value::from(vec!["a", "b"])),
        ])
    }

    #[test]
    fn json_text_shape() {
        let value = Value::map([("a", Value::Integer(1)), ("b", Value::Null)]);
        assert_eq!(to_json(&value).unwrap(), r#"{"a":1,"b":null}"#);
    }

    #[test]
    fn json_decodes_nested() {
        let decoded = from_json(&to_json_pretty(&sample()).unwrap()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn cbor_decodes_nested() {
        let decoded = from_cbor(&to_cbor(&sample()).unwrap()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn timestamps_decode_as_text() {
        let ts = parse_timestamp("2021-06-28T17:14:59.000001Z").unwrap();
        let value = Value::map([("created_at", Value::Timestamp(ts))]);
        let decoded = from_json(&to_json(&value).unwrap()).unwrap();
        assert_eq!(
            decoded.get("created_at"),
            Some(&Value::from("2021-06-28T17:14:59.000001Z"))
        );
        assert_eq!(decoded.get("created_at").and_then(Value::as_timestamp), Some(ts));
    }

    #[test]
    fn floats_are_rejected() {
        assert!(matches!(
            from_json(r#"{"size": 1.5}"#),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn malformed_input_fails() {
        assert!(from_json("{").is_err());
        assert!(from_cbor(&[0xff, 0x00]).is_err());
    }
}
