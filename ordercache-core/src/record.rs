//! Order record and key types.
//!
//! An [`OrderRecord`] is the unit that flows through ingestion, the durable
//! store and the cache. Its payload is the canonical byte sequence exactly as
//! it was ingested; the decoded JSON is only inspected to extract the key and
//! is never re-serialized, so readers get back byte-for-byte what was written.

use std::borrow::Borrow;
use std::fmt;

use bytes::Bytes;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ValidationError;

/// JSON field carrying the order key inside every payload.
pub const ORDER_KEY_FIELD: &str = "order_uid";

// ============================================================================
// ORDER KEY
// ============================================================================

/// Validated order identifier.
///
/// Can only be constructed from a string that is non-empty after trimming.
/// The original string is kept unmodified so it matches the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderKey(String);

impl OrderKey {
    /// Validate and wrap a key.
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ValidationError::EmptyKey {
                field: ORDER_KEY_FIELD,
            });
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for OrderKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for OrderKey {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderKey> for String {
    fn from(key: OrderKey) -> Self {
        key.0
    }
}

impl AsRef<str> for OrderKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for OrderKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// ORDER RECORD
// ============================================================================

/// An order as materialized by the service: its key plus the canonical payload.
///
/// Cloning is cheap; the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    key: OrderKey,
    payload: Bytes,
}

impl OrderRecord {
    /// Decode an ingested payload.
    ///
    /// The payload must be a well-formed JSON object with a non-empty string
    /// `order_uid`. The bytes are kept verbatim.
    pub fn decode(payload: impl Into<Bytes>) -> Result<Self, ValidationError> {
        let payload = payload.into();
        let key = extract_key(&payload)?;
        Ok(Self { key, payload })
    }

    /// Decode a payload read back from the store under `stored_key`.
    ///
    /// Besides the checks of [`OrderRecord::decode`], the embedded key must
    /// equal the key the row was stored under.
    pub fn decode_persisted(
        stored_key: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ValidationError> {
        let record = Self::decode(payload)?;
        if record.key.as_str() != stored_key {
            return Err(ValidationError::KeyMismatch {
                expected: stored_key.to_string(),
                found: record.key.into_string(),
            });
        }
        Ok(record)
    }

    pub fn key(&self) -> &OrderKey {
        &self.key
    }

    /// The canonical payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_parts(self) -> (OrderKey, Bytes) {
        (self.key, self.payload)
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Key-only view of a payload. Other fields are syntax-checked and skipped
/// without being materialized.
#[derive(Deserialize)]
struct KeyView {
    order_uid: Option<JsonValue>,
}

fn malformed(err: serde_json::Error) -> ValidationError {
    ValidationError::MalformedPayload {
        reason: err.to_string(),
    }
}

fn extract_key(payload: &[u8]) -> Result<OrderKey, ValidationError> {
    // Structs also deserialize from arrays, so the object check comes first.
    let first = payload.iter().find(|b| !matches!(**b, b' ' | b'\t' | b'\n' | b'\r'));
    if first != Some(&b'{') {
        serde_json::from_slice::<IgnoredAny>(payload).map_err(malformed)?;
        return Err(ValidationError::NotAnObject);
    }

    let view: KeyView = serde_json::from_slice(payload).map_err(malformed)?;

    match view.order_uid {
        None | Some(JsonValue::Null) => Err(ValidationError::MissingKey {
            field: ORDER_KEY_FIELD,
        }),
        Some(JsonValue::String(key)) => OrderKey::new(key),
        Some(_) => Err(ValidationError::EmptyKey {
            field: ORDER_KEY_FIELD,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"order_uid":"b563feb7b2b84b6test","track_number":"WBILMTESTTRACK","delivery":{"name":"Test Testov","city":"Kiryat Mozkin"},"items":[{"chrt_id":9934930,"price":453}]}"#;

    #[test]
    fn test_decode_extracts_key() {
        let record = OrderRecord::decode(SAMPLE.as_bytes().to_vec()).unwrap();
        assert_eq!(record.key().as_str(), "b563feb7b2b84b6test");
    }

    #[test]
    fn test_decode_keeps_payload_verbatim() {
        let spaced = "{ \"order_uid\" : \"k1\",\n  \"z\": 1, \"a\": [1, 2] }";
        let record = OrderRecord::decode(spaced.as_bytes().to_vec()).unwrap();
        assert_eq!(record.payload().as_ref(), spaced.as_bytes());
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = OrderRecord::decode(&b"{not json"[..]).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_rejects_trailing_garbage() {
        let err = OrderRecord::decode(&br#"{"order_uid":"k1"} trailing"#[..]).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        let err = OrderRecord::decode(Bytes::new()).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_accepts_numbers_beyond_f64() {
        let payload = &br#"{"order_uid":"k","amount":1e400,"items":[{"price":-1e999}]}"#[..];
        let record = OrderRecord::decode(payload).unwrap();
        assert_eq!(record.key().as_str(), "k");
        assert_eq!(record.payload().as_ref(), payload);
    }

    #[test]
    fn test_decode_non_object_syntax_errors_stay_malformed() {
        let err = OrderRecord::decode(&b"[1, 2"[..]).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload { .. }));

        let err = OrderRecord::decode(&b"  42 "[..]).unwrap_err();
        assert_eq!(err, ValidationError::NotAnObject);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let err = OrderRecord::decode(&br#"["order_uid"]"#[..]).unwrap_err();
        assert_eq!(err, ValidationError::NotAnObject);
    }

    #[test]
    fn test_decode_rejects_missing_key() {
        let err = OrderRecord::decode(&br#"{"track_number":"x"}"#[..]).unwrap_err();
        assert_eq!(err, ValidationError::MissingKey { field: ORDER_KEY_FIELD });

        let err = OrderRecord::decode(&br#"{"order_uid":null}"#[..]).unwrap_err();
        assert_eq!(err, ValidationError::MissingKey { field: ORDER_KEY_FIELD });
    }

    #[test]
    fn test_decode_rejects_empty_or_non_string_key() {
        for payload in [
            &br#"{"order_uid":""}"#[..],
            &br#"{"order_uid":"   "}"#[..],
            &br#"{"order_uid":42}"#[..],
        ] {
            let err = OrderRecord::decode(payload).unwrap_err();
            assert_eq!(err, ValidationError::EmptyKey { field: ORDER_KEY_FIELD });
        }
    }

    #[test]
    fn test_decode_persisted_key_mismatch() {
        let err = OrderRecord::decode_persisted("other", SAMPLE.as_bytes().to_vec()).unwrap_err();
        assert!(matches!(err, ValidationError::KeyMismatch { .. }));

        let ok = OrderRecord::decode_persisted("b563feb7b2b84b6test", SAMPLE.as_bytes().to_vec());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_order_key_serde() {
        let key = OrderKey::new("abc").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: OrderKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<OrderKey>("\"\"").is_err());
    }

    #[test]
    fn test_order_key_borrow_lookup() {
        let mut map = std::collections::HashMap::new();
        map.insert(OrderKey::new("k1").unwrap(), 1);
        assert_eq!(map.get("k1"), Some(&1));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_decode_never_reshapes_payload(
            key in "[a-zA-Z0-9]{1,24}",
            extra in proptest::collection::btree_map("[a-z_]{1,8}", any::<i64>(), 0..6),
        ) {
            let mut object = serde_json::Map::new();
            for (k, v) in extra {
                object.insert(k, JsonValue::from(v));
            }
            object.insert(ORDER_KEY_FIELD.to_string(), JsonValue::String(key.clone()));
            let bytes = serde_json::to_vec(&JsonValue::Object(object)).unwrap();

            let record = OrderRecord::decode(bytes.clone()).unwrap();
            prop_assert_eq!(record.key().as_str(), key.as_str());
            prop_assert_eq!(record.payload().as_ref(), bytes.as_slice());
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = OrderRecord::decode(bytes);
        }
    }
}
