//! ordercache Test Utilities
//!
//! Shared test infrastructure for the ordercache workspace:
//! - Proptest generators for order keys and payloads
//! - Fixtures for realistic order documents

pub use ordercache_core::{OrderKey, OrderRecord, ORDER_KEY_FIELD};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for order keys and payloads.

    use proptest::prelude::*;
    use serde_json::{json, Map, Value};

    /// Generate a plausible order key.
    pub fn arb_order_key() -> impl Strategy<Value = String> {
        "[a-z0-9]{8,24}"
    }

    /// Generate a scalar JSON value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[ -~]{0,32}".prop_map(Value::String),
            Just(Value::Null),
        ]
    }

    /// Generate an arbitrary nested JSON value, a few levels deep.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,12}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Generate a valid order payload for `key` with extra fields.
    pub fn arb_order_payload_for(key: String) -> impl Strategy<Value = Vec<u8>> {
        prop::collection::btree_map("[a-z_]{1,16}", arb_json_value(), 0..8).prop_map(
            move |fields| {
                let mut object = Map::new();
                object.insert(super::ORDER_KEY_FIELD.to_string(), Value::String(key.clone()));
                for (name, value) in fields {
                    if name != super::ORDER_KEY_FIELD {
                        object.insert(name, value);
                    }
                }
                serde_json::to_vec(&Value::Object(object)).unwrap_or_default()
            },
        )
    }

    /// Generate a `(key, payload)` pair where the payload is a valid order.
    pub fn arb_order() -> impl Strategy<Value = (String, Vec<u8>)> {
        arb_order_key().prop_flat_map(|key| {
            let payload = arb_order_payload_for(key.clone());
            (Just(key), payload)
        })
    }

    /// Generate bytes that must never validate as an order.
    pub fn arb_malformed_payload() -> impl Strategy<Value = Vec<u8>> {
        prop_oneof![
            // Not JSON at all.
            "[a-z ]{1,32}".prop_map(|s| format!("<{}>", s).into_bytes()),
            // Truncated object.
            arb_order_key().prop_map(|k| format!(r#"{{"order_uid":"{}""#, k).into_bytes()),
            // JSON but not an object.
            prop::collection::vec(any::<i32>(), 0..4)
                .prop_map(|v| serde_json::to_vec(&v).unwrap_or_default()),
            // Object without a key.
            "[a-z]{1,12}".prop_map(|v| format!(r#"{{"track_number":"{}"}}"#, v).into_bytes()),
            // Key of the wrong type.
            any::<i64>().prop_map(|n| format!(r#"{{"order_uid":{}}}"#, n).into_bytes()),
            // Blank key.
            Just(br#"{"order_uid":"  "}"#.to_vec()),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Realistic order documents.

    use serde_json::{json, Value};

    /// Key of [`sample_order`].
    pub const SAMPLE_ORDER_UID: &str = "b563feb7b2b84b6test";

    /// A complete order document with nested delivery, payment and items.
    pub fn sample_order() -> Value {
        order_value(SAMPLE_ORDER_UID)
    }

    /// [`sample_order`] re-keyed to `key`.
    pub fn order_value(key: &str) -> Value {
        json!({
            "order_uid": key,
            "track_number": "WBILMTESTTRACK",
            "entry": "WBIL",
            "delivery": {
                "name": "Test Testov",
                "phone": "+9720000000",
                "zip": "2639809",
                "city": "Kiryat Mozkin",
                "address": "Ploshad Mira 15",
                "region": "Kraiot",
                "email": "test@gmail.com"
            },
            "payment": {
                "transaction": key,
                "request_id": "",
                "currency": "USD",
                "provider": "wbpay",
                "amount": 1817,
                "payment_dt": 1637907727,
                "bank": "alpha",
                "delivery_cost": 1500,
                "goods_total": 317,
                "custom_fee": 0
            },
            "items": [
                {
                    "chrt_id": 9934930,
                    "track_number": "WBILMTESTTRACK",
                    "price": 453,
                    "rid": "ab4219087a764ae0btest",
                    "name": "Mascaras",
                    "sale": 30,
                    "size": "0",
                    "total_price": 317,
                    "nm_id": 2389212,
                    "brand": "Vivienne Sabo",
                    "status": 202
                }
            ],
            "locale": "en",
            "internal_signature": "",
            "customer_id": "test",
            "delivery_service": "meest",
            "shardkey": "9",
            "sm_id": 99,
            "date_created": "2021-11-26T06:22:19Z",
            "oof_shard": "1"
        })
    }

    /// Serialized [`order_value`] for `key`.
    pub fn order_json(key: &str) -> String {
        order_value(key).to_string()
    }

    /// Serialized [`order_value`] for `key`, as bytes.
    pub fn order_bytes(key: &str) -> Vec<u8> {
        order_json(key).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sample_order_decodes() {
        let record = OrderRecord::decode(order_bytes(SAMPLE_ORDER_UID)).unwrap();
        assert_eq!(record.key().as_str(), SAMPLE_ORDER_UID);
    }

    #[test]
    fn test_order_json_rekeys() {
        let record = OrderRecord::decode(order_bytes("other")).unwrap();
        assert_eq!(record.key().as_str(), "other");
    }

    proptest! {
        #[test]
        fn prop_generated_orders_decode((key, payload) in arb_order()) {
            let record = OrderRecord::decode(payload).unwrap();
            prop_assert_eq!(record.key().as_str(), key.as_str());
        }

        #[test]
        fn prop_malformed_payloads_reject(payload in arb_malformed_payload()) {
            prop_assert!(OrderRecord::decode(payload).is_err());
        }
    }
}
