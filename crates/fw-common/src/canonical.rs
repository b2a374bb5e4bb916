//! Canonical JSON serialization and idempotency hashing.
//!
//! The dedup contract requires the same payload to always hash to the same
//! fingerprint, so object keys are sorted recursively before hashing
//! regardless of how the payload map was built.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value with all object keys in lexicographic order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    // Scalar serialization is infallible for Value.
    out.push_str(
        &serde_json::to_string(value).expect("scalar JSON value always serializes"),
    );
}

/// `hex(sha256(canonical_json(payload)))[..16]` — the fingerprint stored in
/// `notifications_log.idempotency_hash`.
pub fn idempotency_hash(payload: &Value) -> String {
    let canon = canonical_json(payload);
    let digest = Sha256::digest(canon.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted_recursively() {
        let a = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        let b = json!({"a": {"y": [1, 2], "z": true}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn canonical_form_is_a_fixed_point() {
        let value = json!({"trip_id": "t-1", "kind": "DELAYED", "eta_round": "2025-07-09T03:00:00Z"});
        let canon = canonical_json(&value);
        let reparsed: Value = serde_json::from_str(&canon).unwrap();
        assert_eq!(canonical_json(&reparsed), canon);
    }

    #[test]
    fn hash_is_stable_and_sixteen_chars() {
        let payload = json!({"trip_id": "t-1", "kind": "DELAYED", "eta_round": "2025-07-09T03:00:00Z"});
        let h1 = idempotency_hash(&payload);
        let h2 = idempotency_hash(&payload);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_payloads_hash_differently() {
        let a = json!({"trip_id": "t-1", "eta_round": "2025-07-09T03:00:00Z"});
        let b = json!({"trip_id": "t-1", "eta_round": "2025-07-09T02:45:00Z"});
        assert_ne!(idempotency_hash(&a), idempotency_hash(&b));
    }

    #[test]
    fn string_escapes_survive_canonicalization() {
        let value = json!({"note": "línea \"especial\"\n"});
        let canon = canonical_json(&value);
        let reparsed: Value = serde_json::from_str(&canon).unwrap();
        assert_eq!(reparsed, value);
    }
}
