//! Canonical JSON encoding for hashing and signing.
//!
//! Object keys are sorted recursively, output carries no whitespace, and
//! strings are emitted as raw UTF-8. Two values that are structurally equal
//! encode to the same bytes regardless of how they were built.

use crate::error::CoreResult;
use serde::Serialize;
use serde_json::{Map, Value};

/// Sort object keys recursively
#[must_use]
pub fn canonical_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonical_value(v));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(canonical_value).collect()),
        other => other,
    }
}

/// Encode any serializable value to canonical bytes
///
/// # Errors
///
/// Returns error if the value cannot be represented as JSON
/// (for example a map with non-string keys or a non-finite float).
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&canonical_value(value))?)
}

/// Trait for canonical serialization
pub trait CanonicalEncode: Serialize {
    /// Encode to canonical bytes
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented as JSON
    fn canonical_bytes(&self) -> CoreResult<Vec<u8>> {
        canonical_bytes(self)
    }

    /// Encode to a canonical JSON string
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be represented as JSON
    fn canonical_string(&self) -> CoreResult<String> {
        let bytes = self.canonical_bytes()?;
        // serde_json only ever writes valid UTF-8
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl<T: Serialize + ?Sized> CanonicalEncode for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_sorts_nested_keys() {
        let value = json!({"b": {"z": 1, "a": [ {"y": true, "x": null} ]}, "a": "first"});
        let bytes = canonical_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":"first","b":{"a":[{"x":null,"y":true}],"z":1}}"#
        );
    }

    #[test]
    fn test_no_whitespace_and_raw_utf8() {
        let value = json!({"name": "café ☕", "n": 1.5});
        let s = value.canonical_string().unwrap();
        assert_eq!(s, r#"{"n":1.5,"name":"café ☕"}"#);
    }

    #[test]
    fn test_arrays_keep_order() {
        let a = canonical_bytes(&json!([3, 1, 2])).unwrap();
        assert_eq!(a, b"[3,1,2]");
    }

    #[test]
    fn test_hashmap_order_independent() {
        let mut left = HashMap::new();
        let mut right = HashMap::new();
        for i in 0..32 {
            left.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            right.insert(format!("k{i}"), i);
        }
        assert_eq!(canonical_bytes(&left).unwrap(), canonical_bytes(&right).unwrap());
    }

    #[test]
    fn test_non_string_keys_rejected() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);
        assert!(canonical_bytes(&map).is_err());
    }

    proptest::proptest! {
        #[test]
        fn prop_construction_order_independent(
            entries in proptest::collection::btree_map("[a-z]{1,8}", -1000i64..1000, 0..24)
        ) {
            let mut forward = Map::new();
            for (k, v) in &entries {
                forward.insert(k.clone(), json!({"v": v, "k": k}));
            }
            let mut backward = Map::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), json!({"k": k, "v": v}));
            }
            proptest::prop_assert_eq!(
                canonical_bytes(&Value::Object(forward)).unwrap(),
                canonical_bytes(&Value::Object(backward)).unwrap()
            );
        }
    }
}
