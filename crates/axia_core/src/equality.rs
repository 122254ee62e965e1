use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::value::{canonical_decimal, format_date};
use crate::TypedValue;

/// Semantic equality used to suppress no-op versions: decimals compare by value,
/// datetimes by instant, documents structurally.
pub fn values_equal(left: &TypedValue, right: &TypedValue) -> bool {
    match (left, right) {
        (TypedValue::String(a), TypedValue::String(b)) => a == b,
        (TypedValue::Integer(a), TypedValue::Integer(b)) => a == b,
        (TypedValue::Decimal(a), TypedValue::Decimal(b)) => a.normalize() == b.normalize(),
        (TypedValue::Boolean(a), TypedValue::Boolean(b)) => a == b,
        (TypedValue::Date(a), TypedValue::Date(b)) => a == b,
        (TypedValue::DateTime(a), TypedValue::DateTime(b)) => {
            a.unix_timestamp_nanos() == b.unix_timestamp_nanos()
        }
        (TypedValue::Document(a), TypedValue::Document(b)) => a == b,
        (TypedValue::Reference(a), TypedValue::Reference(b)) => a == b,
        _ => false,
    }
}

/// Ordering for range rules and range filters. `None` when the pair is not comparable.
pub fn compare_values(left: &TypedValue, right: &TypedValue) -> Option<Ordering> {
    match (left, right) {
        (TypedValue::String(a), TypedValue::String(b)) => Some(a.cmp(b)),
        (TypedValue::Integer(a), TypedValue::Integer(b)) => Some(a.cmp(b)),
        (TypedValue::Decimal(a), TypedValue::Decimal(b)) => Some(a.cmp(b)),
        (TypedValue::Integer(a), TypedValue::Decimal(b)) => Some(Decimal::from(*a).cmp(b)),
        (TypedValue::Decimal(a), TypedValue::Integer(b)) => Some(a.cmp(&Decimal::from(*b))),
        (TypedValue::Date(a), TypedValue::Date(b)) => Some(a.cmp(b)),
        (TypedValue::DateTime(a), TypedValue::DateTime(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Content hash over the data type tag and a canonical encoding of the slot (hex blake3).
pub fn value_hash(value: &TypedValue) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[value.data_type() as u8]);
    match value {
        TypedValue::String(text) => {
            hasher.update(text.as_bytes());
        }
        TypedValue::Integer(number) => {
            hasher.update(&number.to_le_bytes());
        }
        TypedValue::Decimal(number) => {
            hasher.update(canonical_decimal(number).as_bytes());
        }
        TypedValue::Boolean(flag) => {
            hasher.update(&[u8::from(*flag)]);
        }
        TypedValue::Date(date) => {
            hasher.update(format_date(*date).as_bytes());
        }
        TypedValue::DateTime(instant) => {
            hasher.update(&instant.unix_timestamp_nanos().to_le_bytes());
        }
        TypedValue::Document(doc) => {
            hash_json(&mut hasher, doc);
        }
        TypedValue::Reference(id) => {
            hasher.update(&id.as_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Hash recorded for reference rows whose target was deleted and cleared.
pub fn cleared_reference_hash() -> String {
    blake3::hash(b"reference:cleared").to_hex().to_string()
}

// Object keys are hashed in sorted order so key order in the input never matters.
fn hash_json(hasher: &mut blake3::Hasher, value: &JsonValue) {
    match value {
        JsonValue::Null => {
            hasher.update(b"n");
        }
        JsonValue::Bool(flag) => {
            hasher.update(if *flag { b"t" } else { b"f" });
        }
        JsonValue::Number(number) => {
            hasher.update(b"#");
            hasher.update(number.to_string().as_bytes());
        }
        JsonValue::String(text) => {
            hasher.update(b"s");
            hasher.update(&(text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        JsonValue::Array(items) => {
            hasher.update(b"[");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                hash_json(hasher, item);
            }
        }
        JsonValue::Object(map) => {
            hasher.update(b"{");
            hasher.update(&(map.len() as u64).to_le_bytes());
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            for key in keys {
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key.as_bytes());
                if let Some(item) = map.get(key) {
                    hash_json(hasher, item);
                }
            }
        }
    }
}
