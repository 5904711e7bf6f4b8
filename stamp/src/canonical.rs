//! Canonical JSON encoding for signing inputs and sealed payloads.
//!
//! Signatures are only meaningful if both sides serialize the same data to
//! the same bytes. The rules here are small and fixed:
//!
//! - object keys sorted by byte order, at every depth
//! - no insignificant whitespace
//! - strings escaped the way `serde_json` escapes them
//! - numbers written in `serde_json`'s shortest round-trip form
//!
//! This does not depend on `serde_json`'s map ordering, so enabling
//! `preserve_order` anywhere in the dependency graph cannot change a
//! signing input.

use serde::Serialize;
use serde_json::Value;

/// Encode a JSON value canonically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Serialize any value to canonical JSON bytes.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonical_json(&value).into_bytes())
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            // Display on scalars is compact JSON and cannot fail.
            out.push_str(&value.to_string());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_value(&map[key], out);
            }
            out.push('}');
        }
    }
}
