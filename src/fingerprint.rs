//! Order-insensitive content hash of a build configuration.
//!
//! Object keys and array elements are sorted at every level before being
//! folded into one SHA-256 digest, so two configurations that differ only in
//! ordering always share an identity.

use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Hex SHA-256 identity of `value`.
///
/// * objects: keys sorted; nested objects/arrays contribute their own
///   fingerprint, scalars contribute `key:value`; `null` is skipped
/// * arrays: nested objects/arrays are replaced by their fingerprint, then
///   all elements are sorted by their string form and folded as
///   `index:value`
pub fn fingerprint(value: &Value) -> String {
    let mut sha = Sha256::new();

    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items
                .iter()
                .map(|item| match item {
                    Value::Array(_) | Value::Object(_) => Value::String(fingerprint(item)),
                    scalar => scalar.clone(),
                })
                .collect();
            items.sort_by_cached_key(scalar_text);

            for (index, item) in items.iter().enumerate() {
                if !item.is_null() {
                    sha.update(format!("{index}:{}", scalar_text(item)));
                }
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            for key in keys {
                match &map[key] {
                    Value::Null => {}
                    nested @ (Value::Array(_) | Value::Object(_)) => {
                        sha.update(fingerprint(nested));
                    }
                    scalar => sha.update(format!("{key}:{}", scalar_text(scalar))),
                }
            }
        }
        // a bare scalar has no keys to fold
        _ => {}
    }

    format!("{:x}", sha.finalize())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Number(n) => number_text(n),
        other => other.to_string(),
    }
}

/// Whole floats print without a fraction (`1.0` as `1`), and `-0` as `0`.
fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f + 0.0),
        _ => n.to_string(),
    }
}
