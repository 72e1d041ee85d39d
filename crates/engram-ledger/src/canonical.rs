//! Canonical JSON serialization (RFC 8785-class) for ledger payloads.
//!
//! Every payload is hashed in this form, so two processes that build the same
//! fact produce the same bytes:
//! - object keys ordered by UTF-16 code units (§3.2.3)
//! - integer-valued floats written as integers; NaN/Infinity rejected
//! - compact output, array order preserved

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::error::LedgerError;

fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys_utf16).collect()),
        other => other.clone(),
    }
}

fn normalize_numbers(value: &Value) -> Result<Value, LedgerError> {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize_numbers(v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => items
            .iter()
            .map(normalize_numbers)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n.clone())),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !f.is_finite() => Err(LedgerError::Serialization(
                "NaN/Infinity not permitted in canonical JSON".to_string(),
            )),
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Ok(Value::Number(Number::from(f as i64)))
            }
            _ => Ok(Value::Number(n.clone())),
        },
        other => Ok(other.clone()),
    }
}

/// Canonical text of an already-built JSON value.
pub fn canonical_json(value: &Value) -> Result<String, LedgerError> {
    let normalized = normalize_numbers(value)?;
    Ok(serde_json::to_string(&sort_keys_utf16(&normalized))?)
}

/// Serialize any payload into canonical JSON text.
pub fn to_canonical<T: Serialize + ?Sized>(payload: &T) -> Result<String, LedgerError> {
    canonical_json(&serde_json::to_value(payload)?)
}

/// SHA-256 hex digest of the canonical form of `payload`.
pub fn canonical_digest<T: Serialize + ?Sized>(payload: &T) -> Result<String, LedgerError> {
    let canonical = to_canonical(payload)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}
