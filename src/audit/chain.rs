//! Chain Codec
//!
//! Canonical serialization of audit entries and the SHA-256 link that ties
//! each entry to its predecessor. Pure functions, no I/O.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::audit::entry::Payload;

pub const HASH_PREFIX: &str = "sha256:";

/// Entry fields covered by the hash, everything except the hash itself.
#[derive(Debug, Clone, Copy)]
pub struct LinkFields<'a> {
    pub id: i64,
    pub event_type: &'a str,
    pub action: &'a str,
    pub payload: &'a Payload,
    pub status: &'a str,
    pub created_at: &'a DateTime<Utc>,
}

/// The `prev_hash` of the first entry in a ledger.
pub fn genesis_prev_hash() -> String {
    format!("{}{}", HASH_PREFIX, "0".repeat(64))
}

pub fn is_genesis(prev_hash: &str) -> bool {
    prev_hash == genesis_prev_hash()
}

/// Fixed-width UTC timestamp used both in storage and in the hash input.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Compute the hash linking an entry to `prev_hash`.
pub fn link(prev_hash: &str, fields: &LinkFields<'_>) -> String {
    let canonical = canonical_string(prev_hash, fields);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{}{}", HASH_PREFIX, hex::encode(hasher.finalize()))
}

/// Create canonical string representation for hashing.
///
/// Every value is JSON-quoted so a `|` inside a caller string cannot shift
/// field boundaries.
pub fn canonical_string(prev_hash: &str, fields: &LinkFields<'_>) -> String {
    format!(
        "prev_hash:{}|event_type:{}|action:{}|payload:{}|status:{}|created_at:{}|id:{}",
        quote(prev_hash),
        quote(fields.event_type),
        quote(fields.action),
        canonical_payload(fields.payload),
        quote(fields.status),
        quote(&format_timestamp(fields.created_at)),
        fields.id
    )
}

pub fn canonical_payload(payload: &Payload) -> String {
    let mut out = String::new();
    write_object(&mut out, payload);
    out
}

/// Serialize a JSON value with sorted object keys and no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&quote(s)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map),
    }
}

fn write_object(out: &mut String, map: &Payload) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&quote(key));
        out.push(':');
        write_value(out, &map[key]);
    }
    out.push('}');
}

fn quote(s: &str) -> String {
    // Serializing a str cannot fail.
    serde_json::to_string(s).unwrap_or_default()
}
