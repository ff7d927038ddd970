// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-codec
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::io::Write;

/// Serialise `value` into its canonical byte form (spec.md §4.1):
///
/// - object keys sorted lexicographically by code point
/// - no insignificant whitespace
/// - minimal JSON string escaping
/// - whole-valued numbers render without a trailing `.0`
/// - array order is preserved verbatim
#[must_use]
pub fn canonicalize(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(map, out),
    }
}

fn write_object(map: &Map<String, Value>, out: &mut Vec<u8>) {
    // Never rely on the host map's iteration order (design note §9): sort
    // explicitly even though serde_json's default Map is already a BTreeMap.
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push(b'{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        write_string(key, out);
        out.push(b':');
        write_canonical(&map[*key], out);
    }
    out.push(b'}');
}

fn write_number(n: &Number, out: &mut Vec<u8>) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
        return;
    }
    if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
        return;
    }
    if let Some(f) = n.as_f64() {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e18 {
            // Whole-valued float: render without the trailing ".0".
            let _ = write!(out, "{}", f as i64);
            return;
        }
    }
    // Fallback: the crate's own (already-minimal) number formatting.
    out.extend_from_slice(n.to_string().as_bytes());
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// Compute the lowercase hex SHA-256 digest of `value`'s canonical form —
/// `args_hash` in spec.md §3/§4.1.
#[must_use]
pub fn args_hash(value: &Value) -> String {
    let bytes = canonicalize(value);
    hex::encode(Sha256::digest(bytes))
}

/// Incrementally hashes raw bytes (e.g. a request line as it streams past)
/// without holding the whole buffer twice. Used for `args_stream_hash`
/// (spec.md §4.6), which is computed over raw bytes, not canonical form.
#[derive(Debug, Default)]
pub struct RollingHasher {
    hasher: Sha256,
}

impl RollingHasher {
    /// Create a fresh hasher.
    #[must_use]
    pub fn new() -> Self {
        Self { hasher: Sha256::new() }
    }

    /// Feed another chunk of raw bytes into the running digest.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Finalise and return the lowercase hex digest.
    #[must_use]
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Render a bounded preview of `value`'s canonical form (spec.md §4.6):
/// the full canonical bytes when they fit in `max_bytes`, otherwise a
/// truncated prefix with `"..."` appended and `truncated = true`.
#[must_use]
pub fn bounded_preview(value: &Value, max_bytes: usize) -> (String, bool) {
    let canonical = canonicalize(value);
    if canonical.len() <= max_bytes {
        // `canonical` is guaranteed valid UTF-8 (it's built from `char`s).
        return (String::from_utf8(canonical).unwrap_or_default(), false);
    }
    let mut cut = max_bytes.min(canonical.len());
    // Don't split a multi-byte UTF-8 sequence in half.
    while cut > 0 && (canonical[cut] & 0b1100_0000) == 0b1000_0000 {
        cut -= 1;
    }
    let mut preview = String::from_utf8_lossy(&canonical[..cut]).into_owned();
    preview.push_str("...");
    (preview, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn golden_vector_is_stable_across_key_order() {
        let a = json!({"branch":"main","command":"git push","force":false});
        let b = json!({"command":"git push","branch":"main","force":false});
        assert_eq!(args_hash(&a), args_hash(&b));

        let canonical = canonicalize(&a);
        assert_eq!(
            std::str::from_utf8(&canonical).unwrap(),
            r#"{"branch":"main","command":"git push","force":false}"#
        );
        // Golden vector from spec.md §4.1/§8: the exact bytes fed into
        // SHA-256 are `{"branch":"main","command":"git push","force":false}`.
        assert_eq!(
            args_hash(&a),
            "e13c608f6d08e999ce8c39b52fa274a731ccab0e6b3b3e62cd23511b93d7527e"
        );
    }

    #[test]
    fn whole_valued_floats_drop_trailing_zero() {
        let v = json!({"count": 3.0});
        assert_eq!(canonicalize(&v), br#"{"count":3}"#);
    }

    #[test]
    fn fractional_floats_are_preserved() {
        let v = json!({"ratio": 1.5});
        assert_eq!(canonicalize(&v), br#"{"ratio":1.5}"#);
    }

    #[test]
    fn arrays_preserve_input_order() {
        let v = json!(["z", "a", "m"]);
        assert_eq!(canonicalize(&v), br#"["z","a","m"]"#);
    }

    #[test]
    fn strings_use_minimal_escapes() {
        let v = json!("hello \"world\"\n\ttab");
        let out = canonicalize(&v);
        assert_eq!(out, b"\"hello \\\"world\\\"\\n\\ttab\"");
    }

    #[test]
    fn nested_objects_sort_keys_recursively() {
        let v = json!({"b": {"z": 1, "a": 2}, "a": 1});
        assert_eq!(canonicalize(&v), br#"{"a":1,"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn bounded_preview_truncates_and_flags() {
        let v = json!({"data": "x".repeat(2000)});
        let (preview, truncated) = bounded_preview(&v, 32);
        assert!(truncated);
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= 35);
    }

    #[test]
    fn bounded_preview_full_when_small() {
        let v = json!({"a": 1});
        let (preview, truncated) = bounded_preview(&v, 1024);
        assert!(!truncated);
        assert_eq!(preview, r#"{"a":1}"#);
    }

    #[test]
    fn rolling_hasher_matches_sha256_of_raw_bytes() {
        let raw = b"{\"a\":1}\n";
        let mut hasher = RollingHasher::new();
        hasher.update(&raw[..4]);
        hasher.update(&raw[4..]);
        let got = hasher.finish();
        let want = hex::encode(Sha256::digest(raw));
        assert_eq!(got, want);
    }

    proptest::proptest! {
        #[test]
        fn hash_is_stable_under_key_shuffling(
            x in -1000i64..1000, y in -1000i64..1000, z in -1000i64..1000,
        ) {
            // Fixed, distinct keys so reordering is the only variable.
            let forward = json!({ "alpha": x, "beta": y, "gamma": z });
            let backward = json!({ "gamma": z, "beta": y, "alpha": x });
            proptest::prop_assert_eq!(args_hash(&forward), args_hash(&backward));
        }
    }
}
