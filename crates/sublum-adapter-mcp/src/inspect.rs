//! Bounded inspection of `tools/call` arguments (spec.md §4.6 "Bounded
//! inspection", "Preview sizes").
//!
//! The adapter frames messages by newline rather than by a byte ring
//! buffer, so it always holds the complete parsed request in memory before
//! this runs. The ceiling this module enforces is therefore applied to the
//! canonical-form/preview work, not to the parse itself: once a request's
//! raw line exceeds `max_inspect_bytes`, `args_hash` is computed from only
//! the first `max_inspect_bytes` bytes of the canonical form (a documented
//! prefix approximation) and `args_stream_hash` — the true SHA-256 of the
//! complete raw bytes — is recorded alongside it.

use sublum_codec::RollingHasher;
use sublum_events::Preview;

/// Default resource ceiling on canonicalised/hashed argument bytes
/// (spec.md §4.6).
pub const DEFAULT_MAX_INSPECT_BYTES: u64 = 1_048_576;

/// Default ceiling on preview text length (spec.md §4.6).
pub const DEFAULT_MAX_PREVIEW_BYTES: usize = 1024;

/// Placeholder preview text used when the request exceeded the inspection
/// ceiling outright (spec.md §4.6: "`args_preview` is either omitted or set
/// to `\"[TRUNCATED]\"`").
pub const TRUNCATED_PLACEHOLDER: &str = "[TRUNCATED]";

/// Outcome of bounded inspection: what gets attached to `CallInfo` and fed
/// to the policy engine.
#[derive(Debug, Clone)]
pub struct Inspected {
    /// Canonical-form argument hash, `args_hash` in spec.md §3/§4.1 — a
    /// prefix hash when `args_stream_hash` is also present.
    pub args_hash: String,
    /// SHA-256 of the complete raw request line. Present only when the
    /// request exceeded `max_inspect_bytes`.
    pub args_stream_hash: Option<String>,
    /// Bounded preview of the arguments.
    pub preview: Preview,
}

/// Inspect `args` (already parsed from `raw_line`) under the given
/// ceilings.
#[must_use]
pub fn inspect(raw_line: &[u8], args: &serde_json::Value, max_inspect_bytes: u64, max_preview_bytes: usize) -> Inspected {
    let canonical = sublum_codec::canonicalize(args);

    if raw_line.len() as u64 > max_inspect_bytes {
        let mut stream_hasher = RollingHasher::new();
        stream_hasher.update(raw_line);
        let args_stream_hash = stream_hasher.finish();

        let cut = (max_inspect_bytes as usize).min(canonical.len());
        let mut prefix_hasher = RollingHasher::new();
        prefix_hasher.update(&canonical[..cut]);
        let args_hash = prefix_hasher.finish();

        Inspected {
            args_hash,
            args_stream_hash: Some(args_stream_hash),
            preview: Preview { truncated: true, args_preview: TRUNCATED_PLACEHOLDER.to_string() },
        }
    } else {
        let args_hash = sublum_codec::args_hash(args);
        let (args_preview, truncated) = sublum_codec::bounded_preview(args, max_preview_bytes);
        Inspected { args_hash, args_stream_hash: None, preview: Preview { truncated, args_preview } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_request_gets_full_canonical_hash_and_no_stream_hash() {
        let args = json!({"branch": "main"});
        let raw = serde_json::to_vec(&args).unwrap();
        let got = inspect(&raw, &args, DEFAULT_MAX_INSPECT_BYTES, DEFAULT_MAX_PREVIEW_BYTES);
        assert_eq!(got.args_hash, sublum_codec::args_hash(&args));
        assert!(got.args_stream_hash.is_none());
        assert!(!got.preview.truncated);
    }

    #[test]
    fn oversized_request_gets_stream_hash_and_truncated_placeholder() {
        let args = json!({"data": "x".repeat(200)});
        let raw = serde_json::to_vec(&args).unwrap();
        let got = inspect(&raw, &args, 50, DEFAULT_MAX_PREVIEW_BYTES);
        assert!(got.args_stream_hash.is_some());
        assert!(got.preview.truncated);
        assert_eq!(got.preview.args_preview, TRUNCATED_PLACEHOLDER);
        // The prefix hash differs from the full canonical hash for this input.
        assert_ne!(got.args_hash, sublum_codec::args_hash(&args));
    }

    #[test]
    fn preview_truncates_independent_of_inspect_ceiling() {
        let args = json!({"data": "y".repeat(2000)});
        let raw = serde_json::to_vec(&args).unwrap();
        let got = inspect(&raw, &args, DEFAULT_MAX_INSPECT_BYTES, 32);
        assert!(got.args_stream_hash.is_none());
        assert!(got.preview.truncated);
        assert!(got.preview.args_preview.ends_with("..."));
    }

    #[test]
    fn stream_hash_matches_sha256_of_raw_bytes() {
        let args = json!({"data": "z".repeat(200)});
        let raw = serde_json::to_vec(&args).unwrap();
        let got = inspect(&raw, &args, 10, DEFAULT_MAX_PREVIEW_BYTES);
        let mut hasher = RollingHasher::new();
        hasher.update(&raw);
        assert_eq!(got.args_stream_hash.unwrap(), hasher.finish());
    }
}
