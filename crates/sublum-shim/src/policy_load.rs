//! Resolves the raw policy document from its configured source and pulls out
//! the `secret_bindings` map that sits alongside (not inside) the schema-
//! validated `PolicyBundle` (spec.md §4.5 input, with no corresponding
//! `PolicyBundle` field or CLI flag — see DESIGN.md for the resolution of
//! this open question).

use std::collections::BTreeMap;
use std::io::Read;

use sublum_core::config::PolicySource;
use sublum_secrets::SecretRef;

use crate::error::ShimError;

/// An empty, `observe`-mode bundle used when no policy source is configured
/// (spec.md §9: the shim must still run, auditing every call as ALLOW).
fn empty_observe_bundle() -> serde_json::Value {
    serde_json::json!({
        "mode": "observe",
        "info": {"policy_id": "none", "policy_version": "0"},
        "rules": [],
    })
}

/// Read the raw policy JSON document from `source`.
pub fn read_raw(source: &PolicySource) -> Result<serde_json::Value, ShimError> {
    let text = match source {
        PolicySource::None => return Ok(empty_observe_bundle()),
        PolicySource::InlineJson(json) => json.clone(),
        PolicySource::Path(path) if path.as_os_str() == "-" => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map_err(ShimError::PolicyIo)?;
            buf
        }
        PolicySource::Path(path) => std::fs::read_to_string(path).map_err(ShimError::PolicyIo)?,
    };
    serde_json::from_str(&text).map_err(ShimError::PolicyJson)
}

/// Extract the optional top-level `secret_bindings` object from the raw
/// policy document (`inject_as` -> [`SecretRef`]). Absent or malformed
/// entries are skipped with a warning rather than aborting the run — a
/// secret binding failure degrades to a per-binding audit fact, not a fatal
/// startup error (mirrors `sublum_secrets::resolve`'s own failure model).
#[must_use]
pub fn extract_secret_bindings(raw: &serde_json::Value) -> BTreeMap<String, SecretRef> {
    let mut out = BTreeMap::new();
    let Some(obj) = raw.get("secret_bindings").and_then(serde_json::Value::as_object) else {
        return out;
    };
    for (inject_as, value) in obj {
        match serde_json::from_value::<SecretRef>(value.clone()) {
            Ok(secret_ref) => {
                out.insert(inject_as.clone(), secret_ref);
            }
            Err(e) => {
                tracing::warn!(inject_as = %inject_as, error = %e, "malformed secret_bindings entry; skipping");
            }
        }
    }
    out
}
