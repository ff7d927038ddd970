//! JSON Schema validation of a raw policy document, ahead of `serde_json`
//! deserialization, so a malformed bundle is rejected with a precise path
//! rather than a generic `serde` error (spec.md §4.4 "a malformed bundle is
//! rejected at compile time").

use std::sync::OnceLock;

use crate::bundle::PolicyBundle;
use crate::PolicyError;

fn compiled_schema() -> &'static jsonschema::Validator {
    static SCHEMA: OnceLock<jsonschema::Validator> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let schema = schemars::schema_for!(PolicyBundle);
        let schema_value = serde_json::to_value(&schema).expect("PolicyBundle schema serializes");
        jsonschema::validator_for(&schema_value).expect("PolicyBundle schema is itself valid")
    })
}

/// Validate `raw` against the [`PolicyBundle`] JSON Schema.
///
/// # Errors
///
/// Returns [`PolicyError::SchemaInvalid`] describing every validation
/// failure, joined with `"; "`.
pub fn validate(raw: &serde_json::Value) -> Result<(), PolicyError> {
    let validator = compiled_schema();
    let errors: Vec<String> = validator.iter_errors(raw).map(|e| format!("{} at {}", e, e.instance_path)).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(PolicyError::SchemaInvalid(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_valid_bundle_passes() {
        let doc = serde_json::json!({
            "mode": "guardrails",
            "info": {"policy_id": "p", "policy_version": "1"},
            "rules": [],
        });
        assert!(validate(&doc).is_ok());
    }

    #[test]
    fn missing_mode_fails() {
        let doc = serde_json::json!({
            "info": {"policy_id": "p", "policy_version": "1"},
            "rules": [],
        });
        assert!(validate(&doc).is_err());
    }

    #[test]
    fn unknown_mode_value_fails() {
        let doc = serde_json::json!({
            "mode": "chaos",
            "info": {"policy_id": "p", "policy_version": "1"},
            "rules": [],
        });
        assert!(validate(&doc).is_err());
    }
}
