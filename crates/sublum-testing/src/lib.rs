//! Fixture `PolicyBundle` JSON documents shared across crate test suites.
//! Kept as raw `serde_json::Value` rather than `sublum_policy` types so this
//! crate has no dependency on the engine it helps test.

use serde_json::{json, Value};

/// A bundle with no rules: every call is allowed by the default.
#[must_use]
pub fn allow_all_bundle() -> Value {
    json!({
        "mode": "control",
        "info": {"policy_id": "fixture-allow-all", "policy_version": "1"},
        "rules": [],
    })
}

/// A bundle that denies every call to `tool_name` on any server.
#[must_use]
pub fn deny_tool_bundle(tool_name: &str) -> Value {
    json!({
        "mode": "control",
        "info": {"policy_id": "fixture-deny-tool", "policy_version": "1"},
        "rules": [
            {
                "kind": "deny",
                "id": "deny-tool",
                "selector": {"tool_name": tool_name},
                "effect": {
                    "action": "BLOCK",
                    "severity": "high",
                    "reason_code": "FIXTURE_DENY_TOOL",
                    "summary": format!("{tool_name} is blocked by fixture policy"),
                },
            },
        ],
    })
}

/// A bundle with a single-token, no-refill rate limit on `tool_name`, so the
/// second call in a test throttles deterministically.
#[must_use]
pub fn rate_limited_bundle(tool_name: &str) -> Value {
    json!({
        "mode": "control",
        "info": {"policy_id": "fixture-rate-limited", "policy_version": "1"},
        "rules": [
            {
                "kind": "rate_limit",
                "id": "rate-limit-tool",
                "selector": {"tool_name": tool_name},
                "capacity": 1.0,
                "refill_per_second": 0.0,
                "effect": {
                    "action": "THROTTLE",
                    "severity": "medium",
                    "reason_code": "FIXTURE_RATE_LIMITED",
                },
            },
        ],
    })
}

/// A `control`-mode bundle that rejects `tool_name` with a corrective hint.
#[must_use]
pub fn hinted_reject_bundle(tool_name: &str) -> Value {
    json!({
        "mode": "control",
        "info": {"policy_id": "fixture-hinted-reject", "policy_version": "1"},
        "rules": [
            {
                "kind": "deny",
                "id": "hinted-reject-tool",
                "selector": {"tool_name": tool_name},
                "effect": {
                    "action": "REJECT_WITH_HINT",
                    "severity": "medium",
                    "reason_code": "FIXTURE_HINTED_REJECT",
                    "hint": {
                        "hint_text": "retry with a smaller batch size",
                        "hint_kind": "arg_fix",
                        "suggested_args": {"batch": 10},
                    },
                },
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_are_valid_json_objects() {
        for bundle in [
            allow_all_bundle(),
            deny_tool_bundle("git_push"),
            rate_limited_bundle("git_push"),
            hinted_reject_bundle("git_push"),
        ] {
            assert!(bundle.is_object());
            assert!(bundle["rules"].is_array());
        }
    }
}
