//! Synthesizes the JSON-RPC error response for a non-ALLOW [`Decision`]
//! (spec.md §4.6 "Error code table"). Every code carries a `data.subluminal`
//! object so a well-behaved agent can distinguish a policy intervention from
//! an ordinary tool failure without string-matching the message.

use serde_json::Value;
use sublum_events::{Decision, DecisionAction};

/// The call was blocked outright.
pub const BLOCK_CODE: i64 = -32081;
/// The call was throttled; retry after `backoff_ms`.
pub const THROTTLE_CODE: i64 = -32082;
/// The call was rejected with a corrective hint (control mode only).
pub const REJECT_WITH_HINT_CODE: i64 = -32083;
/// The call was blocked and the whole run is being torn down.
pub const TERMINATE_RUN_CODE: i64 = -32084;

/// The JSON-RPC error code for a non-ALLOW action. Returns `None` for
/// `ALLOW`, which never produces a synthesized response.
#[must_use]
pub fn code_for_action(action: DecisionAction) -> Option<i64> {
    match action {
        DecisionAction::Allow => None,
        DecisionAction::Block => Some(BLOCK_CODE),
        DecisionAction::Throttle => Some(THROTTLE_CODE),
        DecisionAction::RejectWithHint => Some(REJECT_WITH_HINT_CODE),
        DecisionAction::TerminateRun => Some(TERMINATE_RUN_CODE),
    }
}

/// Identity of the call a synthesized error response refers to.
#[derive(Debug, Clone, Copy)]
pub struct CallIdentity<'a> {
    /// Run this call belongs to.
    pub run_id: &'a str,
    /// Identifier unique within the run.
    pub call_id: &'a str,
    /// Upstream server name.
    pub server_name: &'a str,
    /// Tool name.
    pub tool_name: &'a str,
    /// Canonical argument hash.
    pub args_hash: &'a str,
}

/// Build the JSON-RPC error response for `decision`, echoing `id`.
///
/// # Panics
///
/// Panics only if `decision.hint` somehow fails to serialize, which would
/// indicate a bug — every field of [`sublum_events::Hint`] is serializable.
#[must_use]
pub fn synthesize_error_response(id: &Value, decision: &Decision, call: CallIdentity<'_>) -> Value {
    let code = code_for_action(decision.action).unwrap_or(BLOCK_CODE);

    let mut data = serde_json::json!({
        "v": sublum_core::INTERFACE_VERSION,
        "action": decision.action,
        "rule_id": decision.rule_id,
        "reason_code": decision.explain.reason_code,
        "summary": decision.explain.summary,
        "run_id": call.run_id,
        "call_id": call.call_id,
        "server_name": call.server_name,
        "tool_name": call.tool_name,
        "args_hash": call.args_hash,
    });

    if let Some(backoff_ms) = decision.backoff_ms {
        data["backoff_ms"] = serde_json::json!(backoff_ms);
    }
    if let Some(hint) = &decision.hint {
        data["hint"] = serde_json::to_value(hint).expect("Hint always serializes");
    }

    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": decision.explain.summary,
            "data": { "subluminal": data },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sublum_events::{Explain, Hint, HintKind, PolicyInfo, Severity};

    fn policy() -> PolicyInfo {
        PolicyInfo { policy_id: "p".into(), policy_version: "1".into(), policy_hash: "h".into() }
    }

    fn call() -> CallIdentity<'static> {
        CallIdentity { run_id: "run-1", call_id: "call-1", server_name: "git", tool_name: "git_push", args_hash: "deadbeef" }
    }

    #[test]
    fn block_decision_uses_block_code() {
        let decision = Decision {
            action: DecisionAction::Block,
            rule_id: Some("r1".into()),
            severity: Severity::High,
            explain: Explain { summary: "blocked".into(), reason_code: "DENY".into() },
            policy: policy(),
            hint: None,
            backoff_ms: None,
        };
        let resp = synthesize_error_response(&serde_json::json!(1), &decision, call());
        assert_eq!(resp["error"]["code"], serde_json::json!(BLOCK_CODE));
        assert_eq!(resp["id"], serde_json::json!(1));
        assert_eq!(resp["error"]["data"]["subluminal"]["call_id"], serde_json::json!("call-1"));
        assert_eq!(resp["error"]["data"]["subluminal"]["rule_id"], serde_json::json!("r1"));
    }

    #[test]
    fn throttle_decision_carries_backoff_ms() {
        let decision = Decision {
            action: DecisionAction::Throttle,
            rule_id: Some("r1".into()),
            severity: Severity::Medium,
            explain: Explain { summary: "slow down".into(), reason_code: "RATE_LIMITED".into() },
            policy: policy(),
            hint: None,
            backoff_ms: Some(250),
        };
        let resp = synthesize_error_response(&serde_json::json!("abc"), &decision, call());
        assert_eq!(resp["error"]["code"], serde_json::json!(THROTTLE_CODE));
        assert_eq!(resp["error"]["data"]["subluminal"]["backoff_ms"], serde_json::json!(250));
    }

    #[test]
    fn reject_with_hint_carries_hint_verbatim() {
        let decision = Decision {
            action: DecisionAction::RejectWithHint,
            rule_id: Some("r1".into()),
            severity: Severity::Medium,
            explain: Explain { summary: "bad args".into(), reason_code: "ARG_FIX".into() },
            policy: policy(),
            hint: Some(Hint {
                hint_text: "retry with mode=safe".into(),
                suggested_args: Some(serde_json::json!({"mode": "safe"})),
                hint_kind: HintKind::ArgFix,
            }),
            backoff_ms: None,
        };
        let resp = synthesize_error_response(&serde_json::json!(2), &decision, call());
        assert_eq!(resp["error"]["code"], serde_json::json!(REJECT_WITH_HINT_CODE));
        assert_eq!(
            resp["error"]["data"]["subluminal"]["hint"]["hint_text"],
            serde_json::json!("retry with mode=safe")
        );
    }

    #[test]
    fn terminate_run_uses_its_own_code() {
        let decision = Decision {
            action: DecisionAction::TerminateRun,
            rule_id: Some("r1".into()),
            severity: Severity::Critical,
            explain: Explain { summary: "run terminated".into(), reason_code: "BREAKER_TRIPPED".into() },
            policy: policy(),
            hint: None,
            backoff_ms: None,
        };
        let resp = synthesize_error_response(&serde_json::json!(3), &decision, call());
        assert_eq!(resp["error"]["code"], serde_json::json!(TERMINATE_RUN_CODE));
    }
}
