// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-events
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sublum_core::error::ErrorClass;
use sublum_core::{Client, Env, Identity, Source, Transport, Workload};
use thiserror::Error;

/// Errors raised while decoding a single event line.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The line was not valid JSON, or was valid JSON that didn't match the
    /// envelope shape.
    #[error("malformed event line: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A bounded preview of an argument or result body (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Preview {
    /// `true` if the full body exceeded the preview/inspection ceiling.
    pub truncated: bool,
    /// The (possibly truncated, possibly empty) canonical-form preview.
    pub args_preview: String,
}

/// Everything known about a tool-call request at the moment it is observed
/// (spec.md §3, `CallInfo`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CallInfo {
    /// Identifier unique within this run.
    pub call_id: String,
    /// Upstream server name, preserved verbatim — never namespaced.
    pub server_name: String,
    /// Tool name, preserved verbatim — never namespaced.
    pub tool_name: String,
    /// Transport used to ferry this call.
    pub transport: Transport,
    /// Hex SHA-256 of the canonical argument form.
    pub args_hash: String,
    /// Length in bytes of the raw request line.
    pub bytes_in: u64,
    /// Monotonic sequence number, 1-based, gapless within this run.
    pub seq: u64,
    /// Bounded preview of the arguments.
    pub preview: Preview,
}

/// Decision action, one of the five terminal outcomes in spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    /// The call proceeds to upstream unmodified.
    Allow,
    /// The call is short-circuited with a policy-block error.
    Block,
    /// The call is short-circuited with a throttle error and backoff hint.
    Throttle,
    /// The call is short-circuited with a corrective hint (control mode only).
    RejectWithHint,
    /// The call is blocked and the whole run is torn down.
    TerminateRun,
}

impl DecisionAction {
    /// `true` when this action forwards the call to upstream.
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decision severity, independent of the action itself (e.g. an ALLOW can
/// still carry a "watch" severity for audit purposes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// No concern.
    Info,
    /// Worth a human glance.
    Low,
    /// Should be reviewed.
    Medium,
    /// Escalate.
    High,
    /// Immediate attention.
    Critical,
}

/// Kind of corrective hint attached to a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    /// Suggests different arguments.
    ArgFix,
    /// Budget exhausted.
    Budget,
    /// Rate limited.
    Rate,
    /// General safety concern.
    Safety,
    /// Anything else.
    Other,
}

/// A corrective hint surfaced only in `control` mode (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Hint {
    /// Human-readable corrective guidance.
    pub hint_text: String,
    /// Suggested replacement arguments, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_args: Option<serde_json::Value>,
    /// Category of hint.
    pub hint_kind: HintKind,
}

/// Identifies the exact policy bundle that produced a [`Decision`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyInfo {
    /// Bundle identifier.
    pub policy_id: String,
    /// Bundle version string.
    pub policy_version: String,
    /// Hex digest of the canonical bundle form.
    pub policy_hash: String,
}

/// Human- and machine-readable explanation of why a decision was reached.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Explain {
    /// One-line human summary.
    pub summary: String,
    /// Stable machine-readable reason code.
    pub reason_code: String,
}

/// The outcome of evaluating policy against a single call (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    /// The reported action (post mode-application, spec.md §4.4).
    pub action: DecisionAction,
    /// The rule that produced this decision, if any rule terminated the walk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// Severity independent of the action.
    pub severity: Severity,
    /// Explanation.
    pub explain: Explain,
    /// Which policy bundle produced this decision.
    pub policy: PolicyInfo,
    /// Corrective hint, only ever present for `REJECT_WITH_HINT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<Hint>,
    /// Suggested backoff in milliseconds, only ever present for `THROTTLE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
}

/// Outcome status of a completed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    /// Completed successfully (forwarded and a response arrived).
    Ok,
    /// Ended in an error (policy block, transport failure, timeout, crash).
    Error,
}

/// Structured error detail for a failed call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CallError {
    /// Error taxonomy bucket (spec.md §7).
    pub class: ErrorClass,
    /// Bounded, secret-free, plain-text message.
    pub message: String,
}

/// Terminal status of an entire run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Graceful shutdown.
    Completed,
    /// Shut down in response to a signal or agent-stdin EOF.
    Terminated,
    /// Upstream exited non-zero, or a fatal startup error occurred.
    Failed,
}

/// Aggregate counters attached to `run_end` (spec.md §8 invariant:
/// `calls_total == calls_allowed + calls_blocked + ...`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RunSummary {
    /// Total tool calls observed.
    pub calls_total: u64,
    /// Calls that were allowed through to upstream.
    pub calls_allowed: u64,
    /// Calls blocked outright.
    pub calls_blocked: u64,
    /// Calls throttled.
    pub calls_throttled: u64,
    /// Calls rejected with a corrective hint.
    pub calls_rejected: u64,
    /// Calls that triggered a full run termination.
    pub calls_terminated: u64,
    /// Wall-clock run duration.
    pub duration_ms: u64,
}

impl RunSummary {
    /// `true` iff the bucket counters add up to the total (spec.md §8).
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.calls_total
            == self.calls_allowed
                + self.calls_blocked
                + self.calls_throttled
                + self.calls_rejected
                + self.calls_terminated
    }
}

/// The discriminated event body; `type` on the wire (spec.md §3 "Event
/// variants").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
    /// First event of a run.
    RunStart,
    /// A `tools/call` request was observed.
    ToolCallStart {
        /// The call.
        call: CallInfo,
    },
    /// Policy was evaluated for a call.
    ToolCallDecision {
        /// Which call this decision belongs to.
        call_id: String,
        /// The decision.
        decision: Decision,
    },
    /// A call completed, successfully or otherwise.
    ToolCallEnd {
        /// Which call this completion belongs to.
        call_id: String,
        /// Terminal status.
        status: CallStatus,
        /// Wall-clock latency from start to end.
        latency_ms: u64,
        /// Bytes written back to the agent.
        bytes_out: u64,
        /// Bounded preview of the result, if any and if not dropped under
        /// backpressure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_preview: Option<Preview>,
        /// Error detail, present iff `status == ERROR`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CallError>,
    },
    /// Last event of a run.
    RunEnd {
        /// Aggregate counters.
        summary: RunSummary,
        /// Terminal run status.
        status: RunStatus,
    },
    /// A secret was (or failed to be) injected into the upstream's
    /// environment at startup.
    SecretInjection {
        /// Environment variable name the secret was bound to.
        inject_as: String,
        /// Opaque description of the secret reference (never the value).
        secret_ref: String,
        /// Source kind (`env`, `keychain`, `literal`).
        source: String,
        /// Whether resolution succeeded.
        success: bool,
    },
}

/// The full event envelope (spec.md §3): identity fields common to every
/// event in a run, plus the discriminated body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Interface version.
    pub v: String,
    /// Event timestamp, RFC-3339 nanos UTC, monotonically nondecreasing
    /// within one emitter.
    pub ts: DateTime<Utc>,
    /// Shared by every event in this run's lifetime.
    pub run_id: String,
    /// Shared by every event in this run's lifetime.
    pub agent_id: String,
    /// Principal, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Workload metadata, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<Workload>,
    /// Agent client.
    pub client: Client,
    /// Deployment environment.
    pub env: Env,
    /// Source identity (host/proc/shim).
    pub source: Source,
    /// The event body.
    #[serde(flatten)]
    pub body: EventBody,
}

impl Envelope {
    /// Build an envelope sharing `identity`'s fields, stamped with `ts`.
    #[must_use]
    pub fn new(identity: &Identity, ts: DateTime<Utc>, body: EventBody) -> Self {
        Self {
            v: sublum_core::INTERFACE_VERSION.to_string(),
            ts,
            run_id: identity.run_id.clone(),
            agent_id: identity.agent_id.clone(),
            principal: identity.principal.clone(),
            workload: identity.workload.clone(),
            client: identity.client,
            env: identity.env,
            source: identity.source.clone(),
            body,
        }
    }

    /// `true` if this envelope is preview-bearing and thus eligible for
    /// preview-dropping under emitter backpressure (spec.md §4.3).
    #[must_use]
    pub fn is_preview_bearing(&self) -> bool {
        matches!(
            self.body,
            EventBody::ToolCallStart { .. } | EventBody::ToolCallEnd { .. }
        )
    }

    /// `true` for decision events, which the emitter must never drop
    /// (spec.md §4.3 invariant (i)).
    #[must_use]
    pub fn is_decision(&self) -> bool {
        matches!(self.body, EventBody::ToolCallDecision { .. })
    }

    /// Force `truncated = true` and clear preview text, used when the
    /// emitter must degrade a preview-bearing event under backpressure
    /// without dropping it outright.
    pub fn drop_preview(&mut self) {
        match &mut self.body {
            EventBody::ToolCallStart { call } => {
                call.preview.truncated = true;
                call.preview.args_preview.clear();
            }
            EventBody::ToolCallEnd { result_preview, .. } => {
                if let Some(p) = result_preview.as_mut() {
                    p.truncated = true;
                    p.args_preview.clear();
                }
            }
            _ => {}
        }
    }

    /// Encode this envelope as a single newline-terminated JSON line. The
    /// returned string contains no other unescaped newline (spec.md §4.2).
    ///
    /// # Errors
    ///
    /// Returns an error only if the envelope somehow fails to serialise,
    /// which would indicate a bug (all fields here are serialisable).
    pub fn encode_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        debug_assert!(!line.contains('\n'), "canonical json must not embed newlines");
        line.push('\n');
        Ok(line)
    }

    /// Decode a single line (without its trailing newline) back into an
    /// [`Envelope`].
    pub fn decode_line(line: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(line.trim_end_matches('\n'))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sublum_core::time::MonotonicClock;

    fn identity() -> Identity {
        Identity {
            run_id: "run-1".into(),
            agent_id: "agent-1".into(),
            principal: None,
            workload: None,
            client: Client::Claude,
            env: Env::Dev,
            source: Source {
                host_id: "host-1".into(),
                proc_id: 42,
                shim_id: "shim-1".into(),
            },
        }
    }

    #[test]
    fn run_start_round_trips() {
        let clock = MonotonicClock::new();
        let env = Envelope::new(&identity(), clock.now(), EventBody::RunStart);
        let line = env.encode_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let decoded = Envelope::decode_line(&line).unwrap();
        assert_eq!(decoded.run_id, "run-1");
        assert!(matches!(decoded.body, EventBody::RunStart));
    }

    #[test]
    fn tool_call_start_round_trips_with_call_info() {
        let clock = MonotonicClock::new();
        let call = CallInfo {
            call_id: "call-1".into(),
            server_name: "git".into(),
            tool_name: "git_push".into(),
            transport: Transport::McpStdio,
            args_hash: "deadbeef".into(),
            bytes_in: 128,
            seq: 1,
            preview: Preview { truncated: false, args_preview: "{}".into() },
        };
        let env = Envelope::new(&identity(), clock.now(), EventBody::ToolCallStart { call });
        let line = env.encode_line().unwrap();
        let decoded = Envelope::decode_line(&line).unwrap();
        match decoded.body {
            EventBody::ToolCallStart { call } => {
                assert_eq!(call.call_id, "call-1");
                assert_eq!(call.seq, 1);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn drop_preview_forces_truncated_and_clears_text() {
        let clock = MonotonicClock::new();
        let call = CallInfo {
            call_id: "call-1".into(),
            server_name: "git".into(),
            tool_name: "git_push".into(),
            transport: Transport::McpStdio,
            args_hash: "deadbeef".into(),
            bytes_in: 128,
            seq: 1,
            preview: Preview { truncated: false, args_preview: "{\"big\":true}".into() },
        };
        let mut env = Envelope::new(&identity(), clock.now(), EventBody::ToolCallStart { call });
        assert!(env.is_preview_bearing());
        env.drop_preview();
        match env.body {
            EventBody::ToolCallStart { call } => {
                assert!(call.preview.truncated);
                assert!(call.preview.args_preview.is_empty());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn decision_events_are_never_preview_bearing() {
        let clock = MonotonicClock::new();
        let decision = Decision {
            action: DecisionAction::Allow,
            rule_id: None,
            severity: Severity::Info,
            explain: Explain { summary: "default allow".into(), reason_code: "DEFAULT_ALLOW".into() },
            policy: PolicyInfo {
                policy_id: "default".into(),
                policy_version: "1".into(),
                policy_hash: "abc".into(),
            },
            hint: None,
            backoff_ms: None,
        };
        let env = Envelope::new(
            &identity(),
            clock.now(),
            EventBody::ToolCallDecision { call_id: "call-1".into(), decision },
        );
        assert!(env.is_decision());
        assert!(!env.is_preview_bearing());
    }

    #[test]
    fn run_summary_consistency_invariant() {
        let mut s = RunSummary {
            calls_total: 3,
            calls_allowed: 2,
            calls_blocked: 1,
            ..Default::default()
        };
        assert!(s.is_consistent());
        s.calls_total = 4;
        assert!(!s.is_consistent());
    }

    #[test]
    fn hint_is_only_serialised_when_present() {
        let clock = MonotonicClock::new();
        let decision = Decision {
            action: DecisionAction::RejectWithHint,
            rule_id: Some("r1".into()),
            severity: Severity::Medium,
            explain: Explain { summary: "bad args".into(), reason_code: "ARG_FIX".into() },
            policy: PolicyInfo { policy_id: "p".into(), policy_version: "1".into(), policy_hash: "h".into() },
            hint: Some(Hint {
                hint_text: "retry safe".into(),
                suggested_args: Some(serde_json::json!({"mode": "safe"})),
                hint_kind: HintKind::ArgFix,
            }),
            backoff_ms: None,
        };
        let env = Envelope::new(&identity(), clock.now(), EventBody::ToolCallDecision { call_id: "c".into(), decision });
        let line = env.encode_line().unwrap();
        assert!(line.contains("\"hint\""));
        assert!(!line.contains("\"backoff_ms\""));
    }
}
