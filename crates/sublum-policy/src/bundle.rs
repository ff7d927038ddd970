use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sublum_events::{DecisionAction, HintKind, Severity};

/// Evaluation mode (spec.md §4.4 "Mode application"). Carried unchanged
/// from the compiled bundle into every `Decision.policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Rules execute and mutate state, but every externally reported action
    /// is forced to `ALLOW`.
    Observe,
    /// Rules execute and their computed action is reported, except
    /// `REJECT_WITH_HINT` which downgrades to `BLOCK`.
    Guardrails,
    /// Rules execute and their computed action is reported verbatim; the
    /// only mode that may emit `REJECT_WITH_HINT`.
    Control,
}

/// Identifying metadata for a compiled bundle, independent of its rules.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyBundleInfo {
    /// Stable identifier for this bundle.
    pub policy_id: String,
    /// Bundle version string, opaque to the engine.
    pub policy_version: String,
}

/// Suggested corrective hint configuration, only meaningful when `action ==
/// REJECT_WITH_HINT` and `mode == control`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HintSpec {
    /// Human-readable corrective guidance.
    pub hint_text: String,
    /// Category of hint.
    pub hint_kind: HintKind,
    /// Suggested replacement arguments, if applicable.
    #[serde(default)]
    pub suggested_args: Option<serde_json::Value>,
}

/// What happens when a stateful rule's effect fires, or a `deny` rule
/// matches outright.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EffectSpec {
    /// The action reported (subject to mode application).
    pub action: DecisionAction,
    /// Severity independent of the action.
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Stable machine-readable reason code, e.g. `"TEST_BLOCK"`.
    pub reason_code: String,
    /// One-line human summary. Defaults to the reason code if absent.
    #[serde(default)]
    pub summary: Option<String>,
    /// Corrective hint, only used when `action == REJECT_WITH_HINT`.
    #[serde(default)]
    pub hint: Option<HintSpec>,
}

fn default_severity() -> Severity {
    Severity::Medium
}

/// A single policy rule (spec.md §3 `Rule`). Tagged by `kind` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// Matching calls are allowed outright; the walk terminates here.
    Allow {
        /// Unique rule identifier.
        id: String,
        /// Match criteria.
        selector: crate::selector::Selector,
    },
    /// Matching calls are denied; the walk terminates here.
    Deny {
        /// Unique rule identifier.
        id: String,
        /// Match criteria.
        selector: crate::selector::Selector,
        /// What to report.
        effect: EffectSpec,
    },
    /// An integer counter that decrements once per matching call.
    Budget {
        /// Unique rule identifier.
        id: String,
        /// Match criteria.
        selector: crate::selector::Selector,
        /// Starting (and ceiling) counter value. Must be positive.
        limit: i64,
        /// What to report once the counter is exhausted.
        effect: EffectSpec,
    },
    /// A token bucket consumed once per matching call.
    RateLimit {
        /// Unique rule identifier.
        id: String,
        /// Match criteria.
        selector: crate::selector::Selector,
        /// Bucket capacity. Must be positive.
        capacity: f64,
        /// Tokens restored per second. Must be non-negative.
        refill_per_second: f64,
        /// What to report when the bucket is empty.
        effect: EffectSpec,
    },
    /// A sliding-window circuit breaker over repeats or errors.
    Breaker {
        /// Unique rule identifier.
        id: String,
        /// Match criteria.
        selector: crate::selector::Selector,
        /// Repeat count (by `args_hash`) within the window that trips the
        /// breaker. `0` disables repeat tripping.
        #[serde(default)]
        repeat_threshold: u32,
        /// Error count (by tool) within the window that trips the breaker.
        /// `0` disables error tripping.
        #[serde(default)]
        error_threshold: u32,
        /// Sliding window width in milliseconds.
        window_ms: u64,
        /// How long a trip holds once triggered, in milliseconds.
        cooldown_ms: u64,
        /// What to report while tripped.
        effect: EffectSpec,
    },
    /// A TTL dedupe table keyed by `(server_name, tool_name, args_hash)`.
    Dedupe {
        /// Unique rule identifier.
        id: String,
        /// Match criteria.
        selector: crate::selector::Selector,
        /// Entry time-to-live in milliseconds.
        window_ms: u64,
        /// What to report on a repeat within the window.
        effect: EffectSpec,
    },
    /// Matches never terminate the walk; they add `risk_class` to the
    /// call's evaluation-time tag set.
    Tag {
        /// Unique rule identifier.
        id: String,
        /// Match criteria.
        selector: crate::selector::Selector,
        /// Risk class label applied on match.
        risk_class: String,
    },
}

impl Rule {
    /// The rule's identifier, present on every variant.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Allow { id, .. }
            | Self::Deny { id, .. }
            | Self::Budget { id, .. }
            | Self::RateLimit { id, .. }
            | Self::Breaker { id, .. }
            | Self::Dedupe { id, .. }
            | Self::Tag { id, .. } => id,
        }
    }

    /// The rule's selector, present on every variant.
    #[must_use]
    pub fn selector(&self) -> &crate::selector::Selector {
        match self {
            Self::Allow { selector, .. }
            | Self::Deny { selector, .. }
            | Self::Budget { selector, .. }
            | Self::RateLimit { selector, .. }
            | Self::Breaker { selector, .. }
            | Self::Dedupe { selector, .. }
            | Self::Tag { selector, .. } => selector,
        }
    }
}

/// A versioned set of rules plus an evaluation mode; compiles once at shim
/// startup (spec.md §3 `PolicyBundle`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyBundle {
    /// Evaluation mode.
    pub mode: Mode,
    /// Identifying metadata.
    pub info: PolicyBundleInfo,
    /// Rules, evaluated top to bottom (document order is significant).
    pub rules: Vec<Rule>,
}
