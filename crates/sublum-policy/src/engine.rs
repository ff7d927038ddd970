use std::collections::BTreeSet;
use std::time::Instant;

use sublum_events::{Decision, DecisionAction, Explain, Hint, PolicyInfo, Severity};

use crate::bundle::{EffectSpec, Mode, PolicyBundle, Rule};
use crate::selector::CompiledSelector;
use crate::state::{BreakerState, BudgetState, DedupeState, RateLimitState};
use crate::PolicyError;

/// Everything the evaluator needs to know about one call (spec.md §4.4
/// `DecisionContext`).
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    /// The run/agent identity this call belongs to.
    pub identity: &'a sublum_core::Identity,
    /// Upstream server name.
    pub server_name: &'a str,
    /// Tool name.
    pub tool_name: &'a str,
    /// Hex SHA-256 of the canonical argument form.
    pub args_hash: &'a str,
    /// The argument tree, for `args` predicates.
    pub args: &'a serde_json::Value,
    /// Wall-clock timestamp, used only for display, never for window math.
    pub now: chrono::DateTime<chrono::Utc>,
}

enum CompiledKind {
    Allow,
    Deny { effect: EffectSpec },
    Budget { limit: i64, effect: EffectSpec },
    RateLimit { capacity: f64, refill_per_second: f64, effect: EffectSpec },
    Breaker { repeat_threshold: u32, error_threshold: u32, window_ms: u64, cooldown_ms: u64, effect: EffectSpec },
    Dedupe { window_ms: u64, effect: EffectSpec },
    Tag { risk_class: String },
}

struct CompiledRule {
    id: String,
    selector: CompiledSelector,
    kind: CompiledKind,
}

/// A compiled [`PolicyBundle`] plus the stateful resources its rules need
/// across calls. Compiles once at shim startup; a malformed bundle never
/// produces an engine (spec.md §4.4 "Failure semantics").
pub struct PolicyEngine {
    mode: Mode,
    info: PolicyInfo,
    rules: Vec<CompiledRule>,
    budgets: BudgetState,
    rate_limits: RateLimitState,
    breakers: BreakerState,
    dedupe: DedupeState,
}

impl PolicyEngine {
    /// Compile a raw JSON document into a [`PolicyEngine`].
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the document fails schema validation,
    /// fails to deserialize, contains duplicate rule ids, invalid globs, or
    /// out-of-range numeric parameters (non-positive limits/capacities,
    /// zero windows).
    pub fn compile(raw: &serde_json::Value) -> Result<Self, PolicyError> {
        crate::schema::validate(raw)?;
        let bundle: PolicyBundle = serde_json::from_value(raw.clone())
            .map_err(|e| PolicyError::Malformed(e.to_string()))?;

        let mut seen_ids = BTreeSet::new();
        let mut rules = Vec::with_capacity(bundle.rules.len());
        for rule in &bundle.rules {
            if !seen_ids.insert(rule.id().to_string()) {
                return Err(PolicyError::DuplicateRuleId(rule.id().to_string()));
            }
            rules.push(compile_rule(rule)?);
        }

        let policy_hash = sublum_codec::args_hash(raw);

        Ok(Self {
            mode: bundle.mode,
            info: PolicyInfo {
                policy_id: bundle.info.policy_id,
                policy_version: bundle.info.policy_version,
                policy_hash,
            },
            rules,
            budgets: BudgetState::default(),
            rate_limits: RateLimitState::default(),
            breakers: BreakerState::default(),
            dedupe: DedupeState::default(),
        })
    }

    /// Identifying metadata for the compiled bundle, attached verbatim to
    /// every [`Decision`].
    #[must_use]
    pub fn info(&self) -> &PolicyInfo {
        &self.info
    }

    /// Evaluate a call against the compiled rules (spec.md §4.4).
    #[must_use]
    pub fn evaluate(&self, ctx: &DecisionContext<'_>) -> Decision {
        let now = Instant::now();
        let mut risk_classes = BTreeSet::new();

        for rule in &self.rules {
            if let CompiledKind::Tag { risk_class } = &rule.kind {
                if rule.selector.matches(ctx, &risk_classes) {
                    risk_classes.insert(risk_class.clone());
                }
            }
        }

        for rule in &self.rules {
            if matches!(rule.kind, CompiledKind::Tag { .. }) {
                continue;
            }
            if !rule.selector.matches(ctx, &risk_classes) {
                continue;
            }
            if let Some((action, effect)) = self.fires(rule, ctx, now) {
                return self.finalize(rule.id.clone(), action, effect);
            }
        }

        Decision {
            action: DecisionAction::Allow,
            rule_id: None,
            severity: Severity::Info,
            explain: Explain { summary: "no rule matched".into(), reason_code: "DEFAULT_ALLOW".into() },
            policy: self.info.clone(),
            hint: None,
            backoff_ms: None,
        }
    }

    /// Record that a call completed in error, feeding breaker rules whose
    /// selector covers `{server_name, tool_name}` (spec.md §4.4 "error
    /// counter keyed by tool"). The shim calls this from the point where
    /// `tool_call_end.status == ERROR` is determined, after `evaluate` has
    /// already run for the call.
    pub fn observe_call_error(&self, server_name: &str, tool_name: &str, identity: &sublum_core::Identity) {
        let now = Instant::now();
        let risk_classes = BTreeSet::new();
        for rule in &self.rules {
            let CompiledKind::Breaker { error_threshold, window_ms, cooldown_ms, .. } = &rule.kind else {
                continue;
            };
            let probe = DecisionContext {
                identity,
                server_name,
                tool_name,
                args_hash: "",
                args: &serde_json::Value::Null,
                now: chrono::Utc::now(),
            };
            if rule.selector.matches(&probe, &risk_classes) {
                self.breakers.observe_error(&rule.id, tool_name, *error_threshold, *window_ms, *cooldown_ms, now);
            }
        }
    }

    fn fires(&self, rule: &CompiledRule, ctx: &DecisionContext<'_>, now: Instant) -> Option<(DecisionAction, EffectOutcome)> {
        match &rule.kind {
            CompiledKind::Allow => Some((DecisionAction::Allow, EffectOutcome::allow())),
            CompiledKind::Deny { effect } => Some((effect.action, EffectOutcome::from_spec(effect, None))),
            CompiledKind::Budget { limit, effect } => {
                let key = format!("{}:{}", rule.id, default_key(ctx));
                if self.budgets.try_consume(&key, *limit) {
                    None
                } else {
                    Some((effect.action, EffectOutcome::from_spec(effect, None)))
                }
            }
            CompiledKind::RateLimit { capacity, refill_per_second, effect } => {
                let key = format!("{}:{}", rule.id, default_key(ctx));
                let result = self.rate_limits.try_consume(&key, *capacity, *refill_per_second, now);
                if result.allowed {
                    None
                } else {
                    Some((effect.action, EffectOutcome::from_spec(effect, result.backoff_ms)))
                }
            }
            CompiledKind::Breaker { repeat_threshold, window_ms, cooldown_ms, effect, .. } => {
                let tripped = self.breakers.observe_call(&rule.id, ctx.args_hash, *repeat_threshold, *window_ms, *cooldown_ms, now);
                if tripped {
                    Some((effect.action, EffectOutcome::from_spec(effect, None)))
                } else {
                    None
                }
            }
            CompiledKind::Dedupe { window_ms, effect } => {
                let key = format!("{}:{}|{}|{}", rule.id, ctx.server_name, ctx.tool_name, ctx.args_hash);
                if self.dedupe.check_and_record(&key, *window_ms, now) {
                    Some((effect.action, EffectOutcome::from_spec(effect, None)))
                } else {
                    None
                }
            }
            CompiledKind::Tag { .. } => unreachable!("tag rules are filtered out before fires() is called"),
        }
    }

    fn finalize(&self, rule_id: String, computed_action: DecisionAction, outcome: EffectOutcome) -> Decision {
        let reported_action = match self.mode {
            Mode::Observe => DecisionAction::Allow,
            Mode::Guardrails if computed_action == DecisionAction::RejectWithHint => DecisionAction::Block,
            Mode::Guardrails | Mode::Control => computed_action,
        };
        let hint = if reported_action == DecisionAction::RejectWithHint { outcome.hint } else { None };
        let backoff_ms = if reported_action == DecisionAction::Throttle { outcome.backoff_ms } else { None };

        Decision {
            action: reported_action,
            rule_id: Some(rule_id),
            severity: outcome.severity,
            explain: Explain { summary: outcome.summary, reason_code: outcome.reason_code },
            policy: self.info.clone(),
            hint,
            backoff_ms,
        }
    }
}

struct EffectOutcome {
    severity: Severity,
    summary: String,
    reason_code: String,
    hint: Option<Hint>,
    backoff_ms: Option<u64>,
}

impl EffectOutcome {
    fn allow() -> Self {
        Self {
            severity: Severity::Info,
            summary: "explicit allow rule matched".into(),
            reason_code: "EXPLICIT_ALLOW".into(),
            hint: None,
            backoff_ms: None,
        }
    }

    fn from_spec(effect: &EffectSpec, backoff_ms: Option<u64>) -> Self {
        Self {
            severity: effect.severity,
            summary: effect.summary.clone().unwrap_or_else(|| effect.reason_code.clone()),
            reason_code: effect.reason_code.clone(),
            hint: effect.hint.as_ref().map(|h| Hint {
                hint_text: h.hint_text.clone(),
                suggested_args: h.suggested_args.clone(),
                hint_kind: h.hint_kind,
            }),
            backoff_ms,
        }
    }
}

fn default_key(ctx: &DecisionContext<'_>) -> String {
    format!("{}\u{1}{}\u{1}{}\u{1}{}", ctx.identity.run_id, ctx.identity.agent_id, ctx.server_name, ctx.tool_name)
}

fn compile_rule(rule: &Rule) -> Result<CompiledRule, PolicyError> {
    let selector = CompiledSelector::compile(rule.selector())?;
    let kind = match rule {
        Rule::Allow { .. } => CompiledKind::Allow,
        Rule::Deny { effect, .. } => CompiledKind::Deny { effect: effect.clone() },
        Rule::Budget { limit, effect, .. } => {
            if *limit <= 0 {
                return Err(PolicyError::Malformed(format!("rule {:?}: budget limit must be positive", rule.id())));
            }
            CompiledKind::Budget { limit: *limit, effect: effect.clone() }
        }
        Rule::RateLimit { capacity, refill_per_second, effect, .. } => {
            if *capacity <= 0.0 || *refill_per_second < 0.0 {
                return Err(PolicyError::Malformed(format!(
                    "rule {:?}: rate_limit capacity must be positive and refill_per_second non-negative",
                    rule.id()
                )));
            }
            CompiledKind::RateLimit { capacity: *capacity, refill_per_second: *refill_per_second, effect: effect.clone() }
        }
        Rule::Breaker { repeat_threshold, error_threshold, window_ms, cooldown_ms, effect, .. } => {
            if *window_ms == 0 {
                return Err(PolicyError::Malformed(format!("rule {:?}: breaker window_ms must be positive", rule.id())));
            }
            if *repeat_threshold == 0 && *error_threshold == 0 {
                return Err(PolicyError::Malformed(format!(
                    "rule {:?}: breaker must set at least one of repeat_threshold/error_threshold",
                    rule.id()
                )));
            }
            CompiledKind::Breaker {
                repeat_threshold: *repeat_threshold,
                error_threshold: *error_threshold,
                window_ms: *window_ms,
                cooldown_ms: *cooldown_ms,
                effect: effect.clone(),
            }
        }
        Rule::Dedupe { window_ms, effect, .. } => {
            if *window_ms == 0 {
                return Err(PolicyError::Malformed(format!("rule {:?}: dedupe window_ms must be positive", rule.id())));
            }
            CompiledKind::Dedupe { window_ms: *window_ms, effect: effect.clone() }
        }
        Rule::Tag { risk_class, .. } => CompiledKind::Tag { risk_class: risk_class.clone() },
    };
    Ok(CompiledRule { id: rule.id().to_string(), selector, kind })
}
