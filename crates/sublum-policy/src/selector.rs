use globset::{Glob, GlobMatcher};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use sublum_core::{Client, Env};

use crate::PolicyError;

/// A predicate over the call's argument tree, addressed by a dotted path
/// into nested objects (array indexing is not supported; spec.md §4.4 args
/// predicates are key-exists / enum-in / numeric-range only).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgsPredicate {
    /// The path resolves to any value at all.
    KeyExists {
        /// Dotted path, e.g. `"options.force"`.
        path: String,
    },
    /// The path resolves to a value equal to one of `values`.
    EnumIn {
        /// Dotted path.
        path: String,
        /// Accepted values.
        values: Vec<serde_json::Value>,
    },
    /// The path resolves to a JSON number within `[min, max]` (either bound
    /// may be absent for an open range).
    NumericRange {
        /// Dotted path.
        path: String,
        /// Inclusive lower bound, if any.
        #[serde(default)]
        min: Option<f64>,
        /// Inclusive upper bound, if any.
        #[serde(default)]
        max: Option<f64>,
    },
}

impl ArgsPredicate {
    fn holds(&self, args: &serde_json::Value) -> bool {
        match self {
            Self::KeyExists { path } => resolve_path(args, path).is_some(),
            Self::EnumIn { path, values } => resolve_path(args, path)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Self::NumericRange { path, min, max } => resolve_path(args, path)
                .and_then(serde_json::Value::as_f64)
                .is_some_and(|n| min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi)),
        }
    }
}

fn resolve_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    path.split('.')
        .filter(|seg| !seg.is_empty())
        .try_fold(value, |cur, seg| cur.as_object()?.get(seg))
}

/// Declarative match criteria for a rule (spec.md §3 `Selector`). Every
/// populated field must match for the selector as a whole to match; an
/// empty/absent field imposes no constraint. A selector referencing labels
/// absent from the call's workload simply fails to match — never an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Selector {
    /// Deployment environments this rule applies to.
    #[serde(default)]
    pub env: Vec<Env>,
    /// Agent instance identifiers this rule applies to.
    #[serde(default)]
    pub agent_id: Vec<String>,
    /// Agent clients this rule applies to.
    #[serde(default)]
    pub client: Vec<Client>,
    /// Workload labels that must all be present with matching values.
    #[serde(default)]
    pub workload_labels: std::collections::BTreeMap<String, String>,
    /// Glob over the upstream server name.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Glob over the tool name.
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Risk classes, any one of which must already be tagged on the call.
    #[serde(default)]
    pub risk_class: Vec<String>,
    /// Predicates over the call's argument tree, all of which must hold.
    #[serde(default)]
    pub args: Vec<ArgsPredicate>,
}

/// A [`Selector`] with its glob patterns pre-compiled.
#[derive(Debug)]
pub struct CompiledSelector {
    env: Vec<Env>,
    agent_id: Vec<String>,
    client: Vec<Client>,
    workload_labels: std::collections::BTreeMap<String, String>,
    server_name: Option<GlobMatcher>,
    tool_name: Option<GlobMatcher>,
    risk_class: Vec<String>,
    args: Vec<ArgsPredicate>,
}

impl CompiledSelector {
    /// Compile a [`Selector`], validating its glob patterns.
    pub fn compile(selector: &Selector) -> Result<Self, PolicyError> {
        let compile_glob = |pattern: &str| -> Result<GlobMatcher, PolicyError> {
            Ok(Glob::new(pattern)
                .map_err(|e| PolicyError::Malformed(format!("invalid glob {pattern:?}: {e}")))?
                .compile_matcher())
        };
        Ok(Self {
            env: selector.env.clone(),
            agent_id: selector.agent_id.clone(),
            client: selector.client.clone(),
            workload_labels: selector.workload_labels.clone(),
            server_name: selector.server_name.as_deref().map(compile_glob).transpose()?,
            tool_name: selector.tool_name.as_deref().map(compile_glob).transpose()?,
            risk_class: selector.risk_class.clone(),
            args: selector.args.clone(),
        })
    }

    /// Evaluate this selector against a call, given the risk classes tagged
    /// so far in the current evaluation pass.
    #[must_use]
    pub fn matches(&self, ctx: &super::DecisionContext<'_>, risk_classes: &BTreeSet<String>) -> bool {
        if !self.env.is_empty() && !self.env.contains(&ctx.identity.env) {
            return false;
        }
        if !self.agent_id.is_empty() && !self.agent_id.iter().any(|a| a == &ctx.identity.agent_id) {
            return false;
        }
        if !self.client.is_empty() && !self.client.contains(&ctx.identity.client) {
            return false;
        }
        if !self.workload_labels.is_empty() {
            let labels = ctx.identity.workload.as_ref().map(|w| &w.labels);
            let Some(labels) = labels else { return false };
            if !self
                .workload_labels
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
            {
                return false;
            }
        }
        if let Some(m) = &self.server_name {
            if !m.is_match(ctx.server_name) {
                return false;
            }
        }
        if let Some(m) = &self.tool_name {
            if !m.is_match(ctx.tool_name) {
                return false;
            }
        }
        if !self.risk_class.is_empty() && !self.risk_class.iter().any(|c| risk_classes.contains(c)) {
            return false;
        }
        self.args.iter().all(|p| p.holds(ctx.args))
    }
}
