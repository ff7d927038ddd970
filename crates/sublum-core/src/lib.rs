// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Identity, configuration validation, and the error catalog shared by every
//! Subluminal crate: the shim, the policy engine, the adapter, the ledger.

/// Configuration validation and startup-time warnings.
pub mod config;
/// The `SUB-X###` error catalog.
pub mod error;
/// Monotonic sequence counters and RFC-3339-nanos timestamps.
pub mod time;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current interface version stamped into every event envelope.
pub const INTERFACE_VERSION: &str = "subluminal/v1";

/// Sentinel used whenever an identity field is absent from the environment.
pub const UNKNOWN: &str = "unknown";

/// Which agent client spawned this shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Client {
    /// Claude Code or another Claude-branded agent host.
    Claude,
    /// OpenAI Codex CLI or SDK.
    Codex,
    /// A non-interactive / scripted agent host.
    Headless,
    /// Unrecognized or unset.
    Unknown,
}

impl Default for Client {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Client {
    /// Parse from the `SUB_CLIENT` environment variable, defaulting to
    /// [`Client::Unknown`] on anything unrecognized rather than panicking.
    #[must_use]
    pub fn from_env_value(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "claude" => Self::Claude,
            "codex" => Self::Codex,
            "headless" => Self::Headless,
            _ => Self::Unknown,
        }
    }
}

/// Deployment environment the shim believes it is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Env {
    /// A developer's workstation.
    Dev,
    /// Continuous-integration runner.
    Ci,
    /// Production.
    Prod,
    /// Unrecognized or unset.
    Unknown,
}

impl Default for Env {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Env {
    /// Parse from the `SUB_ENV` environment variable.
    #[must_use]
    pub fn from_env_value(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dev" => Self::Dev,
            "ci" => Self::Ci,
            "prod" => Self::Prod,
            _ => Self::Unknown,
        }
    }
}

/// How the adapter ferries bytes between agent and upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Line-delimited JSON-RPC 2.0 over stdio.
    McpStdio,
}

/// Identifies the host/process/shim instance emitting events, for
/// disambiguating multiple concurrent shims on one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Source {
    /// Stable identifier for the physical or virtual host.
    pub host_id: String,
    /// OS process id of the shim.
    pub proc_id: u32,
    /// Logical id for this shim instance (stable across restarts if the
    /// caller supplies one via configuration; otherwise generated).
    pub shim_id: String,
}

/// Workload metadata describing what the agent is working on, parsed from
/// the `SUB_WORKLOAD` JSON environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Workload {
    /// Repository identifier (e.g. `org/repo`).
    #[serde(default)]
    pub repo: Option<String>,
    /// Branch or ref being worked on.
    #[serde(default)]
    pub branch: Option<String>,
    /// Logical namespace (team, project, tenant).
    #[serde(default)]
    pub namespace: Option<String>,
    /// Service account under which the agent is acting, if any.
    #[serde(default)]
    pub service_account: Option<String>,
    /// Free-form labels used by policy selectors.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// The identity of a single shim run, established once at process start from
/// environment variables (spec.md §6) and carried unchanged through every
/// event emitted during the run's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Identity {
    /// Identifier shared by every event in this run's lifetime.
    pub run_id: String,
    /// Identifier of the agent instance driving tool calls.
    pub agent_id: String,
    /// Human or service principal on whose behalf the agent acts, if known.
    #[serde(default)]
    pub principal: Option<String>,
    /// Workload metadata, if supplied.
    #[serde(default)]
    pub workload: Option<Workload>,
    /// Which agent client spawned the shim.
    pub client: Client,
    /// Which deployment environment the shim believes it is in.
    pub env: Env,
    /// Source identity for this shim instance.
    pub source: Source,
}

impl Identity {
    /// Build an [`Identity`] from the environment variables documented in
    /// spec.md §6. Never panics: every missing or unparsable value falls
    /// back to a stable `"unknown"` sentinel.
    #[must_use]
    pub fn from_env(host_id: impl Into<String>, shim_id: impl Into<String>) -> Self {
        let run_id = std::env::var("SUB_RUN_ID").unwrap_or_else(|_| UNKNOWN.to_string());
        let agent_id = std::env::var("SUB_AGENT_ID").unwrap_or_else(|_| UNKNOWN.to_string());
        let principal = std::env::var("SUB_PRINCIPAL").ok().filter(|s| !s.is_empty());
        let client = std::env::var("SUB_CLIENT")
            .map(|v| Client::from_env_value(&v))
            .unwrap_or_default();
        let env = std::env::var("SUB_ENV")
            .map(|v| Env::from_env_value(&v))
            .unwrap_or_default();
        let workload = std::env::var("SUB_WORKLOAD")
            .ok()
            .and_then(|raw| serde_json::from_str::<Workload>(&raw).ok());

        Self {
            run_id,
            agent_id,
            principal,
            workload,
            client,
            env,
            source: Source {
                host_id: host_id.into(),
                proc_id: std::process::id(),
                shim_id: shim_id.into(),
            },
        }
    }
}
