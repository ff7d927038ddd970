// SPDX-License-Identifier: MIT OR Apache-2.0
//! Startup configuration validation for the shim (spec.md §6).

use crate::error::{ErrorCode, SublumError};
use std::path::PathBuf;

/// Severity of a non-fatal configuration observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    /// Informational note.
    Info,
    /// Likely unintended but not invalid.
    Warning,
}

/// A single configuration warning produced by [`ConfigValidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    /// Dot-delimited path to the field (e.g. `"max_inspect_bytes"`).
    pub field: String,
    /// Human-readable description.
    pub message: String,
    /// Severity.
    pub severity: WarningSeverity,
}

/// Raw startup configuration assembled from CLI flags and environment
/// variables (spec.md §6), prior to compiling the policy bundle.
#[derive(Debug, Clone)]
pub struct StartupConfig {
    /// `--server-name`, required, stamped into every event.
    pub server_name: String,
    /// `--policy=<path>` (or `-` for stdin).
    pub policy_path: Option<PathBuf>,
    /// `--policy-json=<json>`.
    pub policy_json_flag: Option<String>,
    /// `SUB_POLICY_JSON` environment variable.
    pub policy_json_env: Option<String>,
    /// `--max-inspect-bytes`.
    pub max_inspect_bytes: usize,
    /// `--max-preview-bytes` (not in the CLI table explicitly but shares the
    /// same resource-ceiling treatment as `max_inspect_bytes`, spec.md §5).
    pub max_preview_bytes: usize,
    /// `--grace-ms`.
    pub grace_ms: u64,
    /// `--event-sink=<path|fd>`.
    pub event_sink: Option<String>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            policy_path: None,
            policy_json_flag: None,
            policy_json_env: None,
            max_inspect_bytes: 1_048_576,
            max_preview_bytes: 1024,
            grace_ms: 5000,
            event_sink: None,
        }
    }
}

/// Validates a [`StartupConfig`], returning advisory warnings or a hard
/// error for conditions the shim must refuse to start under.
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Create a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate `cfg`, returning the resolved effective policy source
    /// selection on success.
    ///
    /// # Errors
    ///
    /// Returns [`SublumError`] when startup must be refused: an empty
    /// `server_name`, or both `--policy`/`--policy-json` and
    /// `SUB_POLICY_JSON` supplied at once (spec.md §9 open question:
    /// "implementations should reject ambiguity rather than silently pick
    /// one").
    pub fn validate(&self, cfg: &StartupConfig) -> Result<PolicySource, SublumError> {
        if cfg.server_name.trim().is_empty() {
            return Err(SublumError::new(
                ErrorCode::MissingIdentity,
                "--server-name is required and must not be empty",
            ));
        }

        let flag_sources = [cfg.policy_path.is_some(), cfg.policy_json_flag.is_some()];
        let flag_count = flag_sources.iter().filter(|b| **b).count();
        if flag_count > 1 {
            return Err(SublumError::new(
                ErrorCode::AmbiguousPolicySource,
                "only one of --policy or --policy-json may be supplied",
            ));
        }
        let has_flag = flag_count == 1;
        let has_env = cfg.policy_json_env.is_some();
        if has_flag && has_env {
            return Err(SublumError::new(
                ErrorCode::AmbiguousPolicySource,
                "a --policy/--policy-json flag and SUB_POLICY_JSON were both supplied",
            ));
        }

        let source = if let Some(path) = &cfg.policy_path {
            PolicySource::Path(path.clone())
        } else if let Some(json) = &cfg.policy_json_flag {
            PolicySource::InlineJson(json.clone())
        } else if let Some(json) = &cfg.policy_json_env {
            PolicySource::InlineJson(json.clone())
        } else {
            PolicySource::None
        };

        Ok(source)
    }

    /// Advisory-only warnings that never block startup.
    #[must_use]
    pub fn warnings(&self, cfg: &StartupConfig) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        if cfg.max_inspect_bytes < 4096 {
            warnings.push(ConfigWarning {
                field: "max_inspect_bytes".into(),
                message: format!(
                    "max_inspect_bytes={} is unusually small; most tool calls will be truncated",
                    cfg.max_inspect_bytes
                ),
                severity: WarningSeverity::Warning,
            });
        }
        if cfg.max_preview_bytes > cfg.max_inspect_bytes {
            warnings.push(ConfigWarning {
                field: "max_preview_bytes".into(),
                message: "max_preview_bytes exceeds max_inspect_bytes; previews will never be truncated by this limit".into(),
                severity: WarningSeverity::Info,
            });
        }
        if cfg.event_sink.is_none() {
            warnings.push(ConfigWarning {
                field: "event_sink".into(),
                message: "no --event-sink configured; events will be dropped on the floor".into(),
                severity: WarningSeverity::Warning,
            });
        }
        warnings
    }
}

/// The resolved policy source after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    /// Read the bundle from a file path (or stdin for `-`).
    Path(PathBuf),
    /// Parse the bundle from an inline JSON string.
    InlineJson(String),
    /// No source configured; the shim runs with an empty `observe`-mode
    /// bundle.
    None,
}
