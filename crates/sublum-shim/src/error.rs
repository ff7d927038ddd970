//! Top-level shim errors and the exit-code mapping (spec.md §6).

use thiserror::Error;

/// Errors that can abort a shim run before or during startup.
#[derive(Debug, Error)]
pub enum ShimError {
    /// The startup configuration (flags/env) was rejected by
    /// [`sublum_core::config::ConfigValidator`].
    #[error("invalid configuration: {0}")]
    Config(#[from] sublum_core::error::SublumError),
    /// The policy document failed to parse, validate, or compile.
    #[error("invalid policy bundle: {0}")]
    Policy(#[from] sublum_policy::PolicyError),
    /// Reading the policy source (file or stdin) failed.
    #[error("failed to read policy source: {0}")]
    PolicyIo(#[source] std::io::Error),
    /// The policy source was not valid JSON.
    #[error("policy source is not valid JSON: {0}")]
    PolicyJson(#[source] serde_json::Error),
    /// The upstream process failed to spawn.
    #[error("failed to spawn upstream process: {0}")]
    UpstreamSpawn(#[from] sublum_supervisor::SupervisorError),
    /// The event sink could not be opened.
    #[error("failed to open event sink: {0}")]
    EventSink(#[source] std::io::Error),
    /// The emitter configuration was invalid.
    #[error("invalid emitter configuration: {0}")]
    Emitter(#[from] sublum_emitter::EmitterError),
}

/// Exit code for a configuration or policy-bundle failure (spec.md §6).
pub const EXIT_CONFIG_INVALID: i32 = 1;
/// Exit code for a failure to spawn the upstream process.
pub const EXIT_UPSTREAM_SPAWN_FAILED: i32 = 2;

impl ShimError {
    /// The process exit code this error should produce.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UpstreamSpawn(_) => EXIT_UPSTREAM_SPAWN_FAILED,
            Self::Config(_) | Self::Policy(_) | Self::PolicyIo(_) | Self::PolicyJson(_) | Self::EventSink(_) | Self::Emitter(_) => {
                EXIT_CONFIG_INVALID
            }
        }
    }
}
