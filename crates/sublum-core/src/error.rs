// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Subluminal error catalog.
//!
//! Every error code follows the pattern `SUB-X###` where `X` is the category
//! letter and `###` is a three-digit number:
//!
//! - **C** — Contract errors (malformed bundles, envelopes)
//! - **P** — Protocol / transport errors (framing, upstream I/O)
//! - **L** — Policy errors
//! - **R** — Runtime errors (timeouts, supervisor failures)
//! - **S** — System errors (secrets, filesystem, ledger)
//!
//! This mirrors `tool_call_end.error.class` in spec.md §7: each
//! [`ErrorClass`] maps to one or more [`ErrorCode`]s.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumeration of all Subluminal error codes, organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // ── Contract (C) ──────────────────────────────────────────────────
    /// The policy bundle could not be parsed or failed schema validation.
    MalformedPolicyBundle,
    /// Both `--policy` and `SUB_POLICY_JSON` were supplied; ambiguous.
    AmbiguousPolicySource,
    /// An event envelope is structurally invalid.
    MalformedEnvelope,
    /// A required identity field could not be established even as
    /// `"unknown"` (should not happen; defensive code path).
    MissingIdentity,

    // ── Protocol / transport (P) ─────────────────────────────────────
    /// A line on agent or upstream stdio was not valid UTF-8 / JSON.
    MalformedJsonRpcLine,
    /// The upstream process closed its stdout/stdin unexpectedly.
    UpstreamStreamClosed,
    /// The per-call forward timeout elapsed before a response arrived.
    ForwardTimeout,
    /// The JSON-RPC `id` on a response did not match any in-flight request.
    UnmatchedResponseId,

    // ── Policy (L) ────────────────────────────────────────────────────
    /// A rule's effect fired and produced a non-ALLOW decision.
    PolicyBlocked,
    /// A rule referenced an unknown selector field (not fatal: matches
    /// nothing, but surfaced as a warning at compile time).
    UnknownSelectorField,
    /// Evaluator state was poisoned (a prior panic while holding a lock).
    PolicyStatePoisoned,

    // ── Runtime (R) ───────────────────────────────────────────────────
    /// The upstream process failed to spawn.
    UpstreamSpawnFailed,
    /// The upstream process exited while a call was in flight.
    UpstreamCrashed,
    /// The event sink was required but is unavailable.
    EventSinkUnavailable,

    // ── System (S) ────────────────────────────────────────────────────
    /// A declared secret reference could not be resolved.
    SecretResolutionFailed,
    /// The ledger database failed its integrity check or is not in WAL mode.
    LedgerIntegrityFailed,
    /// A filesystem operation (config read/write, backup) failed.
    FilesystemError,
}

impl ErrorCode {
    /// The stable `SUB-X###` string for this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedPolicyBundle => "SUB-C001",
            Self::AmbiguousPolicySource => "SUB-C002",
            Self::MalformedEnvelope => "SUB-C003",
            Self::MissingIdentity => "SUB-C004",
            Self::MalformedJsonRpcLine => "SUB-P001",
            Self::UpstreamStreamClosed => "SUB-P002",
            Self::ForwardTimeout => "SUB-P003",
            Self::UnmatchedResponseId => "SUB-P004",
            Self::PolicyBlocked => "SUB-L001",
            Self::UnknownSelectorField => "SUB-L002",
            Self::PolicyStatePoisoned => "SUB-L003",
            Self::UpstreamSpawnFailed => "SUB-R001",
            Self::UpstreamCrashed => "SUB-R002",
            Self::EventSinkUnavailable => "SUB-R003",
            Self::SecretResolutionFailed => "SUB-S001",
            Self::LedgerIntegrityFailed => "SUB-S002",
            Self::FilesystemError => "SUB-S003",
        }
    }

    /// The `tool_call_end.error.class` bucket this code maps into
    /// (spec.md §7).
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::PolicyBlocked => ErrorClass::PolicyBlock,
            Self::ForwardTimeout => ErrorClass::Timeout,
            Self::UpstreamStreamClosed
            | Self::MalformedJsonRpcLine
            | Self::UnmatchedResponseId => ErrorClass::Transport,
            Self::UpstreamCrashed | Self::UpstreamSpawnFailed => ErrorClass::UpstreamError,
            _ => ErrorClass::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `error.class` taxonomy surfaced on `tool_call_end` (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Upstream process failed, crashed, or returned a transport-level error.
    UpstreamError,
    /// The call was short-circuited by policy.
    PolicyBlock,
    /// The per-call forward timeout elapsed.
    Timeout,
    /// Framing / stream-level failure not attributable to the upstream
    /// process itself (e.g. malformed JSON-RPC on the wire).
    Transport,
    /// Anything not otherwise classified.
    Unknown,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UpstreamError => "upstream_error",
            Self::PolicyBlock => "policy_block",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A structured, user-safe error: bounded in length, plain text, and never
/// carrying secret values or stack traces (spec.md §7).
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct SublumError {
    /// The stable error code.
    pub code: ErrorCode,
    /// A short, user-safe message.
    pub message: String,
}

impl SublumError {
    /// Construct a new error, truncating the message to a safe length.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        const MAX_LEN: usize = 500;
        let mut message = message.into();
        if message.len() > MAX_LEN {
            message.truncate(MAX_LEN);
            message.push('…');
        }
        Self { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(ErrorCode::PolicyBlocked.as_str(), "SUB-L001");
        assert_eq!(ErrorCode::ForwardTimeout.as_str(), "SUB-P003");
    }

    #[test]
    fn class_mapping_matches_spec_taxonomy() {
        assert_eq!(ErrorCode::PolicyBlocked.class(), ErrorClass::PolicyBlock);
        assert_eq!(ErrorCode::ForwardTimeout.class(), ErrorClass::Timeout);
        assert_eq!(ErrorCode::UpstreamCrashed.class(), ErrorClass::UpstreamError);
        assert_eq!(ErrorCode::UpstreamStreamClosed.class(), ErrorClass::Transport);
    }

    #[test]
    fn message_is_truncated_not_panicking() {
        let long = "x".repeat(10_000);
        let err = SublumError::new(ErrorCode::FilesystemError, long);
        assert!(err.message.len() <= 501);
    }
}
