// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-secrets
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a secret's value comes from (spec.md §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SecretRef {
    /// Pass through a variable already present in the shim's host
    /// environment.
    Env {
        /// Name of the host environment variable to read.
        var: String,
    },
    /// OS keychain lookup. Reserved for a future release; resolving one
    /// always produces [`SecretError::KeychainUnsupported`].
    Keychain {
        /// Keychain service name.
        service: String,
        /// Keychain account name.
        account: String,
    },
    /// A literal value embedded in the policy document. Testing only —
    /// only constructible from within this crate's own test code.
    #[serde(skip_deserializing)]
    Literal {
        /// The literal value.
        value: String,
    },
}

impl SecretRef {
    /// Build a testing-only literal secret reference. Not reachable via
    /// `Deserialize` — a policy document cannot smuggle one in.
    #[cfg(test)]
    #[must_use]
    pub fn literal_for_test(value: impl Into<String>) -> Self {
        Self::Literal { value: value.into() }
    }

    fn source_tag(&self) -> &'static str {
        match self {
            Self::Env { .. } => "env",
            Self::Keychain { .. } => "keychain",
            Self::Literal { .. } => "literal",
        }
    }

    /// Opaque, value-free description suitable for an audit event
    /// (spec.md §4.5: "never the value").
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Env { var } => format!("env:{var}"),
            Self::Keychain { service, account } => format!("keychain:{service}/{account}"),
            Self::Literal { .. } => "literal:<redacted>".to_string(),
        }
    }
}

/// Errors resolving an individual secret binding.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The referenced host environment variable was not set.
    #[error("environment variable {0:?} not set")]
    EnvVarMissing(String),
    /// Keychain resolution is not implemented in this release.
    #[error("keychain secret resolution is not implemented")]
    KeychainUnsupported,
}

/// One resolved (or failed) binding, suitable for building a
/// `secret_injection` event without ever carrying the secret value.
#[derive(Debug, Clone)]
pub struct InjectionRecord {
    /// Environment variable name the secret is bound to in the child.
    pub inject_as: String,
    /// Opaque description of the secret reference.
    pub secret_ref: String,
    /// Source kind (`env`, `keychain`, `literal`).
    pub source: String,
    /// Whether resolution succeeded.
    pub success: bool,
}

/// The outcome of resolving a full `secret_bindings` map: the environment
/// to hand to the child process, plus one audit record per binding.
#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    /// Environment variables for the upstream child process only.
    pub child_env: BTreeMap<String, String>,
    /// One record per binding, success or failure, in input order.
    pub records: Vec<InjectionRecord>,
}

/// Resolve every binding in `bindings` (`inject_as` -> [`SecretRef`]).
/// Resolution failures are recorded, not propagated — a missing secret
/// degrades that one binding to `success: false` rather than aborting the
/// whole run, matching spec.md §4.5's framing of this as a per-binding
/// audit fact.
#[must_use]
pub fn resolve(bindings: &BTreeMap<String, SecretRef>) -> ResolvedSecrets {
    let mut out = ResolvedSecrets::default();
    for (inject_as, secret_ref) in bindings {
        let source = secret_ref.source_tag().to_string();
        let description = secret_ref.describe();
        match resolve_one(secret_ref) {
            Ok(value) => {
                out.child_env.insert(inject_as.clone(), value);
                out.records.push(InjectionRecord {
                    inject_as: inject_as.clone(),
                    secret_ref: description,
                    source,
                    success: true,
                });
            }
            Err(e) => {
                tracing::warn!(inject_as = %inject_as, error = %e, "secret binding failed");
                out.records.push(InjectionRecord {
                    inject_as: inject_as.clone(),
                    secret_ref: description,
                    source,
                    success: false,
                });
            }
        }
    }
    out
}

fn resolve_one(secret_ref: &SecretRef) -> Result<String, SecretError> {
    match secret_ref {
        SecretRef::Env { var } => {
            std::env::var(var).map_err(|_| SecretError::EnvVarMissing(var.clone()))
        }
        SecretRef::Keychain { .. } => Err(SecretError::KeychainUnsupported),
        SecretRef::Literal { value } => Ok(value.clone()),
    }
}

/// Remove the given variable names from the shim's own environment, best
/// effort, so a resolved secret never lingers in the parent process after
/// the child has inherited it (spec.md §4.5). Platforms or variables that
/// cannot be removed are silently skipped; this is advisory hardening, not
/// the primary control (the primary control is that the shim never reads
/// these values into any serialized event).
#[allow(unsafe_code)]
pub fn scrub_from_own_environment(names: impl IntoIterator<Item = impl AsRef<str>>) {
    for name in names {
        // SAFETY: this process is single-threaded with respect to its own
        // environment at the point this is called (shim startup, before
        // any worker tasks are spawned).
        unsafe {
            std::env::remove_var(name.as_ref());
        }
    }
}
