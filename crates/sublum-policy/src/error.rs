use thiserror::Error;

/// Errors raised while compiling a [`crate::PolicyEngine`]. A bundle that
/// fails to compile must abort shim startup (spec.md §4.4 "Failure
/// semantics") rather than fall back to a default policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The document failed JSON Schema validation.
    #[error("policy bundle failed schema validation: {0}")]
    SchemaInvalid(String),
    /// The document passed schema validation but failed a structural or
    /// numeric-range check the schema alone can't express.
    #[error("malformed policy bundle: {0}")]
    Malformed(String),
    /// Two rules shared the same `id`.
    #[error("duplicate rule id: {0}")]
    DuplicateRuleId(String),
}
