//! Row shapes written to the ledger, one struct per table (spec.md §4.8).
//!
//! These mirror `sublum_events::Envelope` bodies rather than wrapping them
//! directly: the ledger's column set is a durable projection of the event
//! stream, not the wire format itself, so the two are allowed to drift
//! independently of each other.

use serde::Serialize;

/// A row in `runs`.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub agent_id: String,
    pub client: String,
    pub env: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: Option<String>,
    pub metadata_json: String,
}

/// A row in `tool_calls`. One row per completed call; the decision and
/// terminal status are folded into the same row rather than split across
/// `tool_call_start`/`tool_call_decision`/`tool_call_end`, since the ledger
/// only ever sees a call once it is finished.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub run_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub args_hash: String,
    pub decision: String,
    pub rule_id: Option<String>,
    pub status: String,
    pub latency_ms: i64,
    pub bytes_in: i64,
    pub bytes_out: i64,
    pub preview_truncated: bool,
    pub created_at: String,
}

/// A row in `previews`. Droppable under ingestion backpressure.
#[derive(Debug, Clone)]
pub struct PreviewRecord {
    pub call_id: String,
    pub args_preview: String,
    pub result_preview: Option<String>,
    pub redaction_flags: String,
}

/// A row in `hints`. Droppable under ingestion backpressure.
#[derive(Debug, Clone)]
pub struct HintRecord {
    pub call_id: String,
    pub hint_text: String,
    pub suggested_args_json: Option<String>,
    pub created_at: String,
}

/// A row in `policy_versions`, one per distinct policy bundle observed.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyVersionRecord {
    pub policy_id: String,
    pub policy_version: String,
    pub mode: String,
    pub rules_hash: String,
    pub rules_json: String,
    pub created_at: String,
}
