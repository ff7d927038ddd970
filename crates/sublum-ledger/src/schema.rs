//! DDL and startup pragma checks (spec.md §4.8).
//!
//! Grounded on `agtrace-index`'s `init_schema`: a single `execute_batch` of
//! `CREATE TABLE IF NOT EXISTS`/`CREATE INDEX IF NOT EXISTS` statements,
//! gated behind a `PRAGMA user_version` check so re-opening an up-to-date
//! database is a no-op.

use crate::error::LedgerError;
use rusqlite::Connection;

/// Bumped whenever the DDL below changes incompatibly.
pub const SCHEMA_VERSION: i64 = 1;

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    run_id          TEXT PRIMARY KEY,
    agent_id        TEXT NOT NULL,
    client          TEXT NOT NULL,
    env             TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    ended_at        TEXT,
    status          TEXT,
    metadata_json   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tool_calls (
    call_id             TEXT PRIMARY KEY,
    run_id              TEXT NOT NULL REFERENCES runs(run_id),
    server_name         TEXT NOT NULL,
    tool_name           TEXT NOT NULL,
    args_hash           TEXT NOT NULL,
    decision            TEXT NOT NULL,
    rule_id             TEXT,
    status              TEXT NOT NULL,
    latency_ms          INTEGER NOT NULL,
    bytes_in            INTEGER NOT NULL,
    bytes_out           INTEGER NOT NULL,
    preview_truncated   INTEGER NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS previews (
    call_id         TEXT NOT NULL REFERENCES tool_calls(call_id),
    args_preview    TEXT NOT NULL,
    result_preview  TEXT,
    redaction_flags TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS hints (
    call_id             TEXT NOT NULL REFERENCES tool_calls(call_id),
    hint_text           TEXT NOT NULL,
    suggested_args_json TEXT,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS policy_versions (
    policy_id       TEXT NOT NULL,
    policy_version  TEXT NOT NULL,
    mode            TEXT NOT NULL,
    rules_hash      TEXT NOT NULL,
    rules_json      TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (policy_id, policy_version)
);

CREATE INDEX IF NOT EXISTS idx_tool_calls_run_created ON tool_calls(run_id, created_at);
CREATE INDEX IF NOT EXISTS idx_tool_calls_server_tool ON tool_calls(server_name, tool_name);
CREATE INDEX IF NOT EXISTS idx_tool_calls_decision_status ON tool_calls(decision, status);
CREATE INDEX IF NOT EXISTS idx_tool_calls_args_hash ON tool_calls(args_hash);
"#;

/// Applies the DDL above, skipping it if `user_version` already matches
/// [`SCHEMA_VERSION`].
pub fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current == SCHEMA_VERSION {
        return Ok(());
    }
    conn.execute_batch(DDL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Startup integrity gate (spec.md §4.8: "refuses to write if either
/// check fails"). Sets `journal_mode = wal` and verifies both that it took
/// and that `PRAGMA integrity_check` reports `ok`.
pub fn verify_integrity(conn: &Connection) -> Result<(), LedgerError> {
    let journal_mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !journal_mode.eq_ignore_ascii_case("wal") {
        return Err(LedgerError::NotWal(journal_mode));
    }

    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if integrity != "ok" {
        return Err(LedgerError::IntegrityCheckFailed(integrity));
    }
    Ok(())
}
