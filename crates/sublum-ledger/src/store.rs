//! Synchronous SQLite access (spec.md §4.8). A [`LedgerStore`] owns a single
//! `rusqlite::Connection` and is driven from exactly one task — the
//! ingestion consumer in [`crate::queue`] — matching the "single writer per
//! run" invariant. Each public method is its own transaction; callers that
//! need several rows to land atomically (e.g. a tool call plus its preview)
//! wrap them with [`LedgerStore::in_transaction`].

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::LedgerError;
use crate::records::{HintRecord, PolicyVersionRecord, PreviewRecord, RunRecord, ToolCallRecord};
use crate::schema;

/// Owns the ledger's SQLite connection.
pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    /// Opens (creating if absent) the database at `path`, verifying WAL mode
    /// and integrity, and applying the schema.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotWal`] or [`LedgerError::IntegrityCheckFailed`]
    /// if the startup checks fail; the ledger refuses to write in that case.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests; skips the WAL check, which `:memory:`
    /// databases cannot satisfy.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        schema::verify_integrity(&conn)?;
        schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Runs `body` inside a single transaction, committing on `Ok` and
    /// rolling back on `Err`.
    pub fn in_transaction<T>(
        &mut self,
        body: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let tx = self.conn.transaction()?;
        let result = body(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Inserts a new `runs` row at run start.
    pub fn insert_run(&self, run: &RunRecord) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT INTO runs (run_id, agent_id, client, env, started_at, ended_at, status, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.run_id,
                run.agent_id,
                run.client,
                run.env,
                run.started_at,
                run.ended_at,
                run.status,
                run.metadata_json,
            ],
        )?;
        Ok(())
    }

    /// Stamps a run's `ended_at`/`status` at shutdown.
    pub fn finalize_run(&self, run_id: &str, ended_at: &str, status: &str) -> Result<(), LedgerError> {
        self.conn.execute(
            "UPDATE runs SET ended_at = ?1, status = ?2 WHERE run_id = ?3",
            params![ended_at, status, run_id],
        )?;
        Ok(())
    }

    /// Inserts a `tool_calls` row. Never dropped under backpressure — see
    /// [`crate::queue`].
    pub fn insert_tool_call(&self, call: &ToolCallRecord) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT INTO tool_calls
                (call_id, run_id, server_name, tool_name, args_hash, decision, rule_id,
                 status, latency_ms, bytes_in, bytes_out, preview_truncated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                call.call_id,
                call.run_id,
                call.server_name,
                call.tool_name,
                call.args_hash,
                call.decision,
                call.rule_id,
                call.status,
                call.latency_ms,
                call.bytes_in,
                call.bytes_out,
                call.preview_truncated,
                call.created_at,
            ],
        )?;
        Ok(())
    }

    /// Inserts a `previews` row. Droppable under backpressure.
    pub fn insert_preview(&self, preview: &PreviewRecord) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT INTO previews (call_id, args_preview, result_preview, redaction_flags)
             VALUES (?1, ?2, ?3, ?4)",
            params![preview.call_id, preview.args_preview, preview.result_preview, preview.redaction_flags],
        )?;
        Ok(())
    }

    /// Inserts a `hints` row. Droppable under backpressure.
    pub fn insert_hint(&self, hint: &HintRecord) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT INTO hints (call_id, hint_text, suggested_args_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![hint.call_id, hint.hint_text, hint.suggested_args_json, hint.created_at],
        )?;
        Ok(())
    }

    /// Records a policy bundle, upserting on `(policy_id, policy_version)` so
    /// re-observing the same bundle across runs is idempotent.
    pub fn insert_policy_version(&self, pv: &PolicyVersionRecord) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT INTO policy_versions (policy_id, policy_version, mode, rules_hash, rules_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(policy_id, policy_version) DO UPDATE SET
                mode = excluded.mode,
                rules_hash = excluded.rules_hash,
                rules_json = excluded.rules_json",
            params![pv.policy_id, pv.policy_version, pv.mode, pv.rules_hash, pv.rules_json, pv.created_at],
        )?;
        Ok(())
    }

    /// Looks up a run's recorded status, for tests and diagnostics.
    pub fn run_status(&self, run_id: &str) -> Result<Option<String>, LedgerError> {
        self.conn
            .query_row("SELECT status FROM runs WHERE run_id = ?1", params![run_id], |row| row.get(0))
            .optional()
            .map_err(LedgerError::from)
    }

    /// Counts rows in `tool_calls` for a run, for tests and diagnostics.
    pub fn tool_call_count(&self, run_id: &str) -> Result<i64, LedgerError> {
        self.conn
            .query_row("SELECT count(*) FROM tool_calls WHERE run_id = ?1", params![run_id], |row| row.get(0))
            .map_err(LedgerError::from)
    }
}
