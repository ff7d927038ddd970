//! Errors surfaced opening or writing to the ledger.

/// Errors from opening, validating, or writing to the ledger database.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The underlying SQLite call failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `PRAGMA integrity_check` reported something other than `ok` on
    /// startup; the ledger refuses to write rather than risk corrupting a
    /// damaged file further (spec.md §4.8).
    #[error("ledger integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    /// The database could not be switched into WAL mode; the ledger refuses
    /// to write since the single-writer durability story depends on it.
    #[error("ledger is not in WAL journal mode (reported: {0})")]
    NotWal(String),
    /// The ingestion queue's consumer task has already terminated.
    #[error("ledger ingestion queue is closed")]
    Closed,
}
