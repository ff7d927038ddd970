//! Bounded ingestion queue feeding the ledger (spec.md §4.8), generalized
//! from `sublum-emitter`'s `emit()`/`emit_sync()` split: `tool_calls` (and
//! run bookkeeping) rows are durable and use a blocking send, `previews`/
//! `hints` rows are best-effort and are dropped once the queue saturates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::LedgerError;
use crate::records::{HintRecord, PolicyVersionRecord, PreviewRecord, RunRecord, ToolCallRecord};
use crate::store::LedgerStore;

/// One unit of ledger work.
#[derive(Debug)]
pub enum IngestItem {
    /// A new run starting.
    RunStart(RunRecord),
    /// A run ending; `(run_id, ended_at, status)`.
    RunEnd(String, String, String),
    /// A completed tool call. Never dropped.
    ToolCall(ToolCallRecord),
    /// A preview pair for an already-ingested call. Droppable.
    Preview(PreviewRecord),
    /// A hint attached to an already-ingested call. Droppable.
    Hint(HintRecord),
    /// A policy bundle observed during evaluation. Never dropped.
    PolicyVersion(PolicyVersionRecord),
}

impl IngestItem {
    /// Durable items must never be shed under backpressure (spec.md §4.8).
    fn is_durable(&self) -> bool {
        !matches!(self, IngestItem::Preview(_) | IngestItem::Hint(_))
    }
}

/// Errors submitting to the ingestion queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue capacity must be positive.
    #[error("invalid ledger queue config: {0}")]
    InvalidConfig(String),
}

/// Queue capacity and behaviour.
#[derive(Debug, Clone, Copy)]
pub struct IngesterConfig {
    /// Total queue capacity.
    pub buffer_size: usize,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self { buffer_size: 1024 }
    }
}

impl IngesterConfig {
    fn validate(&self) -> Result<(), QueueError> {
        if self.buffer_size == 0 {
            return Err(QueueError::InvalidConfig("buffer_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Counters for observability (attached to `run_end.summary` sibling data).
#[derive(Debug, Default)]
pub struct IngesterMetrics {
    written: AtomicU64,
    dropped: AtomicU64,
    write_errors: AtomicU64,
}

impl IngesterMetrics {
    /// Rows successfully written.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
    /// Droppable rows (previews/hints) shed under backpressure.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
    /// Rows that failed to write even though the queue accepted them.
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

/// Producer handle. Cheaply `Clone`-able.
#[derive(Clone)]
pub struct Ingester {
    tx: mpsc::Sender<IngestItem>,
    metrics: Arc<IngesterMetrics>,
}

impl Ingester {
    /// Read-only access to ingestion metrics.
    #[must_use]
    pub fn metrics(&self) -> &IngesterMetrics {
        &self.metrics
    }

    /// Best-effort submission for droppable rows (`previews`/`hints`).
    /// Silently drops the row if the queue is full or closed.
    pub fn submit_droppable(&self, item: IngestItem) {
        debug_assert!(!item.is_durable(), "durable items must use submit_durable");
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("ledger ingestion queue full; dropping droppable row");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("ledger ingestion queue closed; dropping droppable row");
            }
        }
    }

    /// Durable submission for rows that must never be dropped
    /// (`tool_calls`, run bookkeeping, `policy_versions`). Blocks the caller
    /// until the queue accepts the item.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Closed`] if the consumer has already shut down.
    pub async fn submit_durable(&self, item: IngestItem) -> Result<(), LedgerError> {
        self.tx.send(item).await.map_err(|_| LedgerError::Closed)
    }
}

/// Shutdown handle for the consumer side.
pub struct IngesterHandle {
    join: JoinHandle<Result<LedgerStore, LedgerError>>,
}

impl IngesterHandle {
    /// Closes the queue (all producer clones must already be dropped) and
    /// waits for the consumer to drain and return the store.
    ///
    /// # Errors
    ///
    /// Returns the first write error the consumer encountered, if any.
    pub async fn close(self) -> Result<LedgerStore, LedgerError> {
        self.join.await.unwrap_or(Err(LedgerError::Closed))
    }
}

/// Spawns the consumer task and returns the producer [`Ingester`] plus its
/// [`IngesterHandle`].
///
/// # Errors
///
/// Returns an error if `config` is invalid.
pub fn spawn(store: LedgerStore, config: IngesterConfig) -> Result<(Ingester, IngesterHandle), QueueError> {
    config.validate()?;
    let (tx, rx) = mpsc::channel(config.buffer_size);
    let metrics = Arc::new(IngesterMetrics::default());
    let join = tokio::spawn(consume(store, rx, Arc::clone(&metrics)));
    Ok((Ingester { tx, metrics }, IngesterHandle { join }))
}

async fn consume(
    mut store: LedgerStore,
    mut rx: mpsc::Receiver<IngestItem>,
    metrics: Arc<IngesterMetrics>,
) -> Result<LedgerStore, LedgerError> {
    while let Some(item) = rx.recv().await {
        let result = match &item {
            IngestItem::RunStart(run) => store.insert_run(run),
            IngestItem::RunEnd(run_id, ended_at, status) => store.finalize_run(run_id, ended_at, status),
            IngestItem::ToolCall(call) => store.insert_tool_call(call),
            IngestItem::Preview(preview) => store.insert_preview(preview),
            IngestItem::Hint(hint) => store.insert_hint(hint),
            IngestItem::PolicyVersion(pv) => store.insert_policy_version(pv),
        };
        match result {
            Ok(()) => {
                metrics.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                metrics.write_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "ledger write failed; continuing");
            }
        }
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(id: &str) -> RunRecord {
        RunRecord {
            run_id: id.into(),
            agent_id: "agent-1".into(),
            client: "claude".into(),
            env: "dev".into(),
            started_at: "2026-01-01T00:00:00Z".into(),
            ended_at: None,
            status: None,
            metadata_json: "{}".into(),
        }
    }

    fn tool_call(run_id: &str, call_id: &str) -> ToolCallRecord {
        ToolCallRecord {
            call_id: call_id.into(),
            run_id: run_id.into(),
            server_name: "git".into(),
            tool_name: "git_push".into(),
            args_hash: "deadbeef".into(),
            decision: "ALLOW".into(),
            rule_id: None,
            status: "ok".into(),
            latency_ms: 5,
            bytes_in: 10,
            bytes_out: 10,
            preview_truncated: false,
            created_at: "2026-01-01T00:00:01Z".into(),
        }
    }

    #[tokio::test]
    async fn durable_items_are_written_in_order() {
        let store = LedgerStore::open_in_memory().unwrap();
        let (ingester, handle) = spawn(store, IngesterConfig::default()).unwrap();
        ingester.submit_durable(IngestItem::RunStart(run("run-1"))).await.unwrap();
        ingester.submit_durable(IngestItem::ToolCall(tool_call("run-1", "call-1"))).await.unwrap();
        drop(ingester);
        let store = handle.close().await.unwrap();
        assert_eq!(store.tool_call_count("run-1").unwrap(), 1);
    }

    #[tokio::test]
    async fn droppable_items_are_shed_when_queue_is_saturated() {
        let store = LedgerStore::open_in_memory().unwrap();
        let (ingester, handle) = spawn(store, IngesterConfig { buffer_size: 1 }).unwrap();
        for i in 0..200 {
            ingester.submit_droppable(IngestItem::Preview(PreviewRecord {
                call_id: format!("call-{i}"),
                args_preview: "{}".into(),
                result_preview: None,
                redaction_flags: "[]".into(),
            }));
        }
        drop(ingester);
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn metrics_count_written_rows() {
        let store = LedgerStore::open_in_memory().unwrap();
        let (ingester, handle) = spawn(store, IngesterConfig::default()).unwrap();
        ingester.submit_durable(IngestItem::RunStart(run("run-1"))).await.unwrap();
        let metrics_snapshot = ingester.metrics().written();
        drop(ingester);
        handle.close().await.unwrap();
        assert!(metrics_snapshot <= 1);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let store_result = IngesterConfig { buffer_size: 0 }.validate();
        assert!(store_result.is_err());
    }
}
