// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-emitter
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sublum_events::Envelope;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Configuration for [`spawn`].
#[derive(Debug, Clone, Copy)]
pub struct EmitterConfig {
    /// Total queue capacity.
    pub buffer_size: usize,
    /// Queue depth at or above which preview-bearing `emit()` calls shed
    /// their preview fields before enqueueing (spec.md §4.3).
    pub preview_drop_threshold: usize,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self { buffer_size: 1024, preview_drop_threshold: 768 }
    }
}

impl EmitterConfig {
    /// Validate the configuration invariant `preview_drop_threshold <
    /// buffer_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if the threshold is not strictly below capacity.
    pub fn validate(&self) -> Result<(), EmitterError> {
        if self.preview_drop_threshold >= self.buffer_size {
            return Err(EmitterError::InvalidConfig(format!(
                "preview_drop_threshold ({}) must be < buffer_size ({})",
                self.preview_drop_threshold, self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Errors surfaced by the emitter.
#[derive(Debug, Error)]
pub enum EmitterError {
    /// The configuration was invalid.
    #[error("invalid emitter config: {0}")]
    InvalidConfig(String),
    /// The consumer task has already terminated; no more events can be
    /// accepted.
    #[error("event emitter is closed")]
    Closed,
}

/// Counters describing emitter behaviour over the life of a run, attached
/// to `run_end.summary` observability (spec.md §4.3, §9 "Observe mode
/// correctness" sibling note on durability of counts).
#[derive(Debug, Default)]
pub struct EmitterMetrics {
    emitted: AtomicU64,
    preview_dropped: AtomicU64,
    events_dropped: AtomicU64,
}

impl EmitterMetrics {
    /// Number of events successfully written to the sink.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of preview-bearing events that had their preview fields
    /// stripped (but were still emitted) under backpressure.
    pub fn preview_dropped(&self) -> u64 {
        self.preview_dropped.load(Ordering::Relaxed)
    }

    /// Number of events dropped entirely (never decisions; spec.md §4.3
    /// invariant (i)).
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

/// Handle used by producers to submit events. Cheaply `Clone`-able; every
/// clone shares the same bounded queue and metrics.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<Envelope>,
    preview_drop_threshold: usize,
    metrics: Arc<EmitterMetrics>,
}

impl Emitter {
    /// Read-only access to emitter metrics.
    #[must_use]
    pub fn metrics(&self) -> &EmitterMetrics {
        &self.metrics
    }

    /// Best-effort submission (spec.md §4.3). Under backpressure a
    /// preview-bearing event has its preview fields dropped (`truncated`
    /// forced true) before being enqueued; if the queue is completely full
    /// the event itself is dropped. Never used for decision events.
    pub fn emit(&self, mut evt: Envelope) {
        debug_assert!(!evt.is_decision(), "decisions must use emit_sync");

        let queue_len = self.tx.max_capacity().saturating_sub(self.tx.capacity());
        if evt.is_preview_bearing() && queue_len >= self.preview_drop_threshold {
            evt.drop_preview();
            self.metrics.preview_dropped.fetch_add(1, Ordering::Relaxed);
        }

        match self.tx.try_send(evt) {
            Ok(()) => {
                self.metrics.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event queue full; dropping preview-bearing event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("event queue closed; dropping event");
            }
        }
    }

    /// Durable submission (spec.md §4.3). Blocks the caller until the event
    /// is accepted into the queue. Decision events MUST use this mode and
    /// are never dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EmitterError::Closed`] if the consumer has already shut
    /// down.
    pub async fn emit_sync(&self, evt: Envelope) -> Result<(), EmitterError> {
        self.tx
            .send(evt)
            .await
            .map(|()| {
                self.metrics.emitted.fetch_add(1, Ordering::Relaxed);
            })
            .map_err(|_| EmitterError::Closed)
    }
}

/// Handle for shutting down the consumer side of the pipeline.
pub struct EmitterHandle {
    join: JoinHandle<std::io::Result<()>>,
    abandon_previews: Arc<AtomicBool>,
}

impl EmitterHandle {
    /// Flush the queue then terminate the consumer (spec.md §4.3
    /// "Cancellation"). After `preview_grace`, any still-queued
    /// preview-bearing (non-decision) events are abandoned rather than
    /// written, so shutdown cannot be blocked indefinitely by a slow sink
    /// draining a backlog of low-priority previews. Decision events are
    /// always written regardless of the grace period.
    ///
    /// `emitter` must be the last outstanding [`Emitter`] handle (all
    /// producer clones already dropped), or this will hang waiting for the
    /// channel to close.
    pub async fn close(self, emitter: Emitter, preview_grace: Duration) -> std::io::Result<()> {
        drop(emitter);
        let abandon = Arc::clone(&self.abandon_previews);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(preview_grace).await;
            abandon.store(true, Ordering::SeqCst);
        });
        let result = self.join.await.unwrap_or_else(|e| {
            Err(std::io::Error::other(format!("emitter consumer task panicked: {e}")))
        });
        timer.abort();
        result
    }
}

/// Spawn the consumer task and return the producer [`Emitter`] handle plus
/// the corresponding [`EmitterHandle`] for shutdown.
///
/// # Errors
///
/// Returns an error if `config` is invalid.
pub fn spawn<W>(sink: W, config: EmitterConfig) -> Result<(Emitter, EmitterHandle), EmitterError>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    config.validate()?;
    let (tx, rx) = mpsc::channel(config.buffer_size);
    let metrics = Arc::new(EmitterMetrics::default());
    let abandon_previews = Arc::new(AtomicBool::new(false));

    let join = tokio::spawn(consume(sink, rx, Arc::clone(&abandon_previews)));

    Ok((
        Emitter { tx, preview_drop_threshold: config.preview_drop_threshold, metrics },
        EmitterHandle { join, abandon_previews },
    ))
}

async fn consume<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Envelope>,
    abandon_previews: Arc<AtomicBool>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    while let Some(evt) = rx.recv().await {
        if abandon_previews.load(Ordering::Relaxed) && evt.is_preview_bearing() && !evt.is_decision()
        {
            trace!("abandoning queued preview-bearing event during shutdown grace period");
            continue;
        }
        let line = match evt.encode_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode event; dropping");
                continue;
            }
        };
        sink.write_all(line.as_bytes()).await?;
    }
    sink.flush().await?;
    Ok(())
}
