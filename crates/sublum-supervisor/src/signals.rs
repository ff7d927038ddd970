//! Waits for the signals that end a shim run (spec.md §4.7, §5
//! "Cancellation"): Ctrl-C, SIGTERM, or the agent closing its stdin.
//! Grounded in the `tokio::select!` over `ctrl_c()`/`SignalKind::terminate()`
//! pattern used elsewhere in the example pack for graceful shutdown.

use tokio::signal::unix::{signal, SignalKind};

/// Which signal ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl-C / SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

/// Resolves once SIGINT or SIGTERM arrives. Installing the handlers can
/// only fail if the process has already exhausted its signal-handling
/// budget, which would indicate a deeper problem than this function can
/// recover from.
///
/// # Panics
///
/// Panics if the underlying signal handlers fail to install.
pub async fn wait_for_shutdown_signal() -> ShutdownReason {
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownReason::Interrupt,
        _ = terminate.recv() => ShutdownReason::Terminate,
    }
}
