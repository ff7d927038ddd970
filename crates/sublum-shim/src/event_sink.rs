//! Resolves `--event-sink` into a concrete writable sink (spec.md §6).

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::ShimError;

/// A type-erased, owned async sink, so callers don't need to thread a
/// generic parameter through the whole task graph.
pub type EventSink = Box<dyn AsyncWrite + Unpin + Send>;

/// Open `spec` (a file path, or `fd:<n>` for an inherited file descriptor)
/// as an [`EventSink`]. `None` discards events into `tokio::io::sink()`
/// rather than refusing to start — `sublum_core::config` already warns
/// about this at startup, it is not a fatal condition.
pub async fn open(spec: Option<&str>) -> Result<EventSink, ShimError> {
    match spec {
        None => Ok(Box::new(tokio::io::sink())),
        Some(spec) if spec.starts_with("fd:") => open_fd(&spec[3..]),
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(ShimError::EventSink)?;
            Ok(Box::new(file))
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn open_fd(raw: &str) -> Result<EventSink, ShimError> {
    use std::os::unix::io::FromRawFd;

    let fd: i32 = raw.parse().map_err(|_| {
        ShimError::EventSink(std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("not a valid fd number: {raw:?}")))
    })?;
    // SAFETY: the caller asserts `fd` is a valid, open, writable file
    // descriptor it owns for the lifetime of this process (spec.md §6
    // `--event-sink=fd:<n>`); we take ownership of it here and never use it
    // through any other handle.
    let std_file = unsafe { std::fs::File::from_raw_fd(fd) };
    Ok(Box::new(File::from_std(std_file)))
}

#[cfg(not(unix))]
fn open_fd(_raw: &str) -> Result<EventSink, ShimError> {
    Err(ShimError::EventSink(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "fd: event sinks are only supported on unix",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_spec_opens_a_discard_sink() {
        let mut sink = open(None).await.unwrap();
        sink.write_all(b"ignored\n").await.unwrap();
    }

    #[tokio::test]
    async fn path_spec_opens_and_appends_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        {
            let mut sink = open(Some(path.to_str().unwrap())).await.unwrap();
            sink.write_all(b"one\n").await.unwrap();
            sink.flush().await.unwrap();
        }
        {
            let mut sink = open(Some(path.to_str().unwrap())).await.unwrap();
            sink.write_all(b"two\n").await.unwrap();
            sink.flush().await.unwrap();
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "one\ntwo\n");
    }

    #[tokio::test]
    async fn invalid_fd_spec_is_an_error() {
        let err = open(Some("fd:not-a-number")).await.unwrap_err();
        assert!(matches!(err, ShimError::EventSink(_)));
    }
}
