//! Errors from rewriting or restoring a client config.

/// Errors surfaced by [`crate::config`] and [`crate::io`].
#[derive(Debug, thiserror::Error)]
pub enum ImporterError {
    /// The config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Path that failed to write.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file was not valid JSON.
    #[error("{path} is not valid JSON: {source}")]
    InvalidJson {
        /// Path that failed to parse.
        path: std::path::PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// Neither `mcpServers` nor `mcp_servers` was found, or it was not an
    /// object.
    #[error("{path} has no mcpServers/mcp_servers object")]
    NoServersObject {
        /// Path that was missing the servers object.
        path: std::path::PathBuf,
    },
    /// `--restore` was requested but no backup file exists.
    #[error("no backup found at {path}; nothing to restore")]
    NoBackup {
        /// Expected backup path.
        path: std::path::PathBuf,
    },
}
