// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-adapter-mcp
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// In-flight request correlation (spec.md §5).
pub mod correlation;
/// Newline-delimited JSON-RPC framing (spec.md §4.6).
pub mod framing;
/// Bounded inspection of call arguments (spec.md §4.6).
pub mod inspect;
/// JSON-RPC error synthesis for non-ALLOW decisions (spec.md §4.6).
pub mod rpcerror;

use thiserror::Error;

pub use correlation::{CorrelationTable, PendingCall};
pub use framing::{LineReader, ToolCallRequest};
pub use inspect::{Inspected, DEFAULT_MAX_INSPECT_BYTES, DEFAULT_MAX_PREVIEW_BYTES};
pub use rpcerror::CallIdentity;

/// Errors the adapter surfaces while handling a single frame.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Stream I/O failure reading or writing a frame.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame was not valid JSON.
    #[error("malformed JSON-RPC line: {0}")]
    Json(#[from] serde_json::Error),
}
