// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-ledger
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Ledger-specific error type.
pub mod error;
/// Bounded ingestion queue and its producer/consumer handles.
pub mod queue;
/// Row shapes for each ledger table.
pub mod records;
/// DDL and startup pragma checks.
pub mod schema;
/// The owned SQLite connection and its insert/query methods.
pub mod store;

pub use error::LedgerError;
pub use queue::{spawn, Ingester, IngesterConfig, IngesterHandle, IngesterMetrics, IngestItem, QueueError};
pub use records::{HintRecord, PolicyVersionRecord, PreviewRecord, RunRecord, ToolCallRecord};
pub use schema::SCHEMA_VERSION;
pub use store::LedgerStore;
