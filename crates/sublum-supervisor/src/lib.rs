// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! sublum-supervisor
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Spawning and lifecycle control of the upstream process group.
pub mod process;
/// Shutdown signal handling.
pub mod signals;

pub use process::{ProcessSpec, ProcessStatus, Supervisor, SupervisorError};
pub use signals::{wait_for_shutdown_signal, ShutdownReason};
