// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

use thiserror::Error;

pub mod create;
pub mod demo;
pub mod destroy;
pub mod recv;
pub mod send;
pub mod stat;
pub mod validate;
pub mod watch;

/// Argument errors detected by the CLI itself, before reaching a queue.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Queue '{name}' is not defined in {manifest}")]
    NotInManifest { name: String, manifest: String },

    #[error("A queue name or --config is required")]
    MissingQueue,

    #[error("Demo needs at least 2 processes, got {0}")]
    TooFewProcesses(usize),
}

/// Blocking mode from a `--nonblock` flag.
pub(crate) fn blocking(nonblock: bool) -> shmq_core::BlockingMode {
    if nonblock {
        shmq_core::BlockingMode::NonBlock
    } else {
        shmq_core::BlockingMode::Block
    }
}
