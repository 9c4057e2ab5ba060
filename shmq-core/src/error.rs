// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for shmq.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::AccessMode;

/// Top-level error type for queue operations.
/// Application-level conditions (full, empty, oversize) are always recoverable.
#[derive(Debug, Error)]
pub enum QueueError {
    // =========================================================================
    // Configuration Errors - Rejected at the boundary
    // =========================================================================
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Access Errors
    // =========================================================================
    #[error("Operation '{operation}' not permitted on a {mode} handle")]
    PermissionDenied {
        operation: &'static str,
        mode: AccessMode,
    },

    // =========================================================================
    // Transfer Errors
    // =========================================================================
    #[error("Message too large: {size} bytes exceeds queue maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Receive buffer too small: message is {required} bytes, buffer holds {available}")]
    BufferTooSmall { required: usize, available: usize },

    #[error("Operation would block")]
    WouldBlock,

    #[error("Message of type {msg_type} failed checksum: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        msg_type: i64,
        expected: u32,
        actual: u32,
    },

    // =========================================================================
    // Notification Errors
    // =========================================================================
    #[error("Invalid signal number: {signal}")]
    InvalidSignal { signal: i32 },

    #[error("Notification registry full ({capacity} entries)")]
    RegistryFull { capacity: usize },

    #[error("Process {pid} already holds a notification registration")]
    AlreadyRegistered { pid: i32 },

    #[error("Process {pid} has no notification registration")]
    NotRegistered { pid: i32 },

    #[error("Process {pid} cannot receive signals: {source}")]
    ProcessUnavailable {
        pid: i32,
        #[source]
        source: nix::errno::Errno,
    },

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Queue resource initialization failed: {0}")]
    ResourceInitFailed(#[from] SharedMemoryError),

    #[error("Failed to release queue resources: {0}")]
    ReleaseFailed(#[source] SharedMemoryError),
}

impl QueueError {
    /// POSIX errno equivalent of this error, for C-style reporting.
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidConfig(_) | Self::ConfigParse { .. } | Self::InvalidSignal { .. } => {
                libc::EINVAL
            }
            Self::ConfigNotFound { .. } => libc::ENOENT,
            Self::PermissionDenied { .. } => libc::EBADF,
            Self::MessageTooLarge { .. } | Self::BufferTooSmall { .. } => libc::EMSGSIZE,
            Self::WouldBlock => libc::EAGAIN,
            Self::ChecksumMismatch { .. } => libc::EBADMSG,
            Self::RegistryFull { .. } => libc::ENOSPC,
            Self::AlreadyRegistered { .. } => libc::EBUSY,
            Self::NotRegistered { .. } => libc::ENOENT,
            Self::ProcessUnavailable { source, .. } => *source as i32,
            Self::ResourceInitFailed(e) | Self::ReleaseFailed(e) => e.errno(),
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WouldBlock | Self::BufferTooSmall { .. })
    }
}

/// Hard validation errors for creation parameters and configuration files.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Conflicting open flags: {reason}")]
    ConflictingFlags { reason: &'static str },

    #[error("Duplicate queue name: {name}")]
    DuplicateQueueName { name: String },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Shared memory errors - failures of the backing object or its mapping.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to open shared memory object {name}: {source}")]
    OpenFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Shared memory object {name} already exists")]
    AlreadyExists { name: String },

    #[error("Failed to size shared memory object {name} to {size} bytes: {source}")]
    TruncateFailed {
        name: String,
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to map shared memory: {source}")]
    MapFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to unmap shared memory: {source}")]
    UnmapFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to unlink shared memory object {name}: {source}")]
    UnlinkFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Shared memory region {name} is not a valid queue: {reason}")]
    LayoutMismatch { name: String, reason: String },

    #[error("Failed to initialize {primitive}: {source}")]
    SyncInitFailed {
        primitive: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl SharedMemoryError {
    fn errno(&self) -> i32 {
        match self {
            Self::OpenFailed { source, .. }
            | Self::TruncateFailed { source, .. }
            | Self::MapFailed { source }
            | Self::UnmapFailed { source }
            | Self::UnlinkFailed { source, .. }
            | Self::SyncInitFailed { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Self::AlreadyExists { .. } => libc::EEXIST,
            Self::LayoutMismatch { .. } => libc::EINVAL,
        }
    }
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
