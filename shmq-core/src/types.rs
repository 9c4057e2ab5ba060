// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Longest accepted queue name, excluding the leading slash.
const MAX_NAME_LEN: usize = 255;

/// Validated queue name.
/// Stored without the leading slash; `shm_name` adds it back for `shm_open`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Create a new QueueName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let raw = name.into();
        let name = raw.strip_prefix('/').unwrap_or(&raw).to_string();

        if name.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue_name",
                value: raw,
                reason: "Queue name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue_name",
                value: raw.clone(),
                reason: format!(
                    "Queue name too long: {} bytes (max {})",
                    name.len(),
                    MAX_NAME_LEN
                ),
            });
        }

        if name.contains('/') || name.contains('\0') {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue_name",
                value: raw,
                reason: "Queue name may only contain a leading '/' and no NUL bytes".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the name without the leading slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name in the form expected by `shm_open`.
    pub fn shm_name(&self) -> String {
        format!("/{}", self.0)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl TryFrom<String> for QueueName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for QueueName {
    type Error = HardValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(name: QueueName) -> Self {
        name.0
    }
}

/// Validated permission bits applied to a newly created backing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Permissions(u32);

impl Permissions {
    /// Owner read/write only.
    pub const OWNER_RW: Self = Self(0o600);

    /// Create new Permissions, rejecting anything beyond the rwx bits.
    pub fn new(mode: u32) -> Result<Self, HardValidationError> {
        if mode > 0o777 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "permissions",
                value: format!("{:#o}", mode),
                reason: "Permissions must be within 0o777".to_string(),
            });
        }
        Ok(Self(mode))
    }

    /// Parse an octal string such as `"0666"` or `"0o640"`.
    pub fn parse_octal(text: &str) -> Result<Self, HardValidationError> {
        let digits = text.trim_start_matches("0o");
        let mode =
            u32::from_str_radix(digits, 8).map_err(|e| HardValidationError::InvalidFieldValue {
                field: "permissions",
                value: text.to_string(),
                reason: format!("Not an octal mode: {}", e),
            })?;
        Self::new(mode)
    }

    /// Get the raw mode bits.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::OWNER_RW
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl TryFrom<u32> for Permissions {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Permissions> for u32 {
    fn from(mode: Permissions) -> Self {
        mode.0
    }
}

/// Validated signal number for delivery notifications.
/// Accepts every catchable or fatal signal including the real-time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalNumber(i32);

impl SignalNumber {
    /// Create a new SignalNumber with range validation.
    pub fn new(signal: i32) -> Option<Self> {
        if (1..=Self::max()).contains(&signal) {
            Some(Self(signal))
        } else {
            None
        }
    }

    /// Highest deliverable signal number on this platform.
    #[cfg(target_os = "linux")]
    pub fn max() -> i32 {
        libc::SIGRTMAX()
    }

    /// Highest deliverable signal number on this platform.
    #[cfg(not(target_os = "linux"))]
    pub fn max() -> i32 {
        31
    }

    /// Get the raw signal number.
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for SignalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match nix::sys::signal::Signal::try_from(self.0) {
            Ok(signal) => write!(f, "{}", signal),
            Err(_) => write!(f, "signal {}", self.0),
        }
    }
}

/// Which operations a handle may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Whether `receive` is allowed.
    pub const fn can_receive(&self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    /// Whether `send` is allowed.
    pub const fn can_send(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadOnly => "read-only",
            Self::WriteOnly => "write-only",
            Self::ReadWrite => "read-write",
        };
        f.write_str(name)
    }
}

/// Access mode plus the create / create-exclusive flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub access: AccessMode,
    pub create: bool,
    pub exclusive: bool,
}

impl OpenFlags {
    /// Attach-only flags for the given access mode.
    pub const fn new(access: AccessMode) -> Self {
        Self {
            access,
            create: false,
            exclusive: false,
        }
    }

    /// Request creation of the queue if it does not exist.
    pub const fn create(mut self) -> Self {
        self.create = true;
        self
    }

    /// Together with `create`, fail if the queue already exists.
    pub const fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// Whether a send/receive may suspend the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockingMode {
    #[default]
    Block,
    NonBlock,
}

/// Receive-side criterion choosing which message to dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Oldest message of any type.
    Any,
    /// Oldest message with exactly this type.
    Exact(i64),
    /// Oldest message whose type is at most this value.
    AtMost(u64),
}

impl Selector {
    /// Whether a message of `msg_type` satisfies this selector.
    pub fn matches(&self, msg_type: i64) -> bool {
        match *self {
            Self::Any => true,
            Self::Exact(wanted) => msg_type == wanted,
            Self::AtMost(bound) => msg_type < 0 || (msg_type as u64) <= bound,
        }
    }
}

impl From<i64> for Selector {
    /// 0 selects anything, a positive value an exact type, a negative value
    /// every type up to its absolute value.
    fn from(raw: i64) -> Self {
        match raw {
            0 => Self::Any,
            t if t > 0 => Self::Exact(t),
            t => Self::AtMost(t.unsigned_abs()),
        }
    }
}

impl From<i32> for Selector {
    fn from(raw: i32) -> Self {
        Self::from(i64::from(raw))
    }
}

/// An owned message taken off a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: i64,
    pub payload: Vec<u8>,
}

/// Outcome of a receive into a caller-provided buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Number of payload bytes written into the buffer.
    pub len: usize,
    /// Type the message was sent with.
    pub msg_type: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_queue_name() {
        assert!(QueueName::new("orders").is_ok());
        assert!(QueueName::new("projet_file_msg").is_ok());
        assert!(QueueName::new("a").is_ok());
    }

    #[test]
    fn test_leading_slash_is_normalized() {
        let with = QueueName::new("/orders").unwrap();
        let without = QueueName::new("orders").unwrap();
        assert_eq!(with, without);
        assert_eq!(with.shm_name(), "/orders");
        assert_eq!(with.to_string(), "/orders");
    }

    #[test]
    fn test_invalid_queue_name() {
        assert!(QueueName::new("").is_err());
        assert!(QueueName::new("/").is_err());
        assert!(QueueName::new("a/b").is_err());
        assert!(QueueName::new("nul\0byte").is_err());
        assert!(QueueName::new("x".repeat(256)).is_err());
    }

    #[test]
    fn test_permissions() {
        assert_eq!(Permissions::new(0o666).unwrap().bits(), 0o666);
        assert!(Permissions::new(0o1777).is_err());
        assert_eq!(Permissions::parse_octal("0666").unwrap().bits(), 0o666);
        assert_eq!(Permissions::parse_octal("0o640").unwrap().bits(), 0o640);
        assert!(Permissions::parse_octal("0999").is_err());
        assert_eq!(Permissions::default().to_string(), "0600");
    }

    #[test]
    fn test_signal_number_range() {
        assert!(SignalNumber::new(0).is_none());
        assert!(SignalNumber::new(-1).is_none());
        assert!(SignalNumber::new(libc::SIGUSR1).is_some());
        assert!(SignalNumber::new(SignalNumber::max()).is_some());
        assert!(SignalNumber::new(SignalNumber::max() + 1).is_none());
    }

    #[test]
    fn test_selector_from_raw() {
        assert_eq!(Selector::from(0), Selector::Any);
        assert_eq!(Selector::from(7), Selector::Exact(7));
        assert_eq!(Selector::from(-4), Selector::AtMost(4));
        assert_eq!(Selector::from(i64::MIN), Selector::AtMost(1 << 63));
    }

    #[test]
    fn test_selector_matching() {
        assert!(Selector::Any.matches(42));
        assert!(Selector::Exact(3).matches(3));
        assert!(!Selector::Exact(3).matches(4));

        let priority = Selector::from(-4);
        assert!(priority.matches(3));
        assert!(priority.matches(4));
        assert!(!priority.matches(5));
        assert!(priority.matches(-10));
    }

    #[test]
    fn test_access_mode_rights() {
        assert!(!AccessMode::ReadOnly.can_send());
        assert!(AccessMode::ReadOnly.can_receive());
        assert!(AccessMode::WriteOnly.can_send());
        assert!(!AccessMode::WriteOnly.can_receive());
        assert!(AccessMode::ReadWrite.can_send() && AccessMode::ReadWrite.can_receive());
    }

    #[test]
    fn test_open_flags_builder() {
        let flags = OpenFlags::new(AccessMode::ReadWrite).create().exclusive();
        assert!(flags.create);
        assert!(flags.exclusive);
        assert!(!OpenFlags::new(AccessMode::ReadOnly).create);
    }
}
