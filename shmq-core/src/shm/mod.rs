// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory storage for queues.
//!
//! POSIX shared memory objects (or anonymous shared mappings), the binary
//! layout placed inside them, and payload validation.

pub mod layout;
mod region;
mod validator;

pub use layout::{Layout, QueueHeader, RingIndex, RingState, SlotHeader};
pub use region::SharedMemoryRegion;
pub use validator::PayloadValidator;
