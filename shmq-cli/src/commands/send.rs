// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq send` command - Send one message.

use shmq_core::{AccessMode, MessageQueue};

pub fn execute(
    name: &str,
    msg_type: i64,
    message: &str,
    nonblock: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let queue = MessageQueue::open(name, AccessMode::WriteOnly)?;
    queue.send(msg_type, message.as_bytes(), super::blocking(nonblock))?;

    tracing::debug!(name = %name, msg_type = msg_type, len = message.len(), "Message sent");
    queue.disconnect()?;
    Ok(())
}
