// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq recv` command - Receive one message and print it.

use shmq_core::{AccessMode, MessageQueue};

pub fn execute(name: &str, selector: i64, nonblock: bool) -> Result<(), Box<dyn std::error::Error>> {
    let queue = MessageQueue::open(name, AccessMode::ReadOnly)?;
    let message =
        queue.receive_message(queue.max_message_len(), selector, super::blocking(nonblock))?;

    println!(
        "[type {}] {}",
        message.msg_type,
        String::from_utf8_lossy(&message.payload)
    );
    queue.disconnect()?;
    Ok(())
}
