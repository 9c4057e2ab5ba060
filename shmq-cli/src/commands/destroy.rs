// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq destroy` command - Remove a queue.

use shmq_core::MessageQueue;

pub fn execute(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(name = %name, "Destroying queue");

    MessageQueue::destroy(name)?;

    println!("✓ Queue removed");
    Ok(())
}
