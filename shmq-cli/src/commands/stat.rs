// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq stat` command - Show queue parameters and state.
//!
//! Counts are read without taking the queue lock and may already be stale.

use shmq_core::{AccessMode, MessageQueue};

pub fn execute(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let queue = MessageQueue::open(name, AccessMode::ReadOnly)?;
    let registrations = queue.registrations();

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", format!("QUEUE {}", name));
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ {:<24} {:>35} ║", "Capacity", queue.capacity());
    println!("║ {:<24} {:>35} ║", "Max message length", queue.max_message_len());
    println!("║ {:<24} {:>35} ║", "Queued messages", queue.current_count());
    println!("║ {:<24} {:>35} ║", "Registrations", registrations.len());
    println!("╚══════════════════════════════════════════════════════════════╝");

    for registration in &registrations {
        println!(
            "  - pid {} waits for type {} (signal {})",
            registration.pid, registration.msg_type, registration.signal
        );
    }

    queue.disconnect()?;
    Ok(())
}
