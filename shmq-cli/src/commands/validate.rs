// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq validate` command - Validate a queue manifest.

use shmq_core::ConfigLoader;

pub fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating manifest");

    match ConfigLoader::load_file(file) {
        Ok(manifest) => {
            println!("✓ Manifest is valid");
            println!();
            println!("Queues ({}):", manifest.queues.len());
            for queue in &manifest.queues {
                println!(
                    "  - {} (capacity: {}, max message: {} bytes, mode: {})",
                    queue.name,
                    queue.config.capacity(),
                    queue.config.max_message_len(),
                    queue.config.permissions()
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Manifest validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
