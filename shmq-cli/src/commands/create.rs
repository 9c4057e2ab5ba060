// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq create` command - Create queues from flags or a manifest.

use shmq_core::{
    AccessMode, ConfigLoader, MessageQueue, OpenFlags, Permissions, QueueConfig, QueueName,
};

use super::CliError;

pub fn execute(
    name: Option<&str>,
    config_path: Option<&str>,
    capacity: usize,
    max_len: usize,
    mode: &str,
    exclusive: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let queues = match config_path {
        Some(path) => {
            let manifest = ConfigLoader::load_file(path)?;
            match name {
                Some(name) => {
                    let name = QueueName::new(name)?;
                    let definition = manifest.get(&name).ok_or_else(|| CliError::NotInManifest {
                        name: name.to_string(),
                        manifest: path.to_string(),
                    })?;
                    vec![(definition.name.clone(), definition.config)]
                }
                None => manifest
                    .queues
                    .into_iter()
                    .map(|q| (q.name, q.config))
                    .collect(),
            }
        }
        None => {
            let name = QueueName::new(name.ok_or(CliError::MissingQueue)?)?;
            let config = QueueConfig::new(capacity, max_len, Permissions::parse_octal(mode)?)?;
            vec![(name, config)]
        }
    };

    let mut flags = OpenFlags::new(AccessMode::ReadWrite).create();
    if exclusive {
        flags = flags.exclusive();
    }

    for (name, config) in queues {
        tracing::info!(name = %name, capacity = config.capacity(), "Creating queue");
        let queue = MessageQueue::connect(Some(name.as_str()), flags, Some(config))?;
        println!(
            "✓ {} (capacity: {}, max message: {} bytes, mode: {})",
            name,
            queue.capacity(),
            queue.max_message_len(),
            config.permissions()
        );
        queue.disconnect()?;
    }

    Ok(())
}
