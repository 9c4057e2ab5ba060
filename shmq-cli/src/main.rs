// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shmq CLI
//!
//! Command-line interface for shared-memory message queues.

use clap::{Parser, Subcommand};

mod commands;

/// Shmq - inter-process message queues over POSIX shared memory
#[derive(Parser)]
#[command(name = "shmq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a queue from flags, or every queue in a manifest
    Create {
        /// Queue name (required unless --config is given)
        name: Option<String>,

        /// Queue manifest (YAML)
        #[arg(short, long)]
        config: Option<String>,

        /// Maximum number of queued messages
        #[arg(long, default_value_t = 10)]
        capacity: usize,

        /// Maximum payload size in bytes
        #[arg(long, default_value_t = 256)]
        max_len: usize,

        /// Access permissions, octal
        #[arg(short, long, default_value = "0600")]
        mode: String,

        /// Fail if the queue already exists
        #[arg(short, long)]
        exclusive: bool,
    },

    /// Send a message
    Send {
        /// Queue name
        name: String,

        /// Message type
        #[arg(short = 't', long = "type", default_value_t = 1, allow_negative_numbers = true)]
        msg_type: i64,

        /// Payload text
        message: String,

        /// Fail instead of waiting when the queue is full
        #[arg(short, long)]
        nonblock: bool,
    },

    /// Receive a message
    Recv {
        /// Queue name
        name: String,

        /// Selector: 0 any, >0 exact type, <0 any type up to |value|
        #[arg(short = 't', long = "type", default_value_t = 0, allow_negative_numbers = true)]
        selector: i64,

        /// Fail instead of waiting when nothing matches
        #[arg(short, long)]
        nonblock: bool,
    },

    /// Show queue parameters, occupancy and registrations
    Stat {
        /// Queue name
        name: String,
    },

    /// Remove a queue
    Destroy {
        /// Queue name
        name: String,
    },

    /// Validate a queue manifest
    Validate {
        /// Path to the manifest file
        file: String,
    },

    /// Wait for messages of one type using signal notification
    Watch {
        /// Queue name
        name: String,

        /// Message type to watch
        #[arg(short = 't', long = "type", allow_negative_numbers = true)]
        msg_type: i64,

        /// Signal to be notified with (name or number)
        #[arg(short, long, default_value = "SIGUSR1")]
        signal: String,

        /// Number of messages to take before exiting
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },

    /// Run the multi-process producer/consumer demonstration
    Demo {
        /// Queue name
        #[arg(long, default_value = "shmq_demo")]
        name: String,

        /// Number of child processes, half producers and half consumers
        #[arg(short, long, default_value_t = 8)]
        processes: usize,

        /// Messages sent by each producer
        #[arg(short, long, default_value_t = 8)]
        messages: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Create {
            name,
            config,
            capacity,
            max_len,
            mode,
            exclusive,
        } => commands::create::execute(
            name.as_deref(),
            config.as_deref(),
            capacity,
            max_len,
            &mode,
            exclusive,
        ),
        Commands::Send {
            name,
            msg_type,
            message,
            nonblock,
        } => commands::send::execute(&name, msg_type, &message, nonblock),
        Commands::Recv {
            name,
            selector,
            nonblock,
        } => commands::recv::execute(&name, selector, nonblock),
        Commands::Stat { name } => commands::stat::execute(&name),
        Commands::Destroy { name } => commands::destroy::execute(&name),
        Commands::Validate { file } => commands::validate::execute(&file),
        Commands::Watch {
            name,
            msg_type,
            signal,
            count,
        } => commands::watch::execute(&name, msg_type, &signal, count),
        Commands::Demo {
            name,
            processes,
            messages,
        } => commands::demo::execute(&name, processes, messages),
    }
}
