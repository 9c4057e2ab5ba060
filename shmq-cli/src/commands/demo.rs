// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq demo` command - Producers and consumers in separate processes.
//!
//! Forks `processes` children around one named queue. The first half
//! consume `messages` messages each, the second half send `messages`
//! greetings typed with their own pid. Every child then sends a farewell,
//! and the parent drains whatever is left before removing the queue.

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, getpid, ForkResult, Pid};
use shmq_core::{
    AccessMode, BlockingMode, MessageQueue, Permissions, QueueConfig, QueueResult, Selector,
};

use super::CliError;

const DEMO_CAPACITY: usize = 5;
const DEMO_MAX_LEN: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Consumer,
    Producer,
}

pub fn execute(
    name: &str,
    processes: usize,
    messages: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if processes < 2 {
        return Err(CliError::TooFewProcesses(processes).into());
    }

    let config = QueueConfig::new(DEMO_CAPACITY, DEMO_MAX_LEN, Permissions::new(0o666)?)?;
    let queue = MessageQueue::create(name, AccessMode::ReadWrite, config)?;
    tracing::info!(name = %name, processes = processes, messages = messages, "Starting demo");

    let consumers = processes / 2;
    let producers = processes - consumers;

    let mut children = Vec::with_capacity(processes);
    for index in 0..processes {
        let role = if index < consumers {
            Role::Consumer
        } else {
            Role::Producer
        };

        // SAFETY: the CLI is single-threaded; the child only touches the queue
        match unsafe { fork() }? {
            ForkResult::Child => {
                let code = match run_child(&queue, role, messages) {
                    Ok(()) => 0,
                    Err(e) => {
                        eprintln!("[{}] {:?} failed: {}", getpid(), role, e);
                        1
                    }
                };
                std::process::exit(code);
            }
            ForkResult::Parent { child } => children.push(child),
        }
    }

    // Consumers take consumers * messages; the rest is greetings plus one farewell per child.
    let leftover = producers * messages + processes - consumers * messages;
    for _ in 0..leftover {
        print_message("parent", &queue, getpid())?;
    }

    let mut failed = 0;
    for child in children {
        match waitpid(child, None)? {
            WaitStatus::Exited(_, 0) => {}
            status => {
                tracing::warn!(pid = %child, status = ?status, "Child did not finish cleanly");
                failed += 1;
            }
        }
    }

    queue.disconnect()?;
    MessageQueue::destroy(name)?;

    if failed == 0 {
        println!("✓ Demo finished ({} producers, {} consumers)", producers, consumers);
    } else {
        println!("✗ {} child process(es) failed", failed);
    }
    Ok(())
}

fn run_child(queue: &MessageQueue, role: Role, messages: usize) -> QueueResult<()> {
    let pid = getpid();

    for _ in 0..messages {
        match role {
            Role::Consumer => print_message("consumer", queue, pid)?,
            Role::Producer => send_text(queue, pid, &format!("Hello from {}!", pid))?,
        }
    }

    send_text(queue, pid, &format!("Last msg {}!", pid))
}

fn send_text(queue: &MessageQueue, pid: Pid, text: &str) -> QueueResult<()> {
    let bytes = text.as_bytes();
    let len = bytes.len().min(queue.max_message_len());
    queue.send(i64::from(pid.as_raw()), &bytes[..len], BlockingMode::Block)
}

fn print_message(who: &str, queue: &MessageQueue, pid: Pid) -> QueueResult<()> {
    let message = queue.receive_message(queue.max_message_len(), Selector::Any, BlockingMode::Block)?;
    println!(
        "[{} {}] type {}: {}",
        who,
        pid,
        message.msg_type,
        String::from_utf8_lossy(&message.payload)
    );
    Ok(())
}
