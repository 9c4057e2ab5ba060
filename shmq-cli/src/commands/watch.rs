// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq watch` command - Take messages of one type as notifications arrive.
//!
//! The signal is blocked and collected with `sigwait`, so no handler runs.
//! A registration is used up by each delivery and renewed for the next one.
//! A stale pending signal only causes one extra empty poll.

use nix::sys::signal::{SigSet, Signal};
use shmq_core::{AccessMode, BlockingMode, MessageQueue, QueueError, Selector};

use super::CliError;

fn parse_signal(text: &str) -> Result<Signal, CliError> {
    let unknown = || CliError::UnknownSignal(text.to_string());
    match text.parse::<i32>() {
        Ok(number) => Signal::try_from(number).map_err(|_| unknown()),
        Err(_) => {
            let upper = text.to_ascii_uppercase();
            let full = if upper.starts_with("SIG") {
                upper
            } else {
                format!("SIG{}", upper)
            };
            full.parse::<Signal>().map_err(|_| unknown())
        }
    }
}

pub fn execute(
    name: &str,
    msg_type: i64,
    signal: &str,
    count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let signal = parse_signal(signal)?;
    let queue = MessageQueue::open(name, AccessMode::ReadOnly)?;

    let mut mask = SigSet::empty();
    mask.add(signal);
    mask.thread_block()?;

    println!("Watching {} for type {} ({})", name, msg_type, signal);

    let mut taken = 0;
    while taken < count {
        // Register before looking, so a message sent in between still signals.
        match queue.register_notification(msg_type, signal as i32) {
            Ok(()) | Err(QueueError::AlreadyRegistered { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        match queue.receive_message(
            queue.max_message_len(),
            Selector::Exact(msg_type),
            BlockingMode::NonBlock,
        ) {
            Ok(message) => {
                println!("[type {}] {}", message.msg_type, String::from_utf8_lossy(&message.payload));
                taken += 1;
            }
            Err(QueueError::WouldBlock) => {
                let received = mask.wait()?;
                tracing::debug!(signal = %received, "Notification received");
            }
            Err(e) => return Err(e.into()),
        }
    }

    // The last registration may still be pending.
    let _ = queue.unregister_notification();
    queue.disconnect()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("SIGUSR1").unwrap(), Signal::SIGUSR1);
        assert_eq!(parse_signal("usr2").unwrap(), Signal::SIGUSR2);
        assert_eq!(parse_signal("10").unwrap(), Signal::try_from(10).unwrap());
        assert!(parse_signal("SIGNOPE").is_err());
        assert!(parse_signal("0").is_err());
    }
}
