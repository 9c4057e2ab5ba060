// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Notification registry.
//!
//! A fixed table in the queue header where processes ask to be signaled
//! when a message of a given type is sent. Registration and cancellation
//! happen under the queue mutex; senders scan the table after releasing
//! it. A sender claims an entry by swapping its pid to zero, so each
//! registration fires at most once even with concurrent senders.
//!
//! Each process holds at most one registration; a second `register`
//! without `unregister` is rejected.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use nix::errno::Errno;
use nix::unistd::Pid;

use crate::error::{QueueError, QueueResult};
use crate::sync::QueueGuard;
use crate::types::SignalNumber;

/// Maximum number of simultaneous registrations per queue.
pub const MAX_REGISTRATIONS: usize = 10;

/// One table entry. A zero pid marks the entry free.
#[repr(C)]
pub struct NotificationEntry {
    pid: AtomicI32,
    signal: AtomicI32,
    msg_type: AtomicI64,
}

impl NotificationEntry {
    fn clear(&self) {
        self.pid.store(0, Ordering::Release);
        self.signal.store(0, Ordering::Relaxed);
        self.msg_type.store(0, Ordering::Relaxed);
    }
}

/// A registration as seen in a snapshot of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub pid: Pid,
    pub msg_type: i64,
    pub signal: i32,
}

/// The registry embedded in the queue header. All-zero bytes is an empty table.
#[repr(C)]
pub struct NotificationTable {
    entries: [NotificationEntry; MAX_REGISTRATIONS],
}

impl NotificationTable {
    /// Record `pid` as wanting `signal` when a message of `msg_type` arrives.
    ///
    /// Requires the queue lock; the guard is taken as proof.
    pub fn register(
        &self,
        _guard: &QueueGuard<'_>,
        pid: Pid,
        msg_type: i64,
        signal: SignalNumber,
    ) -> QueueResult<usize> {
        if self.position_of(pid).is_some() {
            return Err(QueueError::AlreadyRegistered { pid: pid.as_raw() });
        }

        let index = self
            .entries
            .iter()
            .position(|e| e.pid.load(Ordering::Acquire) == 0)
            .ok_or(QueueError::RegistryFull {
                capacity: MAX_REGISTRATIONS,
            })?;

        // Signal 0 only probes that the target exists and is reachable.
        Errno::result(unsafe { libc::kill(pid.as_raw(), 0) }).map_err(|source| {
            QueueError::ProcessUnavailable {
                pid: pid.as_raw(),
                source,
            }
        })?;

        let entry = &self.entries[index];
        entry.msg_type.store(msg_type, Ordering::Relaxed);
        entry.signal.store(signal.value(), Ordering::Relaxed);
        entry.pid.store(pid.as_raw(), Ordering::Release);

        tracing::debug!(pid = %pid, msg_type = msg_type, signal = %signal, slot = index, "Registered for notification");
        Ok(index)
    }

    /// Remove the registration held by `pid`.
    pub fn unregister(&self, _guard: &QueueGuard<'_>, pid: Pid) -> QueueResult<()> {
        let index = self
            .position_of(pid)
            .ok_or(QueueError::NotRegistered { pid: pid.as_raw() })?;
        self.entries[index].clear();

        tracing::debug!(pid = %pid, slot = index, "Cancelled notification");
        Ok(())
    }

    /// Signal and clear every registration for `msg_type`. Runs without the lock.
    ///
    /// Returns the number of signals delivered. A vanished target is not an
    /// error; its entry is simply dropped.
    pub fn deliver(&self, msg_type: i64) -> usize {
        let mut delivered = 0;

        for entry in &self.entries {
            let pid = entry.pid.load(Ordering::Acquire);
            if pid == 0 || entry.msg_type.load(Ordering::Relaxed) != msg_type {
                continue;
            }
            let signal = entry.signal.load(Ordering::Relaxed);

            // Another sender may claim the same entry concurrently.
            if entry
                .pid
                .compare_exchange(pid, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            match Errno::result(unsafe { libc::kill(pid, signal) }) {
                Ok(_) => {
                    delivered += 1;
                    tracing::trace!(pid = pid, signal = signal, msg_type = msg_type, "Delivered notification");
                }
                Err(Errno::ESRCH) => {
                    tracing::debug!(pid = pid, "Dropping notification for exited process");
                }
                Err(e) => {
                    tracing::warn!(pid = pid, signal = signal, error = %e, "Failed to deliver notification");
                }
            }
        }

        delivered
    }

    /// Current registrations. Lock-free and advisory.
    pub fn snapshot(&self) -> Vec<Registration> {
        self.entries
            .iter()
            .filter_map(|e| {
                let pid = e.pid.load(Ordering::Acquire);
                (pid != 0).then(|| Registration {
                    pid: Pid::from_raw(pid),
                    msg_type: e.msg_type.load(Ordering::Relaxed),
                    signal: e.signal.load(Ordering::Relaxed),
                })
            })
            .collect()
    }

    fn position_of(&self, pid: Pid) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.pid.load(Ordering::Acquire) == pid.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedMemoryRegion;
    use crate::sync::SharedSync;

    #[repr(C)]
    struct Fixture {
        sync: SharedSync,
        table: NotificationTable,
    }

    fn fixture(region: &SharedMemoryRegion) -> &Fixture {
        let ptr = region.as_ptr() as *mut Fixture;
        unsafe {
            SharedSync::init(std::ptr::addr_of_mut!((*ptr).sync)).unwrap();
            &*ptr
        }
    }

    fn usr1() -> SignalNumber {
        SignalNumber::new(libc::SIGUSR1).unwrap()
    }

    #[test]
    fn test_register_and_unregister() {
        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        let f = fixture(&region);
        let me = nix::unistd::getpid();

        let guard = f.sync.lock();
        assert!(f.table.snapshot().is_empty());
        f.table.register(&guard, me, 7, usr1()).unwrap();
        assert_eq!(
            f.table.snapshot(),
            vec![Registration {
                pid: me,
                msg_type: 7,
                signal: libc::SIGUSR1
            }]
        );

        f.table.unregister(&guard, me).unwrap();
        assert!(f.table.snapshot().is_empty());
        assert!(matches!(
            f.table.unregister(&guard, me),
            Err(QueueError::NotRegistered { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        let f = fixture(&region);
        let me = nix::unistd::getpid();

        let guard = f.sync.lock();
        f.table.register(&guard, me, 1, usr1()).unwrap();
        assert!(matches!(
            f.table.register(&guard, me, 2, usr1()),
            Err(QueueError::AlreadyRegistered { .. })
        ));
        assert_eq!(f.table.snapshot().len(), 1);
    }

    #[test]
    fn test_registry_full() {
        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        let f = fixture(&region);
        let guard = f.sync.lock();

        // Fill every entry with distinct placeholder pids.
        for (i, entry) in f.table.entries.iter().enumerate() {
            entry.msg_type.store(100, Ordering::Relaxed);
            entry.pid.store(1_000_000 + i as i32, Ordering::Release);
        }

        assert!(matches!(
            f.table.register(&guard, nix::unistd::getpid(), 1, usr1()),
            Err(QueueError::RegistryFull { capacity: MAX_REGISTRATIONS })
        ));
    }

    #[test]
    fn test_deliver_to_missing_process_clears_entry() {
        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        let f = fixture(&region);

        // A pid beyond any pid_max on Linux: kill() fails with ESRCH.
        let entry = &f.table.entries[0];
        entry.msg_type.store(9, Ordering::Relaxed);
        entry.signal.store(libc::SIGUSR1, Ordering::Relaxed);
        entry.pid.store(i32::MAX - 1, Ordering::Release);

        assert_eq!(f.table.deliver(8), 0);
        assert_eq!(f.table.snapshot().len(), 1);

        assert_eq!(f.table.deliver(9), 0);
        assert!(f.table.snapshot().is_empty());
    }
}
