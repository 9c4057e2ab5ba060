// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process-shared mutex and condition variables.
//!
//! The primitives live inside the mapped region and are initialized with
//! `PTHREAD_PROCESS_SHARED`, so independent processes mapping the same
//! object synchronize through them. On Linux the mutex is also robust: a
//! holder that dies inside the critical section hands the lock to the next
//! waiter instead of wedging the queue forever.
//!
//! Failure of a primitive at the OS level means the shared structure can
//! no longer be trusted by this process. Such failures are logged, the
//! mutex is released if held, and the process exits.

use std::cell::UnsafeCell;
use std::io;

use crate::error::SharedMemoryError;

/// Condition variables embedded next to the queue mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Signaled after a successful receive frees a slot.
    NotFull,
    /// Broadcast after a successful send adds a message.
    NotEmpty,
}

/// Mutex plus the two queue conditions, laid out in shared memory.
#[repr(C)]
pub struct SharedSync {
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    not_full: UnsafeCell<libc::pthread_cond_t>,
    not_empty: UnsafeCell<libc::pthread_cond_t>,
}

// SAFETY: the pthread primitives are designed for concurrent use; every
// access goes through the pthread API.
unsafe impl Sync for SharedSync {}
unsafe impl Send for SharedSync {}

impl SharedSync {
    /// Initialize the primitives in place with process-shared attributes.
    ///
    /// # Safety
    /// `this` must point into a writable mapping, suitably aligned, that no
    /// other process is using yet.
    pub unsafe fn init(this: *mut SharedSync) -> Result<(), SharedMemoryError> {
        let mut mutex_attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        check("mutex attributes", libc::pthread_mutexattr_init(&mut mutex_attr))?;

        let result = Self::init_mutex(this, &mut mutex_attr);
        libc::pthread_mutexattr_destroy(&mut mutex_attr);
        result?;

        let mut cond_attr: libc::pthread_condattr_t = std::mem::zeroed();
        check("condition attributes", libc::pthread_condattr_init(&mut cond_attr))?;

        let result = Self::init_conditions(this, &mut cond_attr);
        libc::pthread_condattr_destroy(&mut cond_attr);
        result
    }

    unsafe fn init_mutex(
        this: *mut SharedSync,
        attr: &mut libc::pthread_mutexattr_t,
    ) -> Result<(), SharedMemoryError> {
        check(
            "mutex attributes",
            libc::pthread_mutexattr_setpshared(attr, libc::PTHREAD_PROCESS_SHARED),
        )?;
        #[cfg(target_os = "linux")]
        check(
            "mutex attributes",
            libc::pthread_mutexattr_setrobust(attr, libc::PTHREAD_MUTEX_ROBUST),
        )?;
        check(
            "queue mutex",
            libc::pthread_mutex_init((*this).mutex.get(), attr),
        )
    }

    unsafe fn init_conditions(
        this: *mut SharedSync,
        attr: &mut libc::pthread_condattr_t,
    ) -> Result<(), SharedMemoryError> {
        check(
            "condition attributes",
            libc::pthread_condattr_setpshared(attr, libc::PTHREAD_PROCESS_SHARED),
        )?;
        check(
            "queue-full condition",
            libc::pthread_cond_init((*this).not_full.get(), attr),
        )?;
        check(
            "queue-empty condition",
            libc::pthread_cond_init((*this).not_empty.get(), attr),
        )
    }

    /// Enter the critical section. The guard releases the mutex on every exit path.
    pub fn lock(&self) -> QueueGuard<'_> {
        // SAFETY: the mutex was initialized by the creator of the region
        let rc = unsafe { libc::pthread_mutex_lock(self.mutex.get()) };
        self.after_acquire("pthread_mutex_lock", rc);
        QueueGuard { sync: self }
    }

    /// Wake one process blocked on `NotFull`, or every process blocked on `NotEmpty`.
    ///
    /// Receivers wait with different selectors, so a new message must reach
    /// all of them; any waiting sender can use a freed slot.
    pub fn notify(&self, condition: Condition) {
        // SAFETY: the conditions were initialized by the creator of the region
        let (op, rc) = unsafe {
            match condition {
                Condition::NotFull => (
                    "pthread_cond_signal",
                    libc::pthread_cond_signal(self.not_full.get()),
                ),
                Condition::NotEmpty => (
                    "pthread_cond_broadcast",
                    libc::pthread_cond_broadcast(self.not_empty.get()),
                ),
            }
        };
        if rc != 0 {
            fatal(op, rc);
        }
    }

    fn condition(&self, condition: Condition) -> *mut libc::pthread_cond_t {
        match condition {
            Condition::NotFull => self.not_full.get(),
            Condition::NotEmpty => self.not_empty.get(),
        }
    }

    /// Handle the result of an operation that leaves the mutex held on success.
    fn after_acquire(&self, op: &'static str, rc: libc::c_int) {
        match rc {
            0 => {}
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => {
                tracing::warn!(
                    "Previous queue lock holder died inside the critical section; recovering lock"
                );
                // SAFETY: we own the mutex after EOWNERDEAD
                let rc = unsafe { libc::pthread_mutex_consistent(self.mutex.get()) };
                if rc != 0 {
                    self.release_and_exit("pthread_mutex_consistent", rc);
                }
            }
            _ => fatal(op, rc),
        }
    }

    fn release_and_exit(&self, op: &'static str, rc: libc::c_int) -> ! {
        // SAFETY: best effort; the process is about to exit
        unsafe { libc::pthread_mutex_unlock(self.mutex.get()) };
        fatal(op, rc)
    }
}

/// Proof that the queue mutex is held by the current thread.
///
/// Dropping the guard (normal return, early `?` return, or unwinding)
/// unlocks the mutex.
pub struct QueueGuard<'a> {
    sync: &'a SharedSync,
}

impl QueueGuard<'_> {
    /// Atomically release the mutex and sleep until `condition` is signaled.
    ///
    /// Wakeups may be spurious; callers re-check their predicate in a loop.
    pub fn wait(&mut self, condition: Condition) {
        // SAFETY: the guard proves the mutex is held by this thread
        let rc = unsafe {
            libc::pthread_cond_wait(self.sync.condition(condition), self.sync.mutex.get())
        };
        self.sync.after_acquire("pthread_cond_wait", rc);
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard proves the mutex is held by this thread
        let rc = unsafe { libc::pthread_mutex_unlock(self.sync.mutex.get()) };
        if rc != 0 {
            fatal("pthread_mutex_unlock", rc);
        }
    }
}

fn check(primitive: &'static str, rc: libc::c_int) -> Result<(), SharedMemoryError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(SharedMemoryError::SyncInitFailed {
            primitive,
            source: io::Error::from_raw_os_error(rc),
        })
    }
}

fn fatal(op: &'static str, rc: libc::c_int) -> ! {
    tracing::error!(
        operation = op,
        error = %io::Error::from_raw_os_error(rc),
        "Queue synchronization failed; shared state can no longer be trusted"
    );
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::SharedMemoryRegion;

    fn shared_sync(region: &SharedMemoryRegion) -> &SharedSync {
        let ptr = region.as_ptr() as *mut SharedSync;
        unsafe {
            SharedSync::init(ptr).unwrap();
            &*ptr
        }
    }

    #[test]
    fn test_lock_unlock_cycle() {
        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        let sync = shared_sync(&region);
        for _ in 0..3 {
            let guard = sync.lock();
            drop(guard);
        }
    }

    #[test]
    fn test_guard_released_on_unwind() {
        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        let sync = shared_sync(&region);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = sync.lock();
            panic!("failure inside the critical section");
        }));
        assert!(result.is_err());

        // Would deadlock if the guard had not unlocked during unwinding.
        drop(sync.lock());
    }

    #[test]
    fn test_wait_wakes_on_notify() {
        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        let sync = shared_sync(&region);
        let flag = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                let mut guard = sync.lock();
                while !flag.load(std::sync::atomic::Ordering::Relaxed) {
                    guard.wait(Condition::NotEmpty);
                }
            });

            std::thread::sleep(std::time::Duration::from_millis(50));
            {
                let _guard = sync.lock();
                flag.store(true, std::sync::atomic::Ordering::Relaxed);
            }
            sync.notify(Condition::NotEmpty);
        });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_robust_mutex_survives_dead_holder() {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{fork, ForkResult};

        let region = SharedMemoryRegion::anonymous(4096).unwrap();
        let sync = shared_sync(&region);

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let guard = sync.lock();
                std::mem::forget(guard);
                unsafe { libc::_exit(0) };
            }
            ForkResult::Parent { child } => {
                assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
                // The child exited holding the lock; acquisition must still succeed.
                drop(sync.lock());
                drop(sync.lock());
            }
        }
    }
}
