// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Message queue handle: connection management and the send/receive engine.
//!
//! A `MessageQueue` is one process's view of a queue region. Many handles,
//! in many processes, may refer to the same region; they coordinate only
//! through the process-shared mutex and conditions stored in its header.

use std::ptr::{self, addr_of, addr_of_mut};
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use nix::unistd::getpid;

use crate::config::QueueConfig;
use crate::error::{HardValidationError, QueueError, QueueResult, SharedMemoryError};
use crate::notify::{NotificationTable, Registration};
use crate::shm::layout::{LAYOUT_VERSION, QUEUE_MAGIC, SLOT_HEADER_SIZE};
use crate::shm::{Layout, PayloadValidator, QueueHeader, RingIndex, SharedMemoryRegion, SlotHeader};
use crate::sync::{Condition, QueueGuard, SharedSync};
use crate::types::{
    AccessMode, BlockingMode, Message, OpenFlags, QueueName, Received, Selector, SignalNumber,
};

/// How many times an attach re-checks a region that is still being initialized.
const ATTACH_RETRIES: u32 = 400;

/// Pause between attach re-checks.
const ATTACH_BACKOFF: Duration = Duration::from_millis(5);

/// A connection to a shared-memory message queue.
///
/// Dropping the handle unmaps the region, like `disconnect` but without
/// reporting errors. Neither ever removes the queue itself.
pub struct MessageQueue {
    access: AccessMode,
    region: SharedMemoryRegion,
    layout: Layout,
}

impl MessageQueue {
    // =========================================================================
    // Connection management
    // =========================================================================

    /// Create or attach to a queue.
    ///
    /// `name` of `None` requests an anonymous queue, shareable only with
    /// processes forked after this call. `config` must be present exactly
    /// when `flags.create` is set.
    pub fn connect(
        name: Option<&str>,
        flags: OpenFlags,
        config: Option<QueueConfig>,
    ) -> QueueResult<Self> {
        Self::check_flags(name.is_some(), flags, config.is_some())?;
        let name = name.map(QueueName::new).transpose()?;

        match (name, config) {
            (Some(name), Some(config)) => Self::create_named(&name, flags, config),
            (Some(name), None) => Self::attach(&name, flags.access),
            (None, Some(config)) => Self::create_anonymous(flags.access, config),
            (None, None) => Err(HardValidationError::ConflictingFlags {
                reason: "an anonymous queue must be created",
            }
            .into()),
        }
    }

    /// Create a named queue, attaching to it if it already exists.
    pub fn create(name: &str, access: AccessMode, config: QueueConfig) -> QueueResult<Self> {
        Self::connect(Some(name), OpenFlags::new(access).create(), Some(config))
    }

    /// Attach to an existing named queue.
    pub fn open(name: &str, access: AccessMode) -> QueueResult<Self> {
        Self::connect(Some(name), OpenFlags::new(access), None)
    }

    /// Create a read-write anonymous queue.
    pub fn anonymous(config: QueueConfig) -> QueueResult<Self> {
        Self::connect(
            None,
            OpenFlags::new(AccessMode::ReadWrite).create(),
            Some(config),
        )
    }

    /// Unmap the queue from this process. The queue itself is untouched.
    pub fn disconnect(self) -> QueueResult<()> {
        let name = self.region.name().cloned();
        self.region.unmap().map_err(QueueError::ReleaseFailed)?;
        tracing::debug!(name = ?name, "Disconnected from queue");
        Ok(())
    }

    /// Remove a named queue. Attached processes keep working until they
    /// disconnect; new attaches by this name fail.
    pub fn destroy(name: &str) -> QueueResult<()> {
        let name = QueueName::new(name)?;
        SharedMemoryRegion::unlink(&name).map_err(QueueError::ReleaseFailed)?;
        tracing::debug!(name = %name, "Destroyed queue");
        Ok(())
    }

    fn check_flags(named: bool, flags: OpenFlags, has_config: bool) -> Result<(), HardValidationError> {
        if flags.exclusive && !flags.create {
            return Err(HardValidationError::ConflictingFlags {
                reason: "exclusive requires create",
            });
        }
        if !named && !flags.create {
            return Err(HardValidationError::ConflictingFlags {
                reason: "an anonymous queue must be created",
            });
        }
        match (flags.create, has_config) {
            (true, false) => Err(HardValidationError::MissingRequiredField {
                field: "capacity, max_message_len, permissions",
                context: "queue creation".to_string(),
            }),
            (false, true) => Err(HardValidationError::ConflictingFlags {
                reason: "creation parameters given without create",
            }),
            _ => Ok(()),
        }
    }

    fn create_named(name: &QueueName, flags: OpenFlags, config: QueueConfig) -> QueueResult<Self> {
        let layout = Layout::new(config.capacity(), config.max_message_len());

        let region = match SharedMemoryRegion::create(name, layout.total_size(), config.permissions())
        {
            Ok(region) => region,
            Err(SharedMemoryError::AlreadyExists { .. }) if !flags.exclusive => {
                tracing::debug!(name = %name, "Queue exists, attaching instead of creating");
                return Self::attach(name, flags.access);
            }
            Err(e) => return Err(e.into()),
        };

        let queue = Self {
            access: flags.access,
            region,
            layout,
        };
        if let Err(e) = queue.initialize() {
            // A half-initialized object would stall every later attach.
            let _ = SharedMemoryRegion::unlink(name);
            return Err(e.into());
        }

        tracing::debug!(
            name = %name,
            capacity = layout.capacity(),
            max_message_len = layout.max_message_len(),
            "Created queue"
        );
        Ok(queue)
    }

    fn create_anonymous(access: AccessMode, config: QueueConfig) -> QueueResult<Self> {
        let layout = Layout::new(config.capacity(), config.max_message_len());
        let region = SharedMemoryRegion::anonymous(layout.total_size())?;
        let queue = Self {
            access,
            region,
            layout,
        };
        queue.initialize()?;

        tracing::debug!(
            capacity = layout.capacity(),
            max_message_len = layout.max_message_len(),
            "Created anonymous queue"
        );
        Ok(queue)
    }

    /// Map an existing queue, waiting briefly for its creator to finish.
    fn attach(name: &QueueName, access: AccessMode) -> QueueResult<Self> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::try_attach(name, access) {
                Ok(queue) => return Ok(queue),
                Err(SharedMemoryError::LayoutMismatch { reason, .. }) if attempt < ATTACH_RETRIES => {
                    tracing::trace!(name = %name, attempt = attempt, reason = %reason, "Queue not ready");
                    thread::sleep(ATTACH_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn try_attach(name: &QueueName, access: AccessMode) -> Result<Self, SharedMemoryError> {
        let region = SharedMemoryRegion::open(name)?;
        let mismatch = |reason: String| SharedMemoryError::LayoutMismatch {
            name: name.to_string(),
            reason,
        };

        if region.size() < std::mem::size_of::<QueueHeader>() {
            return Err(mismatch(format!("region of {} bytes is too small", region.size())));
        }

        let header = region.as_ptr() as *const QueueHeader;
        // SAFETY: the region is at least one header long; the magic word is atomic
        let magic = unsafe { (*addr_of!((*header).magic)).load(Ordering::Acquire) };
        if magic != QUEUE_MAGIC {
            return Err(mismatch("header not initialized".to_string()));
        }

        // SAFETY: published before the magic word and immutable afterwards
        let (version, capacity, max_message_len) = unsafe {
            (
                addr_of!((*header).version).read(),
                addr_of!((*header).capacity).read() as usize,
                addr_of!((*header).max_message_len).read() as usize,
            )
        };
        if version != LAYOUT_VERSION {
            return Err(SharedMemoryError::LayoutMismatch {
                name: name.to_string(),
                reason: format!("layout version {} is not supported", version),
            });
        }

        let layout = Layout::new(capacity, max_message_len);
        if layout.total_size() != region.size() {
            return Err(mismatch(format!(
                "size {} does not match geometry {}x{}",
                region.size(),
                capacity,
                max_message_len
            )));
        }

        tracing::debug!(name = %name, capacity = capacity, max_message_len = max_message_len, "Attached to queue");
        Ok(Self {
            access,
            region,
            layout,
        })
    }

    /// Write a fresh header, synchronization state and empty ring.
    fn initialize(&self) -> Result<(), SharedMemoryError> {
        let header = self.header_ptr();

        // SAFETY: the region was just created by us and is large enough for
        // the layout; nobody can observe it before the magic word is stored.
        unsafe {
            addr_of_mut!((*header).version).write(LAYOUT_VERSION);
            addr_of_mut!((*header).capacity).write(self.layout.capacity() as u64);
            addr_of_mut!((*header).max_message_len).write(self.layout.max_message_len() as u64);
            ptr::write_bytes(addr_of_mut!((*header).notifications), 0, 1);
            SharedSync::init(addr_of_mut!((*header).sync))?;

            let slots = self.region.as_ptr().add(self.layout.slot_offset(0));
            ptr::write_bytes(slots, 0, self.layout.capacity() * self.layout.slot_stride());
        }

        self.ring().reset();

        // SAFETY: header is valid; the magic word is atomic
        unsafe { (*addr_of!((*header).magic)).store(QUEUE_MAGIC, Ordering::Release) };
        Ok(())
    }

    // =========================================================================
    // Send / receive
    // =========================================================================

    /// Append a message of `msg_type`.
    ///
    /// With `BlockingMode::Block` a full queue suspends the caller until a
    /// receive frees a slot. After the message is stored, receivers are woken
    /// and every process registered for `msg_type` is signaled once.
    pub fn send(&self, msg_type: i64, payload: &[u8], mode: BlockingMode) -> QueueResult<()> {
        if !self.access.can_send() {
            return Err(QueueError::PermissionDenied {
                operation: "send",
                mode: self.access,
            });
        }
        PayloadValidator::validate_for_send(payload, self.layout.max_message_len())?;

        {
            let mut guard = self.sync().lock();
            while self.ring().is_full() {
                if mode == BlockingMode::NonBlock {
                    return Err(QueueError::WouldBlock);
                }
                guard.wait(Condition::NotFull);
            }

            let slot = self.ring().push().ok_or(QueueError::WouldBlock)?;
            // SAFETY: the slot was just taken from the free pool under the lock
            unsafe { self.write_slot(slot, msg_type, payload) };

            tracing::trace!(msg_type = msg_type, len = payload.len(), slot = slot, "Sent message");
        }

        self.sync().notify(Condition::NotEmpty);
        self.notifications().deliver(msg_type);
        Ok(())
    }

    /// Take the oldest message matching `selector` into `buf`.
    ///
    /// A message larger than `buf` is left in the queue and reported as
    /// `BufferTooSmall`, so the call can be retried with a larger buffer.
    pub fn receive(
        &self,
        buf: &mut [u8],
        selector: impl Into<Selector>,
        mode: BlockingMode,
    ) -> QueueResult<Received> {
        if !self.access.can_receive() {
            return Err(QueueError::PermissionDenied {
                operation: "receive",
                mode: self.access,
            });
        }
        let selector = selector.into();

        let result = {
            let mut guard = self.sync().lock();
            let pos = self.wait_for_match(&mut guard, selector, mode)?;

            let slot = self.ring().slot_at(pos);
            // SAFETY: slot is occupied and we hold the lock
            let header = unsafe { self.slot_header(slot) };
            PayloadValidator::validate_for_receive(header.length as usize, buf.len())?;

            // SAFETY: as above; length was bounded by max_message_len on send
            let payload = unsafe { self.slot_payload(slot, header.length as usize) };
            let len = payload.len();
            buf[..len].copy_from_slice(payload);
            let integrity =
                PayloadValidator::validate_checksum(&buf[..len], header.msg_type, header.checksum);

            // SAFETY: still under the lock; the slot is returned to the pool right after
            unsafe { self.clear_slot(slot) };
            self.ring().remove(pos);

            tracing::trace!(msg_type = header.msg_type, len = len, slot = slot, "Received message");
            integrity.map(|()| Received {
                len,
                msg_type: header.msg_type,
            })
        };

        self.sync().notify(Condition::NotFull);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Discarded corrupted message");
        }
        result
    }

    /// Like `receive`, returning an owned message of at most `buffer_capacity` bytes.
    pub fn receive_message(
        &self,
        buffer_capacity: usize,
        selector: impl Into<Selector>,
        mode: BlockingMode,
    ) -> QueueResult<Message> {
        let mut payload = vec![0u8; buffer_capacity];
        let received = self.receive(&mut payload, selector, mode)?;
        payload.truncate(received.len);
        Ok(Message {
            msg_type: received.msg_type,
            payload,
        })
    }

    /// Block (or fail) until a message satisfying `selector` is queued.
    fn wait_for_match(
        &self,
        guard: &mut QueueGuard<'_>,
        selector: Selector,
        mode: BlockingMode,
    ) -> QueueResult<usize> {
        loop {
            let found = self.ring().find(|slot| {
                // SAFETY: slot comes from the occupied list and we hold the lock
                selector.matches(unsafe { self.slot_header(slot) }.msg_type)
            });
            if let Some(pos) = found {
                return Ok(pos);
            }
            if mode == BlockingMode::NonBlock {
                return Err(QueueError::WouldBlock);
            }
            guard.wait(Condition::NotEmpty);
        }
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Ask for `signal` to be sent to this process when a message of
    /// `msg_type` arrives. The registration is consumed by that delivery.
    pub fn register_notification(&self, msg_type: i64, signal: i32) -> QueueResult<()> {
        let signal = SignalNumber::new(signal).ok_or(QueueError::InvalidSignal { signal })?;
        let guard = self.sync().lock();
        self.notifications()
            .register(&guard, getpid(), msg_type, signal)
            .map(|_| ())
    }

    /// Cancel this process's pending registration.
    pub fn unregister_notification(&self) -> QueueResult<()> {
        let guard = self.sync().lock();
        self.notifications().unregister(&guard, getpid())
    }

    /// Snapshot of pending registrations.
    pub fn registrations(&self) -> Vec<Registration> {
        self.notifications().snapshot()
    }

    // =========================================================================
    // State accessors - advisory snapshots, no locking
    // =========================================================================

    /// Largest payload accepted by `send`.
    pub fn max_message_len(&self) -> usize {
        self.layout.max_message_len()
    }

    /// Maximum number of queued messages.
    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// Number of messages currently queued.
    pub fn current_count(&self) -> usize {
        // SAFETY: the header outlives self; the count is atomic
        unsafe { (*addr_of!((*self.header_ptr()).ring)).filled() }
    }

    /// Access mode this handle was opened with.
    pub fn access_mode(&self) -> AccessMode {
        self.access
    }

    /// Name of the queue, `None` when anonymous.
    pub fn name(&self) -> Option<&QueueName> {
        self.region.name()
    }

    // =========================================================================
    // Region addressing
    // =========================================================================

    fn header_ptr(&self) -> *mut QueueHeader {
        self.region.as_ptr() as *mut QueueHeader
    }

    fn sync(&self) -> &SharedSync {
        // SAFETY: initialized before the region became reachable
        unsafe { &*addr_of!((*self.header_ptr()).sync) }
    }

    fn notifications(&self) -> &NotificationTable {
        // SAFETY: entries are atomics, valid for the life of the mapping
        unsafe { &*addr_of!((*self.header_ptr()).notifications) }
    }

    /// View of the ring bookkeeping. Mutating methods require the lock.
    fn ring(&self) -> RingIndex<'_> {
        let capacity = self.layout.capacity();
        // SAFETY: the index tables lie inside the region at layout offsets,
        // are 4-byte aligned, and consist of atomics.
        unsafe {
            let base = self.region.as_ptr();
            let order = base.add(self.layout.order_offset()) as *const AtomicU32;
            let free = base.add(self.layout.free_offset()) as *const AtomicU32;
            RingIndex::new(
                &*addr_of!((*self.header_ptr()).ring),
                slice::from_raw_parts(order, capacity),
                slice::from_raw_parts(free, capacity),
            )
        }
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        // SAFETY: slot < capacity, so the offset lies inside the region
        unsafe { self.region.as_ptr().add(self.layout.slot_offset(slot)) }
    }

    /// # Safety
    /// Caller holds the queue lock and `slot` is occupied.
    unsafe fn slot_header(&self, slot: usize) -> SlotHeader {
        ptr::read(self.slot_ptr(slot) as *const SlotHeader)
    }

    /// # Safety
    /// Caller holds the queue lock; `len` does not exceed `max_message_len`.
    unsafe fn slot_payload(&self, slot: usize, len: usize) -> &[u8] {
        slice::from_raw_parts(self.slot_ptr(slot).add(SLOT_HEADER_SIZE), len)
    }

    /// # Safety
    /// Caller holds the queue lock and owns `slot`.
    unsafe fn write_slot(&self, slot: usize, msg_type: i64, payload: &[u8]) {
        let base = self.slot_ptr(slot);
        let header = SlotHeader::new(
            msg_type,
            payload.len(),
            PayloadValidator::calculate_checksum(payload),
        );
        ptr::write(base as *mut SlotHeader, header);
        ptr::copy_nonoverlapping(payload.as_ptr(), base.add(SLOT_HEADER_SIZE), payload.len());
    }

    /// # Safety
    /// Caller holds the queue lock and owns `slot`.
    unsafe fn clear_slot(&self, slot: usize) {
        ptr::write_bytes(self.slot_ptr(slot), 0, self.layout.slot_stride());
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("name", &self.region.name())
            .field("access", &self.access)
            .field("capacity", &self.capacity())
            .field("max_message_len", &self.max_message_len())
            .field("current_count", &self.current_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Permissions;

    fn config(capacity: usize, max_len: usize) -> QueueConfig {
        QueueConfig::new(capacity, max_len, Permissions::OWNER_RW).unwrap()
    }

    #[test]
    fn test_flag_validation() {
        let rw = OpenFlags::new(AccessMode::ReadWrite);

        assert!(matches!(
            MessageQueue::connect(Some("q"), rw.exclusive(), None),
            Err(QueueError::InvalidConfig(HardValidationError::ConflictingFlags { .. }))
        ));
        assert!(matches!(
            MessageQueue::connect(Some("q"), rw.create(), None),
            Err(QueueError::InvalidConfig(HardValidationError::MissingRequiredField { .. }))
        ));
        assert!(matches!(
            MessageQueue::connect(Some("q"), rw, Some(config(1, 1))),
            Err(QueueError::InvalidConfig(HardValidationError::ConflictingFlags { .. }))
        ));
        assert!(matches!(
            MessageQueue::connect(None, rw, None),
            Err(QueueError::InvalidConfig(_))
        ));
        assert!(matches!(
            MessageQueue::connect(Some("a/b"), rw, None),
            Err(QueueError::InvalidConfig(HardValidationError::InvalidFieldValue { .. }))
        ));
    }

    #[test]
    fn test_region_sized_from_layout() {
        let queue = MessageQueue::anonymous(config(5, 25)).unwrap();
        let layout = Layout::new(5, 25);
        assert_eq!(queue.region.size(), layout.total_size());
        assert_eq!(queue.capacity(), 5);
        assert_eq!(queue.max_message_len(), 25);
        assert_eq!(queue.current_count(), 0);
    }

    #[test]
    fn test_slot_zeroed_after_receive() {
        let queue = MessageQueue::anonymous(config(2, 16)).unwrap();
        queue.send(4, b"payload", BlockingMode::NonBlock).unwrap();

        let mut buf = [0u8; 16];
        queue.receive(&mut buf, 0, BlockingMode::NonBlock).unwrap();

        for slot in 0..2 {
            let bytes = unsafe {
                slice::from_raw_parts(queue.slot_ptr(slot), queue.layout.slot_stride())
            };
            assert!(bytes.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_corrupted_message_is_discarded() {
        let queue = MessageQueue::anonymous(config(2, 16)).unwrap();
        queue.send(3, b"intact", BlockingMode::NonBlock).unwrap();

        // Flip a payload byte behind the queue's back.
        let slot = queue.ring().slot_at(0);
        unsafe { *queue.slot_ptr(slot).add(SLOT_HEADER_SIZE) ^= 0xff };

        let mut buf = [0u8; 16];
        assert!(matches!(
            queue.receive(&mut buf, 0, BlockingMode::NonBlock),
            Err(QueueError::ChecksumMismatch { msg_type: 3, .. })
        ));
        assert_eq!(queue.current_count(), 0);
    }

    #[test]
    fn test_debug_output() {
        let queue = MessageQueue::anonymous(config(3, 8)).unwrap();
        let text = format!("{:?}", queue);
        assert!(text.contains("capacity: 3"));
        assert!(text.contains("ReadWrite"));
    }
}
