// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Binary layout of a queue region.
//!
//! ```text
//! [QueueHeader][order: u32 x capacity][free: u32 x capacity][pad][slot 0][slot 1]...
//! ```
//!
//! Messages live in a fixed pool of equally sized slots. Their arrival order
//! is kept separately in `order`, a circular list of slot indices addressed
//! by `head_index`/`tail_index`; `free` is a stack of unused slot indices.
//! Removing a message from the middle of the queue only shifts `u32`
//! indices, never payload bytes, and slot addresses stay stable.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::notify::NotificationTable;
use crate::sync::SharedSync;

/// Written last during initialization; attachers wait until it appears.
pub const QUEUE_MAGIC: u64 = 0x5348_4D51_5545_5545; // "SHMQUEUE"

/// Layout revision, bumped on incompatible changes.
pub const LAYOUT_VERSION: u64 = 1;

/// Alignment of the slot area and of each slot.
const SLOT_ALIGNMENT: usize = 8;

/// Position bookkeeping for the ordered list of occupied slots.
///
/// Every field is only modified under the queue mutex; atomics keep the
/// lock-free `filled_count` snapshot and cross-handle access well defined.
#[repr(C)]
pub struct RingState {
    /// Logical position of the oldest message in `order`.
    pub head_index: AtomicU64,
    /// Logical position where the next message is appended.
    pub tail_index: AtomicU64,
    /// Number of occupied slots.
    pub filled_count: AtomicU64,
    /// Number of valid entries in the free stack.
    pub free_top: AtomicU64,
}

impl RingState {
    /// Empty state for a queue whose free stack holds every slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            head_index: AtomicU64::new(0),
            tail_index: AtomicU64::new(0),
            filled_count: AtomicU64::new(0),
            free_top: AtomicU64::new(capacity as u64),
        }
    }

    /// Snapshot of the occupied slot count.
    pub fn filled(&self) -> usize {
        self.filled_count.load(Ordering::Acquire) as usize
    }

    fn reset(&self, capacity: usize) {
        self.head_index.store(0, Ordering::Relaxed);
        self.tail_index.store(0, Ordering::Relaxed);
        self.free_top.store(capacity as u64, Ordering::Relaxed);
        self.filled_count.store(0, Ordering::Release);
    }
}

/// Header stored at the start of every queue region.
#[repr(C)]
pub struct QueueHeader {
    pub magic: AtomicU64,
    pub version: u64,
    pub capacity: u64,
    pub max_message_len: u64,
    pub ring: RingState,
    pub sync: SharedSync,
    pub notifications: NotificationTable,
}

/// Per-slot header preceding the payload bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotHeader {
    /// Type the message was sent with.
    pub msg_type: i64,
    /// Payload length in bytes.
    pub length: u64,
    /// CRC32 of the payload.
    pub checksum: u32,
    _reserved: u32,
}

impl SlotHeader {
    pub fn new(msg_type: i64, length: usize, checksum: u32) -> Self {
        Self {
            msg_type,
            length: length as u64,
            checksum,
            _reserved: 0,
        }
    }
}

pub const SLOT_HEADER_SIZE: usize = size_of::<SlotHeader>();

/// Offsets of every section for a given queue geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    capacity: usize,
    max_message_len: usize,
}

impl Layout {
    pub fn new(capacity: usize, max_message_len: usize) -> Self {
        Self {
            capacity,
            max_message_len,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    /// Offset of the `order` index list.
    pub fn order_offset(&self) -> usize {
        align_up(size_of::<QueueHeader>(), size_of::<u64>())
    }

    /// Offset of the free-slot stack.
    pub fn free_offset(&self) -> usize {
        self.order_offset() + self.capacity * size_of::<u32>()
    }

    /// Bytes before slot 0: header plus both index tables.
    pub fn header_size(&self) -> usize {
        align_up(
            self.free_offset() + self.capacity * size_of::<u32>(),
            SLOT_ALIGNMENT,
        )
    }

    /// Distance between consecutive slots.
    pub fn slot_stride(&self) -> usize {
        align_up(SLOT_HEADER_SIZE + self.max_message_len, SLOT_ALIGNMENT)
    }

    /// Offset of slot `index` from the region base.
    pub fn slot_offset(&self, index: usize) -> usize {
        debug_assert!(index < self.capacity);
        self.header_size() + index * self.slot_stride()
    }

    /// Exact size of the backing object.
    pub fn total_size(&self) -> usize {
        self.header_size() + self.capacity * self.slot_stride()
    }
}

/// Index-stable view of the ring, valid only while the queue mutex is held.
pub struct RingIndex<'a> {
    state: &'a RingState,
    order: &'a [AtomicU32],
    free: &'a [AtomicU32],
}

impl<'a> RingIndex<'a> {
    pub fn new(state: &'a RingState, order: &'a [AtomicU32], free: &'a [AtomicU32]) -> Self {
        debug_assert_eq!(order.len(), free.len());
        Self { state, order, free }
    }

    /// Fill the free stack with every slot; used once at creation.
    pub fn reset(&mut self) {
        for (i, entry) in self.free.iter().enumerate() {
            entry.store(i as u32, Ordering::Relaxed);
        }
        for entry in self.order {
            entry.store(0, Ordering::Relaxed);
        }
        self.state.reset(self.capacity());
    }

    fn capacity(&self) -> usize {
        self.order.len()
    }

    fn head(&self) -> usize {
        self.state.head_index.load(Ordering::Relaxed) as usize
    }

    fn tail(&self) -> usize {
        self.state.tail_index.load(Ordering::Relaxed) as usize
    }

    fn free_top(&self) -> usize {
        self.state.free_top.load(Ordering::Relaxed) as usize
    }

    pub fn len(&self) -> usize {
        self.state.filled()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Slot index of the message at logical position `pos` (0 = oldest).
    pub fn slot_at(&self, pos: usize) -> usize {
        let cap = self.capacity();
        self.order[(self.head() + pos) % cap].load(Ordering::Relaxed) as usize
    }

    /// Take a free slot and append it at the tail. `None` when full.
    pub fn push(&mut self) -> Option<usize> {
        let len = self.len();
        let top = self.free_top();
        if len == self.capacity() || top == 0 {
            return None;
        }

        let slot = self.free[top - 1].load(Ordering::Relaxed);
        self.state.free_top.store(top as u64 - 1, Ordering::Relaxed);

        let cap = self.capacity();
        let tail = self.tail();
        self.order[tail].store(slot, Ordering::Relaxed);
        self.state
            .tail_index
            .store(((tail + 1) % cap) as u64, Ordering::Relaxed);
        self.state
            .filled_count
            .store(len as u64 + 1, Ordering::Release);

        Some(slot as usize)
    }

    /// Logical position of the oldest message whose slot satisfies `pred`.
    pub fn find(&self, mut pred: impl FnMut(usize) -> bool) -> Option<usize> {
        (0..self.len()).find(|&pos| pred(self.slot_at(pos)))
    }

    /// Unlink the message at logical position `pos` and return its slot to the pool.
    ///
    /// Later entries shift back by one so the remaining order is preserved.
    pub fn remove(&mut self, pos: usize) -> usize {
        let len = self.len();
        assert!(pos < len, "ring position {} out of bounds ({})", pos, len);

        let cap = self.capacity();
        let head = self.head();
        let slot = self.slot_at(pos);

        if pos == 0 {
            self.state
                .head_index
                .store(((head + 1) % cap) as u64, Ordering::Relaxed);
        } else {
            for p in pos..len - 1 {
                let next = self.order[(head + p + 1) % cap].load(Ordering::Relaxed);
                self.order[(head + p) % cap].store(next, Ordering::Relaxed);
            }
            self.state
                .tail_index
                .store(((self.tail() + cap - 1) % cap) as u64, Ordering::Relaxed);
        }

        let top = self.free_top();
        self.free[top].store(slot as u32, Ordering::Relaxed);
        self.state.free_top.store(top as u64 + 1, Ordering::Relaxed);
        self.state
            .filled_count
            .store(len as u64 - 1, Ordering::Release);

        slot
    }
}

const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
