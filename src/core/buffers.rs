//! Per-worker buffer pool.
//!
//! Slots are owned by the dispatch agent and borrowed by binding code for
//! one poll iteration; a binding must not retain a slot index past the
//! callback that acquired it without holding the slot (release returns the
//! memory to the free list).

use bytes::BytesMut;

use crate::StreamError;

pub struct BufferPool {
    slot_size: usize,
    slots: Vec<BytesMut>,
    free: Vec<usize>,
}

impl BufferPool {
    pub fn new(slot_count: usize, slot_size: usize) -> Self {
        let slots = (0..slot_count)
            .map(|_| BytesMut::with_capacity(slot_size))
            .collect();
        Self {
            slot_size,
            slots,
            free: (0..slot_count).rev().collect(),
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Borrows a slot. Pool exhaustion is a rejection the caller surfaces
    /// as `reset`, never an unbounded queue.
    pub fn acquire(&mut self) -> Result<usize, StreamError> {
        self.free.pop().ok_or(StreamError::PoolExhausted)
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut BytesMut {
        &mut self.slots[index]
    }

    pub fn release(&mut self, index: usize) {
        self.slots[index].clear();
        self.free.push(index);
    }
}
