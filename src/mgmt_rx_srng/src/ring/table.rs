/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Descriptor table and ring cursors.
//!
//! The table is an arena of buffer slots; a slot's index is the cookie the
//! device echoes back, so a completion resolves to its buffer without any
//! pointer crossing the host/device boundary.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::{MgmtRxError, RxBuffer};

/// One descriptor table entry.
#[derive(Debug)]
pub struct RingSlot<B> {
    buffer: Option<B>,
    bus_addr: u64,
    cookie: u32,
}

impl<B> RingSlot<B> {
    fn empty(cookie: u32) -> Self {
        Self {
            buffer: None,
            bus_addr: 0,
            cookie,
        }
    }

    /// Whether the slot's buffer is currently owned by the device.
    #[inline]
    pub fn in_use(&self) -> bool {
        self.buffer.is_some()
    }

    /// Bus address of the buffer last armed in this slot.
    #[inline]
    pub fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    #[inline]
    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    pub fn buffer(&self) -> Option<&B> {
        self.buffer.as_ref()
    }
}

/// Fixed-capacity arena of [`RingSlot`]s.
#[derive(Debug)]
pub struct DescriptorTable<B> {
    slots: Box<[RingSlot<B>]>,
}

impl<B: RxBuffer> DescriptorTable<B> {
    /// Table of `capacity` empty slots; slot `i` carries cookie `i`.
    pub fn with_capacity(capacity: u32) -> Result<Self, MgmtRxError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity as usize)
            .map_err(|_| MgmtRxError::OutOfMemory)?;
        slots.extend((0..capacity).map(RingSlot::empty));

        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    /// Table with no slots, holding no memory.
    pub(crate) fn empty() -> Self {
        Self {
            slots: Box::default(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn slot(&self, idx: u32) -> Option<&RingSlot<B>> {
        self.slots.get(idx as usize)
    }

    #[inline]
    pub fn is_armed(&self, idx: u32) -> bool {
        self.slot(idx).is_some_and(RingSlot::in_use)
    }

    pub fn in_use_count(&self) -> usize {
        self.slots.iter().filter(|s| s.in_use()).count()
    }

    /// Hand `buf` to slot `idx`.
    ///
    /// The buffer comes back as the error if the slot is missing or still
    /// armed.
    pub fn arm(&mut self, idx: u32, buf: B) -> Result<(), B> {
        match self.slots.get_mut(idx as usize) {
            Some(slot) if !slot.in_use() => {
                slot.bus_addr = buf.bus_addr();
                slot.buffer = Some(buf);
                Ok(())
            }
            _ => Err(buf),
        }
    }

    /// Take the buffer out of slot `idx`.
    pub fn retire(&mut self, idx: u32) -> Option<B> {
        self.slots.get_mut(idx as usize)?.buffer.take()
    }

    /// Retire every armed slot, lowest index first.
    pub fn drain(&mut self) -> impl Iterator<Item = B> + '_ {
        self.slots.iter_mut().filter_map(|slot| slot.buffer.take())
    }
}

/// Read and write cursors into a [`DescriptorTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndexTracker {
    write_idx: u32,
    read_idx: u32,
    size: u32,
}

impl RingIndexTracker {
    pub fn new(size: u32) -> Self {
        debug_assert!(size > 0);
        Self {
            write_idx: 0,
            read_idx: 0,
            size,
        }
    }

    /// Next slot to arm.
    #[inline]
    pub fn write_idx(&self) -> u32 {
        self.write_idx
    }

    /// Next slot expected to complete.
    #[inline]
    pub fn read_idx(&self) -> u32 {
        self.read_idx
    }

    #[inline]
    pub fn advance_write(&mut self) {
        self.write_idx = (self.write_idx + 1) % self.size;
    }

    #[inline]
    pub fn advance_read(&mut self) {
        self.read_idx = (self.read_idx + 1) % self.size;
    }

    /// Slots armed and not yet retired, assuming the ring is never full.
    #[inline]
    pub fn outstanding(&self) -> u32 {
        (self.write_idx + self.size - self.read_idx) % self.size
    }

    pub fn reset(&mut self) {
        self.write_idx = 0;
        self.read_idx = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Buf(u64);

    impl RxBuffer for Buf {
        fn bus_addr(&self) -> u64 {
            self.0
        }

        fn data(&self) -> &[u8] {
            &[]
        }

        fn pull_head(&mut self, _len: usize) {}

        fn trim(&mut self, _len: usize) {}
    }

    #[test]
    fn test_table_slots_carry_their_index_as_cookie() {
        let table = DescriptorTable::<Buf>::with_capacity(4).unwrap();
        assert_eq!(table.capacity(), 4);
        for i in 0..4 {
            let slot = table.slot(i).unwrap();
            assert_eq!(slot.cookie(), i);
            assert!(!slot.in_use());
        }
        assert!(table.slot(4).is_none());
    }

    #[test]
    fn test_table_refuses_double_arm() {
        let mut table = DescriptorTable::with_capacity(2).unwrap();
        table.arm(1, Buf(0x1000)).unwrap();
        assert_eq!(table.arm(1, Buf(0x2000)), Err(Buf(0x2000)));
        assert_eq!(table.arm(2, Buf(0x3000)), Err(Buf(0x3000)));

        let slot = table.slot(1).unwrap();
        assert!(slot.in_use());
        assert_eq!(slot.bus_addr(), 0x1000);
        assert_eq!(slot.buffer(), Some(&Buf(0x1000)));
    }

    #[test]
    fn test_table_retire_and_drain() {
        let mut table = DescriptorTable::with_capacity(4).unwrap();
        table.arm(0, Buf(0x1000)).unwrap();
        table.arm(2, Buf(0x3000)).unwrap();
        table.arm(3, Buf(0x4000)).unwrap();
        assert_eq!(table.in_use_count(), 3);

        assert_eq!(table.retire(2), Some(Buf(0x3000)));
        assert_eq!(table.retire(2), None);
        assert!(!table.is_armed(2));

        let drained: Vec<_> = table.drain().collect();
        assert_eq!(drained, vec![Buf(0x1000), Buf(0x4000)]);
        assert_eq!(table.in_use_count(), 0);
    }

    #[test]
    fn test_tracker_wraps() {
        let mut t = RingIndexTracker::new(4);
        for _ in 0..3 {
            t.advance_write();
        }
        assert_eq!((t.write_idx(), t.read_idx(), t.outstanding()), (3, 0, 3));

        t.advance_write();
        t.advance_read();
        assert_eq!((t.write_idx(), t.read_idx(), t.outstanding()), (0, 1, 3));

        t.reset();
        assert_eq!((t.write_idx(), t.read_idx()), (0, 0));
    }
}
