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

//! Source ring over device-visible memory.
//!
//! # Pointer protocol
//!
//! Three positions move around the ring, all entry indices modulo `n`:
//!
//! - `hp`: next entry the host arms. Published to the head pointer word at
//!   the end of each access section.
//! - `tp`: next entry the device will consume. Read from the tail pointer
//!   word at the start of each access section.
//! - `reap_hp`: last entry the host took back from the device.
//!
//! ```text
//!            armed             completed            free
//!   tp ─────────────▶ hp   reap_hp+1 ───────▶ tp   hp ───▶ reap_hp
//! ```
//!
//! The free region `[hp, reap_hp]` always keeps one entry, so `hp == tp`
//! only ever means "nothing armed". A fresh ring starts with `hp = tp = 0`
//! and `reap_hp = n - 1`, i.e. everything free.
//!
//! Reaping an entry moves `reap_hp` forward by one and grows the free
//! region; arming moves `hp` forward and shrinks it. The reap loop does one
//! of each per completion, recycling the oldest reaped position.

use core::num::NonZeroU32;

use bytemuck::Zeroable;

use super::{HwRing, RingLayout, RxBufEntry, SrngError, SrngFlags, SrngParams, SrngRegistrar};
use crate::MemOps;

/// Reservation handed out by [`SharedSrng`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrngEntry {
    index: u32,
    raw: RxBufEntry,
    completed: bool,
}

impl SrngEntry {
    /// Ring position the reservation refers to.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Entry contents as the device left them. Zeroed for free entries.
    pub fn raw(&self) -> RxBufEntry {
        self.raw
    }
}

/// Host side of a source ring living in memory reachable through `M`.
#[derive(Debug)]
pub struct SharedSrng<M> {
    mem: M,
    layout: RingLayout,
    flags: SrngFlags,
    low_threshold: u32,
    rbm: u8,
    hp: u32,
    reap_hp: u32,
    cached_tp: u32,
    in_access: bool,
}

impl<M: MemOps> SharedSrng<M> {
    /// Initialise a ring described by `params` and reset both pointer words.
    ///
    /// Buffers armed on this ring are tagged with return buffer manager
    /// `rbm`.
    pub fn new(mem: M, params: &SrngParams, rbm: u8) -> Result<Self, SrngError> {
        let num_entries = NonZeroU32::new(params.num_entries).ok_or(SrngError::InvalidLayout)?;
        if num_entries.get() < 2 || rbm > RxBufEntry::MAX_RBM {
            return Err(SrngError::InvalidLayout);
        }
        let layout = RingLayout::from_base(params.ring_base, num_entries, params.entry_size)?;

        let srng = Self {
            mem,
            layout,
            flags: params.flags,
            low_threshold: params.low_threshold,
            rbm,
            hp: 0,
            reap_hp: num_entries.get() - 1,
            cached_tp: 0,
            in_access: false,
        };

        srng.write_ptr(layout.hp_addr, 0)?;
        srng.write_ptr(layout.tp_addr, 0)?;
        Ok(srng)
    }

    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    pub fn flags(&self) -> SrngFlags {
        self.flags
    }

    pub fn head(&self) -> u32 {
        self.hp
    }

    pub fn reap_head(&self) -> u32 {
        self.reap_hp
    }

    /// Tail pointer as of the last `access_begin`.
    pub fn cached_tail(&self) -> u32 {
        self.cached_tp
    }

    /// Whether enough completions are pending to warrant a reap.
    ///
    /// Always false unless the ring was registered with
    /// [`SrngFlags::LOW_THRESH_INTR_EN`] and a non-zero threshold.
    pub fn threshold_reached(&self) -> Result<bool, SrngError> {
        if !self.flags.contains(SrngFlags::LOW_THRESH_INTR_EN) || self.low_threshold == 0 {
            return Ok(false);
        }

        let tp = self.load_tail()?;
        Ok(self.completed(tp) >= self.low_threshold)
    }

    #[inline]
    fn next(&self, idx: u32) -> u32 {
        (idx + 1) % self.layout.num_entries
    }

    /// Entries between `from` and `to`, walking forward.
    #[inline]
    fn distance(&self, from: u32, to: u32) -> u32 {
        let n = self.layout.num_entries;
        (to + n - from) % n
    }

    /// Completed entries not yet reaped, given tail pointer `tp`.
    #[inline]
    fn completed(&self, tp: u32) -> u32 {
        self.distance(self.next(self.reap_hp), tp)
    }

    fn read_ptr(&self, addr: u64) -> Result<u32, SrngError> {
        let raw = self
            .mem
            .load_acquire(addr)
            .map_err(|_| SrngError::MemError)?;
        Ok(self.ptr_word(raw))
    }

    fn write_ptr(&self, addr: u64, val: u32) -> Result<(), SrngError> {
        self.mem
            .store_release(addr, self.ptr_word(val))
            .map_err(|_| SrngError::MemError)
    }

    #[inline]
    fn ptr_word(&self, word: u32) -> u32 {
        if self.flags.contains(SrngFlags::RING_PTR_SWAP) {
            word.swap_bytes()
        } else {
            word
        }
    }

    /// Read and validate the device's tail pointer.
    ///
    /// The device may only move `tp` across entries the host has
    /// published, i.e. from the cached tail up to `hp`.
    fn load_tail(&self) -> Result<u32, SrngError> {
        let tp = self.read_ptr(self.layout.tp_addr)?;
        if tp >= self.layout.num_entries
            || self.distance(self.cached_tp, tp) > self.distance(self.cached_tp, self.hp)
        {
            return Err(SrngError::InvalidPointer(tp));
        }
        Ok(tp)
    }
}

impl<M: MemOps> HwRing for SharedSrng<M> {
    type Entry = SrngEntry;

    fn access_begin(&mut self) -> Result<(), SrngError> {
        if self.in_access {
            return Err(SrngError::AlreadyInAccess);
        }
        self.cached_tp = self.load_tail()?;
        self.in_access = true;
        Ok(())
    }

    fn access_end(&mut self) {
        if !self.in_access {
            return;
        }
        self.in_access = false;

        if let Err(e) = self.write_ptr(self.layout.hp_addr, self.hp) {
            log::error!("failed to publish head pointer {}: {}", self.hp, e);
        }
    }

    fn available_count(&self) -> usize {
        if !self.in_access {
            return 0;
        }
        self.completed(self.cached_tp) as usize
    }

    fn next_entry(&mut self) -> Option<SrngEntry> {
        if !self.in_access {
            return None;
        }

        let index = self.next(self.reap_hp);
        if index == self.cached_tp {
            return None;
        }

        let addr = self.layout.entry_addr(index)?;
        match self.mem.read_val::<RxBufEntry>(addr) {
            Ok(raw) => Some(SrngEntry {
                index,
                raw,
                completed: true,
            }),
            Err(_) => {
                log::warn!("failed to read completed entry {}", index);
                None
            }
        }
    }

    fn next_free_entry(&mut self) -> Option<SrngEntry> {
        if !self.in_access || self.hp == self.reap_hp {
            return None;
        }

        Some(SrngEntry {
            index: self.hp,
            raw: RxBufEntry::zeroed(),
            completed: false,
        })
    }

    fn set_entry(&mut self, entry: SrngEntry, bus_addr: u64, cookie: u32) -> Result<(), SrngError> {
        if !self.in_access {
            return Err(SrngError::NotInAccess);
        }

        let reap_hp = if entry.completed {
            if entry.index != self.next(self.reap_hp) || entry.index == self.cached_tp {
                return Err(SrngError::StaleEntry(entry.index));
            }
            entry.index
        } else {
            if entry.index != self.hp {
                return Err(SrngError::StaleEntry(entry.index));
            }
            self.reap_hp
        };
        if self.hp == reap_hp {
            return Err(SrngError::RingFull);
        }

        let raw = RxBufEntry::new(bus_addr, cookie, self.rbm)?;
        let addr = self
            .layout
            .entry_addr(self.hp)
            .ok_or(SrngError::InvalidLayout)?;
        self.mem
            .write_val(addr, raw)
            .map_err(|_| SrngError::MemError)?;

        self.reap_hp = reap_hp;
        self.hp = self.next(self.hp);
        Ok(())
    }

    fn extract_cookie(&self, entry: &SrngEntry) -> u32 {
        entry.raw.cookie()
    }
}

/// Registers [`SharedSrng`] rings over a shared memory backend.
#[derive(Debug, Clone)]
pub struct SharedSrngRegistrar<M> {
    mem: M,
    rbm: u8,
}

impl<M: MemOps + Clone> SharedSrngRegistrar<M> {
    pub fn new(mem: M, rbm: u8) -> Self {
        Self { mem, rbm }
    }
}

impl<M: MemOps + Clone> SrngRegistrar for SharedSrngRegistrar<M> {
    type Ring = SharedSrng<M>;

    fn register(&self, params: &SrngParams) -> Result<SharedSrng<M>, SrngError> {
        log::debug!(
            "registering srng at {:#x}: {} x {} bytes",
            params.ring_base,
            params.num_entries,
            params.entry_size
        );
        SharedSrng::new(self.mem.clone(), params, self.rbm)
    }
}
