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

//! Hardware source ring (SRNG) abstraction.
//!
//! A source ring is an array of buffer entries shared with the device. The
//! host publishes armed entries by moving a head pointer (`hp`); the device
//! consumes them in order and reports progress by moving a tail pointer
//! (`tp`). Entries the device has consumed are *completed* until the host
//! reaps them and reuses their position for a fresh buffer.
//!
//! [`HwRing`] is the narrow interface the receive ring drives, and
//! [`AccessGuard`] scopes every use of it to one access section.
//! [`SharedSrng`] implements it over device-visible memory.

mod entry;
mod shared;

use core::num::NonZeroU32;

use bitflags::bitflags;
pub use entry::*;
pub use shared::*;
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum SrngError {
    #[error("Invalid ring layout")]
    InvalidLayout,
    #[error("Bus address {0:#x} does not fit a ring entry")]
    AddrOutOfRange(u64),
    #[error("Cookie {0} does not fit a ring entry")]
    CookieOutOfRange(u32),
    #[error("No free ring entry")]
    RingFull,
    #[error("Entry {0} is not the next one to reuse")]
    StaleEntry(u32),
    #[error("Ring used outside an access section")]
    NotInAccess,
    #[error("Ring access section already open")]
    AlreadyInAccess,
    #[error("Device published out-of-range tail pointer {0}")]
    InvalidPointer(u32),
    #[error("Ring memory access failed")]
    MemError,
}

bitflags! {
    /// Ring registration flags.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SrngFlags: u32 {
        /// Report when the number of completed entries reaches the low threshold.
        const LOW_THRESH_INTR_EN = 1 << 0;
        /// Head and tail pointer words are stored byte-swapped.
        const RING_PTR_SWAP      = 1 << 1;
    }
}

/// What the hardware ring abstraction needs to register a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrngParams {
    /// Bus address of the entry array.
    pub ring_base: u64,
    pub num_entries: u32,
    /// Entry stride in bytes.
    pub entry_size: u32,
    /// Completed-entry count at which a reap is due. Zero disables.
    pub low_threshold: u32,
    pub flags: SrngFlags,
}

/// Host-side view of a hardware source ring.
///
/// All methods other than [`access_begin`](Self::access_begin) are only
/// meaningful inside an access section; use [`AccessGuard`] rather than
/// pairing the calls by hand.
///
/// # Entry reservations
///
/// An entry returned by [`next_entry`](Self::next_entry) is consumed only
/// when it is handed back to [`set_entry`](Self::set_entry). Dropping it
/// leaves the completion queued for the next access section.
pub trait HwRing {
    type Entry;

    /// Open an access section and snapshot the device's progress.
    fn access_begin(&mut self) -> Result<(), SrngError>;

    /// Publish entries armed during the section and close it.
    fn access_end(&mut self);

    /// Completed entries not yet reaped, as of `access_begin`.
    fn available_count(&self) -> usize;

    /// Reserve the oldest completed entry.
    fn next_entry(&mut self) -> Option<Self::Entry>;

    /// Reserve a never-armed entry, keeping one entry empty.
    fn next_free_entry(&mut self) -> Option<Self::Entry>;

    /// Consume `entry` and arm a ring position with `bus_addr` and `cookie`.
    fn set_entry(&mut self, entry: Self::Entry, bus_addr: u64, cookie: u32)
    -> Result<(), SrngError>;

    /// Cookie the buffer was armed with.
    fn extract_cookie(&self, entry: &Self::Entry) -> u32;
}

/// Registers rings with the hardware ring abstraction.
pub trait SrngRegistrar {
    type Ring: HwRing;

    fn register(&self, params: &SrngParams) -> Result<Self::Ring, SrngError>;
}

/// Scoped access section on a [`HwRing`].
///
/// The section is closed when the guard drops, on every exit path.
pub struct AccessGuard<'a, H: HwRing> {
    ring: &'a mut H,
}

impl<'a, H: HwRing> AccessGuard<'a, H> {
    pub fn begin(ring: &'a mut H) -> Result<Self, SrngError> {
        ring.access_begin()?;
        Ok(Self { ring })
    }
}

impl<H: HwRing> core::ops::Deref for AccessGuard<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.ring
    }
}

impl<H: HwRing> core::ops::DerefMut for AccessGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.ring
    }
}

impl<H: HwRing> Drop for AccessGuard<'_, H> {
    fn drop(&mut self) {
        self.ring.access_end();
    }
}

/// Required alignment of the ring base, in bytes.
pub const RING_BASE_ALIGN: usize = 32;

const PTR_WORD_SIZE: usize = core::mem::size_of::<u32>();

#[inline]
const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Layout of a source ring in device-visible memory.
///
/// # Memory Layout
///
/// 1. Entry array: `num_entries` × `entry_size` bytes at the ring base,
///    aligned to [`RING_BASE_ALIGN`]. Each entry starts with an
///    [`RxBufEntry`]; the rest of the stride is padding.
/// 2. Head pointer word (host-written), 4-byte aligned.
/// 3. Tail pointer word (device-written).
///
/// [`query_size`](Self::query_size) rounds the total up to the base
/// alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingLayout {
    pub base_addr: u64,
    pub num_entries: u32,
    pub entry_size: u32,
    pub hp_addr: u64,
    pub tp_addr: u64,
}

impl RingLayout {
    /// Compute the layout for a ring at `base`.
    pub const fn from_base(
        base: u64,
        num_entries: NonZeroU32,
        entry_size: u32,
    ) -> Result<Self, SrngError> {
        if !base.is_multiple_of(RING_BASE_ALIGN as u64) {
            return Err(SrngError::InvalidLayout);
        }
        let stride = entry_size as usize;
        if stride < RxBufEntry::SIZE || !stride.is_multiple_of(RxBufEntry::ALIGN) {
            return Err(SrngError::InvalidLayout);
        }

        let hp_offset = align_up(num_entries.get() as usize * stride, PTR_WORD_SIZE);
        let tp_offset = hp_offset + PTR_WORD_SIZE;

        Ok(Self {
            base_addr: base,
            num_entries: num_entries.get(),
            entry_size,
            hp_addr: base + hp_offset as u64,
            tp_addr: base + tp_offset as u64,
        })
    }

    /// Bytes of device-visible memory a ring of `num_entries` needs.
    pub const fn query_size(num_entries: usize, entry_size: usize) -> usize {
        let hp_offset = align_up(num_entries * entry_size, PTR_WORD_SIZE);
        align_up(hp_offset + 2 * PTR_WORD_SIZE, RING_BASE_ALIGN)
    }

    /// Address of entry `idx`.
    #[inline]
    pub fn entry_addr(&self, idx: u32) -> Option<u64> {
        if idx >= self.num_entries {
            return None;
        }
        self.base_addr
            .checked_add(idx as u64 * self.entry_size as u64)
    }
}

const _: () = {
    const fn verify_layout(num_entries: u32, entry_size: u32) {
        let base = 0x1000u64;

        let Some(n) = NonZeroU32::new(num_entries) else {
            panic!("zero entries");
        };
        let layout = match RingLayout::from_base(base, n, entry_size) {
            Ok(l) => l,
            Err(_) => panic!("from_base failed"),
        };
        let size = RingLayout::query_size(num_entries as usize, entry_size as usize);

        // pointer words sit after the entry array, aligned
        let entries_end = base + num_entries as u64 * entry_size as u64;
        assert!(layout.hp_addr >= entries_end);
        assert!(layout.hp_addr.is_multiple_of(PTR_WORD_SIZE as u64));
        assert!(layout.tp_addr == layout.hp_addr + PTR_WORD_SIZE as u64);

        // query_size covers the whole layout and keeps the next ring aligned
        assert!(layout.tp_addr + PTR_WORD_SIZE as u64 <= base + size as u64);
        assert!(size.is_multiple_of(RING_BASE_ALIGN));
    }

    verify_layout(2, 8);
    verify_layout(4, 16);
    verify_layout(7, 12);
    verify_layout(64, 8);
    verify_layout(64, 16);
    verify_layout(256, 32);
    verify_layout(1024, 8);
    verify_layout(4096, 64);
};
