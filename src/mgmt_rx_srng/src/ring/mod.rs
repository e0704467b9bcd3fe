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

//! Management-frame receive ring.
//!
//! [`MgmtRxRing`] owns the host half of the ring: the [`DescriptorTable`]
//! of armed buffers, the [`RingIndexTracker`] cursors, the registered
//! [`HwRing`] and the device-visible memory behind it.
//!
//! # Lifecycle
//!
//! ```text
//! setup ──▶ Ready ──attach──▶ Active ──reap──▶ Active
//!             │                 │  └─desync──▶ Faulted
//!             └──────────┬──────┴──────────────────┘
//!                        ▼
//!              teardown / drop ──▶ Released
//! ```
//!
//! A failed [`attach`](MgmtRxRing::attach) releases everything and leaves
//! the handle `Released`.
//!
//! # Ring discipline
//!
//! After attach, exactly `capacity - 1` slots are armed and the slot at
//! `write_idx` is the one empty slot. Every completion the reap loop
//! accepts arms that empty slot with a fresh buffer and then retires the
//! slot at `read_idx`, so the armed count never changes between calls and
//! `write_idx == read_idx` is never ambiguous.

mod reap;
mod table;

use smallvec::SmallVec;
pub use table::*;
use thiserror::Error;
#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::{
    AccessGuard, AllocError, AllocGuard, Allocation, BufferPool, BufferProvider, HwRing,
    MgmtRxHeader, RING_BASE_ALIGN, RingLayout, RxBuffer, RxBufEntry, SrngError, SrngFlags,
    SrngParams, SrngRegistrar,
};

/// Errors that can occur in ring operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtRxError {
    #[error("Hardware ring error: {0}")]
    Srng(#[from] SrngError),
    #[error("Allocation error: {0}")]
    Alloc(#[from] AllocError),
    #[error("Invalid ring configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("Out of memory for the descriptor table")]
    OutOfMemory,
    #[error("Completion carries cookie {cookie} but slot {expected} is next")]
    Desync { cookie: u32, expected: u32 },
    #[error("Slot {0} is already armed")]
    DoubleArm(u32),
    #[error("Ring is faulted")]
    Faulted,
    #[error("Ring is not attached")]
    NotAttached,
    #[error("Ring is already attached")]
    AlreadyAttached,
    #[error("Ring has been released")]
    Released,
}

/// Receiver of reaped frames.
///
/// Called once per surviving buffer, in hardware completion order, with
/// the header already stripped.
pub trait Upstream<B> {
    fn deliver(&mut self, buf: B);
}

impl<B, F: FnMut(B)> Upstream<B> for F {
    fn deliver(&mut self, buf: B) {
        self(buf)
    }
}

/// Parameters for [`MgmtRxRing::setup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingParams {
    /// Number of ring entries and descriptor slots.
    pub capacity: u32,
    /// Hardware entry stride in bytes.
    pub entry_size: u32,
    /// Size of every receive buffer, header included.
    pub buffer_size: usize,
    /// Completions at which the device should raise a reap event. Zero
    /// leaves reaping to the caller's own schedule.
    pub reap_threshold: u32,
    pub flags: SrngFlags,
}

impl RingParams {
    pub fn new(capacity: u32, entry_size: u32, buffer_size: usize) -> Self {
        Self {
            capacity,
            entry_size,
            buffer_size,
            reap_threshold: 0,
            flags: SrngFlags::empty(),
        }
    }

    pub fn with_reap_threshold(mut self, threshold: u32) -> Self {
        self.reap_threshold = threshold;
        self.flags.set(SrngFlags::LOW_THRESH_INTR_EN, threshold > 0);
        self
    }

    pub fn with_flags(mut self, flags: SrngFlags) -> Self {
        self.flags |= flags;
        self
    }

    fn validate(&self) -> Result<(), MgmtRxError> {
        if self.capacity < 2 {
            return Err(MgmtRxError::InvalidConfig("capacity must be at least 2"));
        }
        if self.capacity - 1 > RxBufEntry::MAX_COOKIE {
            return Err(MgmtRxError::InvalidConfig("capacity exceeds cookie range"));
        }
        if (self.entry_size as usize) < RxBufEntry::SIZE
            || !(self.entry_size as usize).is_multiple_of(RxBufEntry::ALIGN)
        {
            return Err(MgmtRxError::InvalidConfig("unsupported entry size"));
        }
        if self.buffer_size <= MgmtRxHeader::SIZE {
            return Err(MgmtRxError::InvalidConfig("buffer cannot hold a frame"));
        }
        if self.reap_threshold >= self.capacity {
            return Err(MgmtRxError::InvalidConfig("reap threshold exceeds ring"));
        }
        Ok(())
    }
}

/// Geometry of a set-up ring. Fixed for the ring's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    pub capacity: u32,
    pub entry_size: u32,
    pub buffer_size: usize,
    /// Alignment of the hardware ring memory.
    pub align: usize,
    /// Hardware ring memory.
    pub ring_mem: Allocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    /// Set up, no buffers armed.
    Ready,
    /// Attached and reaping.
    Active,
    /// Host and device disagree about which slot completed.
    Faulted,
    /// All resources returned.
    Released,
}

/// Cumulative ring counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    /// Buffers retired from the ring.
    pub reaped: u64,
    /// Buffers handed upstream.
    pub delivered: u64,
    /// Retired buffers dropped for a bad header.
    pub dropped_malformed: u64,
    /// Reap passes cut short by buffer pool exhaustion.
    pub backpressure: u64,
    /// Completions the ring reported but could not produce.
    pub missing_entries: u64,
}

/// Retired buffers of one reap pass, in completion order.
type RetiredChain<B> = SmallVec<[B; 16]>;

/// Host side of the management-frame receive ring.
///
/// Collaborators are injected: `H` is the registered hardware ring, `P`
/// supplies receive buffers, `U` takes delivered frames and `A` provides
/// the device-visible ring memory.
pub struct MgmtRxRing<H: HwRing, P: BufferPool, U, A: BufferProvider> {
    config: RingConfig,
    state: RingState,
    table: DescriptorTable<P::Buffer>,
    cursor: RingIndexTracker,
    hw: Option<H>,
    ring_alloc: Option<Allocation>,
    ring_mem: A,
    pool: P,
    upstream: U,
    stats: RingStats,
}

impl<H: HwRing, P: BufferPool, U, A: BufferProvider> MgmtRxRing<H, P, U, A> {
    /// Allocate the descriptor table and hardware ring memory and register
    /// the ring.
    ///
    /// All or nothing: on error every allocation made so far is released.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn setup<G>(
        params: RingParams,
        ring_mem: A,
        registrar: &G,
        pool: P,
        upstream: U,
    ) -> Result<Self, MgmtRxError>
    where
        G: SrngRegistrar<Ring = H>,
    {
        params.validate()?;
        let table = DescriptorTable::with_capacity(params.capacity)?;

        let len = RingLayout::query_size(params.capacity as usize, params.entry_size as usize);
        let alloc = AllocGuard::new(ring_mem.alloc(len)?, |alloc| {
            if let Err(e) = ring_mem.dealloc(alloc) {
                log::error!("failed to free ring memory at {:#x}: {}", alloc.addr, e);
            }
        });
        if !alloc.addr.is_multiple_of(RING_BASE_ALIGN as u64) {
            return Err(AllocError::InvalidAlign(alloc.addr).into());
        }

        let hw = registrar.register(&SrngParams {
            ring_base: alloc.addr,
            num_entries: params.capacity,
            entry_size: params.entry_size,
            low_threshold: params.reap_threshold,
            flags: params.flags,
        })?;
        let alloc = alloc.dismiss();

        log::debug!(
            "mgmt rx ring set up: {} entries at {:#x}, {} byte buffers",
            params.capacity,
            alloc.addr,
            params.buffer_size
        );

        Ok(Self {
            config: RingConfig {
                capacity: params.capacity,
                entry_size: params.entry_size,
                buffer_size: params.buffer_size,
                align: RING_BASE_ALIGN,
                ring_mem: alloc,
            },
            state: RingState::Ready,
            table,
            cursor: RingIndexTracker::new(params.capacity),
            hw: Some(hw),
            ring_alloc: Some(alloc),
            ring_mem,
            pool,
            upstream,
            stats: RingStats::default(),
        })
    }

    /// Arm `capacity - 1` slots so the device can start producing.
    ///
    /// If any buffer cannot be acquired or armed, every buffer armed so far
    /// is released together with the ring's own allocations and the handle
    /// is left [`RingState::Released`].
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn attach(&mut self) -> Result<(), MgmtRxError> {
        match self.state {
            RingState::Ready => {}
            RingState::Active => return Err(MgmtRxError::AlreadyAttached),
            RingState::Faulted => return Err(MgmtRxError::Faulted),
            RingState::Released => return Err(MgmtRxError::Released),
        }
        let hw = self.hw.as_mut().ok_or(MgmtRxError::Released)?;

        let filled = Self::fill(
            hw,
            &mut self.table,
            &mut self.cursor,
            &self.pool,
            self.config.buffer_size,
        );

        match filled {
            Ok(()) => {
                self.state = RingState::Active;
                log::debug!("mgmt rx ring attached {} buffers", self.in_use_count());
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "mgmt rx attach failed after {} buffers: {}",
                    self.cursor.write_idx(),
                    e
                );
                self.release_all();
                Err(e)
            }
        }
    }

    fn fill(
        hw: &mut H,
        table: &mut DescriptorTable<P::Buffer>,
        cursor: &mut RingIndexTracker,
        pool: &P,
        buffer_size: usize,
    ) -> Result<(), MgmtRxError> {
        let mut ring = AccessGuard::begin(hw)?;

        for _ in 0..table.capacity() - 1 {
            let idx = cursor.write_idx();
            if table.is_armed(idx) {
                return Err(MgmtRxError::DoubleArm(idx));
            }

            let buf = pool.acquire(buffer_size)?;
            let Some(entry) = ring.next_free_entry() else {
                pool.release(buf);
                return Err(SrngError::RingFull.into());
            };
            if let Err(e) = ring.set_entry(entry, buf.bus_addr(), idx) {
                pool.release(buf);
                return Err(e.into());
            }
            if let Err(buf) = table.arm(idx, buf) {
                pool.release(buf);
                return Err(MgmtRxError::DoubleArm(idx));
            }
            cursor.advance_write();
        }

        Ok(())
    }

    /// Release every armed buffer, the descriptor table and the hardware
    /// ring memory.
    ///
    /// Safe on a ring that never finished attaching. Dropping the ring has
    /// the same effect.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn teardown(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        if self.state == RingState::Released {
            return;
        }

        let mut released = 0usize;
        for buf in self.table.drain() {
            self.pool.release(buf);
            released += 1;
        }
        self.table = DescriptorTable::empty();
        self.cursor.reset();

        // unregister before the memory behind the ring goes away
        drop(self.hw.take());
        if let Some(alloc) = self.ring_alloc.take()
            && let Err(e) = self.ring_mem.dealloc(alloc)
        {
            log::error!("failed to free ring memory at {:#x}: {}", alloc.addr, e);
        }

        self.state = RingState::Released;
        log::debug!("mgmt rx ring released {} buffers", released);
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    pub fn state(&self) -> RingState {
        self.state
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }

    #[inline]
    pub fn write_idx(&self) -> u32 {
        self.cursor.write_idx()
    }

    #[inline]
    pub fn read_idx(&self) -> u32 {
        self.cursor.read_idx()
    }

    pub fn in_use_count(&self) -> usize {
        self.table.in_use_count()
    }

    pub fn slot(&self, idx: u32) -> Option<&RingSlot<P::Buffer>> {
        self.table.slot(idx)
    }

    /// The registered hardware ring, until the ring is released.
    pub fn hw_ring(&self) -> Option<&H> {
        self.hw.as_ref()
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn upstream_mut(&mut self) -> &mut U {
        &mut self.upstream
    }
}

impl<H: HwRing, P: BufferPool, U, A: BufferProvider> Drop for MgmtRxRing<H, P, U, A> {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl<H: HwRing, P: BufferPool, U, A: BufferProvider> core::fmt::Debug for MgmtRxRing<H, P, U, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MgmtRxRing")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("write_idx", &self.cursor.write_idx())
            .field("read_idx", &self.cursor.read_idx())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
