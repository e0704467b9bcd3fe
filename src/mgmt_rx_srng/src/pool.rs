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
//! DMA buffer management for the receive ring.
//!
//! Two seams live here:
//!
//! - [`BufferProvider`] hands out raw [`Allocation`]s of device-visible
//!   memory. The ring uses it once, for the hardware entry array.
//! - [`BufferPool`] hands out receive buffers ([`RxBuffer`]) that the radio
//!   DMAs frames into. The ring acquires one for every entry it arms and
//!   releases the ones it drops.
//!
//! [`DmaPool`] implements both over a fixed region carved into `N`-byte
//! slots by a [`Slab`].
//!
//! # Slab allocation
//!
//! The slab is a flat bitmap (`FixedBitSet`) searched from low indices
//! upward for the first run of free slots long enough for the request.
//! `FixedBitSet::zeroes()` skips whole words of busy slots, so the scan is
//! cheap for the region sizes a management ring needs (a few hundred KiB).
//! The most recently freed run is cached and handed out first, which keeps
//! a steadily recycled ring working on the same handful of slots.

use alloc::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use fixedbitset::FixedBitSet;
use thiserror::Error;

use crate::MemOps;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Invalid region addr {0:#x}")]
    InvalidAlign(u64),
    #[error("Invalid free addr {0:#x} and size {1}")]
    InvalidFree(u64, usize),
    #[error("Invalid argument")]
    InvalidArg,
    #[error("Empty region")]
    EmptyRegion,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Overflow")]
    Overflow,
}

/// Allocation result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Starting bus address of the allocation
    pub addr: u64,
    /// Length of the allocation in bytes rounded up to slot size
    pub len: usize,
}

/// Provider of raw device-visible memory.
pub trait BufferProvider {
    /// Allocate at least `len` bytes.
    fn alloc(&self, len: usize) -> Result<Allocation, AllocError>;

    /// Free a previously allocated block.
    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError>;
}

impl<P: BufferProvider + ?Sized> BufferProvider for &P {
    fn alloc(&self, len: usize) -> Result<Allocation, AllocError> {
        (**self).alloc(len)
    }

    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError> {
        (**self).dealloc(alloc)
    }
}

/// A receive buffer the device can DMA into.
///
/// The host view returned by [`data`](Self::data) starts out as the whole
/// buffer. Header stripping narrows it with [`pull_head`](Self::pull_head)
/// and [`trim`](Self::trim).
pub trait RxBuffer {
    /// Bus address the device writes to.
    fn bus_addr(&self) -> u64;

    /// Bytes currently visible to the host.
    fn data(&self) -> &[u8];

    /// Drop `len` bytes from the front of the view.
    fn pull_head(&mut self, len: usize);

    /// Keep only the first `len` bytes of the view.
    fn trim(&mut self, len: usize);
}

/// Source of receive buffers.
///
/// Implementations must be internally synchronised; the ring only holds a
/// shared reference.
pub trait BufferPool {
    type Buffer: RxBuffer;

    /// Acquire a mapped buffer of at least `size` bytes.
    fn acquire(&self, size: usize) -> Result<Self::Buffer, AllocError>;

    /// Return a buffer the ring does not deliver.
    fn release(&self, buf: Self::Buffer);

    /// Make bytes written by the device visible through [`RxBuffer::data`].
    ///
    /// Called once per retired buffer before its header is read. Coherent
    /// pools need not override it.
    fn sync_for_cpu(&self, _buf: &mut Self::Buffer) {}
}

/// A guard that runs a cleanup function when dropped, unless dismissed.
pub struct AllocGuard<F: FnOnce(Allocation)> {
    alloc: Allocation,
    cleanup: Option<F>,
}

impl<F: FnOnce(Allocation)> AllocGuard<F> {
    pub fn new(alloc: Allocation, cleanup: F) -> Self {
        Self {
            alloc,
            cleanup: Some(cleanup),
        }
    }

    /// Keep the allocation; the cleanup never runs.
    pub fn dismiss(mut self) -> Allocation {
        self.cleanup = None;
        self.alloc
    }
}

impl<F: FnOnce(Allocation)> core::ops::Deref for AllocGuard<F> {
    type Target = Allocation;

    fn deref(&self) -> &Allocation {
        &self.alloc
    }
}

impl<F: FnOnce(Allocation)> Drop for AllocGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup(self.alloc)
        }
    }
}

/// Fixed-region allocator with `N`-byte slots.
#[derive(Debug, Clone)]
pub struct Slab<const N: usize> {
    base_addr: u64,
    /// One bit per slot, set while allocated
    busy: FixedBitSet,
    /// Most recently freed run
    last_free_run: Option<Allocation>,
}

impl<const N: usize> Slab<N> {
    /// Create a slab over `region_len` bytes at `base_addr`.
    /// The region is rounded down to a multiple of N.
    pub fn new(base_addr: u64, region_len: usize) -> Result<Self, AllocError> {
        if !base_addr.is_multiple_of(N as u64) {
            return Err(AllocError::InvalidAlign(base_addr));
        }

        let num_slots = region_len / N;
        if num_slots == 0 {
            return Err(AllocError::EmptyRegion);
        }

        Ok(Self {
            base_addr,
            busy: FixedBitSet::with_capacity(num_slots),
            last_free_run: None,
        })
    }

    #[inline]
    fn addr_of(&self, slot: usize) -> Option<u64> {
        self.base_addr
            .checked_add((slot as u64).checked_mul(N as u64)?)
    }

    /// Slot index of `addr`, if it lies on a slot boundary inside the slab.
    #[inline]
    fn slot_of(&self, addr: u64) -> Option<usize> {
        let off = addr.checked_sub(self.base_addr)? as usize;
        off.is_multiple_of(N).then_some(off / N)
    }

    fn forget_run_overlapping(&mut self, alloc: Allocation) {
        if let Some(run) = &self.last_free_run {
            let alloc_end = alloc.addr + alloc.len as u64;
            let run_end = run.addr + run.len as u64;

            if alloc.addr < run_end && run.addr < alloc_end {
                self.last_free_run = None;
            }
        }
    }

    /// First slot of a free run of `want` slots.
    fn find_slots(&mut self, want: usize) -> Option<usize> {
        debug_assert!(want > 0);

        if let Some(run) = self.last_free_run
            && run.len >= want * N
        {
            self.last_free_run = None;
            return self.slot_of(run.addr);
        }

        let total = self.busy.len();
        self.busy
            .zeroes()
            .take_while(|&start| start + want <= total)
            .find(|&start| self.busy.count_zeroes(start..start + want) == want)
    }

    /// Allocate at least `len` bytes by merging consecutive slots.
    pub fn alloc(&mut self, len: usize) -> Result<Allocation, AllocError> {
        if len == 0 {
            return Err(AllocError::InvalidArg);
        }

        let want = len.div_ceil(N);
        if want > self.busy.len() {
            return Err(AllocError::OutOfMemory);
        }

        let start = self.find_slots(want).ok_or(AllocError::OutOfMemory)?;
        let addr = self.addr_of(start).ok_or(AllocError::Overflow)?;
        self.busy.insert_range(start..start + want);

        let alloc = Allocation {
            addr,
            len: want * N,
        };
        self.forget_run_overlapping(alloc);
        Ok(alloc)
    }

    /// Free a block returned by [`alloc`](Self::alloc).
    pub fn dealloc(&mut self, alloc: Allocation) -> Result<(), AllocError> {
        let Allocation { addr, len } = alloc;
        let invalid = AllocError::InvalidFree(addr, len);

        if len == 0 || !len.is_multiple_of(N) {
            return Err(invalid);
        }
        let start = self.slot_of(addr).ok_or(invalid)?;
        let end = start + len / N;
        if end > self.busy.len() || !self.busy.contains_all_in_range(start..end) {
            return Err(invalid);
        }

        self.busy.remove_range(start..end);
        self.last_free_run = Some(alloc);
        Ok(())
    }

    /// Number of free bytes in the slab.
    pub fn free_bytes(&self) -> usize {
        self.busy.count_zeroes(..) * N
    }

    /// Total capacity of the slab in bytes.
    pub fn capacity(&self) -> usize {
        self.busy.len() * N
    }

    /// Address range covered by this slab.
    pub fn range(&self) -> core::ops::Range<u64> {
        self.base_addr..self.base_addr + self.capacity() as u64
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.range().contains(&addr)
    }

    pub const fn slot_size() -> usize {
        N
    }
}

type SharedSlab<const N: usize> = Arc<spin::Mutex<Slab<N>>>;

/// Receive-buffer pool over a fixed DMA region.
///
/// Buffers return their slots when dropped, so a frame delivered upstream
/// keeps its DMA memory until the consumer lets go of it (or calls
/// [`DmaBuf::into_bytes`]).
#[derive(Debug, Clone)]
pub struct DmaPool<M, const N: usize = 4096> {
    slab: SharedSlab<N>,
    mem: M,
}

impl<M: MemOps, const N: usize> DmaPool<M, N> {
    /// Create a pool over `region_len` bytes at `base_addr`, reading
    /// device-written data through `mem`.
    pub fn new(mem: M, base_addr: u64, region_len: usize) -> Result<Self, AllocError> {
        let slab = Slab::<N>::new(base_addr, region_len)?;
        Ok(Self {
            slab: Arc::new(spin::Mutex::new(slab)),
            mem,
        })
    }

    pub fn free_bytes(&self) -> usize {
        self.slab.lock().free_bytes()
    }

    pub fn capacity(&self) -> usize {
        self.slab.lock().capacity()
    }

    pub fn mem(&self) -> &M {
        &self.mem
    }
}

impl<M: MemOps, const N: usize> BufferProvider for DmaPool<M, N> {
    fn alloc(&self, len: usize) -> Result<Allocation, AllocError> {
        self.slab.lock().alloc(len)
    }

    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError> {
        self.slab.lock().dealloc(alloc)
    }
}

impl<M: MemOps, const N: usize> BufferPool for DmaPool<M, N> {
    type Buffer = DmaBuf<N>;

    fn acquire(&self, size: usize) -> Result<DmaBuf<N>, AllocError> {
        let alloc = self.slab.lock().alloc(size)?;
        Ok(DmaBuf {
            alloc,
            size,
            data: BytesMut::new(),
            slab: self.slab.clone(),
        })
    }

    fn release(&self, buf: DmaBuf<N>) {
        drop(buf);
    }

    fn sync_for_cpu(&self, buf: &mut DmaBuf<N>) {
        buf.data.clear();
        buf.data.resize(buf.size, 0);

        if self.mem.read(buf.alloc.addr, &mut buf.data).is_err() {
            log::error!(
                "failed to read DMA buffer at {:#x} ({} bytes)",
                buf.alloc.addr,
                buf.size
            );
            buf.data.clear();
        }
    }
}

/// A receive buffer carved from a [`DmaPool`].
#[derive(Debug)]
pub struct DmaBuf<const N: usize = 4096> {
    alloc: Allocation,
    /// Requested size; `alloc.len` is rounded up to whole slots
    size: usize,
    /// Host copy of the device-written bytes
    data: BytesMut,
    slab: SharedSlab<N>,
}

impl<const N: usize> DmaBuf<N> {
    pub fn allocation(&self) -> Allocation {
        self.alloc
    }

    /// Size the buffer was acquired with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Give the DMA slots back and keep the host copy.
    pub fn into_bytes(mut self) -> Bytes {
        core::mem::take(&mut self.data).freeze()
    }
}

impl<const N: usize> RxBuffer for DmaBuf<N> {
    fn bus_addr(&self) -> u64 {
        self.alloc.addr
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn pull_head(&mut self, len: usize) {
        let len = len.min(self.data.len());
        self.data.advance(len);
    }

    fn trim(&mut self, len: usize) {
        self.data.truncate(len);
    }
}

impl<const N: usize> Drop for DmaBuf<N> {
    fn drop(&mut self) {
        if let Err(e) = self.slab.lock().dealloc(self.alloc) {
            log::error!("leaking DMA buffer {:#x}: {}", self.alloc.addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;

    use super::*;
    use crate::access::tests::TestMem;

    const BASE: u64 = 0x10000;

    fn make_slab<const N: usize>(size: usize) -> Slab<N> {
        Slab::<N>::new(BASE, size).unwrap()
    }

    fn make_pool(slots: usize) -> (Rc<TestMem>, DmaPool<Rc<TestMem>, 4096>) {
        let mem = TestMem::new(BASE, slots * 4096);
        let pool = DmaPool::new(mem.clone(), BASE, slots * 4096).unwrap();
        (mem, pool)
    }

    #[test]
    fn test_slab_new_success() {
        let slab = Slab::<256>::new(0x10000, 1024).unwrap();
        assert_eq!(slab.capacity(), 1024);
        assert_eq!(slab.free_bytes(), 1024);
    }

    #[test]
    fn test_slab_new_misaligned() {
        let result = Slab::<256>::new(0x10001, 1024);
        assert!(matches!(result, Err(AllocError::InvalidAlign(0x10001))));
    }

    #[test]
    fn test_slab_new_empty_region() {
        let result = Slab::<256>::new(0x10000, 100);
        assert!(matches!(result, Err(AllocError::EmptyRegion)));
    }

    #[test]
    fn test_slab_alloc_rounds_to_slots() {
        let mut slab = make_slab::<256>(1024);
        assert_eq!(slab.alloc(128).unwrap().len, 256);
        assert_eq!(slab.alloc(600).unwrap().len, 768);
        assert_eq!(slab.free_bytes(), 0);
    }

    #[test]
    fn test_slab_alloc_zero_length() {
        let mut slab = make_slab::<256>(1024);
        assert!(matches!(slab.alloc(0), Err(AllocError::InvalidArg)));
    }

    #[test]
    fn test_slab_alloc_until_full_then_reuse() {
        let mut slab = make_slab::<256>(1024);

        let _a1 = slab.alloc(256).unwrap();
        let a2 = slab.alloc(256).unwrap();
        let _a3 = slab.alloc(256).unwrap();
        let _a4 = slab.alloc(256).unwrap();
        assert!(matches!(slab.alloc(256), Err(AllocError::OutOfMemory)));

        slab.dealloc(a2).unwrap();
        assert_eq!(slab.alloc(256).unwrap().addr, a2.addr);
    }

    #[test]
    fn test_slab_double_free_rejected() {
        let mut slab = make_slab::<256>(1024);
        let alloc = slab.alloc(256).unwrap();

        slab.dealloc(alloc).unwrap();
        assert!(matches!(
            slab.dealloc(alloc),
            Err(AllocError::InvalidFree(_, 256))
        ));
    }

    #[test]
    fn test_slab_free_outside_region_rejected() {
        let mut slab = make_slab::<256>(1024);
        let bogus = Allocation {
            addr: 0x99900,
            len: 256,
        };
        assert!(matches!(
            slab.dealloc(bogus),
            Err(AllocError::InvalidFree(0x99900, _))
        ));

        let below = Allocation {
            addr: 0x100,
            len: 256,
        };
        assert!(slab.dealloc(below).is_err());
    }

    #[test]
    fn test_slab_finds_run_across_fragmentation() {
        let mut slab = make_slab::<256>(1024);

        let a1 = slab.alloc(256).unwrap();
        let a2 = slab.alloc(256).unwrap();
        let _a3 = slab.alloc(256).unwrap();

        slab.dealloc(a2).unwrap();
        slab.dealloc(a1).unwrap();

        // last freed run is a1 (one slot) so the two-slot request must scan
        let big = slab.alloc(512).unwrap();
        assert_eq!(big.addr, a1.addr);
        assert_eq!(big.len, 512);
    }

    #[test]
    fn test_slab_addr_of_overflow() {
        let slab = make_slab::<4096>(8192);
        assert!(slab.addr_of(usize::MAX).is_none());
    }

    #[test]
    fn test_alloc_guard_runs_cleanup_unless_dismissed() {
        let freed = core::cell::Cell::new(0);
        let alloc = Allocation {
            addr: 0x2000,
            len: 64,
        };

        drop(AllocGuard::new(alloc, |a| freed.set(a.addr)));
        assert_eq!(freed.get(), 0x2000);

        freed.set(0);
        let guard = AllocGuard::new(alloc, |a| freed.set(a.addr));
        assert_eq!(guard.len, 64);
        assert_eq!(guard.dismiss(), alloc);
        assert_eq!(freed.get(), 0);
    }

    #[test]
    fn test_dma_buf_drop_returns_slots() {
        let (_mem, pool) = make_pool(4);
        let buf = pool.acquire(3520).unwrap();
        assert_eq!(buf.allocation().len, 4096);
        assert_eq!(pool.free_bytes(), 3 * 4096);

        pool.release(buf);
        assert_eq!(pool.free_bytes(), 4 * 4096);
    }

    #[test]
    fn test_dma_pool_exhaustion() {
        let (_mem, pool) = make_pool(2);
        let _a = pool.acquire(4096).unwrap();
        let _b = pool.acquire(100).unwrap();
        assert!(matches!(pool.acquire(1), Err(AllocError::OutOfMemory)));
    }

    #[test]
    fn test_sync_for_cpu_reads_device_bytes() {
        let (mem, pool) = make_pool(2);
        let mut buf = pool.acquire(16).unwrap();
        assert!(buf.data().is_empty());

        mem.write(buf.bus_addr(), b"\x05\x00\x00\x00hello").unwrap();
        pool.sync_for_cpu(&mut buf);
        assert_eq!(buf.data().len(), 16);
        assert_eq!(&buf.data()[..9], b"\x05\x00\x00\x00hello");

        buf.pull_head(4);
        buf.trim(5);
        assert_eq!(buf.data(), b"hello");
    }

    #[test]
    fn test_into_bytes_keeps_payload_and_frees_slots() {
        let (mem, pool) = make_pool(1);
        let mut buf = pool.acquire(8).unwrap();
        mem.write(buf.bus_addr(), b"abcdefgh").unwrap();
        pool.sync_for_cpu(&mut buf);

        let bytes = buf.into_bytes();
        assert_eq!(&bytes[..], b"abcdefgh");
        assert_eq!(pool.free_bytes(), 4096);
    }

    #[test]
    fn test_dma_pool_serves_ring_memory() {
        let (_mem, pool) = make_pool(4);
        let ring = BufferProvider::alloc(&pool, 520).unwrap();
        assert!(ring.addr.is_multiple_of(32));
        BufferProvider::dealloc(&pool, ring).unwrap();
        assert_eq!(pool.free_bytes(), pool.capacity());
    }
}

#[cfg(test)]
mod fuzz {
    use quickcheck::{Arbitrary, Gen, QuickCheck};

    use super::*;

    const MAX_OPS: usize = 32;
    const MAX_ALLOC_SIZE: usize = 3 * 256;

    #[derive(Clone, Debug)]
    enum Op {
        Alloc(usize),
        Dealloc(usize),
    }

    impl Arbitrary for Op {
        fn arbitrary(g: &mut Gen) -> Self {
            if bool::arbitrary(g) {
                Op::Alloc(usize::arbitrary(g) % MAX_ALLOC_SIZE + 1)
            } else {
                Op::Dealloc(usize::arbitrary(g))
            }
        }
    }

    #[derive(Clone, Debug)]
    struct Scenario {
        slots: usize,
        ops: Vec<Op>,
    }

    impl Arbitrary for Scenario {
        fn arbitrary(g: &mut Gen) -> Self {
            let slots = usize::arbitrary(g) % 64 + 1;
            let num_ops = usize::arbitrary(g) % MAX_OPS + 1;
            let ops = (0..num_ops).map(|_| Op::arbitrary(g)).collect();
            Scenario { slots, ops }
        }
    }

    fn check_slab_invariants<const N: usize>(
        slab: &Slab<N>,
        live: &[Allocation],
    ) -> Result<(), &'static str> {
        let live_bytes: usize = live.iter().map(|a| a.len).sum();
        if slab.free_bytes() + live_bytes != slab.capacity() {
            return Err("free bytes don't match live allocations");
        }

        for (i, a) in live.iter().enumerate() {
            if !slab.contains(a.addr) {
                return Err("allocation outside slab");
            }
            let a_end = a.addr + a.len as u64;
            for b in &live[i + 1..] {
                if a.addr < b.addr + b.len as u64 && b.addr < a_end {
                    return Err("overlapping allocations");
                }
            }
        }

        Ok(())
    }

    fn run_scenario(s: Scenario) -> bool {
        let mut slab = Slab::<256>::new(0x10000, s.slots * 256).unwrap();
        let mut live: Vec<Allocation> = Vec::new();

        for op in &s.ops {
            match op {
                Op::Alloc(size) => match slab.alloc(*size) {
                    Ok(alloc) => {
                        if alloc.len < *size {
                            return false;
                        }
                        live.push(alloc);
                    }
                    Err(AllocError::OutOfMemory) => {}
                    Err(_) => return false,
                },
                Op::Dealloc(idx) => {
                    if live.is_empty() {
                        continue;
                    }
                    let alloc = live.swap_remove(idx % live.len());
                    if slab.dealloc(alloc).is_err() {
                        return false;
                    }
                }
            }

            if check_slab_invariants(&slab, &live).is_err() {
                return false;
            }
        }

        live.drain(..).all(|a| slab.dealloc(a).is_ok()) && slab.free_bytes() == slab.capacity()
    }

    #[test]
    fn prop_slab_invariants() {
        QuickCheck::new()
            .tests(500)
            .quickcheck(run_scenario as fn(Scenario) -> bool);
    }
}
