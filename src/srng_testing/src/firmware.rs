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

use std::sync::Arc;

use mgmt_rx_srng::{
    MemOps, MgmtRxHeader, RingLayout, RxBufEntry, SharedSrng, SrngError, SrngFlags,
};
use thiserror::Error;

use crate::{MemFault, SharedMem};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    #[error("No armed entry to consume")]
    NothingArmed,
    #[error("Frame of {0} bytes does not fit a receive buffer")]
    FrameTooLarge(usize),
    #[error("Bad ring entry: {0}")]
    Entry(#[from] SrngError),
    #[error(transparent)]
    Mem(#[from] MemFault),
}

/// Device side of a [`SharedSrng`].
///
/// Consumes armed entries in ring order, writes a frame into each entry's
/// buffer and then moves the tail pointer, the way the radio's DMA engine
/// does.
#[derive(Debug, Clone)]
pub struct SimFirmware {
    mem: Arc<SharedMem>,
    layout: RingLayout,
    swap: bool,
    buffer_size: usize,
}

impl SimFirmware {
    /// Model the device behind `srng`, whose buffers hold `buffer_size`
    /// bytes.
    pub fn new(mem: Arc<SharedMem>, srng: &SharedSrng<Arc<SharedMem>>, buffer_size: usize) -> Self {
        Self {
            mem,
            layout: srng.layout(),
            swap: srng.flags().contains(SrngFlags::RING_PTR_SWAP),
            buffer_size,
        }
    }

    fn load(&self, addr: u64) -> Result<u32, MemFault> {
        let raw = self.mem.load_acquire(addr)?;
        Ok(if self.swap { raw.swap_bytes() } else { raw })
    }

    fn store(&self, addr: u64, val: u32) -> Result<(), MemFault> {
        let raw = if self.swap { val.swap_bytes() } else { val };
        self.mem.store_release(addr, raw)
    }

    /// Head pointer as last published by the host.
    pub fn head(&self) -> Result<u32, SimError> {
        Ok(self.load(self.layout.hp_addr)?)
    }

    pub fn tail(&self) -> Result<u32, SimError> {
        Ok(self.load(self.layout.tp_addr)?)
    }

    /// Entries the host has published and the device has not consumed.
    pub fn armed(&self) -> Result<u32, SimError> {
        let n = self.layout.num_entries;
        Ok((self.head()? + n - self.tail()?) % n)
    }

    /// The entry the device consumes next.
    pub fn peek(&self) -> Result<RxBufEntry, SimError> {
        if self.armed()? == 0 {
            return Err(SimError::NothingArmed);
        }
        let addr = self.entry_addr(self.tail()?)?;
        Ok(self.mem.read_val(addr)?)
    }

    /// Prepend a frame header to `payload` and deliver it.
    pub fn deliver_frame(&self, payload: &[u8]) -> Result<RxBufEntry, SimError> {
        let len =
            u16::try_from(payload.len()).map_err(|_| SimError::FrameTooLarge(payload.len()))?;
        let mut frame = MgmtRxHeader::new(len).to_bytes().to_vec();
        frame.extend_from_slice(payload);
        self.deliver_raw(&frame)
    }

    /// DMA `bytes` as-is into the next armed buffer and consume its entry.
    ///
    /// Returns the consumed entry.
    pub fn deliver_raw(&self, bytes: &[u8]) -> Result<RxBufEntry, SimError> {
        if bytes.len() > self.buffer_size {
            return Err(SimError::FrameTooLarge(bytes.len()));
        }
        let entry = self.peek()?;
        self.mem.write(entry.bus_addr(), bytes)?;

        let next = (self.tail()? + 1) % self.layout.num_entries;
        self.store(self.layout.tp_addr, next)?;
        Ok(entry)
    }

    /// Overwrite the cookie of the entry the device consumes next.
    pub fn rewrite_cookie(&self, cookie: u32) -> Result<(), SimError> {
        let entry = self.peek()?;
        let forged = RxBufEntry::new(entry.bus_addr(), cookie, entry.return_buffer_manager())?;
        let addr = self.entry_addr(self.tail()?)?;
        self.mem.write_val(addr, forged)?;
        Ok(())
    }

    /// Publish `tp` as the tail pointer without touching any buffer.
    pub fn set_tail(&self, tp: u32) -> Result<(), SimError> {
        Ok(self.store(self.layout.tp_addr, tp)?)
    }

    fn entry_addr(&self, idx: u32) -> Result<u64, SimError> {
        self.layout
            .entry_addr(idx)
            .ok_or(SimError::Entry(SrngError::InvalidLayout))
    }
}
