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

//! Buffer-address-info ring entry.
//!
//! The entry carries a 40-bit bus address, the id of the return buffer
//! manager that owns the buffer, and a 21-bit software cookie the device
//! hands back untouched:
//!
//! ```text
//! word 0  [31:0]   bus address bits 31:0
//! word 1  [7:0]    bus address bits 39:32
//!         [10:8]   return buffer manager
//!         [31:11]  cookie
//! ```
//!
//! Both words are little-endian in memory.

use bytemuck::{Pod, Zeroable};

use super::SrngError;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct RxBufEntry {
    pub buffer_addr_lo: u32,
    pub buffer_info: u32,
}

const _: () = assert!(core::mem::size_of::<RxBufEntry>() == 8);
const _: () = assert!(RxBufEntry::ADDR_LO_OFFSET == 0);
const _: () = assert!(RxBufEntry::INFO_OFFSET == 4);
const _: () = assert!(RxBufEntry::COOKIE_SHIFT + RxBufEntry::COOKIE_BITS == u32::BITS);

impl RxBufEntry {
    pub const SIZE: usize = core::mem::size_of::<Self>();
    pub const ALIGN: usize = core::mem::align_of::<Self>();

    pub const ADDR_LO_OFFSET: usize = core::mem::offset_of!(Self, buffer_addr_lo);
    pub const INFO_OFFSET: usize = core::mem::offset_of!(Self, buffer_info);

    pub const MAX_BUS_ADDR: u64 = (1 << 40) - 1;
    pub const COOKIE_BITS: u32 = 21;
    pub const MAX_COOKIE: u32 = (1 << Self::COOKIE_BITS) - 1;
    pub const MAX_RBM: u8 = 0x7;

    const ADDR_HI_MASK: u32 = 0xff;
    const RBM_SHIFT: u32 = 8;
    const COOKIE_SHIFT: u32 = 11;

    /// Encode an entry, rejecting values the fields cannot hold.
    pub fn new(bus_addr: u64, cookie: u32, rbm: u8) -> Result<Self, SrngError> {
        if bus_addr > Self::MAX_BUS_ADDR {
            return Err(SrngError::AddrOutOfRange(bus_addr));
        }
        if cookie > Self::MAX_COOKIE {
            return Err(SrngError::CookieOutOfRange(cookie));
        }

        let info = ((bus_addr >> 32) as u32 & Self::ADDR_HI_MASK)
            | (u32::from(rbm & Self::MAX_RBM) << Self::RBM_SHIFT)
            | (cookie << Self::COOKIE_SHIFT);

        Ok(Self {
            buffer_addr_lo: (bus_addr as u32).to_le(),
            buffer_info: info.to_le(),
        })
    }

    #[inline]
    fn info(&self) -> u32 {
        u32::from_le(self.buffer_info)
    }

    #[inline]
    pub fn bus_addr(&self) -> u64 {
        (u64::from(self.info() & Self::ADDR_HI_MASK) << 32)
            | u64::from(u32::from_le(self.buffer_addr_lo))
    }

    #[inline]
    pub fn cookie(&self) -> u32 {
        self.info() >> Self::COOKIE_SHIFT
    }

    #[inline]
    pub fn return_buffer_manager(&self) -> u8 {
        ((self.info() >> Self::RBM_SHIFT) & u32::from(Self::MAX_RBM)) as u8
    }
}
