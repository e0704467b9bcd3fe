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

//! Device-visible memory access.
//!
//! [`MemOps`] abstracts how the host reaches memory shared with the radio:
//! ring entries, the head/tail pointer words and the DMA buffers themselves.
//! Addresses are bus addresses as the device sees them; the backend
//! translates them.

use bytemuck::Pod;

/// Backend-provided access to device-visible memory.
///
/// Implementations must honour the ordering documented on
/// [`load_acquire`](Self::load_acquire) and
/// [`store_release`](Self::store_release): the ring publishes entries with
/// plain writes and then releases the head pointer, and the device publishes
/// completions by releasing the tail pointer.
pub trait MemOps {
    type Error;

    /// Read `dst.len()` bytes starting at `addr`.
    ///
    /// Returns the number of bytes read, which equals `dst.len()` on success.
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `src` starting at `addr`.
    ///
    /// Returns the number of bytes written, which equals `src.len()` on success.
    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error>;

    /// Load a 32-bit ring pointer word with acquire semantics.
    fn load_acquire(&self, addr: u64) -> Result<u32, Self::Error>;

    /// Store a 32-bit ring pointer word with release semantics.
    fn store_release(&self, addr: u64, val: u32) -> Result<(), Self::Error>;

    /// Read a Pod value at `addr`.
    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        let mut val = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut val);

        self.read(addr, bytes)?;
        Ok(val)
    }

    /// Write a Pod value at `addr`.
    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        let bytes = bytemuck::bytes_of(&val);
        self.write(addr, bytes)?;
        Ok(())
    }
}

impl<M: MemOps + ?Sized> MemOps for alloc::sync::Arc<M> {
    type Error = M::Error;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).read(addr, dst)
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        (**self).write(addr, src)
    }

    fn load_acquire(&self, addr: u64) -> Result<u32, Self::Error> {
        (**self).load_acquire(addr)
    }

    fn store_release(&self, addr: u64, val: u32) -> Result<(), Self::Error> {
        (**self).store_release(addr, val)
    }
}
