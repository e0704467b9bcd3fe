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

use std::sync::{Arc, Mutex};

use mgmt_rx_srng::MemOps;
use thiserror::Error;

/// Access outside the window, or a poisoned lock.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Bad shared memory access at {0:#x}")]
pub struct MemFault(pub u64);

/// Flat memory window at a fixed bus address, shared between the host
/// ring and [`SimFirmware`](crate::SimFirmware).
#[derive(Debug)]
pub struct SharedMem {
    base: u64,
    bytes: Mutex<Vec<u8>>,
}

impl SharedMem {
    pub fn new(base: u64, size: usize) -> Arc<Self> {
        Arc::new(Self {
            base,
            bytes: Mutex::new(vec![0u8; size]),
        })
    }

    pub fn base_addr(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_range<R>(
        &self,
        addr: u64,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, MemFault> {
        let mut bytes = self.bytes.lock().map_err(|_| MemFault(addr))?;
        let start = addr.checked_sub(self.base).ok_or(MemFault(addr))? as usize;
        let end = start.checked_add(len).ok_or(MemFault(addr))?;
        let window = bytes.get_mut(start..end).ok_or(MemFault(addr))?;
        Ok(f(window))
    }
}

impl MemOps for SharedMem {
    type Error = MemFault;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, MemFault> {
        self.with_range(addr, dst.len(), |src| dst.copy_from_slice(src))?;
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, MemFault> {
        self.with_range(addr, src.len(), |dst| dst.copy_from_slice(src))?;
        Ok(src.len())
    }

    // the window lock orders every access, so plain loads and stores suffice
    fn load_acquire(&self, addr: u64) -> Result<u32, MemFault> {
        let mut word = [0u8; 4];
        self.read(addr, &mut word)?;
        Ok(u32::from_ne_bytes(word))
    }

    fn store_release(&self, addr: u64, val: u32) -> Result<(), MemFault> {
        self.write(addr, &val.to_ne_bytes())?;
        Ok(())
    }
}

