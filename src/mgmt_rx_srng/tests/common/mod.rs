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
#![allow(dead_code)]

use std::sync::{Arc, mpsc};

use bytes::Bytes;
use mgmt_rx_srng::{
    DmaBuf, DmaPool, MgmtRxRing, MgmtRxSrngConfig, SharedSrng, SharedSrngRegistrar, Upstream,
};
use srng_testing::{SharedMem, SimFirmware};

pub const MEM_BASE: u64 = 0x10_0000;
/// 256 slots of 4 KiB
pub const MEM_SIZE: usize = 1 << 20;
pub const RBM: u8 = 1;

pub type Pool = DmaPool<Arc<SharedMem>>;
pub type Ring = MgmtRxRing<SharedSrng<Arc<SharedMem>>, Pool, Sink, Pool>;

/// Upstream that forwards each frame's payload over a channel.
pub struct Sink(mpsc::Sender<Bytes>);

impl Sink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self(tx)
    }
}

impl Upstream<DmaBuf> for Sink {
    fn deliver(&mut self, buf: DmaBuf) {
        let _ = self.0.send(buf.into_bytes());
    }
}

/// A ring wired to simulated firmware over one shared memory window.
pub struct Stack {
    pub ring: Ring,
    pub fw: SimFirmware,
    pub frames: mpsc::Receiver<Bytes>,
    pub pool: Pool,
    pub mem: Arc<SharedMem>,
}

impl Stack {
    /// Frames delivered so far.
    pub fn received(&self) -> Vec<Bytes> {
        self.frames.try_iter().collect()
    }
}

/// Enabled configuration with `ring_size` entries and defaults otherwise.
pub fn config(ring_size: u32) -> MgmtRxSrngConfig {
    let mut cfg = MgmtRxSrngConfig::new();
    cfg.set_enabled(true);
    cfg.set_ring_size(ring_size);
    cfg
}

/// Set up and attach a ring described by `cfg`.
pub fn new_stack(cfg: &MgmtRxSrngConfig) -> Stack {
    let mem = SharedMem::new(MEM_BASE, MEM_SIZE);
    let pool: Pool = DmaPool::new(mem.clone(), MEM_BASE, MEM_SIZE).unwrap();
    let registrar = SharedSrngRegistrar::new(mem.clone(), RBM);
    let (tx, frames) = mpsc::channel();

    let mut ring = MgmtRxRing::setup(
        cfg.ring_params().unwrap(),
        pool.clone(),
        &registrar,
        pool.clone(),
        Sink::new(tx),
    )
    .unwrap();
    ring.attach().unwrap();

    let fw = SimFirmware::new(mem.clone(), ring.hw_ring().unwrap(), cfg.buffer_size());
    Stack {
        ring,
        fw,
        frames,
        pool,
        mem,
    }
}
