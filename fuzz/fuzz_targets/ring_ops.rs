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

#![no_main]

use std::sync::{Arc, mpsc};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mgmt_rx_srng::{
    Allocation, BufferProvider, DmaBuf, DmaPool, MgmtRxError, MgmtRxHeader, MgmtRxRing,
    MgmtRxSrngConfig, RingState, SharedSrngRegistrar, Upstream,
};
use srng_testing::{SharedMem, SimError, SimFirmware};

const MEM_BASE: u64 = 0x10_0000;
const MEM_SIZE: usize = 128 * 4096;

#[derive(Arbitrary, Debug)]
enum Op {
    /// Firmware delivers a frame tagged with the next sequence number.
    Deliver { extra: u8 },
    /// Firmware delivers a frame whose header claims `claimed` bytes.
    DeliverRaw { claimed: u16 },
    /// Firmware forges the cookie of the next entry it consumes.
    Forge { cookie: u16 },
    Reap,
    /// Take a DMA slot away from the pool.
    Hoard,
    /// Give a hoarded slot back.
    Unhoard,
}

#[derive(Arbitrary, Debug)]
struct Scenario {
    ring_size: u8,
    ops: Vec<Op>,
}

struct Sink(mpsc::Sender<Vec<u8>>);

impl Upstream<DmaBuf> for Sink {
    fn deliver(&mut self, buf: DmaBuf) {
        let _ = self.0.send(buf.into_bytes().to_vec());
    }
}

// Random firmware behaviour against a ring over shared memory: frames must
// come out in sequence, the ring must stay full while healthy, and teardown
// must hand every DMA slot back.
fuzz_target!(|s: Scenario| {
    let mut cfg = MgmtRxSrngConfig::new();
    cfg.set_enabled(true);
    cfg.set_ring_size(u32::from(s.ring_size) % 32 + 2);
    cfg.set_buffer_size(512);
    let n = cfg.ring_size();

    let mem = SharedMem::new(MEM_BASE, MEM_SIZE);
    let pool: DmaPool<Arc<SharedMem>> = DmaPool::new(mem.clone(), MEM_BASE, MEM_SIZE).unwrap();
    let registrar = SharedSrngRegistrar::new(mem.clone(), 0);
    let (tx, rx) = mpsc::channel();

    let mut ring = MgmtRxRing::setup(
        cfg.ring_params().unwrap(),
        pool.clone(),
        &registrar,
        pool.clone(),
        Sink(tx),
    )
    .unwrap();
    ring.attach().unwrap();
    let fw = SimFirmware::new(mem, ring.hw_ring().unwrap(), cfg.buffer_size());

    let mut hoard: Vec<Allocation> = Vec::new();
    let mut sent = 0u32;
    let mut last_seen: Option<u32> = None;

    for op in &s.ops {
        match op {
            Op::Deliver { extra } => {
                let mut payload = sent.to_le_bytes().to_vec();
                payload.resize(4 + usize::from(*extra), 0);
                match fw.deliver_frame(&payload) {
                    Ok(_) => sent += 1,
                    Err(SimError::NothingArmed) => {}
                    Err(e) => panic!("firmware failed: {e}"),
                }
            }
            Op::DeliverRaw { claimed } => {
                // fill the whole buffer so nothing stale can parse as a tag
                let mut frame = MgmtRxHeader::new(*claimed).to_bytes().to_vec();
                frame.resize(cfg.buffer_size(), 0xff);
                match fw.deliver_raw(&frame) {
                    Ok(_) | Err(SimError::NothingArmed) => {}
                    Err(e) => panic!("firmware failed: {e}"),
                }
            }
            Op::Forge { cookie } => match fw.rewrite_cookie(u32::from(*cookie)) {
                Ok(()) | Err(SimError::NothingArmed) => {}
                Err(e) => panic!("firmware failed: {e}"),
            },
            Op::Reap => match ring.try_reap() {
                Ok(_) => {}
                Err(MgmtRxError::Desync { .. } | MgmtRxError::Faulted) => {
                    assert_eq!(ring.state(), RingState::Faulted)
                }
                Err(e) => panic!("unexpected reap error: {e}"),
            },
            Op::Hoard => {
                if let Ok(alloc) = pool.alloc(512) {
                    hoard.push(alloc);
                }
            }
            Op::Unhoard => {
                if let Some(alloc) = hoard.pop() {
                    pool.dealloc(alloc).unwrap();
                }
            }
        }

        // tagged frames arrive in sequence; raw frames carry 0xff filler
        for frame in rx.try_iter() {
            if frame.len() < 4 {
                continue;
            }
            let seq = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
            if seq < sent {
                assert!(last_seen.is_none_or(|last| seq >= last));
                last_seen = Some(seq);
            }
        }

        if ring.state() == RingState::Active {
            assert_eq!(ring.in_use_count(), n as usize - 1);
            assert_eq!((ring.write_idx() + n - ring.read_idx()) % n, n - 1);
        }
    }

    ring.teardown();
    for alloc in hoard {
        pool.dealloc(alloc).unwrap();
    }
    assert_eq!(pool.free_bytes(), pool.capacity());
});
