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

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mgmt_rx_srng::{
    BufferPool, DmaBuf, DmaPool, MgmtRxRing, MgmtRxSrngConfig, SharedSrng, SharedSrngRegistrar,
};
use srng_testing::{SharedMem, SimFirmware};

const MEM_BASE: u64 = 0x10_0000;
const MEM_SIZE: usize = 4 * 1024 * 1024;

type Pool = DmaPool<Arc<SharedMem>>;
type Sink = fn(DmaBuf);
type Ring = MgmtRxRing<SharedSrng<Arc<SharedMem>>, Pool, Sink, Pool>;

fn make_ring(ring_size: u32) -> (Ring, SimFirmware, Pool) {
    let mut cfg = MgmtRxSrngConfig::new();
    cfg.set_enabled(true);
    cfg.set_ring_size(ring_size);

    let mem = SharedMem::new(MEM_BASE, MEM_SIZE);
    let pool: Pool = DmaPool::new(mem.clone(), MEM_BASE, MEM_SIZE).unwrap();
    let registrar = SharedSrngRegistrar::new(mem.clone(), 0);

    let mut ring: Ring = MgmtRxRing::setup(
        cfg.ring_params().unwrap(),
        pool.clone(),
        &registrar,
        pool.clone(),
        drop as Sink,
    )
    .unwrap();
    ring.attach().unwrap();

    let fw = SimFirmware::new(mem, ring.hw_ring().unwrap(), cfg.buffer_size());
    (ring, fw, pool)
}

// One reap pass over a burst of completions
fn bench_reap_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("reap_burst");
    let payload = [0xa5u8; 256];

    for burst in [1u32, 8, 32, 63].iter() {
        group.throughput(Throughput::Elements(u64::from(*burst)));
        group.bench_with_input(BenchmarkId::from_parameter(burst), burst, |b, &burst| {
            let (mut ring, fw, _pool) = make_ring(64);
            b.iter(|| {
                for _ in 0..burst {
                    fw.deliver_frame(&payload).unwrap();
                }
                black_box(ring.try_reap().unwrap());
            });
        });
    }

    group.finish();
}

// Reap with nothing pending
fn bench_reap_idle(c: &mut Criterion) {
    c.bench_function("reap_idle", |b| {
        let (mut ring, _fw, _pool) = make_ring(64);
        b.iter(|| black_box(ring.try_reap().unwrap()));
    });
}

// Replenish cost in isolation
fn bench_acquire_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_release");

    for size in [512usize, 3520].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mem = SharedMem::new(MEM_BASE, MEM_SIZE);
            let pool: Pool = DmaPool::new(mem, MEM_BASE, MEM_SIZE).unwrap();
            b.iter(|| {
                let buf = pool.acquire(black_box(size)).unwrap();
                pool.release(buf);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_reap_burst,
    bench_reap_idle,
    bench_acquire_release,
);

criterion_main!(benches);
