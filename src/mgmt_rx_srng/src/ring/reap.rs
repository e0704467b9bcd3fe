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

//! Completion reaping.
//!
//! A reap pass runs in two phases. Inside one hardware access section it
//! walks the completed entries, re-arms each one with a fresh buffer and
//! retires the slot it completed; outside the section it syncs, validates
//! and delivers the retired buffers in completion order.

#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use super::{MgmtRxError, MgmtRxRing, RetiredChain, RingState, RingStats, Upstream};
use crate::{
    AccessGuard, BufferPool, BufferProvider, DescriptorTable, HwRing, RingIndexTracker, RxBuffer,
    strip_header,
};

impl<H, P, U, A> MgmtRxRing<H, P, U, A>
where
    H: HwRing,
    P: BufferPool,
    U: Upstream<P::Buffer>,
    A: BufferProvider,
{
    /// Drain completed entries and deliver their frames upstream.
    ///
    /// Errors are logged; see [`try_reap`](Self::try_reap) for a variant
    /// that reports them.
    pub fn reap(&mut self) {
        match self.try_reap() {
            Ok(_) => {}
            Err(e @ (MgmtRxError::Faulted | MgmtRxError::NotAttached | MgmtRxError::Released)) => {
                log::warn!("mgmt rx reap skipped: {}", e)
            }
            Err(e) => log::error!("mgmt rx reap failed: {}", e),
        }
    }

    /// Drain completed entries and deliver their frames upstream, returning
    /// how many frames were delivered.
    ///
    /// Each completion is replenished before its slot is retired. If the
    /// pool runs dry the pass stops early and the remaining completions
    /// stay queued in the hardware ring for the next pass.
    ///
    /// A completion whose cookie is not the expected slot, or an arm the
    /// hardware rejects, faults the ring: this call returns the error, and
    /// later reap and attach calls return [`MgmtRxError::Faulted`] until
    /// the ring is torn down. Buffers retired earlier in the same pass are
    /// still delivered.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace"))]
    pub fn try_reap(&mut self) -> Result<usize, MgmtRxError> {
        match self.state {
            RingState::Active => {}
            RingState::Ready => return Err(MgmtRxError::NotAttached),
            RingState::Faulted => return Err(MgmtRxError::Faulted),
            RingState::Released => return Err(MgmtRxError::Released),
        }
        let hw = self.hw.as_mut().ok_or(MgmtRxError::Released)?;

        let mut retired = RetiredChain::new();
        let pass = {
            let mut ring = AccessGuard::begin(hw)?;
            Self::drain_completions(
                &mut ring,
                &mut self.table,
                &mut self.cursor,
                &self.pool,
                self.config.buffer_size,
                &mut self.stats,
                &mut retired,
            )
        };

        if let Err(e) = pass {
            log::error!(
                "mgmt rx ring faulted at read_idx {}: {}",
                self.cursor.read_idx(),
                e
            );
            self.state = RingState::Faulted;
        }

        let delivered = self.deliver(retired);
        pass.map(|()| delivered)
    }

    fn drain_completions(
        ring: &mut AccessGuard<'_, H>,
        table: &mut DescriptorTable<P::Buffer>,
        cursor: &mut RingIndexTracker,
        pool: &P,
        buffer_size: usize,
        stats: &mut RingStats,
        retired: &mut RetiredChain<P::Buffer>,
    ) -> Result<(), MgmtRxError> {
        let available = ring.available_count();

        for remaining in (1..=available).rev() {
            let Some(entry) = ring.next_entry() else {
                log::warn!("mgmt rx ring reported a completion it cannot produce");
                stats.missing_entries += 1;
                continue;
            };

            let cookie = ring.extract_cookie(&entry);
            let read_idx = cursor.read_idx();
            if cookie != read_idx || !table.is_armed(read_idx) {
                return Err(MgmtRxError::Desync {
                    cookie,
                    expected: read_idx,
                });
            }

            let write_idx = cursor.write_idx();
            if table.is_armed(write_idx) {
                return Err(MgmtRxError::DoubleArm(write_idx));
            }

            let buf = match pool.acquire(buffer_size) {
                Ok(buf) => buf,
                Err(e) => {
                    log::debug!(
                        "mgmt rx buffer pool exhausted ({}), leaving {} completions queued",
                        e,
                        remaining
                    );
                    stats.backpressure += 1;
                    break;
                }
            };
            if let Err(e) = ring.set_entry(entry, buf.bus_addr(), write_idx) {
                pool.release(buf);
                return Err(e.into());
            }
            if let Err(buf) = table.arm(write_idx, buf) {
                pool.release(buf);
                return Err(MgmtRxError::DoubleArm(write_idx));
            }
            cursor.advance_write();

            let Some(buf) = table.retire(read_idx) else {
                return Err(MgmtRxError::Desync {
                    cookie,
                    expected: read_idx,
                });
            };
            cursor.advance_read();
            stats.reaped += 1;
            retired.push(buf);
        }

        Ok(())
    }

    fn deliver(&mut self, retired: RetiredChain<P::Buffer>) -> usize {
        let mut delivered = 0;

        for mut buf in retired {
            self.pool.sync_for_cpu(&mut buf);
            match strip_header(&mut buf) {
                Ok(len) => {
                    log::trace!("mgmt rx frame of {} bytes at {:#x}", len, buf.bus_addr());
                    self.upstream.deliver(buf);
                    delivered += 1;
                }
                Err(e) => {
                    log::warn!("dropping mgmt rx frame at {:#x}: {}", buf.bus_addr(), e);
                    self.stats.dropped_malformed += 1;
                    self.pool.release(buf);
                }
            }
        }

        self.stats.delivered += delivered as u64;
        delivered
    }
}
