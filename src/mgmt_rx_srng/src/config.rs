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

use core::cmp::{max, min};

#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::{RingParams, SrngFlags};

/// Configuration for the management-frame receive ring.
///
/// Out-of-range values are clamped by the setters rather than rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MgmtRxSrngConfig {
    /// The ring is only set up when enabled.
    enabled: bool,
    ring_size: u32,
    /// Hardware entry stride in bytes.
    entry_size: u32,
    /// Receive buffer size, header included.
    buffer_size: usize,
    /// Completed entries at which the device signals a reap. Zero disables
    /// threshold signalling.
    reap_threshold: u32,
    ring_ptr_swap: bool,
}

impl MgmtRxSrngConfig {
    pub const DEFAULT_RING_SIZE: u32 = 64;
    pub const MIN_RING_SIZE: u32 = 2;
    pub const MAX_RING_SIZE: u32 = 4096;

    pub const DEFAULT_ENTRY_SIZE: u32 = 16;
    pub const MIN_ENTRY_SIZE: u32 = 8;
    pub const MAX_ENTRY_SIZE: u32 = 64;

    /// Large enough for the biggest management frame plus its header
    pub const DEFAULT_BUFFER_SIZE: usize = 3520;
    pub const MIN_BUFFER_SIZE: usize = 64;
    pub const MAX_BUFFER_SIZE: usize = 16384;

    pub const DEFAULT_REAP_THRESHOLD: u32 = 8;

    /// Create a configuration with every value at its default. The ring
    /// starts out disabled.
    pub fn new() -> Self {
        Self {
            enabled: false,
            ring_size: Self::DEFAULT_RING_SIZE,
            entry_size: Self::DEFAULT_ENTRY_SIZE,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            reap_threshold: Self::DEFAULT_REAP_THRESHOLD,
            ring_ptr_swap: false,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Set the number of ring entries, clamped to
    /// `[MIN_RING_SIZE, MAX_RING_SIZE]`. The reap threshold is pulled down
    /// if it no longer fits.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn set_ring_size(&mut self, ring_size: u32) {
        self.ring_size = min(Self::MAX_RING_SIZE, max(ring_size, Self::MIN_RING_SIZE));
        self.reap_threshold = min(self.reap_threshold, self.ring_size - 1);
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    /// Set the hardware entry stride, clamped to
    /// `[MIN_ENTRY_SIZE, MAX_ENTRY_SIZE]` and rounded up to a whole word.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn set_entry_size(&mut self, entry_size: u32) {
        let clamped = min(Self::MAX_ENTRY_SIZE, max(entry_size, Self::MIN_ENTRY_SIZE));
        self.entry_size = clamped.next_multiple_of(4);
    }

    pub fn entry_size(&self) -> u32 {
        self.entry_size
    }

    /// Set the receive buffer size, clamped to
    /// `[MIN_BUFFER_SIZE, MAX_BUFFER_SIZE]`.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn set_buffer_size(&mut self, buffer_size: usize) {
        self.buffer_size = min(
            Self::MAX_BUFFER_SIZE,
            max(buffer_size, Self::MIN_BUFFER_SIZE),
        );
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Set the reap threshold, clamped to `ring_size - 1`. 0 turns
    /// threshold signalling off.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level = "Trace"))]
    pub fn set_reap_threshold(&mut self, reap_threshold: u32) {
        self.reap_threshold = min(reap_threshold, self.ring_size - 1);
    }

    pub fn reap_threshold(&self) -> u32 {
        self.reap_threshold
    }

    /// Head and tail pointer words are byte-swapped in ring memory.
    pub fn set_ring_ptr_swap(&mut self, swap: bool) {
        self.ring_ptr_swap = swap;
    }

    pub fn ring_ptr_swap(&self) -> bool {
        self.ring_ptr_swap
    }

    /// Parameters for [`MgmtRxRing::setup`](crate::MgmtRxRing::setup), or
    /// `None` if the ring is disabled.
    pub fn ring_params(&self) -> Option<RingParams> {
        if !self.enabled {
            return None;
        }

        let mut flags = SrngFlags::empty();
        flags.set(SrngFlags::RING_PTR_SWAP, self.ring_ptr_swap);

        Some(
            RingParams::new(self.ring_size, self.entry_size, self.buffer_size)
                .with_reap_threshold(self.reap_threshold)
                .with_flags(flags),
        )
    }
}

impl Default for MgmtRxSrngConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MgmtRxSrngConfig::default();
        assert!(!cfg.enabled());
        assert_eq!(cfg.ring_size(), 64);
        assert_eq!(cfg.entry_size(), 16);
        assert_eq!(cfg.buffer_size(), 3520);
        assert_eq!(cfg.reap_threshold(), 8);
        assert!(!cfg.ring_ptr_swap());
        assert_eq!(cfg.ring_params(), None);
    }

    #[test]
    fn test_setters_clamp() {
        let mut cfg = MgmtRxSrngConfig::new();

        cfg.set_ring_size(1);
        assert_eq!(cfg.ring_size(), MgmtRxSrngConfig::MIN_RING_SIZE);
        // threshold follows the smaller ring
        assert_eq!(cfg.reap_threshold(), 1);
        cfg.set_ring_size(100_000);
        assert_eq!(cfg.ring_size(), MgmtRxSrngConfig::MAX_RING_SIZE);

        cfg.set_entry_size(0);
        assert_eq!(cfg.entry_size(), 8);
        cfg.set_entry_size(10);
        assert_eq!(cfg.entry_size(), 12);
        cfg.set_entry_size(1000);
        assert_eq!(cfg.entry_size(), 64);

        cfg.set_buffer_size(1);
        assert_eq!(cfg.buffer_size(), MgmtRxSrngConfig::MIN_BUFFER_SIZE);
        cfg.set_buffer_size(usize::MAX);
        assert_eq!(cfg.buffer_size(), MgmtRxSrngConfig::MAX_BUFFER_SIZE);

        cfg.set_reap_threshold(u32::MAX);
        assert_eq!(cfg.reap_threshold(), MgmtRxSrngConfig::MAX_RING_SIZE - 1);
    }

    #[test]
    fn test_ring_params_when_enabled() {
        let mut cfg = MgmtRxSrngConfig::new();
        cfg.set_enabled(true);
        cfg.set_ring_ptr_swap(true);

        let params = cfg.ring_params().unwrap();
        assert_eq!(params.capacity, 64);
        assert_eq!(params.entry_size, 16);
        assert_eq!(params.buffer_size, 3520);
        assert_eq!(params.reap_threshold, 8);
        assert!(params.flags.contains(SrngFlags::LOW_THRESH_INTR_EN));
        assert!(params.flags.contains(SrngFlags::RING_PTR_SWAP));

        cfg.set_reap_threshold(0);
        let params = cfg.ring_params().unwrap();
        assert!(!params.flags.contains(SrngFlags::LOW_THRESH_INTR_EN));
    }
}
