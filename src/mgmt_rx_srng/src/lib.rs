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

//! Management-frame RX ring.
//!
//! A radio's DMA engine writes out-of-band management frames straight into
//! host buffers that the host hands it through a shared source ring (SRNG).
//! This crate owns the host side of that hand-off:
//!
//! - [`MgmtRxRing`] keeps the descriptor table and the read/write cursors,
//!   fills the ring before the device may produce ([`MgmtRxRing::attach`]),
//!   and drains completions while re-arming every consumed entry in lock-step
//!   ([`MgmtRxRing::reap`]).
//! - [`HwRing`] and [`SrngRegistrar`] are the seams to the hardware ring.
//!   [`SharedSrng`] implements them over any [`MemOps`] backend.
//! - [`BufferPool`] and [`RxBuffer`] are the seams to the DMA buffer
//!   allocator. [`DmaPool`] is a slab-backed implementation.
//! - [`Upstream`] receives the header-stripped frames in hardware order.
//!
//! # Quick Start
//!
//! ```ignore
//! let params = config.ring_params().ok_or(MyError::Disabled)?;
//! let mut ring = MgmtRxRing::setup(params, ring_mem, &registrar, pool, upstream)?;
//! ring.attach()?;
//!
//! // on every reap event
//! ring.reap();
//!
//! ring.teardown();
//! ```

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod access;
pub mod config;
mod header;
mod pool;
mod ring;
mod srng;

pub use access::*;
pub use config::MgmtRxSrngConfig;
pub use header::*;
pub use pool::*;
pub use ring::*;
pub use srng::*;
