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

//! Test harness for the management-frame receive ring: a shared memory
//! window, a firmware model that plays the device side of a source ring,
//! and a capturing logger.

mod firmware;
mod shared_mem;
pub mod simplelogger;

pub use firmware::{SimError, SimFirmware};
pub use shared_mem::{MemFault, SharedMem};
