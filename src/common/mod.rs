// Copyright 2026 Nimble Project Authors. Licensed under Apache-2.0.

//! Shared low-level primitives: bitmap helpers, packed bit arrays,
//! bounds-checked little-endian readers and checksums.

mod bits;
mod checksum;
mod fixed_bit_array;
mod primitives;

pub use bits::*;
pub use checksum::*;
pub use fixed_bit_array::*;
pub use primitives::*;
