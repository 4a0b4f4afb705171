// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SoC peripheral services.
//!
//! The kernel needs a handful of operations from the SoC beyond the
//! processor core: clock gating, GPIO pin programming, external-interrupt
//! routing, DMA stream programming and the hardware random source. The
//! `stm32f4` module provides them for the reference part; `fake` stands in
//! off-target so the rest of the kernel runs under `cargo test`.
//!
//! The device *map* -- which (address, size) pairs name real devices, and
//! what each needs -- is pure data and lives in [`devmap`] unconditionally.

pub mod devmap;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        mod stm32f4;
        pub use stm32f4::*;
    } else {
        mod fake;
        pub use fake::*;
    }
}

/// Failure modes of the hardware random source.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TrngError {
    /// The generator reported a seed integrity problem.
    SeedError,
    /// The generator clock is misconfigured relative to the bus clock.
    ClockError,
}
