// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-in SoC services for development machines.
//!
//! Register pokes become no-ops; the pieces the portable logic observes --
//! pin levels, pending external-interrupt lines, the random source -- keep
//! minimal per-thread state so tests can drive them.

use std::cell::Cell;

use abi::{DmaDescriptor, DmaReconf, GpioDescriptor, GpioRef};

use super::devmap::ClockGate;
use super::TrngError;

thread_local! {
    static PIN_LEVELS: Cell<u128> = const { Cell::new(0) };
    static EXTI_PENDING: Cell<u32> = const { Cell::new(0) };
    static EXTI_UNMASKED: Cell<u32> = const { Cell::new(0) };
    static TRNG_STATE: Cell<u32> = const { Cell::new(0x2545_0b1d) };
}

pub fn init_clocks() {}

pub fn clock_enable(_gate: ClockGate) {}

pub fn gpio_configure(_gpio: &GpioDescriptor) {}

fn pin_bit(kref: GpioRef) -> u128 {
    1u128 << (u32::from(kref.port()) * 16 + u32::from(kref.pin()))
}

pub fn gpio_set(kref: GpioRef, value: bool) {
    PIN_LEVELS.with(|p| {
        let bits = p.get();
        p.set(if value {
            bits | pin_bit(kref)
        } else {
            bits & !pin_bit(kref)
        });
    });
}

pub fn gpio_get(kref: GpioRef) -> bool {
    PIN_LEVELS.with(|p| p.get() & pin_bit(kref) != 0)
}

pub fn exti_configure(_gpio: &GpioDescriptor) {}

pub fn exti_enable(kref: GpioRef) {
    EXTI_UNMASKED.with(|m| m.set(m.get() | 1 << kref.pin()));
}

pub fn exti_disable(kref: GpioRef) {
    EXTI_UNMASKED.with(|m| m.set(m.get() & !(1 << kref.pin())));
}

/// Test observation: whether a line is currently unmasked.
pub fn test_exti_unmasked(line: u8) -> bool {
    EXTI_UNMASKED.with(|m| m.get() & (1 << line) != 0)
}

pub fn exti_clear_pending(line: u8) {
    EXTI_PENDING.with(|p| p.set(p.get() & !(1 << line)));
}

pub fn exti_pending_lines() -> u32 {
    EXTI_PENDING.with(|p| p.get())
}

/// Test control: marks a line pending, as a wiggled pin would.
pub fn test_set_exti_pending(line: u8) {
    EXTI_PENDING.with(|p| p.set(p.get() | 1 << line));
}

pub fn dma_program(_controller: u8, _stream: u8, _desc: &DmaDescriptor, _mask: DmaReconf) {}

pub fn dma_enable(_controller: u8, _stream: u8) {}

pub fn dma_disable(_controller: u8, _stream: u8) {}

pub fn dma_status(_controller: u8, _stream: u8) -> u32 {
    abi::dma_status::TRANSFER_COMPLETE
}

pub fn dma_clear_status(_controller: u8, _stream: u8) {}

/// Deterministic stand-in source (an xorshift step per draw).
pub fn trng_word() -> Result<u32, TrngError> {
    TRNG_STATE.with(|s| {
        let mut x = s.get();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        s.set(x);
        Ok(x)
    })
}
