// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Board memory map.
//!
//! Reference values for the STM32F407 (1 MiB flash, 128 KiB SRAM plus 64 KiB
//! CCM). Every band is power-of-two sized and naturally aligned, because the
//! memory-protection unit can express nothing else; the user bands are split
//! into eight equal slots matching the eight MPU subregions.

/// Loader image, first thing in flash. Not part of the kernel.
pub const LOADER_BASE: u32 = 0x0800_0000;

/// Shared boot-information band, written by the loader and read-only to
/// everyone afterwards.
pub const SHARED_BASE: u32 = 0x0800_8000;
pub const SHARED_SIZE: u32 = 32 * 1024;

/// Kernel text and rodata.
pub const KERN_TEXT_BASE: u32 = 0x0802_0000;
pub const KERN_TEXT_SIZE: u32 = 64 * 1024;

/// User text band: eight slots of [`USER_TEXT_SLOT_SIZE`].
pub const USER_TEXT_BASE: u32 = 0x0808_0000;
pub const USER_TEXT_SIZE: u32 = 512 * 1024;
pub const USER_TEXT_SLOT_SIZE: u32 = USER_TEXT_SIZE / NUM_SLOTS as u32;

/// Kernel RAM (CCM): globals plus the three kernel stacks at the top.
pub const KERN_RAM_BASE: u32 = 0x1000_0000;
pub const KERN_RAM_SIZE: u32 = 64 * 1024;

/// User RAM band: eight slots of [`USER_RAM_SLOT_SIZE`].
pub const USER_RAM_BASE: u32 = 0x2000_0000;
pub const USER_RAM_SIZE: u32 = 128 * 1024;
pub const USER_RAM_SLOT_SIZE: u32 = USER_RAM_SIZE / NUM_SLOTS as u32;

/// Peripheral band.
pub const PERIPH_BASE: u32 = 0x4000_0000;
pub const PERIPH_SIZE: u32 = 512 * 1024 * 1024;

/// Number of slots the user bands are divided into (one per MPU subregion).
pub const NUM_SLOTS: usize = 8;

// The protection unit only takes naturally aligned power-of-two regions;
// catch a bad edit here rather than at the first context switch.
static_assertions::const_assert!(USER_RAM_SIZE.is_power_of_two());
static_assertions::const_assert!(USER_RAM_BASE % USER_RAM_SIZE == 0);
static_assertions::const_assert!(USER_TEXT_SIZE.is_power_of_two());
static_assertions::const_assert!(USER_TEXT_BASE % USER_TEXT_SIZE == 0);
static_assertions::const_assert!(KERN_RAM_SIZE.is_power_of_two());
static_assertions::const_assert!(SHARED_BASE % SHARED_SIZE == 0);

pub const STACK_SIZE_IDLE: u32 = 4 * 1024;
pub const STACK_TOP_IDLE: u32 = KERN_RAM_BASE + KERN_RAM_SIZE;

pub const STACK_SIZE_SOFTIRQ: u32 = 4 * 1024;
pub const STACK_TOP_SOFTIRQ: u32 = STACK_TOP_IDLE - STACK_SIZE_IDLE;

/// The deferred-interrupt stack, shared by all tasks' interrupt threads and
/// wiped between owners. Its size is also the size of the MPU window opened
/// over it.
pub const STACK_SIZE_ISR: u32 = 4 * 1024;
pub const STACK_TOP_ISR: u32 = STACK_TOP_SOFTIRQ - STACK_SIZE_SOFTIRQ;
pub const ISR_STACK_BASE: u32 = STACK_TOP_ISR - STACK_SIZE_ISR;

/// Byte range of the text slots owned by a task sitting at `slot` (1-based)
/// for `num_slots` slots, as a half-open range.
pub fn text_slot_range(slot: u8, num_slots: u8) -> (u32, u32) {
    let start = USER_TEXT_BASE + u32::from(slot - 1) * USER_TEXT_SLOT_SIZE;
    let end = start + u32::from(num_slots) * USER_TEXT_SLOT_SIZE;
    (start, end)
}

/// Byte range of the RAM slots owned by a task; see [`text_slot_range`].
pub fn ram_slot_range(slot: u8, num_slots: u8) -> (u32, u32) {
    let start = USER_RAM_BASE + u32::from(slot - 1) * USER_RAM_SLOT_SIZE;
    let end = start + u32::from(num_slots) * USER_RAM_SLOT_SIZE;
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_ranges_tile_the_bands() {
        let (s1, e1) = ram_slot_range(1, 1);
        assert_eq!(s1, USER_RAM_BASE);
        assert_eq!(e1, USER_RAM_BASE + USER_RAM_SLOT_SIZE);

        let (s8, e8) = ram_slot_range(8, 1);
        assert_eq!(e8, USER_RAM_BASE + USER_RAM_SIZE);
        assert_eq!(e8 - s8, USER_RAM_SLOT_SIZE);

        let (ts, te) = text_slot_range(2, 3);
        assert_eq!(ts, USER_TEXT_BASE + USER_TEXT_SLOT_SIZE);
        assert_eq!(te - ts, 3 * USER_TEXT_SLOT_SIZE);
    }

    #[test]
    fn kernel_stacks_are_inside_kernel_ram() {
        assert!(ISR_STACK_BASE >= KERN_RAM_BASE);
        assert_eq!(STACK_TOP_IDLE, KERN_RAM_BASE + KERN_RAM_SIZE);
        assert_eq!(STACK_TOP_SOFTIRQ - STACK_SIZE_SOFTIRQ, STACK_TOP_ISR);
    }
}
