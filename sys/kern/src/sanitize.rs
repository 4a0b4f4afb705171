// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validation of user-provided addresses against task memory windows.
//!
//! Nothing here dereferences anything: these are pure range checks, asking
//! whether a task-supplied `(base, len)` pair lies inside memory the task
//! legitimately owns. Data pointers resolve against the task's RAM slots
//! (plus the shared interrupt stack while its interrupt thread runs, plus
//! any DMA shared-memory grants when the caller says so); code pointers
//! resolve against the task's text/rodata slots.

use abi::{DmaShmAccess, ThreadMode};
use kerncore::MemoryWindow;

use crate::arch;
use crate::task::Task;
use crate::umem::USlice;

/// One contiguous window of task-accessible address space.
#[derive(Copy, Clone, Debug)]
pub struct Window {
    pub base: usize,
    pub end: usize,
}

impl MemoryWindow for Window {
    fn base_addr(&self) -> usize {
        self.base
    }

    fn end_addr(&self) -> usize {
        self.end
    }
}

/// The shared deferred-interrupt stack window.
fn isr_stack_window() -> Window {
    let (base, top) = arch::isr_stack();
    Window { base, end: top }
}

/// Checks that `slice` lies in writable memory of `task`: its RAM slots, or
/// the interrupt stack while running in interrupt mode.
pub fn slice_in_ram<T>(task: &Task, slice: &USlice<T>, mode: ThreadMode) -> bool {
    let (base, end) = task.ram_range();
    if kerncore::window_covers(slice, Window { base, end }) {
        return true;
    }
    mode == ThreadMode::Isr && kerncore::window_covers(slice, isr_stack_window())
}

/// Checks that `slice` lies in the text/rodata slots of `task`.
pub fn slice_in_text<T>(task: &Task, slice: &USlice<T>) -> bool {
    let (base, end) = task.text_range();
    kerncore::window_covers(slice, Window { base, end })
}

/// Checks that `slice` lies in any readable memory of `task`.
pub fn slice_anywhere<T>(task: &Task, slice: &USlice<T>, mode: ThreadMode) -> bool {
    slice_in_ram(task, slice, mode) || slice_in_text(task, slice)
}

/// Checks that a handler address names code of `task`. Handlers are given as
/// bare addresses, so the check covers one instruction-sized unit.
pub fn code_ptr_in_text(task: &Task, ptr: u32) -> bool {
    if ptr == 0 {
        return false;
    }
    let (base, end) = task.text_range();
    // A Thumb function pointer has bit 0 set; strip it before the range
    // check.
    let ptr = (ptr & !1) as usize;
    ptr >= base && ptr.saturating_add(2) <= end
}

/// A DMA grant viewed as a memory window plus its access direction.
#[derive(Copy, Clone, Debug)]
struct GrantWindow {
    base: u32,
    end: u32,
    access: DmaShmAccess,
}

impl MemoryWindow for GrantWindow {
    fn base_addr(&self) -> usize {
        self.base as usize
    }

    fn end_addr(&self) -> usize {
        self.end as usize
    }
}

/// Checks that `slice` lies in a DMA shared-memory grant received by `task`
/// with the given access direction.
pub fn slice_in_dma_shm<T>(task: &Task, slice: &USlice<T>, access: DmaShmAccess) -> bool {
    kerncore::any_window_covers(
        slice,
        task.dma_shms().map(|g| GrantWindow {
            base: g.address,
            end: g.address.saturating_add(g.size),
            access: g.access,
        }),
        |g| g.access == access,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descs::TaskDesc;
    use abi::{DmaShmDescriptor, Permissions, TaskId};

    static DESC: TaskDesc = TaskDesc {
        name: "probe",
        slot: 1,
        num_slots: 1,
        entry_point: 0x0808_0001,
        isr_entry: 0x0808_0101,
        priority: 1,
        stack_size: 4096,
        domain: 0,
        permissions: Permissions::empty(),
    };

    fn task() -> Task {
        Task::from_descriptor(&DESC, TaskId(2))
    }

    #[test]
    fn ram_checks_follow_the_slot() {
        let t = task();
        let (base, end) = t.ram_range();
        let inside = USlice::<u8>::from_raw(base + 16, 32).unwrap();
        let leaking = USlice::<u8>::from_raw(end - 8, 16).unwrap();
        assert!(slice_in_ram(&t, &inside, ThreadMode::Main));
        assert!(!slice_in_ram(&t, &leaking, ThreadMode::Main));
        // Text is not writable memory.
        let (tbase, _) = t.text_range();
        let in_text = USlice::<u8>::from_raw(tbase + 4, 4).unwrap();
        assert!(!slice_in_ram(&t, &in_text, ThreadMode::Main));
        assert!(slice_anywhere(&t, &in_text, ThreadMode::Main));
    }

    #[test]
    fn isr_stack_opens_only_in_isr_mode() {
        let t = task();
        let (base, _) = arch::isr_stack();
        let on_isr_stack = USlice::<u8>::from_raw(base + 64, 16).unwrap();
        assert!(!slice_in_ram(&t, &on_isr_stack, ThreadMode::Main));
        assert!(slice_in_ram(&t, &on_isr_stack, ThreadMode::Isr));
    }

    #[test]
    fn code_pointers_tolerate_the_thumb_bit() {
        let t = task();
        let (base, end) = t.text_range();
        assert!(code_ptr_in_text(&t, base as u32 | 1));
        assert!(code_ptr_in_text(&t, (base + 0x40) as u32));
        assert!(!code_ptr_in_text(&t, 0));
        assert!(!code_ptr_in_text(&t, end as u32));
        assert!(!code_ptr_in_text(&t, 0x2000_0001));
    }

    #[test]
    fn dma_grants_gate_by_direction() {
        let mut t = task();
        t.add_dma_shm(DmaShmDescriptor {
            target: TaskId(2),
            source: TaskId(3),
            address: 0x2000_4000,
            size: 0x200,
            access: DmaShmAccess::Write,
        })
        .unwrap();

        let in_grant = USlice::<u8>::from_raw(0x2000_4100, 0x100).unwrap();
        assert!(slice_in_dma_shm(&t, &in_grant, DmaShmAccess::Write));
        // Same bytes, wrong direction.
        assert!(!slice_in_dma_shm(&t, &in_grant, DmaShmAccess::Read));
        // Overrunning the grant.
        let too_long = USlice::<u8>::from_raw(0x2000_4100, 0x200).unwrap();
        assert!(!slice_in_dma_shm(&t, &too_long, DmaShmAccess::Write));
    }
}
