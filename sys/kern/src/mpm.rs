// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memory-protection manager.
//!
//! The protection unit has eight regions. Four are programmed once at boot
//! and never move:
//!
//! - R0: shared boot-information band, read-only, execute-never;
//! - R1: kernel text, privileged read, executable;
//! - R2: peripheral band, privileged read/write, execute-never, shareable;
//! - R3: kernel RAM and stacks, privileged read/write, execute-never.
//!
//! The remaining four are recomputed on every context switch:
//!
//! - R4: the whole user RAM band, unprivileged read/write, with the
//!   subregion-disable mask leaving only the elected task's slots open;
//! - R5: the whole user text band, unprivileged read-only executable,
//!   masked the same way;
//! - R6/R7: the two dynamic windows -- device mappings for a main thread,
//!   or the interrupt stack (R6) plus the serviced device (R7) for an
//!   interrupt thread.
//!
//! This module computes that dynamic half as plain data; the architecture
//! layer turns it into register writes. Keeping the computation pure keeps
//! it testable, and the rule that unused windows are *explicitly disabled*
//! -- rather than left holding a previous task's device -- is load-bearing
//! for isolation.

use abi::ThreadMode;

use crate::devices::DeviceTable;
use crate::layout;
use crate::task::{Task, TaskKind};

/// Number of dynamic device windows (R6 and R7).
pub const FREE_REGIONS: usize = 2;

/// Access class of a dynamic window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WindowKind {
    /// Unprivileged read/write device memory.
    DeviceRw,
    /// Unprivileged read-only device memory.
    DeviceRo,
    /// Unprivileged read/write normal memory for the interrupt stack.
    IsrStack,
}

/// One dynamic MPU window. A disabled window still occupies its region
/// number, overwriting whatever the previous task had there.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Window {
    pub enabled: bool,
    pub base: u32,
    pub size: u32,
    pub kind: WindowKind,
    /// Subregion-disable mask; bit i set disables the i-th eighth.
    pub srd: u8,
}

impl Window {
    const DISABLED: Self = Window {
        enabled: false,
        base: 0,
        size: 0,
        kind: WindowKind::DeviceRw,
        srd: 0,
    };
}

/// The recomputed-per-switch half of the MPU configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DynLayout {
    /// Whether the user bands (R4/R5) are open at all. False for the kernel
    /// threads, which run on the privileged default map.
    pub user_enabled: bool,
    /// Subregion-disable mask applied to both user bands.
    pub slot_srd: u8,
    /// R6 and R7, in that order.
    pub windows: [Window; FREE_REGIONS],
}

/// Computes the subregion-disable mask for a task owning `num_slots`
/// contiguous slots starting at 1-based `slot`: all eight bits set, minus
/// the owned slots.
pub fn slot_srd(slot: u8, num_slots: u8) -> u8 {
    let mut mask = 0xffu8;
    for i in 0..num_slots {
        mask &= !(1 << (slot - 1 + i));
    }
    mask
}

/// Computes the dynamic MPU layout for electing `task` in its current mode.
pub fn layout_for(task: &Task, devices: &DeviceTable) -> DynLayout {
    if task.kind() == TaskKind::Kernel || !task.is_populated() {
        // Kernel threads see only the privileged default map; close the
        // user bands and both windows.
        return DynLayout {
            user_enabled: false,
            slot_srd: 0xff,
            windows: [Window::DISABLED; FREE_REGIONS],
        };
    }

    let desc = match task.descriptor() {
        Some(d) => d,
        None => {
            return DynLayout {
                user_enabled: false,
                slot_srd: 0xff,
                windows: [Window::DISABLED; FREE_REGIONS],
            }
        }
    };

    let mut windows = [Window::DISABLED; FREE_REGIONS];

    match task.mode() {
        ThreadMode::Isr => {
            // R6: the interrupt stack window.
            windows[0] = Window {
                enabled: true,
                base: layout::ISR_STACK_BASE,
                size: layout::STACK_SIZE_ISR,
                kind: WindowKind::IsrStack,
                srd: 0,
            };
            // R7: the device whose interrupt is being served, if it has a
            // memory window.
            if let Some(dev_id) = task.ctx.isr.device {
                let dev = devices.get(dev_id);
                if dev.udev.size != 0 {
                    windows[1] = device_window(dev);
                }
            }
        }
        ThreadMode::Main => {
            let mut used = 0;
            for dev_id in task.devices() {
                if used == FREE_REGIONS {
                    break;
                }
                let dev = devices.get(dev_id);
                // A device occupies a window when it has memory and is
                // currently mapped: always for auto-mapped devices once the
                // task is live, and on request for voluntary ones.
                if dev.udev.size != 0 && dev.is_mapped {
                    windows[used] = device_window(dev);
                    used += 1;
                }
            }
        }
    }

    DynLayout {
        user_enabled: true,
        slot_srd: slot_srd(desc.slot, desc.num_slots),
        windows,
    }
}

fn device_window(dev: &crate::devices::KDevice) -> Window {
    let (ro, srd) = match dev.info {
        Some(info) => (info.ro, info.srd_mask),
        None => (false, 0),
    };
    Window {
        enabled: true,
        base: dev.udev.address,
        size: dev.udev.size,
        kind: if ro {
            WindowKind::DeviceRo
        } else {
            WindowKind::DeviceRw
        },
        srd,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_masks_open_exactly_the_owned_slots() {
        // One slot at position 1: only bit 0 cleared.
        assert_eq!(slot_srd(1, 1), 0xfe);
        // Two slots at position 3: bits 2 and 3 cleared.
        assert_eq!(slot_srd(3, 2), 0xf3);
        // The whole band.
        assert_eq!(slot_srd(1, 8), 0x00);
        // Last slot only.
        assert_eq!(slot_srd(8, 1), 0x7f);
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use crate::testutil::{self, A, B};
    use abi::MapMode;

    #[test]
    fn main_thread_layout_opens_only_the_owned_slots() {
        let k = testutil::kernel();
        let l = layout_for(&k.tasks[A.index()], &k.devices);
        assert!(l.user_enabled);
        assert_eq!(l.slot_srd, 0xfe); // slot 1
        assert!(!l.windows[0].enabled);
        assert!(!l.windows[1].enabled);

        let l = layout_for(&k.tasks[B.index()], &k.devices);
        assert_eq!(l.slot_srd, 0xfd); // slot 2
    }

    #[test]
    fn kernel_threads_run_on_the_privileged_default_map() {
        let k = testutil::kernel();
        let l = layout_for(&k.tasks[0], &k.devices);
        assert!(!l.user_enabled);
        assert!(l.windows.iter().all(|w| !w.enabled));
    }

    #[test]
    fn mapped_windows_follow_the_task_not_the_region() {
        let mut k = testutil::kernel();
        let mut d1 = testutil::dev_desc(0x4000_4400, 0x400); // usart2
        d1.map_mode = MapMode::Voluntary;
        let mut d2 = testutil::dev_desc(0x4000_5400, 0x400); // i2c1
        d2.map_mode = MapMode::Voluntary;
        let id1 = k.register_device(A, &d1).unwrap();
        let id2 = k.register_device(A, &d2).unwrap();
        k.tasks[A.index()].set_init_done();
        k.enable_task_devices(A);
        let _ = k.set_device_map(A, u32::from(id1.0), true).unwrap();
        let _ = k.set_device_map(A, u32::from(id2.0), true).unwrap();

        // While the owner runs, both windows are open over its devices.
        let l = layout_for(&k.tasks[A.index()], &k.devices);
        assert!(l.windows[0].enabled && l.windows[1].enabled);
        let bases = [l.windows[0].base, l.windows[1].base];
        assert!(bases.contains(&0x4000_4400) && bases.contains(&0x4000_5400));

        // While a deviceless task runs, both windows are explicitly
        // closed: nothing of the previous task may shine through.
        let l = layout_for(&k.tasks[B.index()], &k.devices);
        assert!(!l.windows[0].enabled);
        assert!(!l.windows[1].enabled);

        // Unmapping takes a window out of the owner's own layout too.
        let _ = k.set_device_map(A, u32::from(id2.0), false).unwrap();
        let l = layout_for(&k.tasks[A.index()], &k.devices);
        assert!(l.windows[0].enabled);
        assert!(!l.windows[1].enabled);
    }

    #[test]
    fn interrupt_thread_layout_maps_stack_and_serviced_device() {
        let mut k = testutil::kernel();
        let mut udev = testutil::dev_desc(0x4000_5400, 0x400);
        udev.irq_count = 1;
        udev.irqs[0] = testutil::blank_irq();
        udev.irqs[0].irq = 31;
        udev.irqs[0].handler = k.tasks[A.index()].text_range().0 as u32 + 0x101;
        let dev_id = k.register_device(A, &udev).unwrap();

        let t = &mut k.tasks[A.index()];
        t.set_mode(abi::ThreadMode::Isr);
        t.ctx.isr.device = Some(dev_id);

        let l = layout_for(&k.tasks[A.index()], &k.devices);
        assert_eq!(l.windows[0].kind, WindowKind::IsrStack);
        assert_eq!(l.windows[0].base, layout::ISR_STACK_BASE);
        assert_eq!(l.windows[0].size, layout::STACK_SIZE_ISR);
        assert_eq!(l.windows[1].kind, WindowKind::DeviceRw);
        assert_eq!(l.windows[1].base, 0x4000_5400);
    }
}
