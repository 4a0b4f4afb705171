// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.
//!
//! A task owns two execution threads: the main thread, and an interrupt
//! thread used to run deferred interrupt handlers. Each thread has its own
//! saved context and its own scheduling state; the `mode` discriminator
//! records which of the two the task is currently presenting to the
//! scheduler. The two states are deliberately kept separate rather than
//! fused into one enum, because an interrupt can arrive while the main
//! thread is sleeping and both facts must remain observable.

use abi::{
    DmaShmDescriptor, IsrScheduling, Permissions, PerMode, SysError, TaskId, TaskState,
    ThreadMode, MAX_DEVS_PER_TASK, MAX_DMAS_PER_TASK, MAX_DMA_SHMS_PER_TASK, NUM_TASKS,
};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::descs::TaskDesc;
use crate::devices::DeviceId;
use crate::dma::DmaId;
use crate::ipc::{IpcSlot, RecvWait};
use crate::layout;
use crate::sanitize;
use crate::umem::USlice;

/// Whether a task is a user application or one of the two built-in kernel
/// threads (idle and the deferred-work thread).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskKind {
    User,
    Kernel,
}

/// Saved context of one thread of a task.
#[derive(Debug, Default)]
pub struct Context {
    /// Callee-saved machine state; the stacked exception frame lives at
    /// `save.psp`.
    pub save: crate::arch::SavedState,
    /// Device mapped for this thread, if any. For the interrupt thread this
    /// is the device whose interrupt is being served; for the main thread it
    /// is unused (mapping state lives in the device table).
    pub device: Option<DeviceId>,
    /// External interrupt being served (interrupt thread only).
    pub irq: u8,
    /// Main-thread impact requested by the interrupt being served
    /// (interrupt thread only).
    pub isr_sched: IsrScheduling,
}

impl Context {
    /// Compile-time zero context, letting the executive live in a static.
    pub const ZEROED: Context = Context {
        save: crate::arch::SavedState {
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            psp: 0,
            exc_return: 0,
        },
        device: None,
        irq: 0,
        isr_sched: IsrScheduling::Standard,
    };
}

/// Internal representation of a task.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    name: &'static str,
    kind: TaskKind,
    desc: Option<&'static TaskDesc>,
    /// Which thread the task presents to the scheduler.
    mode: ThreadMode,
    states: PerMode<TaskState>,
    pub(crate) ctx: PerMode<Context>,
    /// Half-open RAM slot range.
    ram: (usize, usize),
    /// Half-open text/rodata slot range.
    text: (usize, usize),
    init_done: bool,
    devices: [Option<DeviceId>; MAX_DEVS_PER_TASK],
    /// Devices currently occupying one of the two dynamic MPU windows.
    num_devs_mapped: u8,
    dmas: [Option<DmaId>; MAX_DMAS_PER_TASK],
    dma_shms: [Option<DmaShmDescriptor>; MAX_DMA_SHMS_PER_TASK],
    /// Per-sender IPC inboxes.
    pub(crate) ipc_in: [IpcSlot; NUM_TASKS],
    /// Parameters of a blocked receive, if one is parked.
    pub(crate) recv_wait: Option<RecvWait>,
    /// State to restore once a queued syscall has executed.
    pub(crate) svc_resume: TaskState,
}

impl Task {
    /// Compile-time empty slot; real tasks replace these at startup.
    pub const EMPTY: Task = Task {
        id: TaskId(0),
        name: "",
        kind: TaskKind::User,
        desc: None,
        mode: ThreadMode::Main,
        states: PerMode {
            main: TaskState::Empty,
            isr: TaskState::Empty,
        },
        ctx: PerMode {
            main: Context::ZEROED,
            isr: Context::ZEROED,
        },
        ram: (0, 0),
        text: (0, 0),
        init_done: false,
        devices: [None; MAX_DEVS_PER_TASK],
        num_devs_mapped: 0,
        dmas: [None; MAX_DMAS_PER_TASK],
        dma_shms: [None; MAX_DMA_SHMS_PER_TASK],
        ipc_in: [IpcSlot::EMPTY; NUM_TASKS],
        recv_wait: None,
        svc_resume: TaskState::Runnable,
    };

    /// Creates a user task from its layout descriptor. The task starts
    /// runnable: the init phase is ordinary code at the start of its main
    /// thread.
    pub fn from_descriptor(desc: &'static TaskDesc, id: TaskId) -> Self {
        uassert!(desc.slot >= 1);
        uassert!(desc.num_slots >= 1);
        uassert!(usize::from(desc.slot - 1 + desc.num_slots) <= layout::NUM_SLOTS);

        let mut t = Self::blank(id, desc.name, TaskKind::User);
        t.desc = Some(desc);
        let (rs, re) = layout::ram_slot_range(desc.slot, desc.num_slots);
        t.ram = (rs as usize, re as usize);
        let (ts, te) = layout::text_slot_range(desc.slot, desc.num_slots);
        t.text = (ts as usize, te as usize);
        t.states.main = TaskState::Runnable;
        t.states.isr = TaskState::Idle;
        t
    }

    /// Creates one of the built-in kernel threads.
    pub fn kernel_thread(id: TaskId, name: &'static str, runnable: bool) -> Self {
        let mut t = Self::blank(id, name, TaskKind::Kernel);
        t.states.main = if runnable {
            TaskState::Runnable
        } else {
            TaskState::Idle
        };
        t.states.isr = TaskState::Idle;
        t.init_done = true;
        t
    }

    /// Creates an unpopulated slot, never scheduled.
    pub fn unpopulated(id: TaskId) -> Self {
        Self::blank(id, "", TaskKind::User)
    }

    fn blank(id: TaskId, name: &'static str, kind: TaskKind) -> Self {
        Self {
            id,
            name,
            kind,
            desc: None,
            mode: ThreadMode::Main,
            states: PerMode {
                main: TaskState::Empty,
                isr: TaskState::Empty,
            },
            ctx: PerMode::default(),
            ram: (0, 0),
            text: (0, 0),
            init_done: false,
            devices: [None; MAX_DEVS_PER_TASK],
            num_devs_mapped: 0,
            dmas: [None; MAX_DMAS_PER_TASK],
            dma_shms: [None; MAX_DMA_SHMS_PER_TASK],
            ipc_in: [IpcSlot::EMPTY; NUM_TASKS],
            recv_wait: None,
            svc_resume: TaskState::Runnable,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn is_user(&self) -> bool {
        self.kind == TaskKind::User
    }

    /// Checks whether this slot holds a real task.
    pub fn is_populated(&self) -> bool {
        self.states.main != TaskState::Empty
    }

    pub fn descriptor(&self) -> Option<&'static TaskDesc> {
        self.desc
    }

    pub fn mode(&self) -> ThreadMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ThreadMode) {
        self.mode = mode;
    }

    pub fn state(&self, mode: ThreadMode) -> TaskState {
        *self.states.get(mode)
    }

    pub fn set_state(&mut self, mode: ThreadMode, state: TaskState) {
        *self.states.get_mut(mode) = state;
    }

    /// State of the thread the task currently presents to the scheduler.
    pub fn current_state(&self) -> TaskState {
        self.state(self.mode)
    }

    pub fn priority(&self) -> u8 {
        self.desc.map(|d| d.priority).unwrap_or(0)
    }

    pub fn domain(&self) -> u8 {
        self.desc.map(|d| d.domain).unwrap_or(0)
    }

    pub fn has_permission(&self, perm: Permissions) -> bool {
        self.desc
            .map(|d| d.permissions.contains(perm))
            .unwrap_or(false)
    }

    pub fn init_done(&self) -> bool {
        self.init_done
    }

    pub fn set_init_done(&mut self) {
        self.init_done = true;
    }

    pub fn ram_range(&self) -> (usize, usize) {
        self.ram
    }

    pub fn text_range(&self) -> (usize, usize) {
        self.text
    }

    /// Points the task's memory windows at arbitrary buffers, so host tests
    /// can exercise the validated access paths against real memory.
    #[cfg(test)]
    pub fn override_ranges(&mut self, ram: (usize, usize), text: (usize, usize)) {
        self.ram = ram;
        self.text = text;
    }

    /// Registers `dev` as owned by this task.
    pub fn add_device(&mut self, dev: DeviceId) -> Result<(), SysError> {
        let slot = self
            .devices
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(SysError::Busy)?;
        *slot = Some(dev);
        Ok(())
    }

    pub fn remove_device(&mut self, dev: DeviceId) {
        for slot in &mut self.devices {
            if *slot == Some(dev) {
                *slot = None;
            }
        }
    }

    pub fn owns_device(&self, dev: DeviceId) -> bool {
        self.devices.contains(&Some(dev))
    }

    pub fn devices(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.iter().filter_map(|d| *d)
    }

    /// Number of devices currently holding a dynamic MPU window.
    pub fn mapped_devices(&self) -> u8 {
        self.num_devs_mapped
    }

    /// Claims one of the two dynamic MPU windows. Fails when both are taken.
    pub fn take_map_slot(&mut self) -> Result<(), SysError> {
        if usize::from(self.num_devs_mapped) >= crate::mpm::FREE_REGIONS {
            return Err(SysError::Busy);
        }
        self.num_devs_mapped += 1;
        Ok(())
    }

    pub fn release_map_slot(&mut self) {
        uassert!(self.num_devs_mapped > 0);
        self.num_devs_mapped -= 1;
    }

    pub fn add_dma(&mut self, dma: DmaId) -> Result<(), SysError> {
        let slot = self
            .dmas
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(SysError::Busy)?;
        *slot = Some(dma);
        Ok(())
    }

    pub fn owns_dma(&self, dma: DmaId) -> bool {
        self.dmas.contains(&Some(dma))
    }

    pub fn dmas(&self) -> impl Iterator<Item = DmaId> + '_ {
        self.dmas.iter().filter_map(|d| *d)
    }

    /// Records a DMA shared-memory grant received by this task.
    pub fn add_dma_shm(&mut self, grant: DmaShmDescriptor) -> Result<(), SysError> {
        let slot = self
            .dma_shms
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(SysError::Busy)?;
        *slot = Some(grant);
        Ok(())
    }

    pub fn dma_shms(&self) -> impl Iterator<Item = &DmaShmDescriptor> + '_ {
        self.dma_shms.iter().filter_map(|g| g.as_ref())
    }

    /// Obtains validated read access to task memory. `mode` selects whose
    /// windows apply: the interrupt thread may also read the shared
    /// interrupt stack.
    pub fn try_read<'a, T>(
        &'a self,
        slice: &'a USlice<T>,
        mode: ThreadMode,
    ) -> Result<&'a [T], SysError>
    where
        T: FromBytes + Immutable + KnownLayout,
    {
        if sanitize::slice_anywhere(self, slice, mode) {
            // Safety: the slice has been checked against this task's memory
            // windows, which name real, task-owned normal memory.
            Ok(unsafe { slice.assume_readable() })
        } else {
            Err(SysError::Inval)
        }
    }

    /// Obtains validated write access to task memory.
    pub fn try_write<'a, T>(
        &'a mut self,
        slice: &'a mut USlice<T>,
        mode: ThreadMode,
    ) -> Result<&'a mut [T], SysError>
    where
        T: FromBytes + IntoBytes + Immutable + KnownLayout,
    {
        if sanitize::slice_in_ram(self, slice, mode) {
            // Safety: as in try_read, plus the windows checked here are
            // writable ones.
            Ok(unsafe { slice.assume_writable() })
        } else {
            Err(SysError::Inval)
        }
    }
}

/// Return value for operations that can have scheduling implications. This
/// is marked `must_use` because forgetting to act on a reschedule request
/// would leave a higher-urgency thread waiting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[must_use]
pub enum SchedHint {
    /// Keep running whatever was running.
    Same,
    /// An election is warranted.
    Reschedule,
}

impl SchedHint {
    pub fn combine(self, other: Self) -> Self {
        if self == SchedHint::Reschedule || other == SchedHint::Reschedule {
            SchedHint::Reschedule
        } else {
            SchedHint::Same
        }
    }
}

/// Gets `&mut` references to two distinct elements of a slice. Panics if
/// `a == b`.
pub fn pair_mut<T>(slice: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    uassert!(a != b);
    if a < b {
        let (lo, hi) = slice.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = slice.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descs::TaskDesc;

    static DESC: TaskDesc = TaskDesc {
        name: "pump",
        slot: 2,
        num_slots: 2,
        entry_point: 0x0809_0001,
        isr_entry: 0x0809_0101,
        priority: 3,
        stack_size: 4096,
        domain: 0,
        permissions: Permissions::DEV_BUSES,
    };

    #[test]
    fn descriptor_ranges_follow_slots() {
        let t = Task::from_descriptor(&DESC, TaskId(2));
        assert_eq!(
            t.ram_range(),
            (
                (layout::USER_RAM_BASE + layout::USER_RAM_SLOT_SIZE) as usize,
                (layout::USER_RAM_BASE + 3 * layout::USER_RAM_SLOT_SIZE) as usize,
            )
        );
        assert_eq!(
            t.text_range(),
            (
                (layout::USER_TEXT_BASE + layout::USER_TEXT_SLOT_SIZE) as usize,
                (layout::USER_TEXT_BASE + 3 * layout::USER_TEXT_SLOT_SIZE) as usize,
            )
        );
        assert_eq!(t.state(ThreadMode::Main), TaskState::Runnable);
        assert_eq!(t.state(ThreadMode::Isr), TaskState::Idle);
        assert!(t.has_permission(Permissions::DEV_BUSES));
        assert!(!t.has_permission(Permissions::DEV_DMA));
    }

    #[test]
    fn device_list_is_bounded() {
        let mut t = Task::from_descriptor(&DESC, TaskId(2));
        for i in 0..MAX_DEVS_PER_TASK {
            t.add_device(DeviceId(i as u8)).unwrap();
        }
        assert_eq!(t.add_device(DeviceId(9)), Err(SysError::Busy));
        t.remove_device(DeviceId(1));
        t.add_device(DeviceId(9)).unwrap();
        assert!(t.owns_device(DeviceId(9)));
        assert!(!t.owns_device(DeviceId(1)));
    }

    #[test]
    fn map_slots_cap_at_two() {
        let mut t = Task::from_descriptor(&DESC, TaskId(2));
        t.take_map_slot().unwrap();
        t.take_map_slot().unwrap();
        assert_eq!(t.take_map_slot(), Err(SysError::Busy));
        t.release_map_slot();
        t.take_map_slot().unwrap();
    }

    #[test]
    fn pair_mut_returns_both_orders() {
        let mut v = [10, 20, 30];
        let (a, b) = pair_mut(&mut v, 0, 2);
        assert_eq!((*a, *b), (10, 30));
        let (a, b) = pair_mut(&mut v, 2, 0);
        assert_eq!((*a, *b), (30, 10));
    }
}
