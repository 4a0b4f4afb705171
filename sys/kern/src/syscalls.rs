// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Syscall decode and dispatch.
//!
//! Syscalls are *executed* here, in the deferred-work thread, under the
//! caller's identity -- the trap handler only queued a record. The caller's
//! saved frame supplies everything: r0 points at a four-word argument block
//! `[family | subcode << 8, a1, a2, a3]` on the caller's stack, and the
//! response code is written back into the frame's r0, where the caller
//! finds it when next scheduled.
//!
//! Implementations have the signature
//! `fn(&mut self, caller, ...) -> Result<SchedHint, SysError>`; this module
//! commits the outcome, so no implementation touches the frame for its
//! status. The one exception to immediate commit is a receive that blocks:
//! its response is written later, by the send that completes it.
//!
//! Structured arguments (device, stream and grant descriptors) arrive as
//! `ssmarshal`-encoded bytes in caller memory and are re-validated after
//! decoding; the encoding carries no authority.

use core::convert::TryFrom;

use abi::{
    CfgOp, DeviceDescriptor, DmaDescriptor, DmaReconf, DmaShmDescriptor, InitOp, IpcOp, LockOp,
    Permissions, SleepMode, SysError, Sysnum, TaskId, TaskState, ThreadMode, TickPrecision,
    LOG_MAX, STATUS_DONE,
};
use serde::de::DeserializeOwned;

use crate::arch;
use crate::err::SysOutcome;
use crate::kernel::Kernel;
use crate::soc;
use crate::task::{SchedHint, Task};
use crate::umem::USlice;

/// Ceiling on the encoded size of any descriptor a task may hand in.
const DESC_MAX: usize = 4096;

/// Writes a response code into r0 of a task's saved main-thread frame.
pub(crate) fn commit_result(task: &mut Task, code: u32) {
    // The frame sits on the task's own stack; r0 is its first word. A frame
    // we cannot write means the task's stack pointer left its memory, which
    // is a fault, not an error to report.
    let psp = task.ctx.main.save.psp;
    let committed = USlice::<u32>::from_raw(psp, 1)
        .ok()
        .and_then(|mut slice| {
            task.try_write(&mut slice, ThreadMode::Main)
                .ok()
                .map(|words| words[0] = code)
        })
        .is_some();
    if !committed {
        task.set_state(ThreadMode::Main, TaskState::Fault);
    }
}

/// Reads and decodes one descriptor out of caller memory.
fn read_descriptor<T: DeserializeOwned>(task: &Task, ptr: usize, len: usize) -> Result<T, SysError> {
    if len > DESC_MAX {
        return Err(SysError::Inval);
    }
    let slice = USlice::<u8>::from_raw(ptr, len)?;
    let bytes = task.try_read(&slice, ThreadMode::Main)?;
    // Safety note: deserialization validates nothing but the encoding;
    // every caller re-checks the decoded fields.
    let (value, _) = ssmarshal::deserialize(bytes).map_err(|_| SysError::Inval)?;
    Ok(value)
}

/// Writes one u32 result into caller memory.
fn write_u32(task: &mut Task, ptr: usize, value: u32) -> Result<(), SysError> {
    let mut slice = USlice::<u32>::from_raw(ptr, 1)?;
    task.try_write(&mut slice, ThreadMode::Main)?[0] = value;
    Ok(())
}

impl Kernel {
    /// Records the syscall trap of `caller` and queues it for execution.
    /// Runs in handler mode, from the trap path.
    pub fn svc_syscall_request(&mut self, caller: TaskId) -> Result<(), SysError> {
        let task = &mut self.tasks[caller.index()];
        task.svc_resume = task.state(ThreadMode::Main);
        task.set_state(ThreadMode::Main, TaskState::SvcBlocked);
        if let Err(e) = self.defer_syscall(caller) {
            // Queue full: undo the block and let the caller retry.
            let task = &mut self.tasks[caller.index()];
            let resume = task.svc_resume;
            task.set_state(ThreadMode::Main, resume);
            return Err(e);
        }
        Ok(())
    }

    /// Marks the end of a deferred interrupt handler. Runs in handler mode,
    /// from the trap path.
    pub fn svc_isr_exit(&mut self, caller: TaskId) {
        let task = &mut self.tasks[caller.index()];
        uassert!(task.mode() == ThreadMode::Isr);
        task.set_state(ThreadMode::Isr, TaskState::IsrDone);
        arch::pend_switch();
    }

    /// Executes one queued syscall under `caller`'s identity.
    pub fn execute_syscall(&mut self, caller: TaskId) {
        let idx = caller.index();
        uassert!(self.tasks[idx].is_populated());

        let outcome = self.decode_and_run(caller);

        let task = &mut self.tasks[idx];
        match outcome {
            Ok(hint) => {
                // A blocked receive gets its response later, from the
                // completing send.
                if task.state(ThreadMode::Main) != TaskState::IpcRecvBlocked {
                    commit_result(task, STATUS_DONE);
                }
                if hint == SchedHint::Reschedule {
                    arch::pend_switch();
                }
            }
            Err(e) => commit_result(task, e.code()),
        }

        // Release the caller unless the syscall parked it in some other
        // state (sleep, lock, receive...).
        let task = &mut self.tasks[idx];
        if task.state(ThreadMode::Main) == TaskState::SvcBlocked {
            let resume = task.svc_resume;
            task.set_state(ThreadMode::Main, resume);
        }
    }

    fn decode_and_run(&mut self, caller: TaskId) -> SysOutcome {
        let idx = caller.index();

        // Pull the argument block through the caller's saved frame.
        let (args, pc) = {
            let task = &self.tasks[idx];
            let frame_slice =
                USlice::<arch::ExceptionFrame>::from_raw(task.ctx.main.save.psp, 1)?;
            let frame = &task.try_read(&frame_slice, ThreadMode::Main)?[0];
            let block = USlice::<u32>::from_raw(frame.r0 as usize, 4)?;
            let words = task.try_read(&block, ThreadMode::Main)?;
            ([words[0], words[1], words[2], words[3]], frame.pc)
        };

        // The trap instruction's immediate must be the syscall one; any
        // other value reaching this queue is a confused or hostile caller.
        {
            let task = &self.tasks[idx];
            let imm_addr = ((pc & !1) as usize)
                .checked_sub(2)
                .ok_or(SysError::Inval)?;
            let imm_slice = USlice::<u8>::from_raw(imm_addr, 1)?;
            if task.try_read(&imm_slice, ThreadMode::Main)?[0] != 0 {
                return Err(SysError::Inval);
            }
        }

        let (family, sub) = abi::unpack_sysnum(args[0]).map_err(|_| SysError::Inval)?;
        // Arguments widen to pointer width here, once; value-typed
        // arguments are narrowed back by the individual syscalls.
        let (a1, a2, a3) = (args[1] as usize, args[2] as usize, args[3] as usize);

        match family {
            Sysnum::Yield => self.sys_yield(caller),
            Sysnum::Init => self.sys_init(caller, sub, a1, a2, a3),
            Sysnum::Ipc => self.sys_ipc(caller, sub, a1, a2, a3),
            Sysnum::Cfg => self.sys_cfg(caller, sub, a1, a2, a3),
            Sysnum::GetTick => self.sys_gettick(caller, sub, a1),
            Sysnum::Reset => self.sys_reset(caller),
            Sysnum::Sleep => self.sys_sleep(caller, sub, a1),
            Sysnum::Lock => self.sys_lock(caller, sub),
            Sysnum::GetRandom => self.sys_get_random(caller, a1, a2),
            Sysnum::Log => self.sys_log(caller, a1, a2),
        }
    }

    /// Relinquishes the processor until an external event arrives.
    fn sys_yield(&mut self, caller: TaskId) -> SysOutcome {
        self.tasks[caller.index()].set_state(ThreadMode::Main, TaskState::Idle);
        Ok(SchedHint::Reschedule)
    }

    fn sys_reset(&mut self, caller: TaskId) -> SysOutcome {
        if !self.tasks[caller.index()].has_permission(Permissions::TSK_RESET) {
            return Err(SysError::Denied);
        }
        arch::reset();
    }

    fn sys_sleep(&mut self, caller: TaskId, sub: u8, ms: u32) -> SysOutcome {
        let mode = SleepMode::try_from(sub).map_err(|_| SysError::Inval)?;
        self.sleep_task(caller, ms, mode)
    }

    fn sys_lock(&mut self, caller: TaskId, sub: u8) -> SysOutcome {
        let op = LockOp::try_from(sub).map_err(|_| SysError::Inval)?;
        let task = &mut self.tasks[caller.index()];
        match op {
            LockOp::Enter => {
                task.set_state(ThreadMode::Main, TaskState::Locked);
                Ok(SchedHint::Same)
            }
            LockOp::Exit => {
                task.set_state(ThreadMode::Main, TaskState::Runnable);
                Ok(SchedHint::Reschedule)
            }
        }
    }

    fn sys_init(&mut self, caller: TaskId, sub: u8, a1: usize, a2: usize, a3: usize) -> SysOutcome {
        let op = InitOp::try_from(sub).map_err(|_| SysError::Inval)?;
        let idx = caller.index();

        if op == InitOp::Done {
            if self.tasks[idx].init_done() {
                // The latch is one-way.
                return Err(SysError::Denied);
            }
            self.tasks[idx].set_init_done();
            self.enable_task_devices(caller);
            self.enable_task_dmas(caller);
            klog!("task {} init done", caller.0);
            return Ok(SchedHint::Reschedule);
        }

        // Registrations are init-phase only.
        if self.tasks[idx].init_done() {
            return Err(SysError::Denied);
        }

        match op {
            InitOp::DevAccess => {
                let udev: DeviceDescriptor = read_descriptor(&self.tasks[idx], a1, a2)?;
                let dev_id = self.register_device(caller, &udev)?;
                write_u32(&mut self.tasks[idx], a3, u32::from(dev_id.0))?;
                Ok(SchedHint::Same)
            }
            InitOp::Dma => {
                let udma: DmaDescriptor = read_descriptor(&self.tasks[idx], a1, a2)?;
                let dma_id = self.register_dma(caller, &udma)?;
                write_u32(&mut self.tasks[idx], a3, u32::from(dma_id.0))?;
                Ok(SchedHint::Same)
            }
            InitOp::DmaShm => {
                let grant: DmaShmDescriptor = read_descriptor(&self.tasks[idx], a1, a2)?;
                self.register_dma_shm(caller, grant)
            }
            InitOp::GetTaskId => {
                if a2 > 15 {
                    return Err(SysError::Inval);
                }
                let name_slice = USlice::<u8>::from_raw(a1, a2)?;
                let id = {
                    let task = &self.tasks[idx];
                    let name = task.try_read(&name_slice, ThreadMode::Main)?;
                    match self.task_by_name(name) {
                        // Peer lookup respects IPC domains.
                        Some(peer) if peer.domain() == task.domain() => peer.id(),
                        _ => return Err(SysError::Inval),
                    }
                };
                write_u32(&mut self.tasks[idx], a3, u32::from(id.0))?;
                Ok(SchedHint::Same)
            }
            InitOp::Done => unreachable!(),
        }
    }

    /// Records a DMA buffer grant with its target task.
    pub(crate) fn register_dma_shm(&mut self, caller: TaskId, grant: DmaShmDescriptor) -> SysOutcome {
        // The declared source must be the caller itself.
        if grant.source != caller {
            return Err(SysError::Inval);
        }
        let target = grant.target;
        if !target.is_user()
            || target == caller
            || !self.tasks[target.index()].is_populated()
            || self.tasks[target.index()].domain() != self.tasks[caller.index()].domain()
        {
            return Err(SysError::Inval);
        }
        // The granted bytes must be the caller's own RAM.
        if grant.size == 0 {
            return Err(SysError::Inval);
        }
        let buf = USlice::<u8>::from_raw32(grant.address, grant.size)?;
        if !crate::sanitize::slice_in_ram(&self.tasks[caller.index()], &buf, ThreadMode::Main) {
            return Err(SysError::Inval);
        }
        self.tasks[target.index()].add_dma_shm(grant)?;
        Ok(SchedHint::Same)
    }

    fn sys_ipc(&mut self, caller: TaskId, sub: u8, a1: usize, a2: usize, a3: usize) -> SysOutcome {
        let op = IpcOp::try_from(sub).map_err(|_| SysError::Inval)?;
        match op {
            IpcOp::SendSync => self.ipc_send(caller, a1 as u32, a2 as u32, a3, true),
            IpcOp::SendAsync => self.ipc_send(caller, a1 as u32, a2 as u32, a3, false),
            IpcOp::RecvSync => self.ipc_recv(caller, a1, a2, a3, true),
            IpcOp::RecvAsync => self.ipc_recv(caller, a1, a2, a3, false),
        }
    }

    fn sys_cfg(&mut self, caller: TaskId, sub: u8, a1: usize, a2: usize, a3: usize) -> SysOutcome {
        let op = CfgOp::try_from(sub).map_err(|_| SysError::Inval)?;
        let idx = caller.index();

        // The whole family operates on enabled resources; nothing here is
        // legal during the init phase.
        if !self.tasks[idx].init_done() {
            return Err(SysError::Denied);
        }

        match op {
            CfgOp::GpioSet => {
                let kref = abi::GpioRef(a1 as u8);
                if !self.gpios.task_owns(caller, kref) {
                    return Err(SysError::Denied);
                }
                soc::gpio_set(kref, a2 != 0);
                Ok(SchedHint::Same)
            }
            CfgOp::GpioGet => {
                let kref = abi::GpioRef(a1 as u8);
                if !self.gpios.task_owns(caller, kref) {
                    return Err(SysError::Denied);
                }
                let value = u32::from(soc::gpio_get(kref));
                write_u32(&mut self.tasks[idx], a2, value)?;
                Ok(SchedHint::Same)
            }
            CfgOp::GpioUnlockExti => {
                let kref = abi::GpioRef(a1 as u8);
                let dev_id = match self.gpios.owner_of(kref) {
                    Some((owner, dev)) if owner == caller => dev,
                    _ => return Err(SysError::Denied),
                };
                let trigger = self
                    .devices
                    .get(dev_id)
                    .gpio_descriptor(kref)
                    .map(|g| g.exti_trigger)
                    .ok_or(SysError::Inval)?;
                crate::exti::unlock(kref, trigger)?;
                Ok(SchedHint::Same)
            }
            CfgOp::DmaReconf => {
                let update: DmaDescriptor = read_descriptor(&self.tasks[idx], a1, a2)?;
                let mask = DmaReconf::from_bits_truncate(a3 as u8);
                if mask.is_empty() {
                    return Err(SysError::Inval);
                }
                self.reconf_dma(caller, (a3 >> 8) as u32, &update, mask, ThreadMode::Main)
            }
            CfgOp::DmaReload => self.reload_dma(caller, a1 as u32),
            CfgOp::DmaDisable => self.disable_dma(caller, a1 as u32),
            CfgOp::DevMap => self.set_device_map(caller, a1 as u32, true),
            CfgOp::DevUnmap => self.set_device_map(caller, a1 as u32, false),
            CfgOp::DevRelease => self.release_device(caller, a1 as u32),
        }
    }

    fn sys_gettick(&mut self, caller: TaskId, sub: u8, out_ptr: usize) -> SysOutcome {
        let prec = TickPrecision::try_from(sub).map_err(|_| SysError::Inval)?;
        if prec != TickPrecision::Milli
            && !self.tasks[caller.index()].has_permission(Permissions::TIM_CYCLES)
        {
            // High-resolution time is a side channel; it's opt-in.
            return Err(SysError::Denied);
        }
        let value = match prec {
            TickPrecision::Milli => arch::now().millis(),
            TickPrecision::Micro => arch::cycles64() / u64::from(arch::CLOCK_MHZ),
            TickPrecision::Cycle => arch::cycles64(),
        };
        let mut slice = USlice::<u64>::from_raw(out_ptr, 1)?;
        self.tasks[caller.index()].try_write(&mut slice, ThreadMode::Main)?[0] = value;
        Ok(SchedHint::Same)
    }

    fn sys_get_random(&mut self, caller: TaskId, buf_ptr: usize, len: usize) -> SysOutcome {
        if !self.tasks[caller.index()].has_permission(Permissions::TSK_RNG) {
            return Err(SysError::Denied);
        }
        if len == 0 {
            return Ok(SchedHint::Same);
        }
        if len > DESC_MAX {
            return Err(SysError::Inval);
        }
        let mut slice = USlice::<u8>::from_raw(buf_ptr, len)?;
        // Split the borrow: the destination lives in a task, the filter
        // state in the executive.
        let Kernel { tasks, rng, .. } = self;
        let buf = tasks[caller.index()].try_write(&mut slice, ThreadMode::Main)?;
        rng.fill_from(buf, soc::trng_word)
            .map_err(|_| SysError::Busy)?;
        Ok(SchedHint::Same)
    }

    fn sys_log(&mut self, caller: TaskId, buf_ptr: usize, len: usize) -> SysOutcome {
        if len > LOG_MAX {
            return Err(SysError::Inval);
        }
        let slice = USlice::<u8>::from_raw(buf_ptr, len)?;
        let task = &self.tasks[caller.index()];
        let bytes = task.try_read(&slice, ThreadMode::Main)?;
        match core::str::from_utf8(bytes) {
            Ok(msg) => klog!("[{}] {}", task.name(), msg),
            Err(_) => return Err(SysError::Inval),
        }
        Ok(SchedHint::Same)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;
    use crate::testutil::{self, A, C};

    const FRAME: usize = 0x800;
    const OUT: usize = 0x40;
    const DESC: usize = 0x400;

    #[test]
    fn yield_parks_the_caller() {
        let mut k = testutil::kernel();
        let hint = k.sys_yield(A).unwrap();
        assert_eq!(hint, SchedHint::Reschedule);
        assert_eq!(k.tasks[A.index()].state(ThreadMode::Main), TaskState::Idle);
    }

    #[test]
    fn lock_brackets_a_critical_section() {
        let mut k = testutil::kernel();
        let _ = k.sys_lock(A, abi::LockOp::Enter as u8).unwrap();
        assert_eq!(k.tasks[A.index()].state(ThreadMode::Main), TaskState::Locked);
        let _ = k.sys_lock(A, abi::LockOp::Exit as u8).unwrap();
        assert_eq!(
            k.tasks[A.index()].state(ThreadMode::Main),
            TaskState::Runnable
        );
        assert_eq!(k.sys_lock(A, 7), Err(SysError::Inval));
    }

    #[test]
    fn high_resolution_time_is_permission_gated() {
        let (mut k, mem) = testutil::hosted();
        let out = mem[0].ram_at(OUT);

        arch::test_advance_ticks(123);
        let _ = k.sys_gettick(A, abi::TickPrecision::Milli as u8, out).unwrap();
        assert_eq!(mem[0].get::<u64>(OUT), 123);

        let _ = k.sys_gettick(A, abi::TickPrecision::Cycle as u8, out).unwrap();
        assert_eq!(mem[0].get::<u64>(OUT), arch::cycles64());

        // The permissionless task only gets milliseconds.
        let out_c = mem[2].ram_at(OUT);
        let _ = k.sys_gettick(C, abi::TickPrecision::Milli as u8, out_c)
            .unwrap();
        assert_eq!(
            k.sys_gettick(C, abi::TickPrecision::Micro as u8, out_c),
            Err(SysError::Denied)
        );
    }

    #[test]
    fn random_fill_respects_length_and_permission() {
        let (mut k, mem) = testutil::hosted();
        let buf = mem[0].ram_at(0x100);

        // Zero length succeeds without touching the generator or memory.
        let _ = k.sys_get_random(A, buf, 0).unwrap();

        let _ = k.sys_get_random(A, buf, 7).unwrap();
        let filled = mem[0].get::<[u8; 7]>(0x100);
        assert_ne!(filled, [0; 7]);

        assert_eq!(
            k.sys_get_random(C, mem[2].ram_at(0x100), 4),
            Err(SysError::Denied)
        );
    }

    #[test]
    fn log_checks_length_and_encoding() {
        let (mut k, mem) = testutil::hosted();
        let at = mem[0].put(0x100, *b"hello from alpha");
        let _ = k.sys_log(A, at, 16).unwrap();
        assert_eq!(k.sys_log(A, at, LOG_MAX + 1), Err(SysError::Inval));

        let at = mem[0].put(0x140, [0xffu8, 0xfe]);
        assert_eq!(k.sys_log(A, at, 2), Err(SysError::Inval));
    }

    #[test]
    fn init_done_is_a_one_way_latch() {
        let (mut k, _mem) = testutil::hosted();
        let _ = k.sys_init(A, InitOp::Done as u8, 0, 0, 0).unwrap();
        assert!(k.tasks[A.index()].init_done());
        assert_eq!(
            k.sys_init(A, InitOp::Done as u8, 0, 0, 0),
            Err(SysError::Denied)
        );
        // Registrations are refused once the latch is set.
        assert_eq!(
            k.sys_init(A, InitOp::DevAccess as u8, 0, 0, 0),
            Err(SysError::Denied)
        );
    }

    #[test]
    fn device_registration_round_trips_through_the_wire_encoding() {
        let (mut k, mem) = testutil::hosted();
        let udev = testutil::dev_desc(0x4000_4400, 0x400);

        let mut encoded = [0u8; 2048];
        let len = ssmarshal::serialize(&mut encoded, &udev).unwrap();
        let at = mem[0].put(DESC, encoded);

        let _ = k.sys_init(A, InitOp::DevAccess as u8, at, len, mem[0].ram_at(OUT))
            .unwrap();
        let id = mem[0].get::<u32>(OUT);
        assert_eq!(k.devices.lookup(id).unwrap().task, A);

        // Garbage bytes decode to an error, not a panic.
        let at = mem[0].put(DESC, [0xffu8; 64]);
        assert_eq!(
            k.sys_init(A, InitOp::DevAccess as u8, at, 64, mem[0].ram_at(OUT)),
            Err(SysError::Inval)
        );
    }

    #[test]
    fn peer_lookup_respects_names_and_domains() {
        let (mut k, mem) = testutil::hosted();
        let name_at = mem[0].put(0x100, *b"beta");
        let _ = k.sys_init(A, InitOp::GetTaskId as u8, name_at, 4, mem[0].ram_at(OUT))
            .unwrap();
        assert_eq!(mem[0].get::<u32>(OUT), u32::from(testutil::B.0));

        // An unknown name fails...
        let bogus_at = mem[0].put(0x120, *b"nope");
        assert_eq!(
            k.sys_init(A, InitOp::GetTaskId as u8, bogus_at, 4, mem[0].ram_at(OUT)),
            Err(SysError::Inval)
        );
        // ...and so does a task in another domain.
        let gamma_at = mem[0].put(0x140, *b"gamma");
        assert_eq!(
            k.sys_init(A, InitOp::GetTaskId as u8, gamma_at, 5, mem[0].ram_at(OUT)),
            Err(SysError::Inval)
        );
    }

    #[test]
    fn cfg_family_requires_a_finished_init() {
        let mut k = testutil::kernel();
        assert_eq!(
            k.sys_cfg(A, CfgOp::GpioSet as u8, 0x13, 1, 0),
            Err(SysError::Denied)
        );
    }

    #[test]
    fn gpio_syscalls_check_pin_ownership() {
        let (mut k, mem) = testutil::hosted();
        let kref = abi::GpioRef::new(abi::gpio_port::PB, 6);
        let mut udev = testutil::dev_desc(0, 0);
        udev.gpio_count = 1;
        udev.gpios[0] = testutil::blank_gpio();
        udev.gpios[0].kref = kref;
        udev.gpios[0].mode = abi::GpioMode::Output;
        k.register_device(A, &udev).unwrap();
        k.tasks[A.index()].set_init_done();
        k.tasks[C.index()].set_init_done();

        let _ = k.sys_cfg(A, CfgOp::GpioSet as u8, usize::from(kref.0), 1, 0)
            .unwrap();
        let out = mem[0].ram_at(OUT);
        let _ = k.sys_cfg(A, CfgOp::GpioGet as u8, usize::from(kref.0), out, 0)
            .unwrap();
        assert_eq!(mem[0].get::<u32>(OUT), 1);

        // Another task poking the same pin is refused.
        assert_eq!(
            k.sys_cfg(C, CfgOp::GpioSet as u8, usize::from(kref.0), 0, 0),
            Err(SysError::Denied)
        );
    }

    #[test]
    fn committed_results_land_in_the_saved_frame() {
        let (mut k, mem) = testutil::hosted();
        mem[0].put(FRAME, arch::ExceptionFrame::default());
        k.tasks[A.index()].ctx.main.save.psp = mem[0].ram_at(FRAME);

        commit_result(&mut k.tasks[A.index()], SysError::Busy.code());
        assert_eq!(
            mem[0].get::<arch::ExceptionFrame>(FRAME).r0,
            SysError::Busy.code()
        );

        // A frame outside the task's memory parks the task in fault state
        // instead of writing who-knows-where.
        k.tasks[A.index()].ctx.main.save.psp = 0x10;
        commit_result(&mut k.tasks[A.index()], STATUS_DONE);
        assert_eq!(k.tasks[A.index()].state(ThreadMode::Main), TaskState::Fault);
    }
}
