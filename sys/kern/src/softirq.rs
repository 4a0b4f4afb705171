// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The deferred-work kernel thread and its queues.
//!
//! Handler-mode code does as little as possible: it quiets the interrupt
//! source and pushes a record into one of two rings, then asks for a
//! reschedule. This cooperative kernel thread drains them, with the
//! interrupt ring strictly before the syscall ring in each pass:
//!
//! - an interrupt record becomes an initial frame on the shared interrupt
//!   stack and flips the owner into interrupt mode, ready for election;
//! - a syscall record is decoded from the caller's saved frame and executed
//!   under the caller's identity.
//!
//! Pushes happen in handler mode, pops in thread mode; interrupts are
//! masked only around the index updates. The thread parks itself (state
//! `Idle`) when both rings are empty and is made runnable again by the next
//! push.

use abi::{IsrScheduling, TaskId, TaskState, ThreadMode};
use softring::SoftRing;

use crate::arch;
use crate::irq::{IrqHandler, IrqSource};
use crate::kernel::Kernel;

/// Depth of each ring.
pub const QUEUE_DEPTH: usize = 16;

/// A deferred user interrupt: everything needed to run `handler` in the
/// owner's interrupt thread.
#[derive(Copy, Clone, Debug)]
pub struct IsrEntry {
    pub task: TaskId,
    /// External interrupt number (or the controller interrupt, for
    /// edge-routed GPIO events).
    pub irq: u8,
    /// Userland handler address.
    pub handler: u32,
    /// Captured status/data register values, surfaced as handler
    /// arguments.
    pub status: u32,
    pub data: u32,
}

/// A queued syscall; everything else is read from the caller's saved
/// frame.
#[derive(Copy, Clone, Debug)]
pub struct SyscallEntry {
    pub task: TaskId,
}

/// The two rings plus the wipe-tracking for the shared interrupt stack.
pub struct SoftirqQueues {
    isr_q: SoftRing<IsrEntry, QUEUE_DEPTH>,
    sys_q: SoftRing<SyscallEntry, QUEUE_DEPTH>,
    /// Owner of the most recent interrupt frame; the stack is wiped when it
    /// changes hands.
    prev_isr_owner: TaskId,
}

impl SoftirqQueues {
    pub const fn new() -> Self {
        Self {
            isr_q: SoftRing::new(),
            sys_q: SoftRing::new(),
            prev_isr_owner: TaskId::UNUSED,
        }
    }
}

impl Kernel {
    /// Handler-mode push of a deferred interrupt. Losing one would strand a
    /// device, so a full ring is fatal.
    pub fn defer_isr(&mut self, entry: IsrEntry) {
        if self.softirq.isr_q.push(entry).is_err() {
            panic!("deferred interrupt ring overflow");
        }
        self.wake_softirq_thread();
    }

    /// Handler-mode push of a syscall. A full ring reports `Busy` to the
    /// caller, who retries.
    pub fn defer_syscall(&mut self, caller: TaskId) -> Result<(), abi::SysError> {
        self.softirq
            .sys_q
            .push(SyscallEntry { task: caller })
            .map_err(|_| abi::SysError::Busy)?;
        self.wake_softirq_thread();
        Ok(())
    }

    fn wake_softirq_thread(&mut self) {
        self.tasks[TaskId::SOFTIRQ.index()].set_state(ThreadMode::Main, TaskState::Runnable);
        arch::pend_switch();
    }

    pub fn softirq_queues_empty(&self) -> bool {
        self.softirq.isr_q.is_empty() && self.softirq.sys_q.is_empty()
    }

    /// Parks the deferred-work thread; the next push wakes it.
    pub fn park_softirq_thread(&mut self) {
        self.tasks[TaskId::SOFTIRQ.index()].set_state(ThreadMode::Main, TaskState::Idle);
    }

    pub(crate) fn pop_isr_entry(&mut self) -> Option<IsrEntry> {
        self.softirq.isr_q.pop()
    }

    pub(crate) fn pop_syscall_entry(&mut self) -> Option<SyscallEntry> {
        self.softirq.sys_q.pop()
    }

    /// Prepares the owner of `entry` to run its deferred handler: builds
    /// the initial frame on the shared interrupt stack and makes the
    /// interrupt thread runnable.
    ///
    /// An owner that is locked or in deep sleep cannot take the handler
    /// yet; the record goes back on the ring, captured registers intact,
    /// for a later pass.
    pub fn process_isr_entry(&mut self, entry: IsrEntry) {
        let owner_idx = entry.task.index();
        uassert!(self.tasks[owner_idx].is_populated());

        match self.tasks[owner_idx].state(ThreadMode::Main) {
            TaskState::Locked | TaskState::SleepingDeep => {
                if self.softirq.isr_q.push(entry).is_err() {
                    panic!("deferred interrupt ring overflow");
                }
                return;
            }
            _ => {}
        }

        let (stack_base, stack_top) = arch::isr_stack();

        // The stack is shared by every task's interrupt thread; wipe it
        // when ownership changes so nothing leaks between tasks.
        if self.softirq.prev_isr_owner != entry.task {
            // Safety: the range names the kernel's interrupt stack, which
            // is not in use -- no interrupt thread is runnable while this
            // thread runs.
            unsafe {
                core::ptr::write_bytes(stack_base as *mut u8, 0, stack_top - stack_base);
            }
            self.softirq.prev_isr_owner = entry.task;
        }

        // Resolve the serviced device (for the MPU window) and the
        // scheduling mode of this particular interrupt.
        let (device, isr_sched) = match self.irqs.get(entry.irq).map(|c| c.handler) {
            Some(IrqHandler::User {
                source: IrqSource::Device(dev_id),
                ..
            }) => {
                let mode = self
                    .devices
                    .get(dev_id)
                    .irq_descriptor(entry.irq)
                    .map(|d| d.mode)
                    .unwrap_or(IsrScheduling::Standard);
                (Some(dev_id), mode)
            }
            // DMA streams and edge-routed GPIO events map no device
            // window.
            _ => (None, IsrScheduling::Standard),
        };

        let task = &mut self.tasks[owner_idx];
        let desc = task
            .descriptor()
            .unwrap_or_else(|| panic!("deferred interrupt for kernel task"));

        // The userland trampoline receives the handler address, the
        // interrupt number, and the captured status/data words.
        let psp = arch::build_initial_frame(
            stack_top,
            desc.isr_entry,
            [entry.handler, u32::from(entry.irq), entry.status, entry.data],
        );

        task.ctx.isr.save = arch::SavedState::at_frame(psp);
        task.ctx.isr.device = device;
        task.ctx.isr.irq = entry.irq;
        task.ctx.isr.isr_sched = isr_sched;
        task.set_mode(ThreadMode::Isr);
        task.set_state(ThreadMode::Isr, TaskState::Runnable);

        if self.config.isr_reactivity {
            arch::pend_switch();
        }
    }

    /// One full drain pass; returns once both rings are empty.
    pub fn softirq_pass(&mut self) {
        // Interrupt records first: handlers are latency-sensitive,
        // syscalls are not.
        loop {
            let entry = arch::with_irqs_masked(|| self.pop_isr_entry());
            match entry {
                Some(e) => arch::with_irqs_masked(|| self.process_isr_entry(e)),
                None => break,
            }
        }

        loop {
            let entry = arch::with_irqs_masked(|| self.pop_syscall_entry());
            match entry {
                Some(e) => self.execute_syscall(e.task),
                None => break,
            }
        }
    }
}

/// Body of the deferred-work thread. Runs privileged, in thread mode, on
/// its own stack; never returns.
pub fn softirq_main() -> ! {
    klog!("softirq thread up");
    loop {
        // Safety: this thread and handler-mode code are the only users of
        // the kernel pointer, and the pushes that can interleave with this
        // borrow touch only the rings, guarded by the masked sections
        // inside.
        unsafe {
            arch::with_kernel(|k| {
                k.softirq_pass();
                arch::with_irqs_masked(|| {
                    if k.softirq_queues_empty() {
                        k.park_softirq_thread();
                        arch::pend_switch();
                    }
                });
            });
        }
        // The requested switch preempts this loop here; execution resumes
        // at the top once the thread is elected again.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, A, B};
    use abi::SysError;

    fn queued_isr(k: &mut Kernel, task: TaskId, irq: u8) -> IsrEntry {
        let handler = k.tasks[task.index()].text_range().0 as u32 + 0x101;
        let entry = IsrEntry {
            task,
            irq,
            handler,
            status: 0xaa55_0001,
            data: 0x0000_beef,
        };
        k.defer_isr(entry);
        entry
    }

    #[test]
    fn deferring_wakes_the_worker_thread() {
        let mut k = testutil::kernel();
        let _ = crate::arch::test_take_pend();

        queued_isr(&mut k, A, 31);
        assert_eq!(
            k.tasks[TaskId::SOFTIRQ.index()].state(ThreadMode::Main),
            TaskState::Runnable
        );
        assert!(crate::arch::test_take_pend());
        assert!(!k.softirq_queues_empty());
    }

    #[test]
    fn deferred_handler_becomes_a_runnable_interrupt_thread() {
        let mut k = testutil::kernel();
        // Route the line to a registered device so the frame build can
        // resolve it; an empty posthook keeps handler-mode quiet.
        let mut udev = testutil::dev_desc(0x4000_5400, 0x400);
        udev.irq_count = 1;
        udev.irqs[0] = testutil::blank_irq();
        udev.irqs[0].irq = 31;
        udev.irqs[0].handler = k.tasks[A.index()].text_range().0 as u32 + 0x101;
        let dev_id = k.register_device(A, &udev).unwrap();

        let entry = queued_isr(&mut k, A, 31);
        let entry = {
            let popped = k.pop_isr_entry().unwrap();
            assert_eq!(popped.irq, entry.irq);
            popped
        };
        k.process_isr_entry(entry);

        let t = &k.tasks[A.index()];
        assert_eq!(t.mode(), ThreadMode::Isr);
        assert_eq!(t.state(ThreadMode::Isr), TaskState::Runnable);
        assert_eq!(t.ctx.isr.irq, 31);
        assert_eq!(t.ctx.isr.device, Some(dev_id));

        // The initial frame sits on the interrupt stack and carries the
        // handler, interrupt number and captured registers as arguments.
        let (base, top) = crate::arch::isr_stack();
        let psp = t.ctx.isr.save.psp;
        assert!(psp >= base && psp < top);
        let frame = unsafe { &*(psp as *const crate::arch::ExceptionFrame) };
        assert_eq!(frame.r0, entry.handler);
        assert_eq!(frame.r1, 31);
        assert_eq!(frame.r2, 0xaa55_0001);
        assert_eq!(frame.r3, 0x0000_beef);
        assert_eq!(frame.pc & !1, k.tasks[A.index()].descriptor().unwrap().isr_entry & !1);
    }

    #[test]
    fn locked_owners_get_their_handler_later() {
        let mut k = testutil::kernel();
        k.tasks[A.index()].set_state(ThreadMode::Main, TaskState::Locked);

        let entry = queued_isr(&mut k, A, 40);
        let entry = k.pop_isr_entry().unwrap();
        k.process_isr_entry(entry);

        // Not taken: the record went back on the ring with its captured
        // registers intact.
        assert_eq!(k.tasks[A.index()].mode(), ThreadMode::Main);
        let requeued = k.pop_isr_entry().unwrap();
        assert_eq!(requeued.status, 0xaa55_0001);
        assert_eq!(requeued.data, 0x0000_beef);
    }

    #[test]
    fn interrupt_stack_is_wiped_between_owners() {
        let mut k = testutil::kernel();
        let (base, _) = crate::arch::isr_stack();

        let entry = IsrEntry {
            task: A,
            irq: 50,
            handler: k.tasks[A.index()].text_range().0 as u32 + 0x101,
            status: 0,
            data: 0,
        };
        k.defer_isr(entry);
        let e = k.pop_isr_entry().unwrap();
        k.process_isr_entry(e);

        // Plant a leftover and run a handler for the same owner: the stack
        // is not wiped.
        unsafe { core::ptr::write(base as *mut u32, 0x5eed_5eed) };
        k.defer_isr(entry);
        let e = k.pop_isr_entry().unwrap();
        k.process_isr_entry(e);
        assert_eq!(unsafe { core::ptr::read(base as *const u32) }, 0x5eed_5eed);

        // A different owner gets a clean stack.
        let entry_b = IsrEntry {
            task: B,
            irq: 50,
            handler: k.tasks[B.index()].text_range().0 as u32 + 0x101,
            status: 0,
            data: 0,
        };
        k.defer_isr(entry_b);
        let e = k.pop_isr_entry().unwrap();
        k.process_isr_entry(e);
        assert_eq!(unsafe { core::ptr::read(base as *const u32) }, 0);
    }

    #[test]
    fn full_syscall_ring_reports_busy() {
        let mut k = testutil::kernel();
        for _ in 0..QUEUE_DEPTH {
            k.defer_syscall(A).unwrap();
        }
        assert_eq!(k.defer_syscall(A), Err(SysError::Busy));
    }

    #[test]
    fn syscall_trap_blocks_and_releases_on_full_queue() {
        let mut k = testutil::kernel();
        assert!(k.svc_syscall_request(A).is_ok());
        assert_eq!(
            k.tasks[A.index()].state(ThreadMode::Main),
            TaskState::SvcBlocked
        );

        // Fill the rest, then overflow: the victim's state is restored so
        // it can retry.
        for _ in 1..QUEUE_DEPTH {
            k.defer_syscall(B).unwrap();
        }
        assert_eq!(k.svc_syscall_request(B), Err(SysError::Busy));
        assert_eq!(
            k.tasks[B.index()].state(ThreadMode::Main),
            TaskState::Runnable
        );
    }
}
