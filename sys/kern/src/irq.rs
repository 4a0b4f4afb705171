// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! External interrupt dispatch.
//!
//! Every external interrupt vectors into the common default handler in the
//! architecture layer, which ends up in [`dispatch_external`] with the
//! external interrupt number. The cell table decides what happens next:
//!
//! - a kernel-owned cell runs its handler right there in handler mode (the
//!   external-interrupt-controller dispatcher is the main customer);
//! - a user-owned cell runs the quiet-down path: posthook (or DMA status
//!   capture and acknowledge), clear the pending bit, and push a deferred
//!   record for the owner's interrupt thread;
//! - an empty cell means an interrupt nobody enabled fired, which is an
//!   invariant breach, not an error to shrug at.

use abi::TaskId;

use crate::arch;
use crate::devices::DeviceId;
use crate::dma::{self, DmaId};
use crate::kernel::Kernel;
use crate::posthook;
use crate::soc::devmap::NUM_IRQS;
use crate::softirq::IsrEntry;

/// What a user-owned interrupt is attached to, which determines how it is
/// quieted in handler mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IrqSource {
    /// A memory-mapped device; quieted by its registered posthook.
    Device(DeviceId),
    /// A DMA stream; the kernel captures and clears the stream status.
    Dma(DmaId),
}

/// Routing decision for one interrupt line.
#[derive(Copy, Clone)]
pub enum IrqHandler {
    /// Kernel-internal service routine, run inline on the handler-mode
    /// stack.
    Kernel(fn(&mut Kernel, u8)),
    /// Deferred to the owning task's interrupt thread. `handler` is the
    /// userland function eventually run there.
    User {
        task: TaskId,
        handler: u32,
        source: IrqSource,
    },
}

impl core::fmt::Debug for IrqHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Kernel(_) => f.write_str("Kernel(..)"),
            Self::User {
                task,
                handler,
                source,
            } => f
                .debug_struct("User")
                .field("task", task)
                .field("handler", handler)
                .field("source", source)
                .finish(),
        }
    }
}

/// One interrupt line's routing state.
#[derive(Copy, Clone, Debug)]
pub struct IrqCell {
    pub handler: IrqHandler,
    /// Number of times this line has fired since installation.
    pub count: u32,
}

/// Routing table for all external interrupt lines.
pub struct IrqTable {
    cells: [Option<IrqCell>; NUM_IRQS],
}

impl IrqTable {
    pub const fn new() -> Self {
        Self {
            cells: [None; NUM_IRQS],
        }
    }

    /// Installs a routing for `irq`. An already-routed line is refused,
    /// which is what keeps one interrupt bound to at most one task.
    pub fn install(&mut self, irq: u8, handler: IrqHandler) -> Result<(), abi::SysError> {
        let cell = self
            .cells
            .get_mut(usize::from(irq))
            .ok_or(abi::SysError::Inval)?;
        if cell.is_some() {
            return Err(abi::SysError::Busy);
        }
        *cell = Some(IrqCell { handler, count: 0 });
        Ok(())
    }

    /// Removes the routing for `irq`.
    pub fn clear(&mut self, irq: u8) {
        if let Some(cell) = self.cells.get_mut(usize::from(irq)) {
            *cell = None;
        }
    }

    pub fn is_used(&self, irq: u8) -> bool {
        self.cells
            .get(usize::from(irq))
            .map(|c| c.is_some())
            .unwrap_or(false)
    }

    pub fn get(&self, irq: u8) -> Option<&IrqCell> {
        self.cells.get(usize::from(irq)).and_then(|c| c.as_ref())
    }

    /// Replaces the userland handler of an already-routed user line,
    /// keeping owner and source. Used when a task reconfigures a DMA
    /// stream's handlers.
    pub fn rebind_user_handler(&mut self, irq: u8, new_handler: u32) {
        if let Some(Some(cell)) = self.cells.get_mut(usize::from(irq)) {
            if let IrqHandler::User { handler, .. } = &mut cell.handler {
                *handler = new_handler;
            }
        }
    }

    fn note_fired(&mut self, irq: u8) {
        if let Some(Some(cell)) = self.cells.get_mut(usize::from(irq)) {
            cell.count = cell.count.wrapping_add(1);
        }
    }
}

/// Handler-mode entry point for every external interrupt.
pub fn dispatch_external(k: &mut Kernel, irq: u8) {
    let cell = match k.irqs.get(irq) {
        Some(c) => *c,
        None => panic!("unhandled IRQ {irq}"),
    };
    k.irqs.note_fired(irq);

    match cell.handler {
        IrqHandler::Kernel(f) => f(k, irq),
        IrqHandler::User {
            task,
            handler,
            source,
        } => {
            // Quiet the source before deferring, or it will burst.
            let (status, data) = match source {
                IrqSource::Dma(id) => (dma::status_and_ack(k, id), 0),
                IrqSource::Device(dev_id) => {
                    let dev = k.devices.get(dev_id);
                    match dev.irq_descriptor(irq) {
                        Some(irq_desc) => {
                            // Safety: the device window was validated against
                            // the SoC map at registration, and the posthook
                            // offsets against the window.
                            let mut bank = unsafe { posthook::MmioBank::new(dev.udev.address) };
                            posthook::execute(&irq_desc.posthook, &mut bank)
                        }
                        None => (0, 0),
                    }
                }
            };

            arch::clear_pending_irq(irq);

            k.defer_isr(IsrEntry {
                task,
                irq,
                handler,
                status,
                data,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_owner_per_line() {
        let mut t = IrqTable::new();
        t.install(
            31,
            IrqHandler::User {
                task: TaskId(2),
                handler: 0x0809_0101,
                source: IrqSource::Device(DeviceId(0)),
            },
        )
        .unwrap();
        let err = t.install(
            31,
            IrqHandler::User {
                task: TaskId(3),
                handler: 0x080a_0101,
                source: IrqSource::Device(DeviceId(1)),
            },
        );
        assert_eq!(err, Err(abi::SysError::Busy));

        t.clear(31);
        assert!(!t.is_used(31));
        t.install(
            31,
            IrqHandler::User {
                task: TaskId(3),
                handler: 0x080a_0101,
                source: IrqSource::Device(DeviceId(1)),
            },
        )
        .unwrap();
    }

    #[test]
    fn out_of_range_line_is_invalid() {
        let mut t = IrqTable::new();
        assert_eq!(
            t.install(200, IrqHandler::Kernel(|_, _| ())),
            Err(abi::SysError::Inval)
        );
        assert!(!t.is_used(200));
    }

    #[test]
    fn rebind_only_touches_the_handler() {
        let mut t = IrqTable::new();
        t.install(
            17,
            IrqHandler::User {
                task: TaskId(2),
                handler: 0x0809_0101,
                source: IrqSource::Dma(DmaId(0)),
            },
        )
        .unwrap();
        t.rebind_user_handler(17, 0x0809_0201);
        match t.get(17).unwrap().handler {
            IrqHandler::User { task, handler, .. } => {
                assert_eq!(task, TaskId(2));
                assert_eq!(handler, 0x0809_0201);
            }
            _ => panic!("cell changed shape"),
        }
    }
}

#[cfg(test)]
mod dispatch_tests {
    use super::*;
    use crate::testutil::{self, A};
    use abi::{TaskState, ThreadMode};
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn kernel_cells_run_inline() {
        static LAST: AtomicU32 = AtomicU32::new(0);
        fn service(_k: &mut crate::kernel::Kernel, irq: u8) {
            LAST.store(u32::from(irq) | 0x100, Ordering::Relaxed);
        }

        let mut k = testutil::kernel();
        k.irqs.install(42, IrqHandler::Kernel(service)).unwrap();
        dispatch_external(&mut k, 42);
        assert_eq!(LAST.load(Ordering::Relaxed), 0x100 | 42);
        assert_eq!(k.irqs.get(42).unwrap().count, 1);
        // No deferred record for kernel service routines.
        assert!(k.pop_isr_entry().is_none());
    }

    #[test]
    fn user_cells_defer_to_the_owner() {
        let mut k = testutil::kernel();
        // A windowless device with an empty posthook keeps handler mode
        // free of register traffic.
        let handler = k.tasks[A.index()].text_range().0 as u32 + 0x101;
        let mut udev = testutil::dev_desc(0, 0);
        udev.irq_count = 1;
        udev.irqs[0] = testutil::blank_irq();
        udev.irqs[0].irq = 61;
        udev.irqs[0].handler = handler;
        k.register_device(A, &udev).unwrap();

        dispatch_external(&mut k, 60);

        let entry = k.pop_isr_entry().expect("interrupt was not deferred");
        assert_eq!(entry.task, A);
        assert_eq!(entry.handler, handler);
        assert_eq!(
            k.tasks[TaskId::SOFTIRQ.index()].state(ThreadMode::Main),
            TaskState::Runnable
        );
    }

    #[test]
    fn dma_cells_carry_the_stream_status() {
        let mut k = testutil::kernel();
        let buf = k.tasks[A.index()].ram_range().0 as u32 + 0x400;
        let udma = testutil::dma_desc(&k.tasks[A.index()], 1, 6, buf, 64);
        k.register_dma(A, &udma).unwrap();

        let irq = crate::soc::devmap::dma_stream_irq(1, 6).unwrap();
        dispatch_external(&mut k, irq);
        let entry = k.pop_isr_entry().unwrap();
        assert_eq!(entry.task, A);
        // The stand-in SoC reports transfer-complete.
        assert_eq!(entry.status, abi::dma_status::TRANSFER_COMPLETE);
    }

    #[test]
    #[should_panic(expected = "unhandled IRQ")]
    fn unrouted_interrupts_are_fatal() {
        let mut k = testutil::kernel();
        dispatch_external(&mut k, 89);
    }
}
