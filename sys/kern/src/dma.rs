// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DMA stream arbitration.
//!
//! DMA is the sharpest tool a task can ask for: a misprogrammed stream
//! writes anywhere. The arbiter therefore owns all stream state. Tasks
//! declare a stream during init and may rewrite selected fields later, but
//! every buffer address is checked against the caller's own memory or a
//! DMA shared-memory grant, every handler against the caller's text, and a
//! (controller, stream) pair belongs to at most one task -- channels
//! multiplex onto streams in the hardware, so two tasks on different
//! channels of one stream would still trample each other.
//!
//! A stream is programmed as its fields arrive but stays disabled until
//! everything its direction requires is present; only then does it advance
//! from `Initialized` to `Configured` and get its enable bit.

use abi::{
    DmaDescriptor, DmaDirection, DmaReconf, DmaShmAccess, SysError, TaskId, ThreadMode,
};

use crate::arch;
use crate::irq::{IrqHandler, IrqSource};
use crate::kernel::Kernel;
use crate::sanitize;
use crate::soc;
use crate::soc::devmap;
use crate::task::{SchedHint, Task};
use crate::umem::USlice;

/// Index into the kernel DMA table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct DmaId(pub u8);

/// Total stream slots across all tasks.
pub const MAX_DMA_STREAMS: usize = 8;

pub const NUM_CONTROLLERS: u8 = 2;
pub const NUM_STREAMS: u8 = 8;
pub const NUM_CHANNELS: u8 = 8;

/// Lifecycle of a registered stream.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DmaState {
    /// Declared; some required field still missing, stream disabled.
    Initialized,
    /// Fully specified; stream may be enabled.
    Configured,
}

/// Kernel-side record of a registered stream.
#[derive(Debug)]
pub struct KDma {
    pub udma: DmaDescriptor,
    pub task: TaskId,
    pub state: DmaState,
}

/// The kernel DMA table.
pub struct DmaTable {
    slots: [Option<KDma>; MAX_DMA_STREAMS],
}

impl DmaTable {
    pub const fn new() -> Self {
        const VACANT: Option<KDma> = None;
        Self {
            slots: [VACANT; MAX_DMA_STREAMS],
        }
    }

    pub fn get(&self, id: DmaId) -> &KDma {
        self.slots[usize::from(id.0)]
            .as_ref()
            .unwrap_or_else(|| panic!("dangling dma id {}", id.0))
    }

    pub fn get_mut(&mut self, id: DmaId) -> &mut KDma {
        self.slots[usize::from(id.0)]
            .as_mut()
            .unwrap_or_else(|| panic!("dangling dma id {}", id.0))
    }

    /// Looks up a stream id provided by a (not trusted) task.
    pub fn lookup(&self, raw: u32) -> Option<&KDma> {
        usize::try_from(raw)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(|s| s.as_ref())
    }

    fn alloc(&mut self, dma: KDma) -> Result<DmaId, SysError> {
        let (idx, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())
            .ok_or(SysError::Busy)?;
        *slot = Some(dma);
        Ok(DmaId(idx as u8))
    }

    /// Checks whether any task already holds the (controller, stream) pair.
    fn stream_taken(&self, controller: u8, stream: u8) -> bool {
        self.slots.iter().flatten().any(|d| {
            d.udma.controller == controller && d.udma.stream == stream
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (DmaId, &KDma)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|d| (DmaId(i as u8), d)))
    }
}

/// Checks whether every field the stream's direction requires has been
/// supplied, i.e. whether the enable bit may be set.
fn is_complete(udma: &DmaDescriptor) -> bool {
    if udma.in_addr == 0 || udma.out_addr == 0 || udma.size == 0 {
        return false;
    }
    match udma.direction {
        DmaDirection::MemoryToPeripheral => udma.in_handler != 0,
        DmaDirection::PeripheralToMemory => udma.out_handler != 0,
        DmaDirection::MemoryToMemory => false,
    }
}

/// The userland handler serving the stream's direction.
fn direction_handler(udma: &DmaDescriptor) -> u32 {
    match udma.direction {
        DmaDirection::MemoryToPeripheral => udma.in_handler,
        _ => udma.out_handler,
    }
}

/// Validates the mask-selected fields of a user stream descriptor.
///
/// Buffer checks cover only the memory side of the transfer: the
/// peripheral-side address is the device's business and gets no authority
/// from the task's address space. A zero address or handler means "not
/// supplied yet" and is accepted; completeness is judged separately.
pub fn sanitize_dma(
    task: &Task,
    udma: &DmaDescriptor,
    mask: DmaReconf,
    mode: ThreadMode,
) -> Result<(), SysError> {
    if mask == DmaReconf::ALL {
        if udma.controller < 1 || udma.controller > NUM_CONTROLLERS {
            return Err(SysError::Inval);
        }
        if udma.stream >= NUM_STREAMS || udma.channel >= NUM_CHANNELS {
            return Err(SysError::Inval);
        }
    }

    if mask.contains(DmaReconf::DIR) && udma.direction == DmaDirection::MemoryToMemory {
        return Err(SysError::Inval);
    }

    if mask.contains(DmaReconf::BUFIN)
        && udma.direction != DmaDirection::PeripheralToMemory
        && udma.in_addr != 0
    {
        // The source of an outgoing transfer may be RAM or rodata.
        let buf = USlice::<u8>::from_raw32(udma.in_addr, udma.size)?;
        if !sanitize::slice_anywhere(task, &buf, mode)
            && !sanitize::slice_in_dma_shm(task, &buf, DmaShmAccess::Read)
        {
            return Err(SysError::Inval);
        }
    }

    if mask.contains(DmaReconf::BUFOUT)
        && udma.direction != DmaDirection::MemoryToPeripheral
        && udma.out_addr != 0
    {
        let buf = USlice::<u8>::from_raw32(udma.out_addr, udma.size)?;
        if !sanitize::slice_in_ram(task, &buf, mode)
            && !sanitize::slice_in_dma_shm(task, &buf, DmaShmAccess::Write)
        {
            return Err(SysError::Inval);
        }
    }

    if mask.contains(DmaReconf::HANDLERS) {
        let handler = direction_handler(udma);
        if handler != 0 && !sanitize::code_ptr_in_text(task, handler) {
            return Err(SysError::Inval);
        }
    }

    Ok(())
}

impl Kernel {
    /// Registers a DMA stream for `caller`. Init-phase only; the latch has
    /// been checked by the syscall path.
    pub fn register_dma(
        &mut self,
        caller: TaskId,
        udma: &DmaDescriptor,
    ) -> Result<DmaId, SysError> {
        let task = &self.tasks[caller.index()];
        if !task.has_permission(abi::Permissions::DEV_DMA) {
            return Err(SysError::Denied);
        }
        sanitize_dma(task, udma, DmaReconf::ALL, ThreadMode::Main)?;

        if self.dmas.stream_taken(udma.controller, udma.stream) {
            return Err(SysError::Busy);
        }
        let irq = devmap::dma_stream_irq(udma.controller, udma.stream).ok_or(SysError::Inval)?;
        if self.irqs.is_used(irq) {
            return Err(SysError::Busy);
        }

        let dma_id = self.dmas.alloc(KDma {
            udma: *udma,
            task: caller,
            state: DmaState::Initialized,
        })?;
        if let Err(e) = self.tasks[caller.index()].add_dma(dma_id) {
            self.dmas.slots[usize::from(dma_id.0)] = None;
            return Err(e);
        }

        self.irqs
            .install(
                irq,
                IrqHandler::User {
                    task: caller,
                    handler: direction_handler(udma),
                    source: IrqSource::Dma(dma_id),
                },
            )
            .unwrap_or_else(|_| panic!("irq table changed under dma registration"));

        if let Some(gate) = devmap::dma_controller_gate(udma.controller) {
            soc::clock_enable(gate);
        }
        soc::dma_program(udma.controller, udma.stream, udma, DmaReconf::ALL);

        self.maybe_activate(dma_id);
        Ok(dma_id)
    }

    /// Advances the stream to `Configured` and enables it once complete --
    /// immediately for a live task, or at `init(Done)` otherwise.
    fn maybe_activate(&mut self, id: DmaId) {
        let dma = self.dmas.get(id);
        if dma.state == DmaState::Configured || !is_complete(&dma.udma) {
            return;
        }
        let owner_live = self.tasks[dma.task.index()].init_done();
        let dma = self.dmas.get_mut(id);
        dma.state = DmaState::Configured;
        if owner_live {
            soc::dma_enable(dma.udma.controller, dma.udma.stream);
        }
    }

    /// Enables interrupts and completed streams of `caller`; runs once,
    /// from `init(Done)`.
    pub fn enable_task_dmas(&mut self, caller: TaskId) {
        let mut work = [None; abi::MAX_DMAS_PER_TASK];
        for (slot, id) in work.iter_mut().zip(self.tasks[caller.index()].dmas()) {
            *slot = Some(id);
        }
        for id in work.into_iter().flatten() {
            let dma = self.dmas.get(id);
            if let Some(irq) = devmap::dma_stream_irq(dma.udma.controller, dma.udma.stream) {
                arch::enable_irq(irq, true);
            }
            if dma.state == DmaState::Configured {
                soc::dma_enable(dma.udma.controller, dma.udma.stream);
            }
        }
    }

    fn owned_dma(&self, caller: TaskId, raw: u32) -> Result<DmaId, SysError> {
        let id = DmaId(u8::try_from(raw).map_err(|_| SysError::Inval)?);
        match self.dmas.lookup(raw) {
            Some(dma) if dma.task == caller => Ok(id),
            _ => Err(SysError::Inval),
        }
    }

    /// Rewrites the mask-selected fields of an owned stream.
    pub fn reconf_dma(
        &mut self,
        caller: TaskId,
        raw_id: u32,
        update: &DmaDescriptor,
        mask: DmaReconf,
        mode: ThreadMode,
    ) -> Result<SchedHint, SysError> {
        let id = self.owned_dma(caller, raw_id)?;

        // Buffer bound checks need the size that will actually be in
        // effect: the new one if the mask rewrites it, the stored one
        // otherwise.
        let mut candidate = *update;
        if !mask.contains(DmaReconf::BUFSIZE) {
            candidate.size = self.dmas.get(id).udma.size;
        }
        if !mask.contains(DmaReconf::DIR) {
            candidate.direction = self.dmas.get(id).udma.direction;
        }
        sanitize_dma(&self.tasks[caller.index()], &candidate, mask, mode)?;

        let dma = self.dmas.get_mut(id);
        if mask.contains(DmaReconf::DIR) {
            dma.udma.direction = candidate.direction;
        }
        if mask.contains(DmaReconf::BUFSIZE) {
            dma.udma.size = candidate.size;
        }
        if mask.contains(DmaReconf::BUFIN) {
            dma.udma.in_addr = candidate.in_addr;
        }
        if mask.contains(DmaReconf::BUFOUT) {
            dma.udma.out_addr = candidate.out_addr;
        }
        if mask.contains(DmaReconf::MODE) {
            dma.udma.mode = candidate.mode;
        }
        if mask.contains(DmaReconf::PRIO) {
            match dma.udma.direction {
                DmaDirection::MemoryToPeripheral => dma.udma.in_prio = candidate.in_prio,
                DmaDirection::PeripheralToMemory => dma.udma.out_prio = candidate.out_prio,
                DmaDirection::MemoryToMemory => {}
            }
        }
        if mask.contains(DmaReconf::HANDLERS) {
            match dma.udma.direction {
                DmaDirection::MemoryToPeripheral => dma.udma.in_handler = candidate.in_handler,
                DmaDirection::PeripheralToMemory => dma.udma.out_handler = candidate.out_handler,
                DmaDirection::MemoryToMemory => {}
            }
            let handler = direction_handler(&dma.udma);
            if let Some(irq) = devmap::dma_stream_irq(dma.udma.controller, dma.udma.stream) {
                self.irqs.rebind_user_handler(irq, handler);
            }
        }

        let dma = self.dmas.get(id);
        soc::dma_program(dma.udma.controller, dma.udma.stream, &dma.udma, mask);
        self.maybe_activate(id);
        Ok(SchedHint::Same)
    }

    /// Re-arms an already-configured stream, the usual step between chained
    /// transfers.
    pub fn reload_dma(&mut self, caller: TaskId, raw_id: u32) -> Result<SchedHint, SysError> {
        let id = self.owned_dma(caller, raw_id)?;
        let dma = self.dmas.get(id);
        if dma.state != DmaState::Configured {
            return Err(SysError::Denied);
        }
        soc::dma_enable(dma.udma.controller, dma.udma.stream);
        Ok(SchedHint::Same)
    }

    /// Clears the stream enable bit; `reload` or `reconf` brings it back.
    pub fn disable_dma(&mut self, caller: TaskId, raw_id: u32) -> Result<SchedHint, SysError> {
        let id = self.owned_dma(caller, raw_id)?;
        let dma = self.dmas.get(id);
        soc::dma_disable(dma.udma.controller, dma.udma.stream);
        Ok(SchedHint::Same)
    }
}

/// Captures and clears the interrupt status of a firing stream, in handler
/// mode, before the user handler is deferred.
pub fn status_and_ack(k: &mut Kernel, id: DmaId) -> u32 {
    let dma = k.dmas.get(id);
    let (ctrl, stream) = (dma.udma.controller, dma.udma.stream);
    let status = soc::dma_status(ctrl, stream);
    soc::dma_clear_status(ctrl, stream);
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, A, B, C};
    use abi::DmaShmDescriptor;

    #[test]
    fn buffers_must_be_owned_or_granted() {
        let mut k = testutil::kernel();

        // B aims a peripheral-to-memory stream at A's RAM: refused.
        let alien = k.tasks[A.index()].ram_range().0 as u32 + 0x100;
        let udma = testutil::dma_desc(&k.tasks[B.index()], 2, 1, alien, 256);
        assert_eq!(k.register_dma(B, &udma), Err(SysError::Inval));

        // The same buffer with a write grant from A: accepted.
        k.register_dma_shm(
            A,
            DmaShmDescriptor {
                target: B,
                source: A,
                address: alien & !0xff,
                size: 0x200,
                access: DmaShmAccess::Write,
            },
        )
        .unwrap();
        assert!(k.register_dma(B, &udma).is_ok());
    }

    #[test]
    fn grants_are_validated_at_declaration() {
        let mut k = testutil::kernel();
        let a_ram = k.tasks[A.index()].ram_range().0 as u32;

        // The declared source must be the caller.
        let mut grant = DmaShmDescriptor {
            target: B,
            source: B,
            address: a_ram,
            size: 0x100,
            access: DmaShmAccess::Write,
        };
        assert_eq!(k.register_dma_shm(A, grant), Err(SysError::Inval));

        // The buffer must be the caller's own RAM.
        grant.source = A;
        grant.address = k.tasks[B.index()].ram_range().0 as u32;
        assert_eq!(k.register_dma_shm(A, grant), Err(SysError::Inval));

        // Domains bound grants like they bound messages.
        grant.address = a_ram;
        grant.target = C;
        assert_eq!(k.register_dma_shm(A, grant), Err(SysError::Inval));
    }

    #[test]
    fn stream_pairs_cannot_be_aliased() {
        let mut k = testutil::kernel();
        let a_buf = k.tasks[A.index()].ram_range().0 as u32 + 0x400;
        let b_buf = k.tasks[B.index()].ram_range().0 as u32 + 0x400;

        let udma = testutil::dma_desc(&k.tasks[A.index()], 2, 1, a_buf, 256);
        k.register_dma(A, &udma).unwrap();

        // Same (controller, stream), different channel, different task.
        let mut udma_b = testutil::dma_desc(&k.tasks[B.index()], 2, 1, b_buf, 256);
        udma_b.channel = 3;
        assert_eq!(k.register_dma(B, &udma_b), Err(SysError::Busy));

        // A different stream on the same controller is fine.
        udma_b.stream = 2;
        assert!(k.register_dma(B, &udma_b).is_ok());
    }

    #[test]
    fn structural_limits_are_enforced() {
        let mut k = testutil::kernel();
        let buf = k.tasks[A.index()].ram_range().0 as u32 + 0x400;

        let mut udma = testutil::dma_desc(&k.tasks[A.index()], 3, 0, buf, 64);
        assert_eq!(k.register_dma(A, &udma), Err(SysError::Inval));

        udma.controller = 1;
        udma.stream = 8;
        assert_eq!(k.register_dma(A, &udma), Err(SysError::Inval));

        udma.stream = 0;
        udma.direction = DmaDirection::MemoryToMemory;
        assert_eq!(k.register_dma(A, &udma), Err(SysError::Inval));
    }

    #[test]
    fn dma_needs_its_permission() {
        let mut k = testutil::kernel();
        let buf = k.tasks[C.index()].ram_range().0 as u32 + 0x400;
        let udma = testutil::dma_desc(&k.tasks[C.index()], 1, 0, buf, 64);
        assert_eq!(k.register_dma(C, &udma), Err(SysError::Denied));
    }

    #[test]
    fn handlers_must_lie_in_owner_text() {
        let mut k = testutil::kernel();
        let buf = k.tasks[A.index()].ram_range().0 as u32 + 0x400;
        let mut udma = testutil::dma_desc(&k.tasks[A.index()], 1, 0, buf, 64);
        udma.out_handler = k.tasks[B.index()].text_range().0 as u32 + 0x21;
        assert_eq!(k.register_dma(A, &udma), Err(SysError::Inval));
    }

    #[test]
    fn incomplete_streams_stay_disabled_until_reconf() {
        let mut k = testutil::kernel();
        k.tasks[A.index()].set_init_done();
        let buf = k.tasks[A.index()].ram_range().0 as u32 + 0x400;

        // No destination buffer yet.
        let mut udma = testutil::dma_desc(&k.tasks[A.index()], 1, 2, 0, 256);
        let id = k.register_dma(A, &udma).unwrap();
        assert_eq!(k.dmas.get(id).state, DmaState::Initialized);
        // Re-arming an unconfigured stream is refused.
        assert_eq!(
            k.reload_dma(A, u32::from(id.0)),
            Err(SysError::Denied)
        );

        // Supplying the buffer completes the stream.
        udma.out_addr = buf;
        let _ = k.reconf_dma(
            A,
            u32::from(id.0),
            &udma,
            DmaReconf::BUFOUT,
            ThreadMode::Main,
        )
        .unwrap();
        assert_eq!(k.dmas.get(id).state, DmaState::Configured);
        assert!(k.reload_dma(A, u32::from(id.0)).is_ok());
        assert!(k.disable_dma(A, u32::from(id.0)).is_ok());
    }

    #[test]
    fn reconf_checks_only_selected_fields_with_live_size() {
        let mut k = testutil::kernel();
        let (ram_base, ram_end) = k.tasks[A.index()].ram_range();
        let buf = ram_base as u32 + 0x400;
        let udma = testutil::dma_desc(&k.tasks[A.index()], 1, 3, buf, 256);
        let id = k.register_dma(A, &udma).unwrap();

        // Moving the buffer to the very end without touching the stored
        // size must account for that size.
        let mut update = udma;
        update.out_addr = ram_end as u32 - 16;
        assert_eq!(
            k.reconf_dma(A, u32::from(id.0), &update, DmaReconf::BUFOUT, ThreadMode::Main),
            Err(SysError::Inval)
        );

        // Shrinking the size in the same call makes it fit.
        update.size = 16;
        assert!(k
            .reconf_dma(
                A,
                u32::from(id.0),
                &update,
                DmaReconf::BUFOUT | DmaReconf::BUFSIZE,
                ThreadMode::Main,
            )
            .is_ok());
        assert_eq!(k.dmas.get(id).udma.size, 16);
    }

    #[test]
    fn foreign_stream_ids_are_rejected() {
        let mut k = testutil::kernel();
        let buf = k.tasks[A.index()].ram_range().0 as u32 + 0x400;
        let udma = testutil::dma_desc(&k.tasks[A.index()], 1, 4, buf, 64);
        let id = k.register_dma(A, &udma).unwrap();

        assert_eq!(
            k.reload_dma(B, u32::from(id.0)),
            Err(SysError::Inval)
        );
        assert_eq!(k.disable_dma(B, 99), Err(SysError::Inval));
    }

    #[test]
    fn stream_interrupt_is_bound_to_the_owner() {
        let mut k = testutil::kernel();
        let buf = k.tasks[A.index()].ram_range().0 as u32 + 0x400;
        let udma = testutil::dma_desc(&k.tasks[A.index()], 1, 5, buf, 64);
        let id = k.register_dma(A, &udma).unwrap();

        let irq = devmap::dma_stream_irq(1, 5).unwrap();
        match k.irqs.get(irq).unwrap().handler {
            IrqHandler::User { task, source, .. } => {
                assert_eq!(task, A);
                assert_eq!(source, IrqSource::Dma(id));
            }
            _ => panic!("stream interrupt routed to the kernel"),
        }
    }
}
