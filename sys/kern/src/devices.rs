// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device registration and lifecycle.
//!
//! `register_device` is the central gate between a task and the hardware:
//! everything a driver will ever touch -- its memory window, interrupt
//! lines, posthook programs, GPIO pins, external-interrupt routing -- is
//! declared once, during the task's init phase, and validated here against
//! the SoC device map and the task's permissions. After `init(Done)` the
//! set is frozen; the only post-init evolutions are voluntary window
//! mapping and full release.
//!
//! Registration records and reserves; it touches no hardware. Clock gates,
//! pin configuration and interrupt enables all happen together when the
//! task finishes its init phase, so a half-initialized driver never sees a
//! live device.

use abi::{
    DeviceDescriptor, ExtiTrigger, GpioDescriptor, GpioRef, IrqDescriptor, IsrScheduling,
    MapMode, Permissions, PosthookInstr, SysError, TaskId,
};

use crate::arch;
use crate::irq::{IrqHandler, IrqSource};
use crate::kernel::Kernel;
use crate::soc;
use crate::soc::devmap::{self, DevMapEntry};
use crate::task::{SchedHint, Task};

/// Index into the kernel device table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub struct DeviceId(pub u8);

/// Total device slots across all tasks.
pub const MAX_DEVICES: usize = 16;

/// Lifecycle of a registered device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceState {
    /// Declared and validated; hardware untouched.
    Registered,
    /// Activated by the owner's `init(Done)`.
    Enabled,
}

/// Kernel-side record of a registered device.
#[derive(Debug)]
pub struct KDevice {
    /// Sanitized copy of the user descriptor.
    pub udev: DeviceDescriptor,
    pub task: TaskId,
    pub state: DeviceState,
    /// SoC map entry; `None` for GPIO-only pseudo-devices.
    pub info: Option<&'static DevMapEntry>,
    /// Whether the device window currently occupies a dynamic MPU region.
    pub is_mapped: bool,
}

impl KDevice {
    /// Finds the declared IRQ record for `irq`.
    pub fn irq_descriptor(&self, irq: u8) -> Option<&IrqDescriptor> {
        self.udev.irqs[..usize::from(self.udev.irq_count)]
            .iter()
            .find(|d| d.irq == irq)
    }

    /// Finds the declared GPIO record for `kref`.
    pub fn gpio_descriptor(&self, kref: GpioRef) -> Option<&GpioDescriptor> {
        self.udev.gpios[..usize::from(self.udev.gpio_count)]
            .iter()
            .find(|d| d.kref == kref)
    }

    fn irqs(&self) -> &[IrqDescriptor] {
        &self.udev.irqs[..usize::from(self.udev.irq_count)]
    }

    fn gpios(&self) -> &[GpioDescriptor] {
        &self.udev.gpios[..usize::from(self.udev.gpio_count)]
    }
}

/// The kernel device table.
pub struct DeviceTable {
    slots: [Option<KDevice>; MAX_DEVICES],
}

impl DeviceTable {
    pub const fn new() -> Self {
        const VACANT: Option<KDevice> = None;
        Self {
            slots: [VACANT; MAX_DEVICES],
        }
    }

    /// Looks up a device that is known to exist; a dangling id here means a
    /// resource table has been corrupted.
    pub fn get(&self, id: DeviceId) -> &KDevice {
        self.slots[usize::from(id.0)]
            .as_ref()
            .unwrap_or_else(|| panic!("dangling device id {}", id.0))
    }

    pub fn get_mut(&mut self, id: DeviceId) -> &mut KDevice {
        self.slots[usize::from(id.0)]
            .as_mut()
            .unwrap_or_else(|| panic!("dangling device id {}", id.0))
    }

    /// Looks up a device id provided by a (not trusted) task.
    pub fn lookup(&self, raw: u32) -> Option<&KDevice> {
        usize::try_from(raw)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(|s| s.as_ref())
    }

    fn alloc(&mut self, dev: KDevice) -> Result<DeviceId, SysError> {
        let (idx, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.is_none())
            .ok_or(SysError::Busy)?;
        *slot = Some(dev);
        Ok(DeviceId(idx as u8))
    }

    fn free(&mut self, id: DeviceId) {
        self.slots[usize::from(id.0)] = None;
    }
}

/// Validates one declared IRQ line against its owner and device window.
fn sanitize_irq(task: &Task, udev: &DeviceDescriptor, irq: &IrqDescriptor) -> Result<(), SysError> {
    if !crate::sanitize::code_ptr_in_text(task, irq.handler) {
        return Err(SysError::Inval);
    }
    if irq.irq < devmap::USER_IRQ_MIN || irq.irq > devmap::USER_IRQ_MAX {
        return Err(SysError::Inval);
    }
    // DMA stream interrupts are bound through the DMA arbiter only.
    if devmap::dma_stream_of_irq(irq.irq).is_some() {
        return Err(SysError::Inval);
    }
    if irq.mode == IsrScheduling::ForceMainThread
        && !task.has_permission(Permissions::TSK_FORCE_ISR)
    {
        return Err(SysError::Denied);
    }

    // Every posthook offset must name a word-aligned register inside the
    // device window.
    let offset_ok = |off: u16| -> bool {
        let off = u32::from(off);
        udev.size >= 4 && off <= udev.size - 4 && off % 4 == 0
    };
    for instr in &irq.posthook.action {
        let ok = match *instr {
            PosthookInstr::Nil => true,
            PosthookInstr::Read { offset } => offset_ok(offset),
            PosthookInstr::Write { offset, .. } => offset_ok(offset),
            PosthookInstr::And { dst, src, .. } => offset_ok(dst) && offset_ok(src),
            PosthookInstr::Mask {
                dst,
                src,
                mask_offset,
                ..
            } => offset_ok(dst) && offset_ok(src) && offset_ok(mask_offset),
        };
        if !ok {
            return Err(SysError::Inval);
        }
    }
    Ok(())
}

/// Validates one declared GPIO pin against its owner.
fn sanitize_gpio(task: &Task, gpio: &GpioDescriptor) -> Result<(), SysError> {
    if usize::from(gpio.kref.port()) >= crate::gpio::NUM_PORTS {
        return Err(SysError::Inval);
    }
    if gpio.af > 15 {
        return Err(SysError::Inval);
    }
    if gpio.exti_trigger != ExtiTrigger::None && !task.has_permission(Permissions::DEV_EXTI) {
        return Err(SysError::Denied);
    }
    if gpio.exti_handler != 0 && !crate::sanitize::code_ptr_in_text(task, gpio.exti_handler) {
        return Err(SysError::Inval);
    }
    Ok(())
}

/// Validates and normalizes a user device descriptor. Returns the SoC map
/// entry for devices with a memory window.
pub fn sanitize_device(
    task: &Task,
    udev: &mut DeviceDescriptor,
) -> Result<Option<&'static DevMapEntry>, SysError> {
    let info = if udev.address == 0 && udev.size == 0 {
        // GPIO-only pseudo-device; nothing to look up.
        None
    } else {
        let info = devmap::find_device(udev.address, udev.size).ok_or(SysError::Inval)?;
        if !task.has_permission(info.minperm) {
            return Err(SysError::Denied);
        }
        Some(info)
    };

    udev.name[15] = 0;

    if usize::from(udev.irq_count) > abi::MAX_DEV_IRQS {
        return Err(SysError::Inval);
    }
    if usize::from(udev.gpio_count) > abi::MAX_DEV_GPIOS {
        return Err(SysError::Inval);
    }

    for irq in &udev.irqs[..usize::from(udev.irq_count)] {
        sanitize_irq(task, udev, irq)?;
    }
    for gpio in &udev.gpios[..usize::from(udev.gpio_count)] {
        sanitize_gpio(task, gpio)?;
    }

    if udev.map_mode == MapMode::Voluntary && !task.has_permission(Permissions::MEM_DYNAMIC_MAP) {
        return Err(SysError::Denied);
    }

    Ok(info)
}

impl Kernel {
    /// Registers a device for `caller`. Called from the init-phase syscall
    /// path; the init-done latch has already been checked there.
    pub fn register_device(
        &mut self,
        caller: TaskId,
        udev: &DeviceDescriptor,
    ) -> Result<DeviceId, SysError> {
        let task = &self.tasks[caller.index()];
        let mut udev = *udev;
        let info = sanitize_device(task, &mut udev)?;

        // Pre-flight every shared resource so the commit below cannot fail
        // halfway.
        for irq in &udev.irqs[..usize::from(udev.irq_count)] {
            if self.irqs.is_used(irq.irq) {
                return Err(SysError::Busy);
            }
        }
        for gpio in &udev.gpios[..usize::from(udev.gpio_count)] {
            if self.gpios.owner_of(gpio.kref).is_some() {
                return Err(SysError::Busy);
            }
            if gpio.exti_trigger != ExtiTrigger::None
                && self.extis.owner(gpio.kref.pin()).is_some()
            {
                return Err(SysError::Busy);
            }
        }
        // Duplicate IRQ or pin within the descriptor itself would also make
        // the commit collide with itself.
        let irqs = &udev.irqs[..usize::from(udev.irq_count)];
        for (i, a) in irqs.iter().enumerate() {
            if irqs[..i].iter().any(|b| b.irq == a.irq) {
                return Err(SysError::Inval);
            }
        }
        let gpios = &udev.gpios[..usize::from(udev.gpio_count)];
        for (i, a) in gpios.iter().enumerate() {
            if gpios[..i].iter().any(|b| b.kref == a.kref) {
                return Err(SysError::Inval);
            }
        }

        // An auto-mapped device with a window holds one of the two dynamic
        // MPU regions forever; claim it now so over-subscription fails at
        // registration rather than at enable time.
        let needs_map_slot = udev.map_mode == MapMode::Auto && udev.size != 0;
        if needs_map_slot {
            self.tasks[caller.index()].take_map_slot()?;
        }

        let dev_id = match self.devices.alloc(KDevice {
            udev,
            task: caller,
            state: DeviceState::Registered,
            info,
            is_mapped: false,
        }) {
            Ok(id) => id,
            Err(e) => {
                if needs_map_slot {
                    self.tasks[caller.index()].release_map_slot();
                }
                return Err(e);
            }
        };
        if let Err(e) = self.tasks[caller.index()].add_device(dev_id) {
            self.devices.free(dev_id);
            if needs_map_slot {
                self.tasks[caller.index()].release_map_slot();
            }
            return Err(e);
        }

        for irq in &udev.irqs[..usize::from(udev.irq_count)] {
            // Cannot fail: availability was checked above and nothing runs
            // in between on this single core.
            self.irqs
                .install(
                    irq.irq,
                    IrqHandler::User {
                        task: caller,
                        handler: irq.handler,
                        source: IrqSource::Device(dev_id),
                    },
                )
                .unwrap_or_else(|_| panic!("irq table changed under registration"));
        }
        for gpio in &udev.gpios[..usize::from(udev.gpio_count)] {
            self.gpios
                .register(caller, dev_id, gpio.kref)
                .unwrap_or_else(|_| panic!("gpio table changed under registration"));
            if gpio.exti_trigger != ExtiTrigger::None {
                self.extis
                    .register(gpio.kref)
                    .unwrap_or_else(|_| panic!("exti table changed under registration"));
            }
        }

        klog!("registered device for task {}", caller.0);
        Ok(dev_id)
    }

    /// Activates everything `caller` registered; runs once, from
    /// `init(Done)`.
    pub fn enable_task_devices(&mut self, caller: TaskId) {
        let dev_ids: [Option<DeviceId>; abi::MAX_DEVS_PER_TASK] = {
            let mut ids = [None; abi::MAX_DEVS_PER_TASK];
            for (slot, id) in ids.iter_mut().zip(self.tasks[caller.index()].devices()) {
                *slot = Some(id);
            }
            ids
        };

        for dev_id in dev_ids.into_iter().flatten() {
            let dev = self.devices.get_mut(dev_id);
            if dev.state != DeviceState::Registered {
                continue;
            }

            for gpio in dev.gpios() {
                soc::gpio_configure(gpio);
                if gpio.exti_trigger != ExtiTrigger::None {
                    soc::exti_configure(gpio);
                    soc::exti_enable(gpio.kref);
                }
            }

            if let Some(info) = dev.info {
                if let Some(gate) = info.gate {
                    soc::clock_enable(gate);
                }
            }

            for irq in dev.irqs() {
                arch::enable_irq(irq.irq, true);
            }

            dev.state = DeviceState::Enabled;
            if dev.udev.map_mode == MapMode::Auto && dev.udev.size != 0 {
                // The MPU slot was reserved at registration.
                dev.is_mapped = true;
            }
        }
    }

    /// Resolves a user-supplied device id to one owned by `caller`.
    fn owned_device(&self, caller: TaskId, raw: u32) -> Result<DeviceId, SysError> {
        let id = DeviceId(u8::try_from(raw).map_err(|_| SysError::Inval)?);
        match self.devices.lookup(raw) {
            Some(dev) if dev.task == caller => Ok(id),
            _ => Err(SysError::Inval),
        }
    }

    /// Maps or unmaps a voluntary device window; the MPU change takes
    /// effect at the reschedule this requests.
    pub fn set_device_map(
        &mut self,
        caller: TaskId,
        raw_id: u32,
        map: bool,
    ) -> Result<SchedHint, SysError> {
        let dev_id = self.owned_device(caller, raw_id)?;
        let dev = self.devices.get(dev_id);
        if dev.udev.map_mode != MapMode::Voluntary || dev.udev.size == 0 {
            return Err(SysError::Denied);
        }
        if dev.is_mapped == map {
            return Err(SysError::Busy);
        }
        if map {
            self.tasks[caller.index()].take_map_slot()?;
        } else {
            self.tasks[caller.index()].release_map_slot();
        }
        self.devices.get_mut(dev_id).is_mapped = map;
        Ok(SchedHint::Reschedule)
    }

    /// Tears a device down completely: interrupts, pins, lines, window,
    /// slot. The registration/release pair leaves every table as it found
    /// it.
    pub fn release_device(&mut self, caller: TaskId, raw_id: u32) -> Result<SchedHint, SysError> {
        let dev_id = self.owned_device(caller, raw_id)?;

        {
            let dev = self.devices.get(dev_id);
            for irq in dev.irqs() {
                arch::disable_irq(irq.irq, true);
            }
            for gpio in dev.gpios() {
                if gpio.exti_trigger != ExtiTrigger::None {
                    soc::exti_disable(gpio.kref);
                }
            }
        }

        let dev = self
            .devices
            .slots
            .get_mut(usize::from(dev_id.0))
            .and_then(|s| s.take())
            .unwrap_or_else(|| panic!("device vanished during release"));

        for irq in dev.irqs() {
            self.irqs.clear(irq.irq);
        }
        for gpio in dev.gpios() {
            self.gpios.release(gpio.kref);
            if gpio.exti_trigger != ExtiTrigger::None {
                self.extis.release(gpio.kref);
            }
        }

        let task = &mut self.tasks[caller.index()];
        task.remove_device(dev_id);
        if dev.is_mapped || (dev.udev.map_mode == MapMode::Auto && dev.udev.size != 0) {
            task.release_map_slot();
        }

        Ok(SchedHint::Reschedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, A, B, C};
    use abi::{ExtiLock, GpioRef, Posthook, SysError};

    const I2C1: (u32, u32) = (0x4000_5400, 0x400);
    const USART2: (u32, u32) = (0x4000_4400, 0x400);
    const I2C1_EV_IRQ: u8 = 31;

    fn handler_in(task: &Task) -> u32 {
        task.text_range().0 as u32 + 0x101
    }

    fn i2c1_with_posthook(
        handler: u32,
        write_offset: u16,
    ) -> DeviceDescriptor {
        let mut udev = testutil::dev_desc(I2C1.0, I2C1.1);
        let mut irq = testutil::blank_irq();
        irq.irq = I2C1_EV_IRQ;
        irq.handler = handler;
        irq.posthook = Posthook {
            status: 0x00,
            data: 0x00,
            ..Posthook::default()
        };
        irq.posthook.action[0] = PosthookInstr::Read { offset: 0x00 };
        irq.posthook.action[1] = PosthookInstr::Write {
            offset: write_offset,
            value: 0x1,
            mask: 0x1,
        };
        udev.irq_count = 1;
        udev.irqs[0] = irq;
        udev
    }

    #[test]
    fn unknown_devices_are_refused() {
        let mut k = testutil::kernel();
        let udev = testutil::dev_desc(0xdead_0000, 0x400);
        assert_eq!(k.register_device(A, &udev), Err(SysError::Inval));
        // Right base, wrong window size.
        let udev = testutil::dev_desc(USART2.0, 0x800);
        assert_eq!(k.register_device(A, &udev), Err(SysError::Inval));
    }

    #[test]
    fn permission_class_is_checked() {
        let mut k = testutil::kernel();
        let udev = testutil::dev_desc(USART2.0, USART2.1);
        assert_eq!(k.register_device(C, &udev), Err(SysError::Denied));
        assert!(k.register_device(A, &udev).is_ok());
    }

    #[test]
    fn descriptor_counts_are_bounded() {
        let mut k = testutil::kernel();
        let mut udev = testutil::dev_desc(USART2.0, USART2.1);
        udev.irq_count = 5;
        assert_eq!(k.register_device(A, &udev), Err(SysError::Inval));

        let mut udev = testutil::dev_desc(USART2.0, USART2.1);
        udev.gpio_count = 17;
        assert_eq!(k.register_device(A, &udev), Err(SysError::Inval));
    }

    #[test]
    fn posthook_offsets_must_stay_inside_the_window() {
        let mut k = testutil::kernel();
        let h = handler_in(&k.tasks[A.index()]);

        // One past the last register: out.
        let udev = i2c1_with_posthook(h, 0x402);
        assert_eq!(k.register_device(A, &udev), Err(SysError::Inval));
        // Misaligned: out.
        let udev = i2c1_with_posthook(h, 0x3fe);
        assert_eq!(k.register_device(A, &udev), Err(SysError::Inval));
        // Last register: fine.
        let udev = i2c1_with_posthook(h, 0x3fc);
        assert!(k.register_device(A, &udev).is_ok());
    }

    #[test]
    fn handler_must_lie_in_owner_text() {
        let mut k = testutil::kernel();
        // B's handler address, used by A: refused.
        let foreign = handler_in(&k.tasks[B.index()]);
        let udev = i2c1_with_posthook(foreign, 0x04);
        assert_eq!(k.register_device(A, &udev), Err(SysError::Inval));
    }

    #[test]
    fn interrupt_lines_cannot_be_shared() {
        let mut k = testutil::kernel();
        let udev = i2c1_with_posthook(handler_in(&k.tasks[A.index()]), 0x04);
        k.register_device(A, &udev).unwrap();

        // B declares a different device claiming the same line.
        let mut udev_b = testutil::dev_desc(USART2.0, USART2.1);
        udev_b.irq_count = 1;
        udev_b.irqs[0] = testutil::blank_irq();
        udev_b.irqs[0].irq = I2C1_EV_IRQ;
        udev_b.irqs[0].handler = handler_in(&k.tasks[B.index()]);
        assert_eq!(k.register_device(B, &udev_b), Err(SysError::Busy));
    }

    #[test]
    fn force_mainthread_needs_its_permission() {
        let mut k = testutil::kernel();
        // A GPIO-only device, so the permissionless task can get this far.
        let mut udev = testutil::dev_desc(0, 0);
        udev.irq_count = 1;
        udev.irqs[0] = testutil::blank_irq();
        udev.irqs[0].irq = 61;
        udev.irqs[0].handler = handler_in(&k.tasks[C.index()]);
        udev.irqs[0].mode = IsrScheduling::ForceMainThread;
        assert_eq!(k.register_device(C, &udev), Err(SysError::Denied));

        udev.irqs[0].mode = IsrScheduling::Standard;
        assert!(k.register_device(C, &udev).is_ok());
    }

    #[test]
    fn posthooks_need_a_window() {
        let mut k = testutil::kernel();
        let mut udev = testutil::dev_desc(0, 0);
        udev.irq_count = 1;
        udev.irqs[0] = testutil::blank_irq();
        udev.irqs[0].irq = 61;
        udev.irqs[0].handler = handler_in(&k.tasks[A.index()]);
        udev.irqs[0].posthook.action[0] = PosthookInstr::Read { offset: 0 };
        assert_eq!(k.register_device(A, &udev), Err(SysError::Inval));
    }

    #[test]
    fn register_then_release_is_an_identity() {
        let mut k = testutil::kernel();
        let mut udev = i2c1_with_posthook(handler_in(&k.tasks[A.index()]), 0x04);
        udev.gpio_count = 1;
        udev.gpios[0] = testutil::blank_gpio();
        udev.gpios[0].kref = GpioRef::new(abi::gpio_port::PB, 6);
        udev.gpios[0].exti_trigger = abi::ExtiTrigger::Rise;
        udev.gpios[0].exti_lock = ExtiLock::Unlocked;
        udev.gpios[0].exti_handler = handler_in(&k.tasks[A.index()]);

        let dev_id = k.register_device(A, &udev).unwrap();
        assert!(k.irqs.is_used(I2C1_EV_IRQ));
        assert!(k.gpios.owner_of(GpioRef::new(1, 6)).is_some());
        assert!(k.extis.owner(6).is_some());
        assert_eq!(k.tasks[A.index()].devices().count(), 1);
        assert_eq!(k.tasks[A.index()].mapped_devices(), 1);

        k.tasks[A.index()].set_init_done();
        let _ = k.release_device(A, u32::from(dev_id.0)).unwrap();
        assert!(!k.irqs.is_used(I2C1_EV_IRQ));
        assert!(k.gpios.owner_of(GpioRef::new(1, 6)).is_none());
        assert!(k.extis.owner(6).is_none());
        assert_eq!(k.tasks[A.index()].devices().count(), 0);
        assert_eq!(k.tasks[A.index()].mapped_devices(), 0);

        // The slot is genuinely reusable.
        assert!(k.register_device(A, &udev).is_ok());
    }

    #[test]
    fn enable_maps_auto_devices() {
        let mut k = testutil::kernel();
        let udev = testutil::dev_desc(USART2.0, USART2.1);
        let dev_id = k.register_device(A, &udev).unwrap();
        assert!(!k.devices.get(dev_id).is_mapped);
        assert_eq!(k.devices.get(dev_id).state, DeviceState::Registered);

        k.enable_task_devices(A);
        assert!(k.devices.get(dev_id).is_mapped);
        assert_eq!(k.devices.get(dev_id).state, DeviceState::Enabled);
    }

    #[test]
    fn voluntary_windows_map_and_unmap_on_request() {
        let mut k = testutil::kernel();
        let mut udev = testutil::dev_desc(USART2.0, USART2.1);
        udev.map_mode = MapMode::Voluntary;
        let dev_id = k.register_device(A, &udev).unwrap();
        k.tasks[A.index()].set_init_done();
        k.enable_task_devices(A);
        assert!(!k.devices.get(dev_id).is_mapped);

        let _ = k.set_device_map(A, u32::from(dev_id.0), true).unwrap();
        assert!(k.devices.get(dev_id).is_mapped);
        // Mapping twice reports the state honestly.
        assert_eq!(
            k.set_device_map(A, u32::from(dev_id.0), true),
            Err(SysError::Busy)
        );
        let _ = k.set_device_map(A, u32::from(dev_id.0), false).unwrap();
        assert!(!k.devices.get(dev_id).is_mapped);
    }

    #[test]
    fn auto_devices_refuse_on_demand_mapping() {
        let mut k = testutil::kernel();
        let udev = testutil::dev_desc(USART2.0, USART2.1);
        let dev_id = k.register_device(A, &udev).unwrap();
        k.tasks[A.index()].set_init_done();
        k.enable_task_devices(A);
        assert_eq!(
            k.set_device_map(A, u32::from(dev_id.0), true),
            Err(SysError::Denied)
        );
    }

    #[test]
    fn third_windowed_auto_device_is_refused() {
        let mut k = testutil::kernel();
        k.register_device(A, &testutil::dev_desc(USART2.0, USART2.1))
            .unwrap();
        k.register_device(A, &testutil::dev_desc(I2C1.0, I2C1.1))
            .unwrap();
        // Both dynamic protection windows are spoken for.
        let third = testutil::dev_desc(0x4000_5800, 0x400); // i2c2
        assert_eq!(k.register_device(A, &third), Err(SysError::Busy));
    }

    #[test]
    fn foreign_device_ids_are_rejected() {
        let mut k = testutil::kernel();
        let udev = testutil::dev_desc(USART2.0, USART2.1);
        let dev_id = k.register_device(A, &udev).unwrap();
        k.tasks[B.index()].set_init_done();
        assert_eq!(
            k.release_device(B, u32::from(dev_id.0)),
            Err(SysError::Inval)
        );
        assert_eq!(k.release_device(B, 700), Err(SysError::Inval));
    }
}
