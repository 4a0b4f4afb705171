// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared scaffolding for the kernel's host tests.
//!
//! Two flavors of world:
//!
//! - [`kernel`] builds an executive whose tasks carry their real board
//!   addresses. Good for everything that checks ranges and state without
//!   dereferencing task memory: election, protection layouts, registration,
//!   stream arbitration.
//! - [`hosted`] additionally points each task's memory windows at leaked
//!   host buffers, so paths that actually read and write task memory --
//!   message passing, saved-frame result commits -- run for real.

use abi::{
    DeviceDescriptor, DmaDescriptor, DmaDirection, GpioDescriptor, IrqDescriptor, MapMode,
    Permissions, Posthook, TaskId,
};

use crate::descs::{KernelConfig, SchedPolicy, TaskDesc};
use crate::kernel::Kernel;
use crate::task::Task;

pub const A: TaskId = TaskId(2);
pub const B: TaskId = TaskId(3);
pub const C: TaskId = TaskId(4);

pub static TEST_CONFIG: KernelConfig = KernelConfig {
    policy: SchedPolicy::RoundRobin,
    sched_period: 1,
    isr_reactivity: false,
};

pub static MLQ_CONFIG: KernelConfig = KernelConfig {
    policy: SchedPolicy::MlqRoundRobin,
    sched_period: 1,
    isr_reactivity: false,
};

const FULL_PERMS: Permissions = Permissions::all();

static DESC_A: TaskDesc = TaskDesc {
    name: "alpha",
    slot: 1,
    num_slots: 1,
    entry_point: crate::layout::USER_TEXT_BASE + 0x1,
    isr_entry: crate::layout::USER_TEXT_BASE + 0x41,
    priority: 5,
    stack_size: 4096,
    domain: 0,
    permissions: FULL_PERMS,
};

static DESC_B: TaskDesc = TaskDesc {
    name: "beta",
    slot: 2,
    num_slots: 1,
    entry_point: crate::layout::USER_TEXT_BASE + crate::layout::USER_TEXT_SLOT_SIZE + 0x1,
    isr_entry: crate::layout::USER_TEXT_BASE + crate::layout::USER_TEXT_SLOT_SIZE + 0x41,
    priority: 5,
    stack_size: 4096,
    domain: 0,
    permissions: FULL_PERMS,
};

/// Low-priority, no permissions, its own IPC domain: the designated victim
/// for denial tests.
static DESC_C: TaskDesc = TaskDesc {
    name: "gamma",
    slot: 3,
    num_slots: 1,
    entry_point: crate::layout::USER_TEXT_BASE + 2 * crate::layout::USER_TEXT_SLOT_SIZE + 0x1,
    isr_entry: crate::layout::USER_TEXT_BASE + 2 * crate::layout::USER_TEXT_SLOT_SIZE + 0x41,
    priority: 1,
    stack_size: 4096,
    domain: 1,
    permissions: Permissions::empty(),
};

/// Builds a three-task executive with board addressing.
pub fn kernel() -> Box<Kernel> {
    let mut k = Box::new(Kernel::starting(&TEST_CONFIG));
    k.tasks[TaskId::IDLE.index()] = Task::kernel_thread(TaskId::IDLE, "idle", true);
    k.tasks[TaskId::SOFTIRQ.index()] = Task::kernel_thread(TaskId::SOFTIRQ, "softirq", false);
    k.tasks[A.index()] = Task::from_descriptor(&DESC_A, A);
    k.tasks[B.index()] = Task::from_descriptor(&DESC_B, B);
    k.tasks[C.index()] = Task::from_descriptor(&DESC_C, C);
    k.sched.num_user_tasks = 3;
    k
}

/// Host-backed memory windows of one task.
#[derive(Copy, Clone, Debug)]
pub struct HostMem {
    pub ram: (usize, usize),
    pub text: (usize, usize),
}

impl HostMem {
    /// An address `off` bytes into the task's RAM window.
    pub fn ram_at(&self, off: usize) -> usize {
        assert!(self.ram.0 + off < self.ram.1);
        self.ram.0 + off
    }

    /// Writes a value into the task's RAM window.
    pub fn put<T>(&self, off: usize, value: T) -> usize {
        let at = self.ram_at(off);
        assert_eq!(at % core::mem::align_of::<T>(), 0);
        unsafe {
            core::ptr::write(at as *mut T, value);
        }
        at
    }

    /// Reads a value back out of the task's RAM window.
    pub fn get<T: Copy>(&self, off: usize) -> T {
        let at = self.ram_at(off);
        unsafe { core::ptr::read(at as *const T) }
    }
}

fn leak_buffer(len: usize) -> (usize, usize) {
    // Backed by u64s so callers can park 8-byte-aligned values anywhere
    // reasonable in the window.
    let buf: &'static mut [u64] = Box::leak(vec![0u64; len / 8].into_boxed_slice());
    let base = buf.as_mut_ptr() as usize;
    (base, base + len)
}

/// Builds the three-task executive with task memory pointed at real host
/// buffers (4 KiB RAM, 256 B text each).
pub fn hosted() -> (Box<Kernel>, [HostMem; 3]) {
    let mut k = kernel();
    let mut mem = [HostMem {
        ram: (0, 0),
        text: (0, 0),
    }; 3];
    for (i, id) in [A, B, C].into_iter().enumerate() {
        let ram = leak_buffer(4096);
        let text = leak_buffer(256);
        k.tasks[id.index()].override_ranges(ram, text);
        mem[i] = HostMem { ram, text };
    }
    (k, mem)
}

/// A minimal device descriptor: window only, no interrupts or pins.
pub fn dev_desc(address: u32, size: u32) -> DeviceDescriptor {
    DeviceDescriptor {
        name: *b"device\0\0\0\0\0\0\0\0\0\0",
        address,
        size,
        map_mode: MapMode::Auto,
        irq_count: 0,
        irqs: [blank_irq(); abi::MAX_DEV_IRQS],
        gpio_count: 0,
        gpios: [blank_gpio(); abi::MAX_DEV_GPIOS],
    }
}

pub fn blank_irq() -> IrqDescriptor {
    IrqDescriptor {
        handler: 0,
        irq: 0,
        mode: abi::IsrScheduling::Standard,
        posthook: Posthook::default(),
    }
}

pub fn blank_gpio() -> GpioDescriptor {
    GpioDescriptor {
        mask: 0,
        kref: abi::GpioRef::new(0, 0),
        mode: abi::GpioMode::Input,
        pupd: abi::GpioPull::None,
        otype: abi::GpioOutputType::PushPull,
        speed: abi::GpioSpeed::Low,
        af: 0,
        bsr_r: 0,
        bsr_s: 0,
        lck: 0,
        exti_trigger: abi::ExtiTrigger::None,
        exti_lock: abi::ExtiLock::Unlocked,
        exti_handler: 0,
    }
}

/// A peripheral-to-memory stream declaration for `task`, writing into
/// `out_addr`.
pub fn dma_desc(task: &Task, controller: u8, stream: u8, out_addr: u32, size: u32) -> DmaDescriptor {
    let (text_base, _) = task.text_range();
    DmaDescriptor {
        controller,
        stream,
        channel: 0,
        direction: DmaDirection::PeripheralToMemory,
        mode: abi::DmaMode::Direct,
        datasize: abi::DmaDataSize::Byte,
        mem_inc: true,
        dev_inc: false,
        mem_burst: abi::DmaBurst::Single,
        dev_burst: abi::DmaBurst::Single,
        flow_control: abi::DmaFlowControl::Dma,
        size,
        in_addr: 0x4000_4404, // a peripheral data register
        in_prio: abi::DmaPriority::Low,
        in_handler: 0,
        out_addr,
        out_prio: abi::DmaPriority::Medium,
        out_handler: text_base as u32 + 0x21,
    }
}
