// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel startup.
//!
//! The board's reset path does the minimum (vector table, RAM init) and
//! calls [`start_kernel`] with the application layout. Startup brings up
//! the clock tree, populates the statically-allocated executive -- the two
//! built-in kernel threads plus one task per layout record, each with an
//! initial exception frame -- installs the external-interrupt dispatcher,
//! programs the fixed protection regions, and performs the one-way hand-off
//! into the first elected task.

use abi::{TaskId, NUM_TASKS};

use crate::arch;
use crate::descs::{AppLayout, KernelConfig, SchedPolicy};
use crate::irq::IrqHandler;
use crate::kernel::Kernel;
use crate::layout;
use crate::soc;
use crate::soc::devmap;
use crate::softirq;
use crate::task::Task;

/// Placeholder configuration the static executive is born with; replaced
/// by the layout's configuration before anything runs.
static DEFAULT_CONFIG: KernelConfig = KernelConfig {
    policy: SchedPolicy::RoundRobin,
    sched_period: 1,
    isr_reactivity: false,
};

/// The kernel executive. Statically allocated: at around forty kilobytes
/// it has no business on the boot stack, and a fixed address keeps it easy
/// to find from a debugger.
static mut KERNEL: Kernel = Kernel::starting(&DEFAULT_CONFIG);

/// The idle task: elected when nothing else is runnable, does nothing but
/// wait for the next interrupt.
fn idle_main() -> ! {
    klog!("idle thread up");
    loop {
        arch::wait_for_interrupt();
    }
}

/// The main kernel entry point.
///
/// `tick_divisor` is the number of processor cycles per kernel tick; with
/// the clock tree at its reference setting, `168_000` gives millisecond
/// ticks.
///
/// # Safety
///
/// Call exactly once per boot, from privileged thread mode on the main
/// stack.
pub unsafe fn start_kernel(app: &'static AppLayout, tick_divisor: u32) -> ! {
    soc::init_clocks();
    unsafe {
        arch::set_clock_freq(tick_divisor);
    }
    klog!("kernel starting, {} tasks", app.tasks.len());

    match crate::bootinfo::read() {
        Some(info) => klog!(
            "boot slot {} version {}",
            info.default_slot,
            info.images[usize::from(info.default_slot) % crate::bootinfo::NUM_IMAGES].version
        ),
        None => klog!("no boot info"),
    }

    uassert!(app.tasks.len() <= abi::MAX_USER_TASKS);

    // Safety: single-core, pre-interrupt; nothing else references KERNEL
    // yet.
    let k: &mut Kernel = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL) };
    k.config = &app.config;

    // The two built-in threads run privileged on their own kernel stacks.
    let mut idle = Task::kernel_thread(TaskId::IDLE, "idle", true);
    idle.ctx.main.save = arch::SavedState::at_frame(arch::build_initial_frame(
        layout::STACK_TOP_IDLE as usize,
        idle_main as usize as u32,
        [0; 4],
    ));
    k.tasks[TaskId::IDLE.index()] = idle;

    let mut sirq = Task::kernel_thread(TaskId::SOFTIRQ, "softirq", false);
    sirq.ctx.main.save = arch::SavedState::at_frame(arch::build_initial_frame(
        layout::STACK_TOP_SOFTIRQ as usize,
        softirq::softirq_main as usize as u32,
        [0; 4],
    ));
    k.tasks[TaskId::SOFTIRQ.index()] = sirq;

    // User tasks, one per layout record. Each gets its initial frame at
    // the top of its RAM slots, with its own id in r0.
    for (i, desc) in app.tasks.iter().enumerate() {
        let id = TaskId(TaskId::FIRST_USER + i as u8);
        let mut task = Task::from_descriptor(desc, id);
        let (_, ram_end) = task.ram_range();
        task.ctx.main.save = arch::SavedState::at_frame(arch::build_initial_frame(
            ram_end,
            desc.entry_point,
            [u32::from(id.0), 0, 0, 0],
        ));
        klog!("task '{}' in slot {}", desc.name, desc.slot);
        k.tasks[id.index()] = task;
    }
    for i in (TaskId::FIRST_USER as usize + app.tasks.len())..NUM_TASKS {
        k.tasks[i] = Task::unpopulated(TaskId(i as u8));
    }
    k.sched.num_user_tasks = app.tasks.len() as u8;

    // The edge-routing dispatcher owns all seven controller interrupts.
    // Their NVIC enables are harmless now: every line is still masked at
    // the controller.
    for irq in devmap::EXTI_IRQS {
        k.irqs
            .install(irq, IrqHandler::Kernel(crate::exti::dispatch))
            .unwrap_or_else(|_| panic!("exti interrupt doubly routed"));
        arch::enable_irq(irq, true);
    }

    unsafe {
        arch::set_kernel(k);
        arch::init_memory_protection();
    }

    // Elect and go. The first election lands on a user task (they boot
    // runnable); the hand-off never returns.
    let first = k.elect();
    k.switch_to(first);
    klog!("handing off to '{}'", k.task(first).name());
    unsafe { arch::start_first_task(tick_divisor, k.task(first)) }
}
