// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-in architecture layer for development machines.
//!
//! Everything here either does nothing (interrupt controller pokes, MPU
//! loads) or keeps its state in thread-locals so concurrently running tests
//! don't interfere: the tick counter, the deferred-switch flag, and a
//! heap-backed stand-in for the shared interrupt stack.

macro_rules! klog {
    ($($tt:tt)*) => {{
        let _ = format_args!($($tt)*);
    }};
}

macro_rules! uassert {
    ($cond:expr) => {
        assert!($cond)
    };
}

use std::cell::Cell;

use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::mpm::DynLayout;
use crate::time::Timestamp;

/// Advisory core clock, matching the reference board.
pub const CLOCK_MHZ: u32 = 168;

pub const EXC_RETURN_CONST: u32 = 0xFFFF_FFFD;

/// Callee-saved machine state, mirroring the hardware layout so portable
/// code sees one shape.
#[derive(Debug, Default)]
pub struct SavedState {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub psp: usize,
    pub exc_return: u32,
}

impl SavedState {
    /// A fresh context whose stacked frame lives at `psp`.
    pub fn at_frame(psp: usize) -> Self {
        Self {
            psp,
            exc_return: EXC_RETURN_CONST,
            ..Self::default()
        }
    }
}

/// The hardware-stacked exception frame.
#[derive(Debug, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// Initial program status word: Thumb bit set.
pub const INITIAL_PSR: u32 = 1 << 24;

/// Builds a task's initial exception frame at the top of a stack and
/// returns the resulting stack pointer.
pub fn build_initial_frame(stack_top: usize, entry: u32, args: [u32; 4]) -> usize {
    let psp = (stack_top - core::mem::size_of::<ExceptionFrame>()) & !0x7;
    let frame = ExceptionFrame {
        r0: args[0],
        r1: args[1],
        r2: args[2],
        r3: args[3],
        r12: 0,
        // Returning from the entry function is an error; park the return
        // address on a guaranteed-faulting value.
        lr: 0xFFFF_FFFF,
        pc: entry | 1,
        xpsr: INITIAL_PSR,
    };
    // Safety: callers hand us the top of a real, unused stack.
    unsafe {
        core::ptr::write_volatile(psp as *mut ExceptionFrame, frame);
    }
    psp
}

thread_local! {
    static TICKS: Cell<u64> = const { Cell::new(0) };
    static PEND: Cell<bool> = const { Cell::new(false) };
    static ISR_STACK: Cell<(usize, usize)> = const { Cell::new((0, 0)) };
    static KERNEL: Cell<*mut crate::kernel::Kernel> = const { Cell::new(core::ptr::null_mut()) };
}

pub fn now() -> Timestamp {
    Timestamp::from(TICKS.with(|t| t.get()))
}

pub fn cycles64() -> u64 {
    now().millis() * 1000 * u64::from(CLOCK_MHZ)
}

/// Test control: advances the fake tick counter.
pub fn test_advance_ticks(ms: u64) {
    TICKS.with(|t| t.set(t.get() + ms));
}

pub fn pend_switch() {
    PEND.with(|p| p.set(true));
}

/// Test control: reads and clears the deferred-switch flag.
pub fn test_take_pend() -> bool {
    PEND.with(|p| p.replace(false))
}

pub fn with_irqs_masked<R>(f: impl FnOnce() -> R) -> R {
    f()
}

/// The shared interrupt stack: a leaked per-thread buffer standing in for
/// the fixed kernel-RAM window.
pub fn isr_stack() -> (usize, usize) {
    ISR_STACK.with(|s| {
        let (base, top) = s.get();
        if base != 0 {
            return (base, top);
        }
        let size = crate::layout::STACK_SIZE_ISR as usize;
        let buf: &'static mut [u8] = Box::leak(vec![0u8; size].into_boxed_slice());
        let base = buf.as_mut_ptr() as usize;
        s.set((base, base + size));
        (base, base + size)
    })
}

pub unsafe fn set_kernel(k: *mut crate::kernel::Kernel) {
    KERNEL.with(|cell| cell.set(k));
}

pub unsafe fn with_kernel<R>(f: impl FnOnce(&mut crate::kernel::Kernel) -> R) -> R {
    let ptr = KERNEL.with(|cell| cell.get());
    uassert!(!ptr.is_null());
    // Safety: per set_kernel's contract, the pointer outlives us and is not
    // concurrently aliased on this thread.
    f(unsafe { &mut *ptr })
}

pub unsafe fn set_current_task(_task: &crate::task::Task) {}

pub fn apply_memory_protection(_layout: &DynLayout) {}

pub fn enable_irq(_n: u8, _also_clear_pending: bool) {}

pub fn disable_irq(_n: u8, _also_clear_pending: bool) {}

pub fn clear_pending_irq(_n: u8) {}

pub fn wait_for_interrupt() {
    std::thread::yield_now();
}

pub fn reset() -> ! {
    panic!("system reset requested");
}

pub unsafe fn start_first_task(_tick_divisor: u32, _task: &crate::task::Task) -> ! {
    panic!("entering userland");
}
