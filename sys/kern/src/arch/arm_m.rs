// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for ARMv7E-M.
//!
//! # Timer
//!
//! The system tick timer is the kernel timer. Its counter is small and only
//! counts down, so at each interrupt we increment the `TICKS` global that
//! holds the real kernel timestamp, and drive sleep expiry and the periodic
//! election from there. The cycle counter in the debug watchpoint unit
//! provides the high-resolution time sources, with a software-maintained
//! high word because the hardware counter is 32 bits.
//!
//! # Interrupt structure
//!
//! Three service routines carry the kernel:
//!
//! - `SVCall` takes the trap a task raises. Immediate 0 queues a syscall,
//!   immediate 1 marks the end of a deferred interrupt handler, and a
//!   reserved immediate is the one-way entry used at boot to start the
//!   first task.
//! - `SysTick` maintains time. It does not switch contexts itself; if an
//!   election is due it raises the deferred-switch interrupt.
//! - `PendSV` performs every context switch. It runs at the tail of any
//!   handler chain, saves the outgoing thread's callee-saved state, elects,
//!   reprograms the protection regions, and restores the incoming thread.
//!
//! All other external interrupts funnel through `DefaultHandler`, which
//! hands them to the routing table; the kernel entry points share one
//! (lowest) priority so kernel code is never preempted by kernel code,
//! while the fault handlers sit above them.
//!
//! On exception entry the hardware stacks r0-r3, r12, lr, pc and xPSR onto
//! the interrupted stack; the handlers here additionally store r4-r11, the
//! process stack pointer and the exception-return word into the save area
//! of the current thread's context, through `CURRENT_SAVE_PTR`. That
//! pointer -- not a task pointer -- is what the assembly follows, because a
//! task has two contexts and only the scheduler knows which one is live.

use core::arch::global_asm;
use core::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::kernel::Kernel;
use crate::layout;
use crate::mpm::{DynLayout, Window, WindowKind};
use crate::task::{Task, TaskKind};
use crate::time::Timestamp;

#[cfg(not(any(feature = "klog-semihosting", feature = "klog-itm")))]
macro_rules! klog {
    ($($tt:tt)*) => {{
        let _ = format_args!($($tt)*);
    }};
}

#[cfg(feature = "klog-itm")]
macro_rules! klog {
    ($($tt:tt)*) => {
        #[allow(unused_unsafe)]
        unsafe {
            let stim = &mut (*cortex_m::peripheral::ITM::PTR).stim[0];
            cortex_m::iprintln!(stim, $($tt)*);
        }
    };
}

#[cfg(feature = "klog-semihosting")]
macro_rules! klog {
    ($($tt:tt)*) => {
        let _ = cortex_m_semihosting::hprintln!($($tt)*);
    };
}

macro_rules! uassert {
    ($cond:expr) => {
        if !$cond {
            panic!("assertion failed");
        }
    };
}

/// Core clock in MHz once the PLL is up; used to scale cycle counts.
pub const CLOCK_MHZ: u32 = 168;

/// EXC_RETURN selecting thread mode on the process stack, no FPU state.
/// Tasks here do not touch the FPU, so lazy stacking never enters the
/// picture.
pub const EXC_RETURN_CONST: u32 = 0xFFFF_FFFD;

/// Initial program status word: Thumb bit set.
pub const INITIAL_PSR: u32 = 1 << 24;

/// On ARMv7-M we have to use globals to communicate with the entry/exit
/// assembly, since there is no scratch register. `CURRENT_SAVE_PTR` points
/// at the live context's save area; `CURRENT_TASK_PTR` identifies the task
/// for the Rust side.
#[no_mangle]
static CURRENT_SAVE_PTR: AtomicPtr<SavedState> = AtomicPtr::new(core::ptr::null_mut());

#[no_mangle]
static CURRENT_TASK_PTR: AtomicPtr<Task> = AtomicPtr::new(core::ptr::null_mut());

/// The kernel executive, installed once at startup.
static KERNEL_PTR: AtomicPtr<Kernel> = AtomicPtr::new(core::ptr::null_mut());

/// To allow our clock frequency to be easily determined from a debugger, we
/// store it in memory.
#[no_mangle]
static CLOCK_FREQ_KHZ: AtomicU32 = AtomicU32::new(0);

/// Kernel timestamp in ticks; split across two words because this core has
/// no 64-bit atomics. Only touched from non-preemptible kernel context.
static TICKS: [AtomicU32; 2] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicU32 = AtomicU32::new(0);
    [ZERO; 2]
};

/// Software-maintained high word of the cycle counter, plus the last low
/// word observed for wrap detection.
static CYCCNT_HIGH: AtomicU32 = AtomicU32::new(0);
static CYCCNT_LAST: AtomicU32 = AtomicU32::new(0);

/// Callee-saved machine state of one thread context.
///
/// The assembly below stores the ten words in field order with a single
/// store-multiple; keep the fields contiguous and in this order.
#[repr(C)]
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

/// The exception frame the hardware stacks on trap entry.
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

/// Builds a task's initial exception frame at the top of a stack and
/// returns the resulting stack pointer.
pub fn build_initial_frame(stack_top: usize, entry: u32, args: [u32; 4]) -> usize {
    // Exception frames must be 8-byte aligned.
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
        pc: entry | 1, // Thumb bit
        xpsr: INITIAL_PSR,
    };
    // Safety: callers hand us the top of a real, unused stack.
    unsafe {
        core::ptr::write_volatile(psp as *mut ExceptionFrame, frame);
    }
    psp
}

/// Installs the kernel executive for the interrupt paths.
///
/// # Safety
///
/// `k` must point to the fully initialized, statically allocated executive,
/// and must be called before interrupts are enabled.
pub unsafe fn set_kernel(k: *mut Kernel) {
    KERNEL_PTR.store(k, Ordering::Relaxed);
}

/// Runs `f` with exclusive access to the kernel executive.
///
/// # Safety
///
/// Callers must be in a context that cannot overlap another holder of this
/// borrow: handler-mode code (which the kernel keeps non-reentrant by
/// priority assignment), or the deferred-work thread between interrupts.
pub unsafe fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let ptr = KERNEL_PTR.load(Ordering::Relaxed);
    uassert!(!ptr.is_null());
    // Safety: see function contract.
    f(unsafe { &mut *ptr })
}

/// Records `task` as the current one and points the context-switch
/// assembly at the save area of its live context. Also drops or restores
/// thread-mode privilege to match the task kind.
///
/// # Safety
///
/// This records pointers aliasing `task`. Do not read them back while a
/// `&mut` to the task table is live; in practice they are consumed by the
/// next kernel entry.
pub unsafe fn set_current_task(task: &Task) {
    let ctx = task.ctx.get(task.mode());
    CURRENT_SAVE_PTR.store(
        &ctx.save as *const SavedState as *mut SavedState,
        Ordering::Relaxed,
    );
    CURRENT_TASK_PTR.store(task as *const Task as *mut Task, Ordering::Relaxed);

    // nPRIV is all that distinguishes a kernel thread from a user one;
    // both run on the process stack.
    let mut control = cortex_m::register::control::read();
    control.set_npriv(if task.kind() == TaskKind::Kernel {
        cortex_m::register::control::Npriv::Privileged
    } else {
        cortex_m::register::control::Npriv::Unprivileged
    });
    unsafe {
        cortex_m::register::control::write(control);
    }
}

/// Requests a deferred context switch: the switch interrupt fires once the
/// current handler chain unwinds.
pub fn pend_switch() {
    cortex_m::peripheral::SCB::set_pendsv();
}

/// Runs `f` with external interrupts masked. Used only around the few
/// instructions that update the deferred-work ring indices.
pub fn with_irqs_masked<R>(f: impl FnOnce() -> R) -> R {
    cortex_m::interrupt::free(|_| f())
}

/// The shared deferred-interrupt stack window.
pub fn isr_stack() -> (usize, usize) {
    (
        layout::ISR_STACK_BASE as usize,
        layout::STACK_TOP_ISR as usize,
    )
}

/// Reads the tick counter. The tick interrupt cannot preempt kernel code,
/// so the two-word read is safe.
pub fn now() -> Timestamp {
    Timestamp::from([
        TICKS[0].load(Ordering::Relaxed),
        TICKS[1].load(Ordering::Relaxed),
    ])
}

/// Reads the monotonic cycle counter, overflow accounted.
pub fn cycles64() -> u64 {
    let dwt = unsafe { &*cortex_m::peripheral::DWT::PTR };
    let low = dwt.cyccnt.read();
    let mut high = CYCCNT_HIGH.load(Ordering::Relaxed);
    if low < CYCCNT_LAST.load(Ordering::Relaxed) {
        // Wrapped since the last maintenance pass; account for it here
        // without disturbing the stored state (the tick handler will).
        high += 1;
    }
    u64::from(high) << 32 | u64::from(low)
}

/// Tick-time maintenance of the cycle counter high word.
fn cyccnt_maintain() {
    let dwt = unsafe { &*cortex_m::peripheral::DWT::PTR };
    let low = dwt.cyccnt.read();
    if low < CYCCNT_LAST.load(Ordering::Relaxed) {
        CYCCNT_HIGH.fetch_add(1, Ordering::Relaxed);
    }
    CYCCNT_LAST.store(low, Ordering::Relaxed);
}

pub fn enable_irq(n: u8, also_clear_pending: bool) {
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg = usize::from(n) / 32;
    let bit = 1 << (u32::from(n) % 32);
    if also_clear_pending {
        // Do this _before_ enabling.
        unsafe {
            nvic.icpr[reg].write(bit);
        }
    }
    unsafe {
        nvic.iser[reg].write(bit);
    }
}

pub fn disable_irq(n: u8, also_clear_pending: bool) {
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg = usize::from(n) / 32;
    let bit = 1 << (u32::from(n) % 32);
    unsafe {
        nvic.icer[reg].write(bit);
    }
    if also_clear_pending {
        unsafe {
            nvic.icpr[reg].write(bit);
        }
    }
}

pub fn clear_pending_irq(n: u8) {
    let nvic = unsafe { &*cortex_m::peripheral::NVIC::PTR };
    let reg = usize::from(n) / 32;
    let bit = 1 << (u32::from(n) % 32);
    unsafe {
        nvic.icpr[reg].write(bit);
    }
}

/// Idles the core until the next interrupt.
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

pub fn reset() -> ! {
    cortex_m::peripheral::SCB::sys_reset()
}

// ---------------------------------------------------------------------------
// Memory protection

/// Fixed region numbers.
const REGION_SHARED_BOOT: u32 = 0;
const REGION_KERN_TEXT: u32 = 1;
const REGION_PERIPH: u32 = 2;
const REGION_KERN_RAM: u32 = 3;
const REGION_USER_RAM: u32 = 4;
const REGION_USER_TEXT: u32 = 5;
const REGION_WINDOW0: u32 = 6;
const REGION_WINDOW1: u32 = 7;

const MPU_CTRL_ENABLE: u32 = 0b001;
const MPU_CTRL_PRIVDEFENA: u32 = 0b100;

/// Access-permission encodings (RASR.AP). Chosen so privileged code is
/// never locked out of kernel bands.
const AP_PRIV_RW: u32 = 0b001;
const AP_PRIV_RW_USER_RO: u32 = 0b010;
const AP_FULL_RW: u32 = 0b011;
const AP_PRIV_RO: u32 = 0b101;
const AP_RO: u32 = 0b110;

/// Memory type encodings as (TEX, SCB) per the v7-M tables.
const MEM_DEVICE: (u32, u32) = (0b000, 0b001);
const MEM_NORMAL_WB: (u32, u32) = (0b001, 0b011);
const MEM_NORMAL_SHARED: (u32, u32) = (0b001, 0b111);

/// Encodes a RASR value. `size` must be a power of two of at least 32
/// bytes, and the matching RBAR base must be naturally aligned -- both
/// enforced by the device map and the linker layout, and rechecked here
/// because loading a malformed region would silently unprotect memory.
fn region_rasr(ap: u32, xn: bool, mem: (u32, u32), size: u32, srd: u8) -> Option<u32> {
    if size < 32 || !size.is_power_of_two() {
        return None;
    }
    // v7-M expresses size as log2 minus one.
    let l2size = 30 - size.leading_zeros();
    let (tex, scb) = mem;
    Some(
        (xn as u32) << 28
            | ap << 24
            | tex << 19
            | scb << 16
            | u32::from(srd) << 8
            | l2size << 1
            | 1,
    )
}

/// Raw region load. The protection unit is off while regions change; a
/// half-updated region with the unit live has caused real crashes on other
/// systems and there is no write order that avoids it.
unsafe fn load_region(region: u32, rbar: u32, rasr: u32) {
    let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };
    unsafe {
        mpu.rnr.write(region);
        mpu.rbar.write(rbar);
        mpu.rasr.write(rasr);
    }
}

unsafe fn disable_region(region: u32) {
    unsafe { load_region(region, 0, 0) }
}

/// Programs the four boot-time regions and turns the protection unit on.
/// The privileged default map stays enabled so the kernel itself is never
/// cut off by a programming mistake in the user bands.
///
/// # Safety
///
/// Call once, at startup, before the first task runs.
pub unsafe fn init_memory_protection() {
    let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };
    unsafe {
        mpu.ctrl.write(0);

        load_region(
            REGION_SHARED_BOOT,
            layout::SHARED_BASE,
            region_rasr(AP_RO, true, MEM_NORMAL_WB, layout::SHARED_SIZE, 0)
                .unwrap_or_else(|| panic!("bad shared region")),
        );
        load_region(
            REGION_KERN_TEXT,
            layout::KERN_TEXT_BASE,
            region_rasr(AP_PRIV_RO, false, MEM_NORMAL_WB, layout::KERN_TEXT_SIZE, 0)
                .unwrap_or_else(|| panic!("bad kernel text region")),
        );
        load_region(
            REGION_PERIPH,
            layout::PERIPH_BASE,
            region_rasr(AP_PRIV_RW, true, MEM_DEVICE, layout::PERIPH_SIZE, 0)
                .unwrap_or_else(|| panic!("bad peripheral region")),
        );
        load_region(
            REGION_KERN_RAM,
            layout::KERN_RAM_BASE,
            region_rasr(AP_PRIV_RW, true, MEM_NORMAL_WB, layout::KERN_RAM_SIZE, 0)
                .unwrap_or_else(|| panic!("bad kernel ram region")),
        );
        for region in REGION_USER_RAM..=REGION_WINDOW1 {
            disable_region(region);
        }

        mpu.ctrl.write(MPU_CTRL_ENABLE | MPU_CTRL_PRIVDEFENA);
    }
}

fn window_rasr(w: &Window) -> Option<u32> {
    match w.kind {
        WindowKind::DeviceRw => region_rasr(AP_FULL_RW, true, MEM_DEVICE, w.size, w.srd),
        WindowKind::DeviceRo => {
            region_rasr(AP_PRIV_RW_USER_RO, true, MEM_DEVICE, w.size, w.srd)
        }
        WindowKind::IsrStack => region_rasr(AP_FULL_RW, true, MEM_NORMAL_WB, w.size, w.srd),
    }
}

/// Loads the recomputed dynamic regions for an elected thread.
pub fn apply_memory_protection(layout_: &DynLayout) {
    let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };

    // Off during the update; see load_region.
    unsafe {
        mpu.ctrl.write(0);
    }

    unsafe {
        if layout_.user_enabled {
            let ram = region_rasr(
                AP_FULL_RW,
                true,
                MEM_NORMAL_SHARED,
                layout::USER_RAM_SIZE,
                layout_.slot_srd,
            )
            .unwrap_or_else(|| panic!("bad user ram band"));
            load_region(REGION_USER_RAM, layout::USER_RAM_BASE, ram);

            let text = region_rasr(
                AP_PRIV_RW_USER_RO,
                false,
                MEM_NORMAL_WB,
                layout::USER_TEXT_SIZE,
                layout_.slot_srd,
            )
            .unwrap_or_else(|| panic!("bad user text band"));
            load_region(REGION_USER_TEXT, layout::USER_TEXT_BASE, text);
        } else {
            disable_region(REGION_USER_RAM);
            disable_region(REGION_USER_TEXT);
        }

        for (i, w) in layout_.windows.iter().enumerate() {
            let region = REGION_WINDOW0 + i as u32;
            if !w.enabled {
                disable_region(region);
                continue;
            }
            // Base must be naturally aligned for the size or the unit
            // rejects the pair; a device that trips this is skipped (the
            // task faults on first access) rather than taking the kernel
            // down.
            match window_rasr(w) {
                Some(rasr) if w.base % w.size == 0 => load_region(region, w.base, rasr),
                _ => {
                    klog!("unmappable window at {:#x}", w.base);
                    disable_region(region);
                }
            }
        }

        mpu.ctrl.write(MPU_CTRL_ENABLE | MPU_CTRL_PRIVDEFENA);
    }
}

// ---------------------------------------------------------------------------
// Startup

pub unsafe fn set_clock_freq(khz: u32) {
    CLOCK_FREQ_KHZ.store(khz, Ordering::Relaxed);
}

/// Performs the one-way hand-off into the first elected task.
///
/// Sets exception priorities (faults above the kernel tier, everything
/// else at the bottom), starts the tick timer and the cycle counter, and
/// traps into `SVCall`'s startup path, which drops thread-mode privilege
/// and resumes the task's initial frame. It never returns.
///
/// # Safety
///
/// Call once, at the end of startup, with the task table and protection
/// regions initialized.
pub unsafe fn start_first_task(tick_divisor: u32, task: &Task) -> ! {
    unsafe {
        let scb = &*cortex_m::peripheral::SCB::PTR;
        // Enable the configurable fault exceptions (memory management, bus,
        // usage), so they don't all escalate to HardFault.
        scb.shcsr.modify(|x| x | 0b111 << 16);

        // Faults at priority 0; SVCall, SysTick and PendSV at the lowest
        // priority, which is what keeps the kernel non-reentrant.
        scb.shpr[0].write(0x00);
        scb.shpr[1].write(0x00);
        scb.shpr[2].write(0x00);
        scb.shpr[7].write(0xFF);
        scb.shpr[10].write(0xFF);
        scb.shpr[11].write(0xFF);

        // Trap on divide-by-zero; silently producing zero helps nobody.
        const DIV_0_TRP: u32 = 1 << 4;
        scb.ccr.modify(|x| x | DIV_0_TRP);

        // Every external interrupt joins the kernel tier.
        let nvic = &*cortex_m::peripheral::NVIC::PTR;
        let icb = &*cortex_m::peripheral::ICB::PTR;
        let irq_block_count = (icb.ictr.read() as usize & 0xF) + 1;
        for i in 0..irq_block_count * 32 {
            nvic.ipr[i].write(0xFFu8);
        }
    }

    unsafe {
        // Tick timer: processor clock, interrupt on wrap.
        let syst = &*cortex_m::peripheral::SYST::PTR;
        syst.rvr.write(tick_divisor - 1);
        syst.cvr.write(0);
        syst.csr.modify(|v| v | 0b111);

        // Cycle counter: trace on, counter on.
        let dcb = &*cortex_m::peripheral::DCB::PTR;
        dcb.demcr.modify(|v| v | 1 << 24);
        let dwt = &*cortex_m::peripheral::DWT::PTR;
        dwt.ctrl.modify(|v| v | 1);
    }

    unsafe {
        set_current_task(task);
    }

    // Load the process stack pointer for the first task; harmless while we
    // run on the main stack.
    unsafe {
        cortex_m::register::psp::write(task.ctx.get(task.mode()).save.psp as u32);
    }

    // Trap into the kernel. The SVCall entry recognizes a call from the
    // main stack as this one-time startup and branches to the hand-off
    // path.
    unsafe {
        core::arch::asm!(
            "
            @ Restore callee-save registers from the first task's context.
            ldm {save}, {{r4-r11}}
            @ Trap.
            svc #0xFF
            @ noreturn generates a UDF here in case that should return.
            ",
            save = in(reg) &task.ctx.get(task.mode()).save.r4,
            options(noreturn),
        )
    }
}

// ---------------------------------------------------------------------------
// Exception handlers

// All the kernel entry handlers use the same strategy. First, LR is
// inspected: on exception entry it encodes the interrupted state, and a
// trap from thread mode on the *main* stack can only be the startup
// hand-off. Then the callee-saved state goes into the live context's save
// area through CURRENT_SAVE_PTR, the Rust side runs, and the sequence is
// reversed -- possibly through a different save area, if the Rust side
// elected another thread.
global_asm! {"
    .section .text.SVCall
    .globl SVCall
    .type SVCall,function
    SVCall:
        @ Inspect LR to figure out the caller's mode.
        mov r0, lr
        mov r1, #0xFFFFFFF3
        bic r0, r1
        @ Thread mode + main stack means the startup hand-off.
        cmp r0, #0x8
        beq 1f

        @ Store volatile state through the current save pointer.
        movw r0, #:lower16:CURRENT_SAVE_PTR
        movt r0, #:upper16:CURRENT_SAVE_PTR
        ldr r1, [r0]
        mrs r12, PSP
        stm r1!, {{r4-r12, lr}}

        bl svc_entry

        @ Return into whichever context is now current.
        movw r0, #:lower16:CURRENT_SAVE_PTR
        movt r0, #:upper16:CURRENT_SAVE_PTR
        ldr r0, [r0]
        ldm r0!, {{r4-r12, lr}}
        msr PSP, r12
        bx lr

    1:  @ Starting the first task.
        movs r0, #1         @ get bitmask to...
        msr CONTROL, r0     @ ...shed privs from thread mode.
                            @ note: no barrier here because exc return
                            @ serves as barrier

        mov lr, {exc_return}    @ materialize EXC_RETURN to land in
                                @ thread mode on the process stack
        bx lr
    ",
    exc_return = const EXC_RETURN_CONST,
}

global_asm! {"
    .section .text.PendSV
    .globl PendSV
    .type PendSV,function
    PendSV:
        @ Store volatile state through the current save pointer.
        movw r0, #:lower16:CURRENT_SAVE_PTR
        movt r0, #:upper16:CURRENT_SAVE_PTR
        ldr r1, [r0]
        mrs r12, PSP
        stm r1!, {{r4-r12, lr}}

        bl pendsv_entry

        @ Return into whichever context is now current.
        movw r0, #:lower16:CURRENT_SAVE_PTR
        movt r0, #:upper16:CURRENT_SAVE_PTR
        ldr r0, [r0]
        ldm r0!, {{r4-r12, lr}}
        msr PSP, r12
        bx lr
    ",
}

/// Rust side of the trap instruction, after context save.
#[no_mangle]
unsafe extern "C" fn svc_entry() {
    let task_ptr = CURRENT_TASK_PTR.load(Ordering::Relaxed);
    uassert!(!task_ptr.is_null());

    // Pull what we need out of the task before aliasing the table.
    let (caller, mode, psp) = {
        // Safety: the pointer tracks the task table, which nothing else
        // borrows while we're in handler mode.
        let t = unsafe { &*task_ptr };
        (t.id(), t.mode(), t.ctx.get(t.mode()).save.psp)
    };

    // The stacked frame tells us which trap this is. The hardware stacked
    // it through the task's stack pointer; if that pointer were bad we
    // would have taken a fault instead of arriving here.
    let frame = unsafe { &mut *(psp as *mut ExceptionFrame) };
    let imm = unsafe { *(((frame.pc as usize & !1) - 2) as *const u8) };

    match imm {
        // A finished deferred handler.
        1 => unsafe {
            with_kernel(|k| k.svc_isr_exit(caller));
        },
        // A syscall request.
        0 => {
            if mode == abi::ThreadMode::Isr {
                // Deferred handlers share one stack and cannot block;
                // syscalls are refused there outright.
                frame.r0 = abi::SysError::Denied.code();
                return;
            }
            let queued = unsafe { with_kernel(|k| k.svc_syscall_request(caller)) };
            if let Err(e) = queued {
                frame.r0 = e.code();
            }
            pend_switch();
        }
        _ => {
            klog!("unknown trap immediate {}", imm);
            frame.r0 = abi::SysError::Inval.code();
        }
    }
}

/// Rust side of the deferred-switch handler, after context save.
#[no_mangle]
unsafe extern "C" fn pendsv_entry() {
    unsafe {
        with_kernel(|k| k.on_pendsv());
    }
}

/// Tick handler. Maintains time and requests an election when one is due;
/// it never switches contexts itself.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    // Advance the kernel's notion of time by adding 1. Laboriously.
    let t0 = TICKS[0].load(Ordering::Relaxed);
    let t1 = TICKS[1].load(Ordering::Relaxed);
    let (t0, t1) = if let Some(t0p) = t0.checked_add(1) {
        TICKS[0].store(t0p, Ordering::Relaxed);
        (t0p, t1)
    } else {
        // Low word rolled over. Checked addition on the high word: an
        // overflow *there* means state corruption, not time passing.
        TICKS[0].store(0, Ordering::Relaxed);
        TICKS[1].store(t1 + 1, Ordering::Relaxed);
        (0, t1 + 1)
    };

    cyccnt_maintain();

    let now = Timestamp::from([t0, t1]);
    let switch = unsafe { with_kernel(|k| k.on_systick(now)) };
    if switch {
        pend_switch();
    }
}

/// Every external interrupt funnels through here.
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn DefaultHandler() {
    // The bottom bits of IPSR name the active exception.
    let exception_num = {
        let mut ipsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {}, IPSR",
                out(reg) ipsr,
                options(pure, nomem, preserves_flags, nostack),
            );
        }
        ipsr & 0x1FF
    };

    match exception_num {
        2 => panic!("NMI"),
        12 => panic!("DebugMon"),
        x if x >= 16 => {
            // External interrupt; hardware numbering starts at 16.
            let irq = (exception_num - 16) as u8;
            unsafe {
                with_kernel(|k| crate::irq::dispatch_external(k, irq));
            }
        }
        x => panic!("unexpected exception {x}"),
    }
}

// ---------------------------------------------------------------------------
// Faults

bitflags::bitflags! {
    /// Bits in the Configurable Fault Status Register.
    #[repr(transparent)]
    struct Cfsr: u32 {
        // Memory management fault status
        const IACCVIOL = 1 << 0;
        const DACCVIOL = 1 << 1;
        const MUNSTKERR = 1 << 3;
        const MSTKERR = 1 << 4;
        const MLSPERR = 1 << 5;
        const MMARVALID = 1 << 7;

        // Bus fault status
        const IBUSERR = 1 << 8;
        const PRECISERR = 1 << 9;
        const IMPRECISERR = 1 << 10;
        const UNSTKERR = 1 << 11;
        const STKERR = 1 << 12;
        const BFARVALID = 1 << 15;

        // Usage fault status
        const UNDEFINSTR = 1 << 16;
        const INVSTATE = 1 << 17;
        const INVPC = 1 << 18;
        const NOCP = 1 << 19;
        const UNALIGNED = 1 << 24;
        const DIVBYZERO = 1 << 25;
    }
}

#[repr(u8)]
#[allow(dead_code)]
enum FaultType {
    MemoryManagement = 4,
    BusFault = 5,
    UsageFault = 6,
}

// The three configurable faults share one entry sequence: save context
// like any kernel entry, pass the fault number from IPSR, and let the Rust
// side park the offender and elect a survivor. HardFault means the fault
// machinery itself failed; that one just stops.
global_asm! {"
    .section .text.configurable_fault
    .globl configurable_fault
    .type configurable_fault,function
    configurable_fault:
        movw r0, #:lower16:CURRENT_SAVE_PTR
        movt r0, #:upper16:CURRENT_SAVE_PTR
        ldr r1, [r0]
        mrs r12, PSP
        stm r1!, {{r4-r12, lr}}

        mrs r0, IPSR
        and r0, r0, #0xf
        bl handle_fault

        @ The current context has changed; resume it.
        movw r0, #:lower16:CURRENT_SAVE_PTR
        movt r0, #:upper16:CURRENT_SAVE_PTR
        ldr r0, [r0]
        ldm r0!, {{r4-r12, lr}}
        msr PSP, r12
        bx lr

    .section .text.MemoryManagement
    .globl MemoryManagement
    .type MemoryManagement,function
    MemoryManagement:
        b configurable_fault

    .section .text.BusFault
    .globl BusFault
    .type BusFault,function
    BusFault:
        b configurable_fault

    .section .text.UsageFault
    .globl UsageFault
    .type UsageFault,function
    UsageFault:
        b configurable_fault

    .section .text.HardFault
    .globl HardFault
    .type HardFault,function
    HardFault:
        @ lie down try not to cry cry a lot
        movw r0, #0xed0c
        movt r0, #0xe000
        movw r1, #0x0004
        movt r1, #0x05fa
        str  r1, [r0]
    1:
        b 1b
    ",
}

/// Rust side of the configurable-fault path.
#[no_mangle]
unsafe extern "C" fn handle_fault(fault_num: u32) {
    let scb = unsafe { &*cortex_m::peripheral::SCB::PTR };
    let cfsr = Cfsr::from_bits_truncate(scb.cfsr.read());

    let task_ptr = CURRENT_TASK_PTR.load(Ordering::Relaxed);
    uassert!(!task_ptr.is_null());
    let (kind, exc_return, psp) = {
        let t = unsafe { &*task_ptr };
        (
            t.kind(),
            t.ctx.get(t.mode()).save.exc_return,
            t.ctx.get(t.mode()).save.psp,
        )
    };

    let from_thread_mode = exc_return & 0b1000 != 0;
    if !from_thread_mode || kind == TaskKind::Kernel {
        // The kernel itself (handler-mode code, or one of the built-in
        // threads) faulted. Nothing to isolate; stop with the registers on
        // display.
        panic!(
            "kernel fault {}: CFSR={:#010x}, MMFAR={:#010x}, BFAR={:#010x}",
            fault_num,
            cfsr.bits(),
            scb.mmfar.read(),
            scb.bfar.read(),
        );
    }

    // A fault taken while stacking another exception leaves that exception
    // pended; returning to a task would then replay it as a phantom trap.
    // Clear the architectural pendings wholesale.
    unsafe {
        scb.shcsr.modify(|bits| bits & !(0b1111 << 12));
    }

    let cause = match fault_num as u8 {
        x if x == FaultType::MemoryManagement as u8 => {
            if cfsr.contains(Cfsr::MSTKERR) {
                crate::err::FaultCause::StackOverflow { address: psp as u32 }
            } else if cfsr.contains(Cfsr::IACCVIOL) {
                crate::err::FaultCause::IllegalText
            } else {
                crate::err::FaultCause::MemoryAccess {
                    address: cfsr
                        .contains(Cfsr::MMARVALID)
                        .then(|| scb.mmfar.read()),
                }
            }
        }
        x if x == FaultType::BusFault as u8 => crate::err::FaultCause::BusError {
            address: cfsr.contains(Cfsr::BFARVALID).then(|| scb.bfar.read()),
        },
        _ => {
            if cfsr.contains(Cfsr::DIVBYZERO) {
                crate::err::FaultCause::DivideByZero
            } else if cfsr.contains(Cfsr::UNDEFINSTR) {
                crate::err::FaultCause::IllegalInstruction
            } else {
                crate::err::FaultCause::Other(cfsr.bits())
            }
        }
    };

    // Write-one-to-clear: we are responsible for clearing the recorded
    // status.
    unsafe {
        scb.cfsr.write(cfsr.bits());
    }

    unsafe {
        with_kernel(|k| {
            let current = k.sched.current;
            let mode = k.task(current).mode();
            klog!("task {} fault {:?}", current.0, cause);
            k.task_mut(current).set_state(mode, abi::TaskState::Fault);

            let next = k.elect();
            if next == current {
                panic!("fault handler re-elected the faulting task");
            }
            k.switch_to(next);
        });
    }
}
