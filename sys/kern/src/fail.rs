// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel failure recording.
//!
//! A kernel panic is fatal by design: interrupts are masked, the reason is
//! recorded where tooling can find it, a breakpoint fires for any attached
//! debugger, and the processor spins. Nothing is restarted -- a kernel that
//! has caught itself lying must not keep scheduling.
//!
//! The binary interface for debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`, cleared before kernel
//!   main and set on the way down.
//! - `kern::fail::KERNEL_EPITAPH` is a fixed byte array receiving as much
//!   of the panic message (UTF-8) as fits, NUL-padded. Trim trailing NULs
//!   when printing.

#[cfg(target_os = "none")]
use core::fmt::Write;

/// Flag that gets set by all failure paths, giving tools a one-stop shop
/// for triage.
#[cfg(target_os = "none")]
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

#[cfg(target_os = "none")]
const EPITAPH_LEN: usize = 128;

/// Records up to `EPITAPH_LEN` bytes describing the failure.
#[cfg(target_os = "none")]
#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

#[cfg(target_os = "none")]
fn begin_epitaph() -> &'static mut [u8; EPITAPH_LEN] {
    // Safety: single-core, interrupts already off on this path, and the
    // flag ensures only the first failure writes.
    let already = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if already {
        // A panic inside the panic path; there is nothing clever left to
        // do.
        loop {
            cortex_m::asm::nop();
        }
    }
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) }
}

#[cfg(target_os = "none")]
struct Eulogist {
    dest: &'static mut [u8],
}

#[cfg(target_os = "none")]
impl Write for Eulogist {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let s = s.as_bytes();
        let n = s.len().min(self.dest.len());
        let (dest, leftovers) = {
            let taken = core::mem::take(&mut self.dest);
            taken.split_at_mut(n)
        };
        dest.copy_from_slice(&s[..n]);
        self.dest = leftovers;
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    cortex_m::interrupt::disable();

    let buf = begin_epitaph();
    let mut writer = Eulogist { dest: buf };
    write!(writer, "{info}").ok();

    cortex_m::asm::bkpt();
    loop {
        cortex_m::asm::nop();
    }
}
