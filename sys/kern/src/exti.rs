// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! External-interrupt-controller line management and dispatch.
//!
//! The controller multiplexes GPIO pin edges onto a small set of interrupt
//! lines: pins 0..=4 each have a dedicated line, pins 5..=9 share one, and
//! pins 10..=15 share another. At most one GPIO pin may drive each line, so
//! ownership is tracked per line here, not per pin.
//!
//! The dispatcher is a kernel interrupt cell. It decodes which line(s)
//! fired, resolves the owning pin -- and through the GPIO ownership table,
//! the owning task -- and defers the registered edge handler like any other
//! user interrupt. A line registered as locking masks itself after firing
//! and stays masked until the owner asks for it back.

use abi::{ExtiLock, ExtiTrigger, GpioRef, SysError};

use crate::arch;
use crate::kernel::Kernel;
use crate::soc;
use crate::softirq::IsrEntry;

/// Lines 0..=15, one per pin number.
pub const NUM_LINES: usize = 16;

/// Per-line ownership: which pin drives the line, if any.
pub struct ExtiTable {
    line: [Option<GpioRef>; NUM_LINES],
}

impl ExtiTable {
    pub const fn new() -> Self {
        Self {
            line: [None; NUM_LINES],
        }
    }

    /// Claims the line matching `kref`'s pin number. One pin per line, so a
    /// taken line is refused.
    pub fn register(&mut self, kref: GpioRef) -> Result<(), SysError> {
        let line = &mut self.line[usize::from(kref.pin())];
        if line.is_some() {
            return Err(SysError::Busy);
        }
        *line = Some(kref);
        Ok(())
    }

    /// Releases the line if `kref` is the registered driver.
    pub fn release(&mut self, kref: GpioRef) {
        let line = &mut self.line[usize::from(kref.pin())];
        if *line == Some(kref) {
            *line = None;
        }
    }

    pub fn owner(&self, line: u8) -> Option<GpioRef> {
        self.line[usize::from(line)]
    }
}

/// Pin numbers decoded by one firing of interrupt `irq`.
fn lines_of_irq(irq: u8) -> (u8, u8) {
    match irq {
        6 => (0, 0),
        7 => (1, 1),
        8 => (2, 2),
        9 => (3, 3),
        10 => (4, 4),
        23 => (5, 9),
        _ => (10, 15),
    }
}

/// The external-interrupt dispatcher, installed as a kernel cell on all
/// seven controller interrupts.
pub fn dispatch(k: &mut Kernel, irq: u8) {
    let (first, last) = lines_of_irq(irq);
    let pending = soc::exti_pending_lines();

    for line in first..=last {
        if pending & (1 << line) == 0 {
            continue;
        }
        soc::exti_clear_pending(line);
        handle_line(k, irq, line);
    }

    arch::clear_pending_irq(irq);
}

fn handle_line(k: &mut Kernel, irq: u8, line: u8) {
    let kref = match k.extis.owner(line) {
        Some(kref) => kref,
        None => {
            // The controller is routing a line nobody registered; the
            // hardware and our tables disagree.
            klog!("spurious EXTI line {}", line);
            return;
        }
    };

    // Resolve the owning task through the GPIO ownership table, then pull
    // the registered edge handler out of the owning device's descriptor.
    let (task, dev_id) = match k.gpios.owner_of(kref) {
        Some(owner) => owner,
        None => {
            klog!("EXTI line {} without GPIO owner", line);
            return;
        }
    };
    let gpio = match k.devices.get(dev_id).gpio_descriptor(kref) {
        Some(g) => *g,
        None => return,
    };

    if gpio.exti_handler != 0 {
        k.defer_isr(IsrEntry {
            task,
            irq,
            handler: gpio.exti_handler,
            status: u32::from(kref.0),
            data: 0,
        });
    }

    if gpio.exti_lock == ExtiLock::Locked {
        soc::exti_disable(kref);
    }
}

/// Re-arms a locked line on behalf of its owner; the access checks have
/// already been done by the syscall layer.
pub fn unlock(kref: GpioRef, trigger: ExtiTrigger) -> Result<(), SysError> {
    if trigger == ExtiTrigger::None {
        return Err(SysError::Inval);
    }
    soc::exti_clear_pending(kref.pin());
    soc::exti_enable(kref);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::gpio_port;

    #[test]
    fn one_pin_per_line() {
        let mut t = ExtiTable::new();
        let pb3 = GpioRef::new(gpio_port::PB, 3);
        let pc3 = GpioRef::new(gpio_port::PC, 3);
        t.register(pb3).unwrap();
        // Same line (pin 3) from another port: refused.
        assert_eq!(t.register(pc3), Err(SysError::Busy));
        assert_eq!(t.owner(3), Some(pb3));

        // Releasing with the wrong pin reference is a no-op.
        t.release(pc3);
        assert_eq!(t.owner(3), Some(pb3));
        t.release(pb3);
        assert_eq!(t.owner(3), None);
        t.register(pc3).unwrap();
    }

    #[test]
    fn irq_to_line_ranges() {
        assert_eq!(lines_of_irq(6), (0, 0));
        assert_eq!(lines_of_irq(10), (4, 4));
        assert_eq!(lines_of_irq(23), (5, 9));
        assert_eq!(lines_of_irq(40), (10, 15));
    }
}

#[cfg(test)]
mod dispatch_tests {
    use super::*;
    use crate::testutil::{self, A};
    use abi::{gpio_port, ExtiTrigger};

    fn register_edge_device(
        k: &mut Kernel,
        kref: GpioRef,
        lock: ExtiLock,
    ) -> u32 {
        let handler = k.tasks[A.index()].text_range().0 as u32 + 0x161;
        let mut udev = testutil::dev_desc(0, 0);
        udev.gpio_count = 1;
        udev.gpios[0] = testutil::blank_gpio();
        udev.gpios[0].kref = kref;
        udev.gpios[0].exti_trigger = ExtiTrigger::Rise;
        udev.gpios[0].exti_lock = lock;
        udev.gpios[0].exti_handler = handler;
        k.register_device(A, &udev).unwrap();
        handler
    }

    #[test]
    fn edge_events_defer_to_the_pin_owner() {
        let mut k = testutil::kernel();
        let kref = GpioRef::new(gpio_port::PB, 3);
        let handler = register_edge_device(&mut k, kref, ExtiLock::Unlocked);

        soc::test_set_exti_pending(3);
        dispatch(&mut k, 9); // EXTI3

        let entry = k.pop_isr_entry().expect("no deferred record");
        assert_eq!(entry.task, A);
        assert_eq!(entry.handler, handler);
        assert_eq!(entry.status, u32::from(kref.0));
        // The pending bit was consumed.
        assert_eq!(soc::exti_pending_lines() & (1 << 3), 0);
    }

    #[test]
    fn locking_lines_mask_themselves_until_unlocked() {
        let mut k = testutil::kernel();
        let kref = GpioRef::new(gpio_port::PC, 7);
        register_edge_device(&mut k, kref, ExtiLock::Locked);
        soc::exti_enable(kref);

        soc::test_set_exti_pending(7);
        dispatch(&mut k, 23); // EXTI9_5
        assert!(k.pop_isr_entry().is_some());
        assert!(!soc::test_exti_unmasked(7));

        unlock(kref, ExtiTrigger::Rise).unwrap();
        assert!(soc::test_exti_unmasked(7));
        // A pin with no edge routing cannot be unlocked.
        assert_eq!(unlock(kref, ExtiTrigger::None), Err(SysError::Inval));
    }

    #[test]
    fn orphan_lines_are_dropped_quietly() {
        let mut k = testutil::kernel();
        soc::test_set_exti_pending(4);
        dispatch(&mut k, 10); // EXTI4: nobody registered
        assert!(k.pop_isr_entry().is_none());
        assert_eq!(soc::exti_pending_lines() & (1 << 4), 0);
    }
}
