// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time SoC device map.
//!
//! User tasks name devices by bare (address, size) pairs; this table is the
//! ground truth the registrar checks those claims against, and it carries
//! the per-device facts the kernel needs that tasks must not supply
//! themselves: the clock gate, the minimum permission class, and the MPU
//! window attributes.
//!
//! The table covers the user-registrable peripherals of the STM32F407.
//! Interrupt numbers are external (NVIC) numbers. Note that UART4 and UART5
//! have their own interrupt lines (52 and 53); they share nothing with
//! USART3.

use abi::Permissions;

/// Number of external interrupt lines on this SoC.
pub const NUM_IRQS: usize = 91;

/// External interrupts a user device may claim. Line 0 is the window
/// watchdog, which stays with the kernel.
pub const USER_IRQ_MIN: u8 = 1;
pub const USER_IRQ_MAX: u8 = (NUM_IRQS - 1) as u8;

/// Which bus a peripheral's clock-enable bit lives on.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Bus {
    Ahb1,
    Ahb2,
    Apb1,
    Apb2,
}

/// A peripheral clock-enable bit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockGate {
    pub bus: Bus,
    pub bit: u8,
}

/// One user-registrable device.
#[derive(Debug)]
pub struct DevMapEntry {
    pub name: &'static str,
    pub base: u32,
    pub size: u32,
    /// `None` for devices without a gated clock.
    pub gate: Option<ClockGate>,
    /// Permission class a task must hold to register this device.
    pub minperm: Permissions,
    /// Window is mapped read-only into the owner.
    pub ro: bool,
    /// Subregion-disable mask applied to the device window.
    pub srd_mask: u8,
}

const fn gate(bus: Bus, bit: u8) -> Option<ClockGate> {
    Some(ClockGate { bus, bit })
}

pub static DEVMAP: &[DevMapEntry] = &[
    DevMapEntry {
        name: "tim2",
        base: 0x4000_0000,
        size: 0x400,
        gate: gate(Bus::Apb1, 0),
        minperm: Permissions::DEV_TIM,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "tim3",
        base: 0x4000_0400,
        size: 0x400,
        gate: gate(Bus::Apb1, 1),
        minperm: Permissions::DEV_TIM,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "tim4",
        base: 0x4000_0800,
        size: 0x400,
        gate: gate(Bus::Apb1, 2),
        minperm: Permissions::DEV_TIM,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "tim5",
        base: 0x4000_0c00,
        size: 0x400,
        gate: gate(Bus::Apb1, 3),
        minperm: Permissions::DEV_TIM,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "spi2",
        base: 0x4000_3800,
        size: 0x400,
        gate: gate(Bus::Apb1, 14),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "spi3",
        base: 0x4000_3c00,
        size: 0x400,
        gate: gate(Bus::Apb1, 15),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "usart2",
        base: 0x4000_4400,
        size: 0x400,
        gate: gate(Bus::Apb1, 17),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "usart3",
        base: 0x4000_4800,
        size: 0x400,
        gate: gate(Bus::Apb1, 18),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "uart4",
        base: 0x4000_4c00,
        size: 0x400,
        gate: gate(Bus::Apb1, 19),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "uart5",
        base: 0x4000_5000,
        size: 0x400,
        gate: gate(Bus::Apb1, 20),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "i2c1",
        base: 0x4000_5400,
        size: 0x400,
        gate: gate(Bus::Apb1, 21),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "i2c2",
        base: 0x4000_5800,
        size: 0x400,
        gate: gate(Bus::Apb1, 22),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "i2c3",
        base: 0x4000_5c00,
        size: 0x400,
        gate: gate(Bus::Apb1, 23),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "can1",
        base: 0x4000_6400,
        size: 0x400,
        gate: gate(Bus::Apb1, 25),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "tim1",
        base: 0x4001_0000,
        size: 0x400,
        gate: gate(Bus::Apb2, 0),
        minperm: Permissions::DEV_TIM,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "usart1",
        base: 0x4001_1000,
        size: 0x400,
        gate: gate(Bus::Apb2, 4),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "usart6",
        base: 0x4001_1400,
        size: 0x400,
        gate: gate(Bus::Apb2, 5),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "sdio",
        base: 0x4001_2c00,
        size: 0x400,
        gate: gate(Bus::Apb2, 11),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "spi1",
        base: 0x4001_3000,
        size: 0x400,
        gate: gate(Bus::Apb2, 12),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "otg-fs",
        base: 0x5000_0000,
        size: 0x4_0000,
        gate: gate(Bus::Ahb2, 7),
        minperm: Permissions::DEV_BUSES,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "cryp",
        base: 0x5006_0000,
        size: 0x400,
        gate: gate(Bus::Ahb2, 4),
        minperm: Permissions::DEV_CRYPTO,
        ro: false,
        srd_mask: 0,
    },
    DevMapEntry {
        name: "hash",
        base: 0x5006_0400,
        size: 0x400,
        gate: gate(Bus::Ahb2, 5),
        minperm: Permissions::DEV_CRYPTO,
        ro: false,
        srd_mask: 0,
    },
];

/// Looks up a device by the exact (base, size) pair a task declared.
pub fn find_device(base: u32, size: u32) -> Option<&'static DevMapEntry> {
    DEVMAP.iter().find(|d| d.base == base && d.size == size)
}

/// Clock gate of a GPIO port (ports A..I sit on AHB1, bits 0..8).
pub fn gpio_port_gate(port: u8) -> Option<ClockGate> {
    if port <= 8 {
        gate(Bus::Ahb1, port)
    } else {
        None
    }
}

/// Clock gates of the two DMA controllers.
pub fn dma_controller_gate(controller: u8) -> Option<ClockGate> {
    match controller {
        1 => gate(Bus::Ahb1, 21),
        2 => gate(Bus::Ahb1, 22),
        _ => None,
    }
}

/// External interrupt number of a DMA stream.
pub fn dma_stream_irq(controller: u8, stream: u8) -> Option<u8> {
    match (controller, stream) {
        (1, 0..=6) => Some(11 + stream),
        (1, 7) => Some(47),
        (2, 0..=4) => Some(56 + stream),
        (2, 5..=7) => Some(68 + stream - 5),
        _ => None,
    }
}

/// Reverse of [`dma_stream_irq`].
pub fn dma_stream_of_irq(irq: u8) -> Option<(u8, u8)> {
    match irq {
        11..=17 => Some((1, irq - 11)),
        47 => Some((1, 7)),
        56..=60 => Some((2, irq - 56)),
        68..=70 => Some((2, irq - 68 + 5)),
        _ => None,
    }
}

/// External interrupt serving an external-interrupt-controller line. Pins
/// 0..=4 have dedicated interrupts; 5..=9 and 10..=15 share one each.
pub fn exti_irq_for_pin(pin: u8) -> u8 {
    match pin {
        0 => 6,
        1 => 7,
        2 => 8,
        3 => 9,
        4 => 10,
        5..=9 => 23,
        _ => 40,
    }
}

/// The seven interrupt lines owned by the external-interrupt dispatcher.
pub static EXTI_IRQS: [u8; 7] = [6, 7, 8, 9, 10, 23, 40];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_requires_exact_pair() {
        assert!(find_device(0x4000_4400, 0x400).is_some());
        // Same base, wrong size: not a device.
        assert!(find_device(0x4000_4400, 0x800).is_none());
        assert!(find_device(0xdead_0000, 0x400).is_none());
    }

    #[test]
    fn uart_interrupts_are_distinct() {
        // Each UART owns its own line; nothing shares USART3's.
        let mut irqs = [38u8, 39, 52, 53, 37, 71];
        irqs.sort_unstable();
        for w in irqs.windows(2) {
            assert_ne!(w[0], w[1]);
        }
    }

    #[test]
    fn dma_stream_irqs_round_trip() {
        for ctrl in 1..=2u8 {
            for stream in 0..=7u8 {
                let irq = dma_stream_irq(ctrl, stream).unwrap();
                assert_eq!(dma_stream_of_irq(irq), Some((ctrl, stream)));
            }
        }
        assert_eq!(dma_stream_irq(3, 0), None);
        assert_eq!(dma_stream_of_irq(5), None);
    }

    #[test]
    fn exti_pin_fanout() {
        assert_eq!(exti_irq_for_pin(0), 6);
        assert_eq!(exti_irq_for_pin(4), 10);
        assert_eq!(exti_irq_for_pin(5), 23);
        assert_eq!(exti_irq_for_pin(9), 23);
        assert_eq!(exti_irq_for_pin(10), 40);
        assert_eq!(exti_irq_for_pin(15), 40);
    }
}
