// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SoC services for the STM32F407.
//!
//! Clock tree and the random source go through the vendor PAC. The
//! port-indexed peripherals the kernel programs generically -- GPIO ports,
//! the external-interrupt controller, DMA streams -- use small register
//! blocks of our own, because the PAC gives each port/controller its own
//! type and the kernel needs to index them by number at runtime.

use abi::{
    DmaDescriptor, DmaDirection, DmaMode, DmaReconf, ExtiTrigger, GpioConfig, GpioDescriptor,
    GpioRef,
};
use stm32f4::stm32f407 as device;
use vcell::VolatileCell;

use super::devmap::{Bus, ClockGate};
use super::TrngError;

/// Brings the system clock to 168 MHz off the 8 MHz external crystal:
/// VCO = 8 / 8 * 336, SYSCLK = VCO / 2, APB1 = /4, APB2 = /2.
pub fn init_clocks() {
    let rcc = unsafe { &*device::RCC::ptr() };
    let flash = unsafe { &*device::FLASH::ptr() };

    // External oscillator on.
    rcc.cr.modify(|r, w| unsafe { w.bits(r.bits() | 1 << 16) });
    while rcc.cr.read().bits() & (1 << 17) == 0 {}

    // Five wait states for 168 MHz at 3.3 V, plus the prefetch and cache
    // enables.
    flash
        .acr
        .modify(|r, w| unsafe { w.bits((r.bits() & !0xF) | 5 | 1 << 8 | 1 << 9 | 1 << 10) });

    // PLL: M=8, N=336, P=2, Q=7, source HSE.
    rcc.pllcfgr
        .write(|w| unsafe { w.bits(8 | 336 << 6 | 0 << 16 | 1 << 22 | 7 << 24) });

    // AHB /1, APB1 /4, APB2 /2.
    rcc.cfgr
        .modify(|r, w| unsafe { w.bits((r.bits() & !0xFFF0) | 0b101 << 10 | 0b100 << 13) });

    // PLL on, wait, switch.
    rcc.cr.modify(|r, w| unsafe { w.bits(r.bits() | 1 << 24) });
    while rcc.cr.read().bits() & (1 << 25) == 0 {}
    rcc.cfgr
        .modify(|r, w| unsafe { w.bits((r.bits() & !0b11) | 0b10) });
    while rcc.cfgr.read().bits() & (0b11 << 2) != 0b10 << 2 {}
}

/// Opens one peripheral clock gate.
pub fn clock_enable(gate: ClockGate) {
    let rcc = unsafe { &*device::RCC::ptr() };
    let bit = 1u32 << gate.bit;
    match gate.bus {
        Bus::Ahb1 => rcc.ahb1enr.modify(|r, w| unsafe { w.bits(r.bits() | bit) }),
        Bus::Ahb2 => rcc.ahb2enr.modify(|r, w| unsafe { w.bits(r.bits() | bit) }),
        Bus::Apb1 => rcc.apb1enr.modify(|r, w| unsafe { w.bits(r.bits() | bit) }),
        Bus::Apb2 => rcc.apb2enr.modify(|r, w| unsafe { w.bits(r.bits() | bit) }),
    }
}

// ---------------------------------------------------------------------------
// GPIO

/// One GPIO port's register block; ports A..I repeat every 0x400 bytes.
#[repr(C)]
struct GpioPort {
    moder: VolatileCell<u32>,
    otyper: VolatileCell<u32>,
    ospeedr: VolatileCell<u32>,
    pupdr: VolatileCell<u32>,
    idr: VolatileCell<u32>,
    odr: VolatileCell<u32>,
    bsrr: VolatileCell<u32>,
    lckr: VolatileCell<u32>,
    afrl: VolatileCell<u32>,
    afrh: VolatileCell<u32>,
}

const GPIO_BASE: u32 = 0x4002_0000;

fn gpio_port(port: u8) -> &'static GpioPort {
    // Safety: ports A..I exist on this part; devmap/gpio-table validation
    // keeps the index in range.
    unsafe { &*((GPIO_BASE + u32::from(port) * 0x400) as *const GpioPort) }
}

fn set_field2(reg: &VolatileCell<u32>, pin: u8, value: u32) {
    let shift = u32::from(pin) * 2;
    reg.set((reg.get() & !(0b11 << shift)) | (value & 0b11) << shift);
}

/// Programs one pin per its descriptor's field mask. The port clock gate is
/// opened first; pins get configured exactly once, at device enable.
pub fn gpio_configure(gpio: &GpioDescriptor) {
    if let Some(gate) = super::devmap::gpio_port_gate(gpio.kref.port()) {
        clock_enable(gate);
    }
    let port = gpio_port(gpio.kref.port());
    let pin = gpio.kref.pin();
    let mask = GpioConfig::from_bits_truncate(gpio.mask);

    if mask.contains(GpioConfig::MODE) {
        set_field2(&port.moder, pin, gpio.mode as u32);
    }
    if mask.contains(GpioConfig::TYPE) {
        let bit = 1u32 << pin;
        port.otyper.set(
            (port.otyper.get() & !bit) | if gpio.otype as u32 != 0 { bit } else { 0 },
        );
    }
    if mask.contains(GpioConfig::SPEED) {
        set_field2(&port.ospeedr, pin, gpio.speed as u32);
    }
    if mask.contains(GpioConfig::PUPD) {
        set_field2(&port.pupdr, pin, gpio.pupd as u32);
    }
    if mask.contains(GpioConfig::AF) {
        let reg = if pin < 8 { &port.afrl } else { &port.afrh };
        let shift = u32::from(pin % 8) * 4;
        reg.set((reg.get() & !(0xF << shift)) | u32::from(gpio.af & 0xF) << shift);
    }
    if mask.contains(GpioConfig::BSR) {
        port.bsrr.set(gpio.bsr_s & 0xFFFF | (gpio.bsr_r & 0xFFFF) << 16);
    }
    if mask.contains(GpioConfig::LOCK) {
        // The lock sequence: write with key, without, with again, then two
        // reads.
        const KEY: u32 = 1 << 16;
        let val = gpio.lck & 0xFFFF;
        port.lckr.set(val | KEY);
        port.lckr.set(val);
        port.lckr.set(val | KEY);
        let _ = port.lckr.get();
        let _ = port.lckr.get();
    }
}

pub fn gpio_set(kref: GpioRef, value: bool) {
    let port = gpio_port(kref.port());
    let bit = 1u32 << kref.pin();
    // BSRR: set in the low half, reset in the high half; atomic either
    // way.
    port.bsrr.set(if value { bit } else { bit << 16 });
}

pub fn gpio_get(kref: GpioRef) -> bool {
    let port = gpio_port(kref.port());
    port.idr.get() & (1 << kref.pin()) != 0
}

// ---------------------------------------------------------------------------
// External interrupt controller

#[repr(C)]
struct ExtiRegs {
    imr: VolatileCell<u32>,
    emr: VolatileCell<u32>,
    rtsr: VolatileCell<u32>,
    ftsr: VolatileCell<u32>,
    swier: VolatileCell<u32>,
    pr: VolatileCell<u32>,
}

#[repr(C)]
struct SyscfgRegs {
    memrmp: VolatileCell<u32>,
    pmc: VolatileCell<u32>,
    exticr: [VolatileCell<u32>; 4],
}

const EXTI_BASE: u32 = 0x4001_3C00;
const SYSCFG_BASE: u32 = 0x4001_3800;
const SYSCFG_GATE: ClockGate = ClockGate {
    bus: Bus::Apb2,
    bit: 14,
};

fn exti() -> &'static ExtiRegs {
    unsafe { &*(EXTI_BASE as *const ExtiRegs) }
}

fn syscfg() -> &'static SyscfgRegs {
    unsafe { &*(SYSCFG_BASE as *const SyscfgRegs) }
}

/// Routes a pin's port onto its external-interrupt line and selects the
/// trigger edges. The line stays masked until [`exti_enable`].
pub fn exti_configure(gpio: &GpioDescriptor) {
    clock_enable(SYSCFG_GATE);
    let pin = gpio.kref.pin();
    let line = 1u32 << pin;

    let cr = &syscfg().exticr[usize::from(pin / 4)];
    let shift = u32::from(pin % 4) * 4;
    cr.set((cr.get() & !(0xF << shift)) | u32::from(gpio.kref.port()) << shift);

    let e = exti();
    let (rise, fall) = match gpio.exti_trigger {
        ExtiTrigger::None => (false, false),
        ExtiTrigger::Rise => (true, false),
        ExtiTrigger::Fall => (false, true),
        ExtiTrigger::Both => (true, true),
    };
    e.rtsr
        .set(if rise { e.rtsr.get() | line } else { e.rtsr.get() & !line });
    e.ftsr
        .set(if fall { e.ftsr.get() | line } else { e.ftsr.get() & !line });
}

/// Unmasks a pin's line.
pub fn exti_enable(kref: GpioRef) {
    let e = exti();
    e.imr.set(e.imr.get() | 1 << kref.pin());
}

/// Masks a pin's line; a locked line sits here until its owner asks for it
/// back.
pub fn exti_disable(kref: GpioRef) {
    let e = exti();
    e.imr.set(e.imr.get() & !(1 << kref.pin()));
}

pub fn exti_clear_pending(line: u8) {
    // Write-one-to-clear.
    exti().pr.set(1 << line);
}

/// Mask of lines currently pending.
pub fn exti_pending_lines() -> u32 {
    exti().pr.get() & 0xFFFF
}

// ---------------------------------------------------------------------------
// DMA streams

#[repr(C)]
struct DmaStreamRegs {
    cr: VolatileCell<u32>,
    ndtr: VolatileCell<u32>,
    par: VolatileCell<u32>,
    m0ar: VolatileCell<u32>,
    m1ar: VolatileCell<u32>,
    fcr: VolatileCell<u32>,
}

#[repr(C)]
struct DmaRegs {
    lisr: VolatileCell<u32>,
    hisr: VolatileCell<u32>,
    lifcr: VolatileCell<u32>,
    hifcr: VolatileCell<u32>,
    streams: [DmaStreamRegs; 8],
}

const DMA1_BASE: u32 = 0x4002_6000;
const DMA2_BASE: u32 = 0x4002_6400;

fn dma(controller: u8) -> &'static DmaRegs {
    let base = if controller == 1 { DMA1_BASE } else { DMA2_BASE };
    unsafe { &*(base as *const DmaRegs) }
}

const CR_EN: u32 = 1 << 0;

/// Per-stream status bit offsets within LISR/HISR.
const STATUS_SHIFT: [u32; 4] = [0, 6, 16, 22];

/// (Re)programs a stream from its kernel-held descriptor. The arbiter has
/// already validated every field; the stream is left disabled -- enabling
/// is a separate, deliberate step.
pub fn dma_program(controller: u8, stream: u8, desc: &DmaDescriptor, _mask: DmaReconf) {
    let s = &dma(controller).streams[usize::from(stream)];

    // A live stream must not be reprogrammed.
    s.cr.set(s.cr.get() & !CR_EN);
    while s.cr.get() & CR_EN != 0 {}

    let dir = match desc.direction {
        DmaDirection::PeripheralToMemory => 0b00,
        DmaDirection::MemoryToPeripheral => 0b01,
        DmaDirection::MemoryToMemory => 0b10,
    };
    let width = desc.datasize as u32;
    let prio = match desc.direction {
        DmaDirection::MemoryToPeripheral => desc.in_prio,
        _ => desc.out_prio,
    } as u32;

    let cr = u32::from(desc.channel & 0x7) << 25
        | (desc.mem_burst as u32) << 23
        | (desc.dev_burst as u32) << 21
        | prio << 16
        | width << 13
        | width << 11
        | u32::from(desc.mem_inc) << 10
        | u32::from(desc.dev_inc) << 9
        | u32::from(desc.mode == DmaMode::Circular) << 8
        | dir << 6
        | (desc.flow_control as u32) << 5
        // Transfer-complete and error interrupts.
        | 1 << 4
        | 1 << 2;
    s.cr.set(cr);

    // FIFO mode disables direct mode and picks a half-full threshold.
    s.fcr.set(if desc.mode == DmaMode::Fifo { 1 << 2 | 0b01 } else { 0 });

    let unit = match desc.datasize {
        abi::DmaDataSize::Byte => 1,
        abi::DmaDataSize::HalfWord => 2,
        abi::DmaDataSize::Word => 4,
    };
    s.ndtr.set(desc.size / unit);

    match desc.direction {
        DmaDirection::PeripheralToMemory => {
            s.par.set(desc.in_addr);
            s.m0ar.set(desc.out_addr);
        }
        _ => {
            s.par.set(desc.out_addr);
            s.m0ar.set(desc.in_addr);
        }
    }
}

pub fn dma_enable(controller: u8, stream: u8) {
    let s = &dma(controller).streams[usize::from(stream)];
    s.cr.set(s.cr.get() | CR_EN);
}

pub fn dma_disable(controller: u8, stream: u8) {
    let s = &dma(controller).streams[usize::from(stream)];
    s.cr.set(s.cr.get() & !CR_EN);
}

/// Reads a stream's interrupt status, normalized to the shared bit layout
/// (which happens to be the hardware's own).
pub fn dma_status(controller: u8, stream: u8) -> u32 {
    let d = dma(controller);
    let reg = if stream < 4 { d.lisr.get() } else { d.hisr.get() };
    reg >> STATUS_SHIFT[usize::from(stream % 4)] & 0x3D
}

pub fn dma_clear_status(controller: u8, stream: u8) {
    let d = dma(controller);
    let bits = 0x3D << STATUS_SHIFT[usize::from(stream % 4)];
    if stream < 4 {
        d.lifcr.set(bits);
    } else {
        d.hifcr.set(bits);
    }
}

// ---------------------------------------------------------------------------
// Random source

const RNG_GATE: ClockGate = ClockGate {
    bus: Bus::Ahb2,
    bit: 6,
};

/// Draws one raw word from the true random number generator. The kernel's
/// continuity filter sits above this.
pub fn trng_word() -> Result<u32, TrngError> {
    let rng = unsafe { &*device::RNG::ptr() };

    if rng.cr.read().bits() & (1 << 2) == 0 {
        clock_enable(RNG_GATE);
        rng.cr.modify(|r, w| unsafe { w.bits(r.bits() | 1 << 2) });
    }

    // Bounded wait for a word; the generator produces one every 40-ish
    // clock cycles when healthy.
    for _ in 0..10_000 {
        let sr = rng.sr.read().bits();
        if sr & (1 << 2) != 0 || sr & (1 << 6) != 0 {
            return Err(TrngError::SeedError);
        }
        if sr & (1 << 1) != 0 || sr & (1 << 5) != 0 {
            return Err(TrngError::ClockError);
        }
        if sr & 1 != 0 {
            return Ok(rng.dr.read().bits());
        }
    }
    Err(TrngError::SeedError)
}
