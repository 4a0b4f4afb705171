// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and applications.
//!
//! Everything a user task needs to talk to the kernel lives here: task
//! identifiers, syscall numbers and their argument-block layout, response
//! codes, and the descriptor structures registered during the init phase
//! (devices, DMA streams, DMA shared-memory grants).
//!
//! Descriptors cross the user/kernel boundary as `ssmarshal`-encoded bytes;
//! the kernel re-validates every field after decoding, so nothing in this
//! crate is trusted.

#![no_std]

use serde::{Deserialize, Serialize};

/// Number of task slots in the kernel table: the idle task, the deferred-work
/// (softirq) task, and up to [`MAX_USER_TASKS`] applications.
pub const NUM_TASKS: usize = 2 + MAX_USER_TASKS;

/// Maximum number of user applications.
pub const MAX_USER_TASKS: usize = 7;

/// Maximum number of IRQ lines a single device may declare.
pub const MAX_DEV_IRQS: usize = 4;

/// Maximum number of GPIO pins a single device may declare.
pub const MAX_DEV_GPIOS: usize = 16;

/// Number of micro-instructions in an IRQ posthook program.
pub const POSTHOOK_INSTRS: usize = 10;

/// Maximum payload of an IPC message, in bytes.
pub const IPC_MSG_MAX: usize = 128;

/// Maximum length of a `Log` syscall buffer, in bytes.
pub const LOG_MAX: usize = 128;

/// Maximum number of devices a single task may register.
pub const MAX_DEVS_PER_TASK: usize = 4;

/// Maximum number of DMA streams a single task may register.
pub const MAX_DMAS_PER_TASK: usize = 4;

/// Maximum number of DMA shared-memory grants a single task may receive.
pub const MAX_DMA_SHMS_PER_TASK: usize = 4;

/// Names a task slot.
///
/// Slot 0 is the idle task and slot 1 the deferred-work task; user
/// applications start at [`TaskId::FIRST_USER`]. The two reserved values
/// never name a real slot: [`TaskId::UNUSED`] marks free resource-table
/// entries, and [`TaskId::ANY`] is the wildcard accepted by the receive
/// syscalls.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TaskId(pub u8);

impl TaskId {
    /// The idle task, elected when nothing else is runnable.
    pub const IDLE: Self = TaskId(0);
    /// The kernel thread draining the deferred-work queues.
    pub const SOFTIRQ: Self = TaskId(1);
    /// First user application slot.
    pub const FIRST_USER: u8 = 2;
    /// Sentinel for "no task".
    pub const UNUSED: Self = TaskId(0xfe);
    /// Wildcard sender for the receive syscalls.
    pub const ANY: Self = TaskId(0xff);

    /// Returns this id as a task-table index.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Checks whether this id names a (potential) user application slot.
    pub fn is_user(self) -> bool {
        self.0 >= Self::FIRST_USER && self.index() < NUM_TASKS
    }
}

/// The two execution threads of a task.
///
/// Deferred interrupt handlers run in a separate thread of the owning task,
/// with their own stack and saved context; both threads' states must remain
/// independently observable, because an interrupt can arrive while the main
/// thread is sleeping or blocked.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadMode {
    Main,
    Isr,
}

/// A pair of values, one per [`ThreadMode`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PerMode<T> {
    pub main: T,
    pub isr: T,
}

impl<T> PerMode<T> {
    pub fn get(&self, mode: ThreadMode) -> &T {
        match mode {
            ThreadMode::Main => &self.main,
            ThreadMode::Isr => &self.isr,
        }
    }

    pub fn get_mut(&mut self, mode: ThreadMode) -> &mut T {
        match mode {
            ThreadMode::Main => &mut self.main,
            ThreadMode::Isr => &mut self.isr,
        }
    }
}

/// Scheduling state of one thread of a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Slot not populated.
    Empty,
    /// May be elected.
    Runnable,
    /// Waiting for an external event (interrupt, IPC, syscall completion
    /// wake-up).
    Idle,
    /// Interruptible sleep: woken by timer expiry, an interrupt, or an IPC.
    Sleeping,
    /// Deep sleep: woken by timer expiry only.
    SleepingDeep,
    /// In a scheduling critical section; elected ahead of all other runnable
    /// main threads.
    Locked,
    /// Elected once, ahead of the regular policy, on behalf of an IPC partner
    /// or a finishing interrupt handler.
    Forced,
    /// Stopped by a memory-protection or bus fault; never scheduled again.
    Fault,
    /// Interrupt thread has finished and awaits scheduler wrap-up.
    IsrDone,
    /// Syscall queued but not yet executed by the deferred-work thread.
    SvcBlocked,
    /// Blocked in a synchronous receive.
    IpcRecvBlocked,
}

/// Enumeration of syscall families.
///
/// A syscall traps with `SVC 0`; r0 points at a four-word argument block on
/// the caller's stack: `[family | subcode << 8, a1, a2, a3]`. The `Exit`
/// family is not requestable through the block -- finishing interrupt
/// handlers signal it with the reserved `SVC 1` immediate instead.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sysnum {
    Yield = 0,
    Init = 1,
    Ipc = 2,
    Cfg = 3,
    GetTick = 4,
    Reset = 5,
    Sleep = 6,
    Lock = 7,
    GetRandom = 8,
    Log = 9,
}

impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Yield),
            1 => Ok(Self::Init),
            2 => Ok(Self::Ipc),
            3 => Ok(Self::Cfg),
            4 => Ok(Self::GetTick),
            5 => Ok(Self::Reset),
            6 => Ok(Self::Sleep),
            7 => Ok(Self::Lock),
            8 => Ok(Self::GetRandom),
            9 => Ok(Self::Log),
            _ => Err(()),
        }
    }
}

/// Packs a family and subcode into the first word of an argument block.
pub const fn pack_sysnum(family: Sysnum, subcode: u8) -> u32 {
    family as u32 | (subcode as u32) << 8
}

/// Splits the first word of an argument block into family and subcode.
pub fn unpack_sysnum(word: u32) -> Result<(Sysnum, u8), ()> {
    let family = Sysnum::try_from(word & 0xff)?;
    Ok((family, (word >> 8) as u8))
}

/// Subcodes of the `Init` family.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InitOp {
    /// Register a device: `a1` = descriptor pointer, `a2` = descriptor
    /// length, `a3` = pointer to a u32 receiving the device id.
    DevAccess = 0,
    /// Register a DMA stream: arguments as for `DevAccess`.
    Dma = 1,
    /// Grant another task DMA access to a buffer: `a1` = descriptor pointer,
    /// `a2` = descriptor length.
    DmaShm = 2,
    /// Look up a peer id by name: `a1` = name pointer, `a2` = name length,
    /// `a3` = pointer to a u32 receiving the id.
    GetTaskId = 3,
    /// One-way end-of-init latch; activates everything registered so far.
    Done = 4,
}

impl core::convert::TryFrom<u8> for InitOp {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::DevAccess),
            1 => Ok(Self::Dma),
            2 => Ok(Self::DmaShm),
            3 => Ok(Self::GetTaskId),
            4 => Ok(Self::Done),
            _ => Err(()),
        }
    }
}

/// Subcodes of the `Ipc` family.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IpcOp {
    /// `a1` = pointer to a u32 holding the accepted sender (may be
    /// [`TaskId::ANY`]), updated with the actual sender; `a2` = pointer to a
    /// u32 holding the buffer capacity, updated with the received length;
    /// `a3` = buffer pointer. Blocks until a message arrives.
    RecvSync = 0,
    /// `a1` = target id, `a2` = length, `a3` = message pointer.
    SendSync = 1,
    /// As `RecvSync` but fails with `Inval` instead of blocking.
    RecvAsync = 2,
    /// As `SendSync` but never forces the receiver's election.
    SendAsync = 3,
}

impl core::convert::TryFrom<u8> for IpcOp {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::RecvSync),
            1 => Ok(Self::SendSync),
            2 => Ok(Self::RecvAsync),
            3 => Ok(Self::SendAsync),
            _ => Err(()),
        }
    }
}

/// Subcodes of the `Cfg` family.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CfgOp {
    /// `a1` = GPIO reference, `a2` = value.
    GpioSet = 0,
    /// `a1` = GPIO reference, `a2` = pointer to a u32 receiving the value.
    GpioGet = 1,
    /// `a1` = GPIO reference.
    GpioUnlockExti = 2,
    /// `a1` = descriptor pointer, `a2` = descriptor length,
    /// `a3` = reconfiguration mask | stream id << 8.
    DmaReconf = 3,
    /// `a1` = stream id.
    DmaReload = 4,
    /// `a1` = stream id.
    DmaDisable = 5,
    /// `a1` = device id.
    DevMap = 6,
    /// `a1` = device id.
    DevUnmap = 7,
    /// `a1` = device id.
    DevRelease = 8,
}

impl core::convert::TryFrom<u8> for CfgOp {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::GpioSet),
            1 => Ok(Self::GpioGet),
            2 => Ok(Self::GpioUnlockExti),
            3 => Ok(Self::DmaReconf),
            4 => Ok(Self::DmaReload),
            5 => Ok(Self::DmaDisable),
            6 => Ok(Self::DevMap),
            7 => Ok(Self::DevUnmap),
            8 => Ok(Self::DevRelease),
            _ => Err(()),
        }
    }
}

/// Subcodes of the `GetTick` family: requested precision. `a1` points at a
/// u64 receiving the value. Microsecond and cycle precision are
/// permission-gated, as high-resolution time is a convenient side channel.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TickPrecision {
    Milli = 0,
    Micro = 1,
    Cycle = 2,
}

impl core::convert::TryFrom<u8> for TickPrecision {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Milli),
            1 => Ok(Self::Micro),
            2 => Ok(Self::Cycle),
            _ => Err(()),
        }
    }
}

/// Subcodes of the `Sleep` family. `a1` = duration in milliseconds.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SleepMode {
    /// Woken early by interrupts or IPC.
    Interruptible = 0,
    /// Woken by timer expiry only.
    Deep = 1,
}

impl core::convert::TryFrom<u8> for SleepMode {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Interruptible),
            1 => Ok(Self::Deep),
            _ => Err(()),
        }
    }
}

/// Subcodes of the `Lock` family.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockOp {
    Enter = 0,
    Exit = 1,
}

impl core::convert::TryFrom<u8> for LockOp {
    type Error = ();

    fn try_from(x: u8) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Enter),
            1 => Ok(Self::Exit),
            _ => Err(()),
        }
    }
}

/// Response code for a successful syscall, written into r0 of the caller's
/// saved frame.
pub const STATUS_DONE: u32 = 0;

/// Number of defined response codes.
pub const STATUS_MAX: u32 = 4;

/// Unsuccessful syscall outcomes.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SysError {
    /// Malformed input: bad pointer, bad size, unknown device, misaligned
    /// offset, duplicate stream...
    Inval = 1,
    /// Missing permission, or operation forbidden in the current phase or
    /// thread mode.
    Denied = 2,
    /// Resource exhausted or already owned; retrying later may succeed.
    Busy = 3,
}

impl SysError {
    /// The wire representation of this error.
    pub fn code(self) -> u32 {
        self as u32
    }
}

bitflags::bitflags! {
    /// Static per-task permission bits, assigned in the application layout.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Permissions: u32 {
        /// May register bus-class devices (USART, SPI, I2C...).
        const DEV_BUSES = 1 << 0;
        /// May register timer-class devices.
        const DEV_TIM = 1 << 1;
        /// May register crypto-class devices.
        const DEV_CRYPTO = 1 << 2;
        /// May register DMA streams.
        const DEV_DMA = 1 << 3;
        /// May route GPIO edges through the external-interrupt controller.
        const DEV_EXTI = 1 << 4;
        /// May read microsecond- and cycle-precision time.
        const TIM_CYCLES = 1 << 5;
        /// May declare interrupt handlers that force their main thread's
        /// election.
        const TSK_FORCE_ISR = 1 << 6;
        /// May request a system reset.
        const TSK_RESET = 1 << 7;
        /// May draw words from the hardware random source.
        const TSK_RNG = 1 << 8;
        /// May map and unmap declared devices on demand.
        const MEM_DYNAMIC_MAP = 1 << 9;
    }
}

/// When a registered device's memory window is mapped into its owner.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MapMode {
    /// Mapped from end-of-init onwards, permanently.
    Auto = 0,
    /// Mapped and unmapped on request (`CfgOp::DevMap` / `DevUnmap`);
    /// requires [`Permissions::MEM_DYNAMIC_MAP`].
    Voluntary = 1,
}

/// Effect of a finishing deferred interrupt handler on its task's main
/// thread.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum IsrScheduling {
    /// Wake the main thread if it was idle; election follows the regular
    /// policy.
    #[default]
    Standard = 0,
    /// Elect the main thread immediately after the handler, once. Requires
    /// [`Permissions::TSK_FORCE_ISR`].
    ForceMainThread = 1,
    /// Leave the main thread alone (driver without a main loop).
    WithoutMainThread = 2,
}

/// Complement applied by the combining posthook micro-instructions.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RegOp {
    Std = 0,
    Not = 1,
}

/// One micro-instruction of an IRQ posthook program.
///
/// Posthooks run in handler mode, before the deferred handler, to quiet
/// interrupt sources that would otherwise burst. All offsets are relative to
/// the device base and must name a 4-byte-aligned register inside the
/// device's window; the kernel checks this at registration time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PosthookInstr {
    /// No action.
    Nil,
    /// Read a register and stash the value for later instructions.
    Read { offset: u16 },
    /// Masked write: only the bits set in `mask` are affected.
    Write { offset: u16, value: u32, mask: u32 },
    /// Read `src` (reusing an earlier `Read`'s value when one exists),
    /// combine with `mask`, write the result to `dst`.
    And { dst: u16, src: u16, mask: u32, op: RegOp },
    /// Three-address variant: the mask itself is read from a register.
    Mask { dst: u16, src: u16, mask_offset: u16, op: RegOp },
}

/// An IRQ posthook program, plus the two distinguished register offsets
/// whose post-read values are surfaced to the deferred handler as its
/// `status` and `data` arguments.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Posthook {
    pub action: [PosthookInstr; POSTHOOK_INSTRS],
    pub status: u16,
    pub data: u16,
}

impl Default for Posthook {
    fn default() -> Self {
        Self {
            action: [PosthookInstr::Nil; POSTHOOK_INSTRS],
            status: 0,
            data: 0,
        }
    }
}

/// One IRQ line declared by a device descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IrqDescriptor {
    /// Address of the deferred handler; must lie in the owner's text slot.
    pub handler: u32,
    /// External interrupt number (NVIC numbering).
    pub irq: u8,
    /// Main-thread impact of the finishing handler.
    pub mode: IsrScheduling,
    /// Handler-mode micro-program run before deferring.
    pub posthook: Posthook,
}

/// A (port, pin) pair packed into one byte: port in the high nibble, pin in
/// the low nibble.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GpioRef(pub u8);

impl GpioRef {
    pub const fn new(port: u8, pin: u8) -> Self {
        Self(port << 4 | (pin & 0xf))
    }

    pub fn port(self) -> u8 {
        self.0 >> 4
    }

    pub fn pin(self) -> u8 {
        self.0 & 0xf
    }
}

/// GPIO port indices for [`GpioRef::new`].
pub mod gpio_port {
    pub const PA: u8 = 0;
    pub const PB: u8 = 1;
    pub const PC: u8 = 2;
    pub const PD: u8 = 3;
    pub const PE: u8 = 4;
    pub const PF: u8 = 5;
    pub const PG: u8 = 6;
    pub const PH: u8 = 7;
    pub const PI: u8 = 8;
}

/// Pin direction.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum GpioMode {
    Input = 0,
    Output = 1,
    Alternate = 2,
    Analog = 3,
}

/// Pull resistor selection.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum GpioPull {
    None = 0,
    Up = 1,
    Down = 2,
}

/// Output driver type.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum GpioOutputType {
    PushPull = 0,
    OpenDrain = 1,
}

/// Output slew rate.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum GpioSpeed {
    Low = 0,
    Medium = 1,
    High = 2,
    VeryHigh = 3,
}

/// Which pin edges raise an external interrupt.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExtiTrigger {
    None = 0,
    Rise = 1,
    Fall = 2,
    Both = 3,
}

/// Whether the external-interrupt line masks itself after firing. A locked
/// line stays masked until the owner issues `CfgOp::GpioUnlockExti`.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExtiLock {
    Unlocked = 0,
    Locked = 1,
}

bitflags::bitflags! {
    /// Selects which fields of a [`GpioDescriptor`] the kernel should
    /// program. Carried as a raw u16 in the descriptor to keep the wire
    /// encoding simple.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct GpioConfig: u16 {
        const MODE = 1 << 0;
        const TYPE = 1 << 1;
        const SPEED = 1 << 2;
        const PUPD = 1 << 3;
        const BSR = 1 << 4;
        const LOCK = 1 << 5;
        const AF = 1 << 6;
        const EXTI = 1 << 7;
    }
}

/// One GPIO pin declared by a device descriptor. The task never maps GPIO
/// configuration registers; the kernel programs the pin on its behalf.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GpioDescriptor {
    /// Field-selection mask; see [`GpioConfig`].
    pub mask: u16,
    pub kref: GpioRef,
    pub mode: GpioMode,
    pub pupd: GpioPull,
    pub otype: GpioOutputType,
    pub speed: GpioSpeed,
    /// Alternate-function number, 0..=15.
    pub af: u8,
    pub bsr_r: u32,
    pub bsr_s: u32,
    pub lck: u32,
    pub exti_trigger: ExtiTrigger,
    pub exti_lock: ExtiLock,
    /// Address of the edge handler; must lie in the owner's text slot.
    /// Zero when the pin has no external-interrupt use.
    pub exti_handler: u32,
}

/// The device declaration a task registers during its init phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// NUL-padded device name, for diagnostics.
    pub name: [u8; 16],
    /// Physical base address; checked against the SoC device map. Zero for a
    /// GPIO-only pseudo-device.
    pub address: u32,
    /// Window size in bytes; checked against the SoC device map.
    pub size: u32,
    pub map_mode: MapMode,
    pub irq_count: u8,
    pub irqs: [IrqDescriptor; MAX_DEV_IRQS],
    pub gpio_count: u8,
    pub gpios: [GpioDescriptor; MAX_DEV_GPIOS],
}

/// Transfer direction of a DMA stream. Memory-to-memory is recognized but
/// always refused.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DmaDirection {
    PeripheralToMemory = 0,
    MemoryToPeripheral = 1,
    MemoryToMemory = 2,
}

/// Stream transfer mode.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DmaMode {
    Direct = 0,
    Fifo = 1,
    Circular = 2,
}

/// Stream arbitration priority.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DmaPriority {
    Low = 0,
    Medium = 1,
    High = 2,
    VeryHigh = 3,
}

/// Transfer unit width.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DmaDataSize {
    Byte = 0,
    HalfWord = 1,
    Word = 2,
}

/// Burst length on either side of a stream.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DmaBurst {
    Single = 0,
    Incr4 = 1,
    Incr8 = 2,
    Incr16 = 3,
}

/// Which end paces the transfer.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DmaFlowControl {
    Dma = 0,
    Device = 1,
}

/// The DMA stream declaration a task registers during its init phase (and
/// partially rewrites with `CfgOp::DmaReconf`).
///
/// Zero is "not yet supplied" for the addresses and handlers; the kernel
/// keeps the stream disabled until every field required by the direction is
/// present.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DmaDescriptor {
    /// Controller number, 1-based.
    pub controller: u8,
    pub stream: u8,
    pub channel: u8,
    pub direction: DmaDirection,
    pub mode: DmaMode,
    pub datasize: DmaDataSize,
    pub mem_inc: bool,
    pub dev_inc: bool,
    pub mem_burst: DmaBurst,
    pub dev_burst: DmaBurst,
    pub flow_control: DmaFlowControl,
    /// Transfer size in bytes.
    pub size: u32,
    pub in_addr: u32,
    pub in_prio: DmaPriority,
    /// Deferred handler for the memory-to-peripheral direction.
    pub in_handler: u32,
    pub out_addr: u32,
    pub out_prio: DmaPriority,
    /// Deferred handler for the peripheral-to-memory direction.
    pub out_handler: u32,
}

bitflags::bitflags! {
    /// Field-selection mask for `CfgOp::DmaReconf`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct DmaReconf: u8 {
        const HANDLERS = 1 << 0;
        const BUFIN = 1 << 1;
        const BUFOUT = 1 << 2;
        const BUFSIZE = 1 << 3;
        const MODE = 1 << 4;
        const PRIO = 1 << 5;
        const DIR = 1 << 6;
        const ALL = 0x7f;
    }
}

/// Access direction of a DMA shared-memory grant, from the *target's* point
/// of view: `Read` lets the target source a transfer from the buffer, `Write`
/// lets it aim one at the buffer.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DmaShmAccess {
    Read = 0,
    Write = 1,
}

/// Declaration granting `target` the right to program DMA transfers against
/// a buffer owned by `source`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DmaShmDescriptor {
    pub target: TaskId,
    pub source: TaskId,
    pub address: u32,
    pub size: u32,
    pub access: DmaShmAccess,
}

/// Normalized DMA interrupt status bits, surfaced to deferred DMA handlers
/// as their `status` argument. Fields the hardware does not report read as
/// zero.
pub mod dma_status {
    pub const FIFO_ERROR: u32 = 1 << 0;
    pub const DIRECT_MODE_ERROR: u32 = 1 << 2;
    pub const TRANSFER_ERROR: u32 = 1 << 3;
    pub const HALF_TRANSFER: u32 = 1 << 4;
    pub const TRANSFER_COMPLETE: u32 = 1 << 5;
}
