// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common error-handling support.
//!
//! Syscall implementations return `Result<SchedHint, SysError>`: the error
//! side becomes a response code in r0 of the caller's saved frame, the ok
//! side tells the dispatcher whether a reschedule is warranted. A common
//! wrapper in the syscall dispatcher commits both, so individual syscalls
//! never touch the frame for their status.

pub use abi::SysError;

use crate::task::SchedHint;

/// Outcome of a syscall implementation.
pub type SysOutcome = Result<SchedHint, SysError>;

/// Decoded cause of a hardware fault, used for diagnostics before the
/// faulting thread is parked.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultCause {
    /// Memory-protection violation; the address is absent when the fault
    /// registers could not pin it down.
    MemoryAccess { address: Option<u32> },
    /// Exception-frame stacking failed, i.e. the stack pointer itself is
    /// bad.
    StackOverflow { address: u32 },
    /// Bus error.
    BusError { address: Option<u32> },
    /// Instruction fetch from non-executable memory.
    IllegalText,
    /// Undefined or illegal instruction.
    IllegalInstruction,
    /// Integer division by zero.
    DivideByZero,
    /// Anything else; the payload is the raw fault status register.
    Other(u32),
}
