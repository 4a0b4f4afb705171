// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Descriptor types, used to statically define the application.
//!
//! The kernel itself is application-independent; a build provides one
//! [`AppLayout`] naming its tasks and the scheduler configuration, and the
//! startup code turns that into the runtime task table.

use abi::Permissions;

/// Record describing a single user task.
#[derive(Clone, Debug)]
pub struct TaskDesc {
    /// Task name, 15 bytes or fewer, for diagnostics and peer lookup.
    pub name: &'static str,
    /// First text/RAM slot this task occupies, 1-based.
    pub slot: u8,
    /// Number of contiguous slots occupied.
    pub num_slots: u8,
    /// Address of the task's entry point; must lie in the task's text slots.
    pub entry_point: u32,
    /// Address of the userland trampoline that runs deferred interrupt
    /// handlers; must lie in the task's text slots.
    pub isr_entry: u32,
    /// Scheduling priority; numerically higher is more important.
    pub priority: u8,
    /// Advisory stack size, in bytes.
    pub stack_size: u32,
    /// IPC isolation group. Tasks can only exchange messages within their
    /// own domain.
    pub domain: u8,
    /// Static permission bits.
    pub permissions: Permissions,
}

/// Election policy applied to runnable main threads after all the
/// higher-precedence classes (interrupt threads, critical sections, the
/// deferred-work thread, forced tasks) have been considered.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedPolicy {
    /// Cycle through user tasks starting after the last one elected.
    RoundRobin,
    /// Pick among runnable tasks with words from the hardware random
    /// source.
    Random,
    /// Highest priority class first, round-robin within the class.
    MlqRoundRobin,
}

/// Kernel-wide configuration knobs, fixed per build.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub policy: SchedPolicy,
    /// Ticks between periodic elections.
    pub sched_period: u32,
    /// Request an election as soon as a deferred handler has been prepared,
    /// rather than waiting for the next tick.
    pub isr_reactivity: bool,
}

/// The static application layout handed to `startup::start_kernel`.
#[derive(Clone, Debug)]
pub struct AppLayout {
    pub tasks: &'static [TaskDesc],
    pub config: KernelConfig,
}
