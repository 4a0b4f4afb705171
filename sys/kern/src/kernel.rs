// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The owning executive structure.
//!
//! Every piece of mutable kernel state lives in one [`Kernel`] value: the
//! task table and all the resource tables. Kernel routines receive it by
//! exclusive reference -- there are no free-floating mutable tables. The
//! only statics are in the architecture layer, where the hardware leaves no
//! choice (the current-context pointer the context-switch assembly follows,
//! and the tick counters).
//!
//! The operations on `Kernel` are defined in the modules that own their
//! subject matter: device registration in `devices`, stream arbitration in
//! `dma`, election in `sched`, and so on. This module only holds the struct
//! and the small accessors everything shares.

use abi::{TaskId, NUM_TASKS};

use crate::descs::KernelConfig;
use crate::devices::DeviceTable;
use crate::dma::DmaTable;
use crate::exti::ExtiTable;
use crate::gpio::GpioTable;
use crate::irq::IrqTable;
use crate::random::RngFilter;
use crate::sched::SchedState;
use crate::sleep::SleepTable;
use crate::softirq::SoftirqQueues;
use crate::task::Task;

pub struct Kernel {
    pub(crate) tasks: [Task; NUM_TASKS],
    pub(crate) devices: DeviceTable,
    pub(crate) dmas: DmaTable,
    pub(crate) irqs: IrqTable,
    pub(crate) gpios: GpioTable,
    pub(crate) extis: ExtiTable,
    pub(crate) softirq: SoftirqQueues,
    pub(crate) sleep: SleepTable,
    pub(crate) sched: SchedState,
    pub(crate) rng: RngFilter,
    pub(crate) config: &'static KernelConfig,
}

impl Kernel {
    /// Compile-time empty executive, so the whole thing can live in a
    /// static instead of being assembled on the boot stack. Startup
    /// populates the task slots and swaps in the real configuration.
    pub const fn starting(config: &'static KernelConfig) -> Self {
        const EMPTY: Task = Task::EMPTY;
        Self {
            tasks: [EMPTY; NUM_TASKS],
            devices: crate::devices::DeviceTable::new(),
            dmas: crate::dma::DmaTable::new(),
            irqs: crate::irq::IrqTable::new(),
            gpios: crate::gpio::GpioTable::new(),
            extis: crate::exti::ExtiTable::new(),
            softirq: crate::softirq::SoftirqQueues::new(),
            sleep: crate::sleep::SleepTable::new(),
            sched: crate::sched::SchedState::new(),
            rng: crate::random::RngFilter::new(),
            config,
        }
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id.index()]
    }

    /// Looks up a populated user task by name.
    pub fn task_by_name(&self, name: &[u8]) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.is_populated() && t.is_user())
            .find(|t| t.name().as_bytes() == name)
    }
}
