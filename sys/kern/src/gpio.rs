// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GPIO pin ownership.
//!
//! Tasks never map the GPIO configuration registers; the kernel programs
//! pins on their behalf at device-enable time and mediates the set/get
//! syscalls afterwards. This module owns the flat one-entry-per-pin table
//! that makes sure a pin belongs to at most one device at a time.

use abi::{GpioRef, SysError, TaskId};

use crate::devices::DeviceId;

/// Ports A through I.
pub const NUM_PORTS: usize = 9;
pub const PINS_PER_PORT: usize = 16;

/// One entry per pin of every port.
#[derive(Debug)]
pub struct GpioTable {
    owner: [Option<(TaskId, DeviceId)>; NUM_PORTS * PINS_PER_PORT],
}

impl GpioTable {
    pub const fn new() -> Self {
        Self {
            owner: [None; NUM_PORTS * PINS_PER_PORT],
        }
    }

    fn index(kref: GpioRef) -> Result<usize, SysError> {
        let port = usize::from(kref.port());
        if port >= NUM_PORTS {
            return Err(SysError::Inval);
        }
        Ok(port * PINS_PER_PORT + usize::from(kref.pin()))
    }

    /// Claims a pin for `(task, dev)`. A pin already claimed by anyone --
    /// including the same task -- is refused.
    pub fn register(&mut self, task: TaskId, dev: DeviceId, kref: GpioRef) -> Result<(), SysError> {
        let idx = Self::index(kref)?;
        if self.owner[idx].is_some() {
            return Err(SysError::Busy);
        }
        self.owner[idx] = Some((task, dev));
        Ok(())
    }

    /// Releases a pin. Releasing a free pin is harmless.
    pub fn release(&mut self, kref: GpioRef) {
        if let Ok(idx) = Self::index(kref) {
            self.owner[idx] = None;
        }
    }

    pub fn owner_of(&self, kref: GpioRef) -> Option<(TaskId, DeviceId)> {
        Self::index(kref).ok().and_then(|idx| self.owner[idx])
    }

    /// Checks whether `task` owns the pin, which is the access condition for
    /// the GPIO syscalls.
    pub fn task_owns(&self, task: TaskId, kref: GpioRef) -> bool {
        matches!(self.owner_of(kref), Some((t, _)) if t == task)
    }
}
