// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sleep management.
//!
//! A sleeping task is unschedulable until the system timer reaches its
//! deadline -- the first tick at or after it, so a task always sleeps at
//! least as long as it asked. Interruptible sleepers are additionally woken
//! by an arriving interrupt or IPC; deep sleepers only by the timer.

use abi::{SleepMode, SysError, TaskId, TaskState, ThreadMode, NUM_TASKS};

use crate::kernel::Kernel;
use crate::task::SchedHint;
use crate::time::Timestamp;

#[derive(Copy, Clone, Debug, Default)]
struct SleepEntry {
    until: Timestamp,
    interruptible: bool,
}

/// One deadline per task slot.
#[derive(Debug, Default)]
pub struct SleepTable {
    entries: [SleepEntry; NUM_TASKS],
}

impl SleepTable {
    pub const fn new() -> Self {
        Self {
            entries: [SleepEntry {
                until: Timestamp::ZERO,
                interruptible: false,
            }; NUM_TASKS],
        }
    }
}

impl Kernel {
    /// Puts `caller`'s main thread to sleep for `ms` milliseconds.
    pub fn sleep_task(
        &mut self,
        caller: TaskId,
        ms: u32,
        mode: SleepMode,
    ) -> Result<SchedHint, SysError> {
        let now = crate::arch::now();
        let entry = &mut self.sleep.entries[caller.index()];
        entry.until = now.after_millis(ms);
        entry.interruptible = mode == SleepMode::Interruptible;

        let state = if mode == SleepMode::Interruptible {
            TaskState::Sleeping
        } else {
            TaskState::SleepingDeep
        };
        self.tasks[caller.index()].set_state(ThreadMode::Main, state);
        Ok(SchedHint::Reschedule)
    }

    /// Wakes every sleeper whose deadline has arrived. Runs on each tick.
    pub fn wake_expired(&mut self, now: Timestamp) -> SchedHint {
        let mut hint = SchedHint::Same;
        for (idx, entry) in self.sleep.entries.iter().enumerate() {
            let task = &mut self.tasks[idx];
            match task.state(ThreadMode::Main) {
                TaskState::Sleeping | TaskState::SleepingDeep => {
                    if now >= entry.until {
                        task.set_state(ThreadMode::Main, TaskState::Runnable);
                        hint = hint.combine(SchedHint::Reschedule);
                    }
                }
                _ => {}
            }
        }
        hint
    }

    /// Wakes a sleeper early on behalf of an external event (interrupt or
    /// IPC). Deep sleepers stay down unless their deadline has passed.
    pub fn try_wake(&mut self, id: TaskId) {
        let entry = self.sleep.entries[id.index()];
        let task = &mut self.tasks[id.index()];
        match task.state(ThreadMode::Main) {
            TaskState::Sleeping => {
                task.set_state(ThreadMode::Main, TaskState::Runnable);
            }
            TaskState::SleepingDeep => {
                if crate::arch::now() >= entry.until {
                    task.set_state(ThreadMode::Main, TaskState::Runnable);
                }
            }
            _ => {}
        }
    }

    pub fn is_sleeping(&self, id: TaskId) -> bool {
        matches!(
            self.tasks[id.index()].state(ThreadMode::Main),
            TaskState::Sleeping | TaskState::SleepingDeep
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::arch;
    use crate::testutil::{self, A, B};
    use abi::{SleepMode, TaskState, ThreadMode};

    #[test]
    fn sleeper_wakes_on_the_first_tick_at_or_after_the_deadline() {
        let mut k = testutil::kernel();
        arch::test_advance_ticks(1000);
        let _ = k.sleep_task(A, 100, SleepMode::Interruptible).unwrap();
        assert_eq!(k.tasks[A.index()].state(ThreadMode::Main), TaskState::Sleeping);

        let _ = k.wake_expired(1099u64.into());
        assert_eq!(k.tasks[A.index()].state(ThreadMode::Main), TaskState::Sleeping);

        let _ = k.wake_expired(1100u64.into());
        assert_eq!(k.tasks[A.index()].state(ThreadMode::Main), TaskState::Runnable);
    }

    #[test]
    fn deep_sleep_resists_early_wakes_but_not_the_timer() {
        let mut k = testutil::kernel();
        arch::test_advance_ticks(500);
        let _ = k.sleep_task(B, 50, SleepMode::Deep).unwrap();

        k.try_wake(B);
        assert_eq!(
            k.tasks[B.index()].state(ThreadMode::Main),
            TaskState::SleepingDeep
        );

        // Once the deadline has passed, even the early-wake path releases
        // it.
        arch::test_advance_ticks(50);
        k.try_wake(B);
        assert_eq!(k.tasks[B.index()].state(ThreadMode::Main), TaskState::Runnable);
    }

    #[test]
    fn wake_scan_only_touches_sleepers() {
        let mut k = testutil::kernel();
        k.tasks[A.index()].set_state(ThreadMode::Main, TaskState::Idle);
        let _ = k.wake_expired(arch::now());
        assert_eq!(k.tasks[A.index()].state(ThreadMode::Main), TaskState::Idle);
    }
}
