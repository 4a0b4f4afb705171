// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Election of the next thread to run.
//!
//! Election runs on every deferred-switch interrupt and every
//! `sched_period`-th tick, and always walks the same ladder:
//!
//! 1. a runnable interrupt thread -- deferred handlers preempt everything;
//! 2. a main thread in a scheduling critical section (`Locked`);
//! 3. wrap-up of finished interrupt threads, which may force their main
//!    thread's election;
//! 4. the deferred-work thread, when its queues are non-empty;
//! 5. a main thread `Forced` by an IPC partner;
//! 6. the configured policy over runnable main threads;
//! 7. the idle task.
//!
//! Electing a thread recomputes the dynamic MPU regions for it before the
//! hardware resumes it; no thread ever runs under another's memory view.

use abi::{IsrScheduling, TaskId, TaskState, ThreadMode, NUM_TASKS};

use crate::arch;
use crate::descs::SchedPolicy;
use crate::kernel::Kernel;
use crate::mpm;
use crate::time::Timestamp;

/// Scheduler bookkeeping, part of the kernel executive.
pub struct SchedState {
    /// The thread the processor is currently running (or about to run).
    pub(crate) current: TaskId,
    /// Last user task elected by the cyclic policies.
    last_user: TaskId,
    /// Ticks since the last periodic election.
    period: u32,
    /// Number of populated user tasks, fixed at startup.
    pub(crate) num_user_tasks: u8,
    #[cfg(feature = "sched-trace")]
    trace: Trace,
}

impl SchedState {
    pub const fn new() -> Self {
        Self {
            current: TaskId::IDLE,
            last_user: TaskId(TaskId::FIRST_USER),
            period: 0,
            num_user_tasks: 0,
            #[cfg(feature = "sched-trace")]
            trace: Trace::new(),
        }
    }
}

/// Cyclic successor of a user task id.
fn next_user(id: TaskId, num_user: u8) -> TaskId {
    let first = TaskId::FIRST_USER;
    let next = id.0 + 1;
    if next >= first + num_user {
        TaskId(first)
    } else {
        TaskId(next)
    }
}

impl Kernel {
    fn user_ids(&self) -> impl Iterator<Item = TaskId> {
        let n = self.sched.num_user_tasks;
        (TaskId::FIRST_USER..TaskId::FIRST_USER + n).map(TaskId)
    }

    /// Elects the next thread, applying the wrap-up side effects of
    /// finished interrupt threads along the way.
    pub fn elect(&mut self) -> TaskId {
        // 1. Pending deferred handlers run before anything else.
        for id in self.user_ids() {
            let t = &self.tasks[id.index()];
            if t.mode() == ThreadMode::Isr && t.state(ThreadMode::Isr) == TaskState::Runnable {
                return self.elected(id);
            }
        }

        // 2. Critical-section holders.
        for id in self.user_ids() {
            if self.tasks[id.index()].state(ThreadMode::Main) == TaskState::Locked {
                return self.elected(id);
            }
        }

        // 3. Fold finished interrupt threads back into main-thread mode.
        let ids: [TaskId; NUM_TASKS] = core::array::from_fn(|i| TaskId(i as u8));
        for id in ids.into_iter().filter(|i| i.is_user()) {
            let t = &mut self.tasks[id.index()];
            if t.mode() != ThreadMode::Isr || t.state(ThreadMode::Isr) != TaskState::IsrDone {
                continue;
            }
            let sched_mode = t.ctx.isr.isr_sched;
            t.set_state(ThreadMode::Isr, TaskState::Idle);
            t.ctx.isr.device = None;
            t.ctx.isr.irq = 0;
            t.set_mode(ThreadMode::Main);

            match sched_mode {
                IsrScheduling::ForceMainThread => {
                    if t.state(ThreadMode::Main) != TaskState::Fault {
                        t.set_state(ThreadMode::Main, TaskState::Runnable);
                        return self.elected(id);
                    }
                }
                IsrScheduling::Standard => {
                    if self.is_sleeping(id) {
                        self.try_wake(id);
                    } else if self.tasks[id.index()].state(ThreadMode::Main) == TaskState::Idle {
                        self.tasks[id.index()].set_state(ThreadMode::Main, TaskState::Runnable);
                    }
                }
                IsrScheduling::WithoutMainThread => {}
            }
        }

        // 4. The deferred-work thread, ahead of all main threads.
        if self.tasks[TaskId::SOFTIRQ.index()].state(ThreadMode::Main) == TaskState::Runnable {
            return self.elected(TaskId::SOFTIRQ);
        }

        // 5. One-shot elections forced by IPC partners.
        for id in self.user_ids() {
            if self.tasks[id.index()].state(ThreadMode::Main) == TaskState::Forced {
                self.tasks[id.index()].set_state(ThreadMode::Main, TaskState::Runnable);
                return self.elected(id);
            }
        }

        // 6. The configured policy over runnable main threads.
        if let Some(id) = self.elect_by_policy() {
            return self.elected(id);
        }

        // 7. Nothing to do.
        self.elected(TaskId::IDLE)
    }

    fn runnable_main(&self, id: TaskId) -> bool {
        let t = &self.tasks[id.index()];
        t.mode() == ThreadMode::Main && t.state(ThreadMode::Main) == TaskState::Runnable
    }

    fn elect_by_policy(&mut self) -> Option<TaskId> {
        let num_user = self.sched.num_user_tasks;
        if num_user == 0 {
            return None;
        }
        match self.config.policy {
            SchedPolicy::RoundRobin => {
                let mut id = self.sched.last_user;
                for _ in 0..num_user {
                    id = next_user(id, num_user);
                    if self.runnable_main(id) {
                        self.sched.last_user = id;
                        return Some(id);
                    }
                }
                None
            }
            SchedPolicy::Random => {
                // Bounded draw, like any use of the hardware source; if the
                // generator is unlucky or dead we fall through to idle
                // rather than spin.
                for _ in 0..32 {
                    let word = match self.random_word() {
                        Ok(w) => w,
                        Err(_) => break,
                    };
                    let id = TaskId(TaskId::FIRST_USER + (word % u32::from(num_user)) as u8);
                    if self.runnable_main(id) {
                        return Some(id);
                    }
                }
                None
            }
            SchedPolicy::MlqRoundRobin => {
                // Highest runnable priority class first, cyclic within it.
                let top = self
                    .user_ids()
                    .filter(|&id| self.runnable_main(id))
                    .map(|id| self.tasks[id.index()].priority())
                    .max()?;
                let mut id = self.sched.last_user;
                for _ in 0..num_user {
                    id = next_user(id, num_user);
                    if self.runnable_main(id) && self.tasks[id.index()].priority() == top {
                        self.sched.last_user = id;
                        return Some(id);
                    }
                }
                None
            }
        }
    }

    fn elected(&mut self, id: TaskId) -> TaskId {
        self.sched.current = id;
        #[cfg(feature = "sched-trace")]
        self.sched.trace.push(
            arch::now(),
            id,
            self.tasks[id.index()].mode(),
        );
        id
    }

    /// Commits an election: recomputes the dynamic MPU regions for the
    /// elected thread and hands its context to the architecture layer.
    pub fn switch_to(&mut self, id: TaskId) {
        let task = &self.tasks[id.index()];
        let layout = mpm::layout_for(task, &self.devices);
        arch::apply_memory_protection(&layout);
        // Safety: the reference aliases the task table only until the next
        // kernel entry, per set_current_task's contract.
        unsafe {
            arch::set_current_task(task);
        }
    }

    /// Checks whether the running thread is a deferred handler that has not
    /// finished; those are never preempted by an election (they end with
    /// their own trap).
    fn mid_isr(&self) -> bool {
        let t = &self.tasks[self.sched.current.index()];
        t.mode() == ThreadMode::Isr && t.state(ThreadMode::Isr) == TaskState::Runnable
    }

    /// Deferred-switch entry point; the current context has already been
    /// saved.
    pub fn on_pendsv(&mut self) {
        self.sched.period = 0;
        if self.mid_isr() {
            return;
        }
        let next = self.elect();
        self.switch_to(next);
    }

    /// Tick entry point. Returns whether a deferred switch should be
    /// requested.
    pub fn on_systick(&mut self, now: Timestamp) -> bool {
        let _ = self.wake_expired(now);

        self.sched.period += 1;
        if self.sched.period < self.config.sched_period {
            return false;
        }
        self.sched.period = 0;
        !self.mid_isr()
    }
}

/// Election trace: a small ring of (timestamp, task, mode) records useful
/// when debugging scheduling.
#[cfg(feature = "sched-trace")]
struct Trace {
    buf: [TraceRec; 64],
    at: usize,
}

#[cfg(feature = "sched-trace")]
#[derive(Copy, Clone, Default)]
struct TraceRec {
    millis: u64,
    task: u8,
    isr: bool,
}

#[cfg(feature = "sched-trace")]
impl Trace {
    const fn new() -> Self {
        Self {
            buf: [TraceRec {
                millis: 0,
                task: 0,
                isr: false,
            }; 64],
            at: 0,
        }
    }

    fn push(&mut self, now: Timestamp, task: TaskId, mode: ThreadMode) {
        self.buf[self.at] = TraceRec {
            millis: now.millis(),
            task: task.0,
            isr: mode == ThreadMode::Isr,
        };
        self.at = (self.at + 1) % self.buf.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, A, B, C};

    #[test]
    fn round_robin_cycles_through_runnable_tasks() {
        let mut k = testutil::kernel();
        // All three user tasks boot runnable; the cycle starts after the
        // first user slot.
        assert_eq!(k.elect(), B);
        assert_eq!(k.elect(), C);
        assert_eq!(k.elect(), A);
        assert_eq!(k.elect(), B);

        // A task that stops being runnable drops out of the cycle.
        k.tasks[C.index()].set_state(ThreadMode::Main, TaskState::Idle);
        assert_eq!(k.elect(), A);
        assert_eq!(k.elect(), B);
        assert_eq!(k.elect(), A);
    }

    #[test]
    fn interrupt_threads_preempt_everything() {
        let mut k = testutil::kernel();
        k.tasks[C.index()].set_state(ThreadMode::Main, TaskState::Locked);
        k.tasks[TaskId::SOFTIRQ.index()].set_state(ThreadMode::Main, TaskState::Runnable);

        let t = &mut k.tasks[B.index()];
        t.set_mode(ThreadMode::Isr);
        t.set_state(ThreadMode::Isr, TaskState::Runnable);

        assert_eq!(k.elect(), B);
    }

    #[test]
    fn locked_tasks_precede_the_policy_and_softirq() {
        let mut k = testutil::kernel();
        k.tasks[TaskId::SOFTIRQ.index()].set_state(ThreadMode::Main, TaskState::Runnable);
        k.tasks[C.index()].set_state(ThreadMode::Main, TaskState::Locked);
        assert_eq!(k.elect(), C);

        // Once the critical section ends, the deferred-work thread is next.
        k.tasks[C.index()].set_state(ThreadMode::Main, TaskState::Runnable);
        assert_eq!(k.elect(), TaskId::SOFTIRQ);
    }

    #[test]
    fn finished_interrupt_thread_wraps_up() {
        let mut k = testutil::kernel();
        let t = &mut k.tasks[A.index()];
        t.set_mode(ThreadMode::Isr);
        t.set_state(ThreadMode::Isr, TaskState::IsrDone);
        t.set_state(ThreadMode::Main, TaskState::Idle);
        t.ctx.isr.isr_sched = IsrScheduling::Standard;

        let _ = k.elect();
        let t = &k.tasks[A.index()];
        assert_eq!(t.mode(), ThreadMode::Main);
        assert_eq!(t.state(ThreadMode::Isr), TaskState::Idle);
        // An idle main thread is woken by its finishing handler.
        assert_eq!(t.state(ThreadMode::Main), TaskState::Runnable);
    }

    #[test]
    fn force_mainthread_elects_the_owner_immediately() {
        let mut k = testutil::kernel();
        let t = &mut k.tasks[C.index()];
        t.set_mode(ThreadMode::Isr);
        t.set_state(ThreadMode::Isr, TaskState::IsrDone);
        t.set_state(ThreadMode::Main, TaskState::Idle);
        t.ctx.isr.isr_sched = IsrScheduling::ForceMainThread;

        // C is the lowest-priority task, but the forced wrap-up elects it
        // over A and B.
        assert_eq!(k.elect(), C);
        assert_eq!(k.tasks[C.index()].state(ThreadMode::Main), TaskState::Runnable);
    }

    #[test]
    fn without_mainthread_leaves_the_main_thread_alone() {
        let mut k = testutil::kernel();
        let t = &mut k.tasks[A.index()];
        t.set_mode(ThreadMode::Isr);
        t.set_state(ThreadMode::Isr, TaskState::IsrDone);
        t.set_state(ThreadMode::Main, TaskState::Idle);
        t.ctx.isr.isr_sched = IsrScheduling::WithoutMainThread;

        let _ = k.elect();
        assert_eq!(k.tasks[A.index()].state(ThreadMode::Main), TaskState::Idle);
    }

    #[test]
    fn forced_task_runs_once_ahead_of_policy() {
        let mut k = testutil::kernel();
        k.tasks[C.index()].set_state(ThreadMode::Main, TaskState::Forced);
        assert_eq!(k.elect(), C);
        // The forcing is one-shot.
        assert_eq!(k.tasks[C.index()].state(ThreadMode::Main), TaskState::Runnable);
        assert_ne!(k.elect(), C);
    }

    #[test]
    fn idle_task_is_the_last_resort() {
        let mut k = testutil::kernel();
        for id in [A, B, C] {
            k.tasks[id.index()].set_state(ThreadMode::Main, TaskState::Idle);
        }
        assert_eq!(k.elect(), TaskId::IDLE);
    }

    #[test]
    fn mlq_policy_starves_lower_priorities_while_higher_run() {
        let mut k = testutil::kernel();
        k.config = &testutil::MLQ_CONFIG;

        // A and B share the top priority; C never gets elected while they
        // are runnable.
        for _ in 0..6 {
            let id = k.elect();
            assert!(id == A || id == B, "unexpected election of {:?}", id);
        }

        k.tasks[A.index()].set_state(ThreadMode::Main, TaskState::Idle);
        k.tasks[B.index()].set_state(ThreadMode::Main, TaskState::Idle);
        assert_eq!(k.elect(), C);
    }

    #[test]
    fn periodic_election_respects_the_period() {
        let mut k = testutil::kernel();
        let mut cfg = testutil::TEST_CONFIG.clone();
        cfg.sched_period = 3;
        let cfg: &'static crate::descs::KernelConfig = Box::leak(Box::new(cfg));
        k.config = cfg;

        assert!(!k.on_systick(crate::arch::now()));
        assert!(!k.on_systick(crate::arch::now()));
        assert!(k.on_systick(crate::arch::now()));
        // Counter resets after firing.
        assert!(!k.on_systick(crate::arch::now()));
    }

    #[test]
    fn running_interrupt_thread_is_not_preempted() {
        let mut k = testutil::kernel();
        let t = &mut k.tasks[B.index()];
        t.set_mode(ThreadMode::Isr);
        t.set_state(ThreadMode::Isr, TaskState::Runnable);
        k.sched.current = B;

        // Neither the periodic election nor an explicit switch displaces a
        // handler in flight.
        assert!(!k.on_systick(crate::arch::now()));
        k.on_pendsv();
        assert_eq!(k.sched.current, B);
    }
}
