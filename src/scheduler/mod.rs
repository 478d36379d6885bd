//! Cooperative single-threaded task scheduler
//!
//! Tasks are kept in a min-heap by due time. [`Scheduler::run`] pops the
//! earliest task, blocks until it is due, runs it and either re-enqueues it or
//! drops it, one task at a time. Stop and destroy requests are recorded as a
//! pending signal and honoured at the next loop boundary; a request arriving
//! during a due-wait wakes the loop before the waiting task starts.
//!
//! `Scheduler` is a cheap handle. Clones share the same queue, so a
//! notification thread can hold one and request teardown while another thread
//! is inside `run()`.

pub mod queue;
pub mod task;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::{Result, WatchdogError};
use crate::identity::Uid;

pub use queue::TaskQueue;
pub use task::{Action, Task, TaskOutcome};

/// Lifecycle of a scheduler, also the result of [`Scheduler::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Created, never run
    Idle,
    /// Inside `run()`
    Running,
    /// The queue ran dry
    Success,
    /// `stop()` was honoured; queue left intact
    Stopped,
    /// A task could not be re-enqueued
    Error,
    /// Torn down; terminal
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Stop,
    Destroy,
}

struct Control {
    state: SchedulerState,
    pending: Pending,
}

struct Inner {
    control: Mutex<Control>,
    wake: Condvar,
    queue: Mutex<TaskQueue>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                control: Mutex::new(Control {
                    state: SchedulerState::Idle,
                    pending: Pending::None,
                }),
                wake: Condvar::new(),
                queue: Mutex::new(TaskQueue::new()),
            }),
        }
    }

    /// Schedule `action` every `interval`, first run one interval from now.
    ///
    /// Allowed from inside a running task's action.
    pub fn add<F>(&self, action: F, interval: Duration) -> Result<Uid>
    where
        F: FnMut(&Scheduler) -> TaskOutcome + Send + 'static,
    {
        self.add_task(Task::new(action, interval)?)
    }

    /// Like [`Scheduler::add`], but the first run comes `first_run` from now
    pub fn add_after<F>(&self, action: F, interval: Duration, first_run: Duration) -> Result<Uid>
    where
        F: FnMut(&Scheduler) -> TaskOutcome + Send + 'static,
    {
        self.add_task(Task::with_first_run(action, interval, first_run)?)
    }

    fn add_task(&self, task: Task) -> Result<Uid> {
        let uid = task.uid();
        let interval = task.interval();

        let mut queue = self.queue();
        if self.state() == SchedulerState::Destroyed {
            return Err(WatchdogError::SchedulerDestroyed);
        }
        queue.enqueue(task)?;

        debug!(%uid, ?interval, "Task added");
        Ok(uid)
    }

    /// Remove a queued task.
    ///
    /// The task currently executing is not in the queue; it ends itself by
    /// returning [`TaskOutcome::Done`].
    pub fn remove(&self, uid: Uid) -> Result<()> {
        self.queue()
            .erase(|task| task.uid().is_same(&uid))
            .map(drop)
            .ok_or(WatchdogError::TaskNotFound(uid))
    }

    /// Run until the queue empties or a stop/destroy request is honoured
    pub fn run(&self) -> SchedulerState {
        {
            let mut control = self.control();
            if matches!(
                control.state,
                SchedulerState::Running | SchedulerState::Destroyed
            ) {
                return control.state;
            }
            control.state = SchedulerState::Running;
            control.pending = Pending::None;
        }

        debug!(tasks = self.size(), "Scheduler running");
        let mut failed = false;

        while self.pending() == Pending::None {
            let Some(mut task) = self.queue().dequeue() else {
                break;
            };

            if !self.park_until(task.due()) {
                // Woken by a request before the task started
                let uid = task.uid();
                if let Err(err) = self.queue().enqueue(task) {
                    error!(%uid, cause = %err, "Interrupted task dropped");
                }
                break;
            }

            match task.run(self) {
                TaskOutcome::Done => {
                    debug!(uid = %task.uid(), "Task done");
                }
                TaskOutcome::Repeat => {
                    task.reschedule();
                    let uid = task.uid();
                    if let Err(err) = self.queue().enqueue(task) {
                        error!(error = %WatchdogError::Reschedule(uid), cause = %err, "Scheduler failed");
                        failed = true;
                        break;
                    }
                }
            }
        }

        // Decide and publish under one guard: a destroy() arriving later sees
        // the loop gone and frees the tasks itself
        let state = {
            let mut control = self.control();
            let state = match control.pending {
                Pending::Destroy => SchedulerState::Destroyed,
                _ if failed => SchedulerState::Error,
                Pending::Stop => SchedulerState::Stopped,
                Pending::None => SchedulerState::Success,
            };
            control.state = state;
            state
        };

        if state == SchedulerState::Destroyed {
            self.queue().clear();
        }
        debug!(?state, "Scheduler loop exited");
        state
    }

    /// Request the loop to stop after the current task. Never overrides a
    /// pending destroy.
    pub fn stop(&self) {
        let mut control = self.control();
        if control.pending != Pending::Destroy {
            control.pending = Pending::Stop;
        }
        self.inner.wake.notify_all();
    }

    /// Tear down the scheduler.
    ///
    /// When idle every task is dropped right away. While running only the
    /// request is recorded; the thread inside `run()` drops the tasks at its
    /// next loop boundary and returns [`SchedulerState::Destroyed`].
    pub fn destroy(&self) {
        {
            let mut control = self.control();
            control.pending = Pending::Destroy;
            if control.state == SchedulerState::Running {
                self.inner.wake.notify_all();
                return;
            }
            control.state = SchedulerState::Destroyed;
        }

        self.queue().clear();
        debug!("Scheduler destroyed");
    }

    /// Drop every queued task. A task executing right now is not queued and
    /// survives; it is rescheduled as usual if it returns `Repeat`.
    pub fn clear(&self) {
        self.queue().clear();
    }

    pub fn size(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn state(&self) -> SchedulerState {
        self.control().state
    }

    /// Block until `due`. Returns false if a stop/destroy request arrived first.
    fn park_until(&self, due: Instant) -> bool {
        let mut control = self.control();
        loop {
            if control.pending != Pending::None {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            control = match self.inner.wake.wait_timeout(control, due - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn pending(&self) -> Pending {
        self.control().pending
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.inner
            .control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self) -> MutexGuard<'_, TaskQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_scheduler_is_idle_and_empty() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.size(), 0);
    }

    #[test]
    fn test_run_on_empty_queue_succeeds() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.run(), SchedulerState::Success);
        assert_eq!(scheduler.state(), SchedulerState::Success);
    }

    #[test]
    fn test_stop_never_downgrades_destroy() {
        let scheduler = Scheduler::new();
        scheduler.control().state = SchedulerState::Running;
        scheduler.destroy();
        scheduler.stop();
        assert_eq!(scheduler.pending(), Pending::Destroy);
    }

    #[test]
    fn test_park_until_returns_early_on_stop() {
        let scheduler = Scheduler::new();
        scheduler.stop();
        let started = Instant::now();
        assert!(!scheduler.park_until(Instant::now() + Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_add_after_destroy_fails() {
        let scheduler = Scheduler::new();
        scheduler.destroy();
        assert_eq!(scheduler.state(), SchedulerState::Destroyed);
        assert!(matches!(
            scheduler.add(|_| TaskOutcome::Done, Duration::ZERO),
            Err(WatchdogError::SchedulerDestroyed)
        ));
        assert_eq!(scheduler.run(), SchedulerState::Destroyed);
    }
}
