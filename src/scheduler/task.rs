//! Schedulable unit of work

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::identity::Uid;

use super::Scheduler;

/// What a task wants after it ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Run again one interval from now
    Repeat,
    /// Never run again
    Done,
}

/// Task body. Captured state is the task's context; the scheduler handle lets
/// an action stop, destroy, clear or add to the scheduler running it.
pub type Action = Box<dyn FnMut(&Scheduler) -> TaskOutcome + Send>;

pub struct Task {
    uid: Uid,
    action: Action,
    interval: Duration,
    due: Instant,
}

impl Task {
    /// Create a task first due one interval from now
    pub fn new<F>(action: F, interval: Duration) -> Result<Self>
    where
        F: FnMut(&Scheduler) -> TaskOutcome + Send + 'static,
    {
        Self::with_first_run(action, interval, interval)
    }

    /// Create a task first due `first_run` from now, then every `interval`
    pub fn with_first_run<F>(action: F, interval: Duration, first_run: Duration) -> Result<Self>
    where
        F: FnMut(&Scheduler) -> TaskOutcome + Send + 'static,
    {
        let uid = Uid::create()?;

        Ok(Self {
            uid,
            action: Box::new(action),
            interval,
            due: Instant::now() + first_run,
        })
    }

    /// Sleep until due, then invoke the action and return its outcome as is
    pub fn run(&mut self, scheduler: &Scheduler) -> TaskOutcome {
        let now = Instant::now();
        if self.due > now {
            thread::sleep(self.due - now);
        }

        (self.action)(scheduler)
    }

    /// Move the due time one interval past now
    pub fn reschedule(&mut self) {
        self.due = Instant::now() + self.interval;
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn due(&self) -> Instant {
        self.due
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.uid.is_same(&other.uid)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("uid", &self.uid)
            .field("interval", &self.interval)
            .field("due", &self.due)
            .finish_non_exhaustive()
    }
}
