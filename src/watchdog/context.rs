//! Per-process watchdog state and the two standing tasks

use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::scheduler::{Scheduler, SchedulerState, TaskOutcome};

use super::notify::{self, Notification, NotificationHandler};
use super::semaphore::NamedSemaphore;
use super::Role;

/// State shared by the monitor loop, the notification listener and the
/// public handle. One per process.
pub struct WatchdogContext {
    role: Role,
    config: WatchdogConfig,
    args: Vec<String>,
    semaphore_name: String,
    /// Raw pid of the peer, 0 while unknown
    peer: AtomicI32,
    /// Heartbeats sent since the last one received
    failures: AtomicU32,
    scheduler: Mutex<Option<Scheduler>>,
    helper: Mutex<Option<Child>>,
    terminated: AtomicBool,
    shutting_down: AtomicBool,
}

impl WatchdogContext {
    pub fn new(role: Role, config: WatchdogConfig, args: Vec<String>, semaphore_name: String) -> Self {
        Self {
            role,
            config,
            args,
            semaphore_name,
            peer: AtomicI32::new(0),
            failures: AtomicU32::new(0),
            scheduler: Mutex::new(None),
            helper: Mutex::new(None),
            terminated: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Launch arguments of the guarded program, argv[0] first
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn semaphore_name(&self) -> &str {
        &self.semaphore_name
    }

    pub fn peer(&self) -> Option<Pid> {
        match self.peer.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    pub fn set_peer(&self, pid: Pid) {
        self.peer.store(pid.as_raw(), Ordering::SeqCst);
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Remember the helper process launched by the Initiator
    pub fn set_helper(&self, child: Child) {
        self.set_peer(Pid::from_raw(child.id() as i32));
        *lock(&self.helper) = Some(child);
    }

    pub fn take_helper(&self) -> Option<Child> {
        lock(&self.helper).take()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Heartbeat-send task body. The counter grows whether or not the peer
    /// is reachable; only a received heartbeat resets it.
    fn send_heartbeat(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(peer) = self.peer() {
            if let Err(e) = notify::send(peer, Notification::Heartbeat) {
                debug!(error = %e, failures, "Heartbeat not delivered");
            }
        }
    }

    /// Liveness-check task body
    fn check_liveness(&self, scheduler: &Scheduler) {
        let failures = self.failures();
        if failures >= self.config.threshold {
            warn!(
                failures,
                threshold = self.config.threshold,
                peer = ?self.peer().map(Pid::as_raw),
                "Peer missed too many heartbeats"
            );
            scheduler.stop();
        }
    }

    /// Run one supervision cycle: build the scheduler with both standing
    /// tasks, signal `ready`, then block in `run()`.
    pub fn supervise(self: &Arc<Self>, ready: Option<&NamedSemaphore>) -> Result<SchedulerState> {
        self.supervise_every(self.config.interval(), self.config.check_period(), ready)
    }

    pub(crate) fn supervise_every(
        self: &Arc<Self>,
        interval: Duration,
        check_period: Duration,
        ready: Option<&NamedSemaphore>,
    ) -> Result<SchedulerState> {
        self.failures.store(0, Ordering::SeqCst);

        let scheduler = Scheduler::new();
        let ctx = Arc::clone(self);
        scheduler.add(
            move |_| {
                ctx.send_heartbeat();
                TaskOutcome::Repeat
            },
            interval,
        )?;
        // Half an interval behind the heartbeats, so the threshold-th send
        // is counted before the first check reads the counter
        let ctx = Arc::clone(self);
        scheduler.add_after(
            move |sched| {
                ctx.check_liveness(sched);
                TaskOutcome::Repeat
            },
            check_period,
            check_period + interval / 2,
        )?;

        if !self.install(&scheduler) {
            scheduler.destroy();
            return Ok(SchedulerState::Destroyed);
        }

        if let Some(sem) = ready {
            if let Err(e) = sem.post() {
                self.uninstall();
                scheduler.destroy();
                return Err(e);
            }
        }

        info!(peer = ?self.peer().map(Pid::as_raw), "Supervising peer");
        let state = scheduler.run();

        // Drop the standing tasks so their handles on this context go away
        self.uninstall();
        scheduler.destroy();

        Ok(state)
    }

    fn install(&self, scheduler: &Scheduler) -> bool {
        let mut slot = lock(&self.scheduler);
        if self.is_terminated() {
            return false;
        }
        *slot = Some(scheduler.clone());
        true
    }

    fn uninstall(&self) {
        lock(&self.scheduler).take();
    }
}

impl NotificationHandler for WatchdogContext {
    fn heartbeat_received(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    fn terminate_requested(&self) {
        let slot = lock(&self.scheduler);
        self.terminated.store(true, Ordering::SeqCst);
        if let Some(scheduler) = slot.as_ref() {
            scheduler.destroy();
        }
        drop(slot);

        NamedSemaphore::unlink(&self.semaphore_name);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
