//! Cross-process notifications
//!
//! Heartbeat and terminate are delivered as SIGUSR1 and SIGUSR2. Neither is
//! handled asynchronously: both are blocked in every watchdog thread and a
//! listener thread takes them off the pending set with `sigwait`, then
//! dispatches to a [`NotificationHandler`] from ordinary thread context.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::sys::signal::{kill, SigSet, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{Result, WatchdogError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Heartbeat,
    Terminate,
}

impl Notification {
    pub fn signal(self) -> Signal {
        match self {
            Self::Heartbeat => Signal::SIGUSR1,
            Self::Terminate => Signal::SIGUSR2,
        }
    }

    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::SIGUSR1 => Some(Self::Heartbeat),
            Signal::SIGUSR2 => Some(Self::Terminate),
            _ => None,
        }
    }
}

/// Receives notifications on the listener thread. Implementations must only
/// do bounded work: flip an atomic, request a scheduler stop or destroy.
pub trait NotificationHandler: Send + Sync + 'static {
    fn heartbeat_received(&self);

    fn terminate_requested(&self);
}

fn notification_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Notification::Heartbeat.signal());
    set.add(Notification::Terminate.signal());
    set
}

/// Block both notification signals in the calling thread. Threads spawned
/// afterwards inherit the mask, so call this before spawning any of them.
pub fn block() -> Result<()> {
    notification_set()
        .thread_block()
        .map_err(WatchdogError::NotificationSetup)
}

/// Deliver a notification to another process
pub fn send(pid: Pid, notification: Notification) -> Result<()> {
    kill(pid, notification.signal()).map_err(|source| WatchdogError::PeerUnreachable {
        pid: pid.as_raw(),
        source,
    })
}

/// Start the listener thread. It exits after dispatching a terminate.
pub fn spawn_listener<H: NotificationHandler>(handler: Arc<H>) -> Result<JoinHandle<()>> {
    let set = notification_set();

    thread::Builder::new()
        .name("wd-notify".to_string())
        .spawn(move || loop {
            match set.wait() {
                Ok(signal) => match Notification::from_signal(signal) {
                    Some(Notification::Heartbeat) => handler.heartbeat_received(),
                    Some(Notification::Terminate) => {
                        debug!("Terminate received");
                        handler.terminate_requested();
                        break;
                    }
                    None => {}
                },
                Err(e) => {
                    warn!(error = %e, "sigwait failed, listener exiting");
                    break;
                }
            }
        })
        .map_err(|e| WatchdogError::ProcessLaunch {
            what: "notification listener",
            reason: e.to_string(),
        })
}
