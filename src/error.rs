use thiserror::Error;

use crate::identity::Uid;
use crate::scheduler::SchedulerState;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Failed to allocate {0}")]
    Allocation(&'static str),

    #[error("Failed to create identity: {0}")]
    Identity(#[source] nix::Error),

    #[error("Semaphore {name} setup failed: {source}")]
    SyncSetup {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install notification handlers: {0}")]
    NotificationSetup(#[source] nix::Error),

    #[error("Failed to launch {what}: {reason}")]
    ProcessLaunch { what: &'static str, reason: String },

    #[error("Failed to reschedule task {0}, task dropped")]
    Reschedule(Uid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uid),

    #[error("Scheduler has been destroyed")]
    SchedulerDestroyed,

    #[error("Invalid watchdog configuration: {0}")]
    InvalidConfig(String),

    #[error("Timed out after {0:?} waiting for the peer to become ready")]
    BootstrapTimeout(std::time::Duration),

    #[error("Peer {pid} unreachable: {source}")]
    PeerUnreachable {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("Scheduler exited unexpectedly with state {0:?}")]
    UnexpectedExit(SchedulerState),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WatchdogError>;
