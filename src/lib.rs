//! Mutual watchdog - a guarded program and a helper process that keep each
//! other alive through periodic heartbeats.
//!
//! The building blocks are usable on their own: [`Uid`] for unique
//! identifiers and [`Scheduler`] for single-threaded timed task execution.

pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod process;
pub mod scheduler;
pub mod watchdog;

pub use config::WatchdogConfig;
pub use error::{Result, WatchdogError};
pub use identity::Uid;
pub use scheduler::{Scheduler, SchedulerState, Task, TaskOutcome};
pub use watchdog::{run_spawned, start, Role, Watchdog};
