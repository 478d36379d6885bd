//! Mutual-watchdog protocol
//!
//! The guarded program calls [`start`]. That makes it the Initiator: it
//! creates the bootstrap semaphore, launches the `wd` helper (the Spawned
//! side) and runs its own monitor on a background thread. Each side sends a
//! heartbeat to the other every interval and checks every
//! `interval * threshold` whether it has heard back. A side that stops
//! hearing from its peer revives it, each in its own way (see [`revive`]).

pub mod context;
pub mod notify;
pub mod revive;
pub mod semaphore;

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::unistd::{getpid, Pid};
use tracing::{info, info_span, warn};

use crate::config::{WatchdogConfig, PEER_PID_ENV, SEMAPHORE_ENV};
use crate::error::{Result, WatchdogError};
use crate::scheduler::SchedulerState;

pub use context::WatchdogContext;
pub use notify::Notification;
pub use semaphore::NamedSemaphore;

/// Position of a process in the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The guarded program; launches the helper and respawns it when it dies
    Initiator,
    /// The `wd` helper; replaces itself with the guarded program when the
    /// Initiator dies
    Spawned,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => write!(f, "Initiator"),
            Self::Spawned => write!(f, "Spawned"),
        }
    }
}

/// Handle on a running watchdog pair, held by the guarded program
pub struct Watchdog {
    ctx: Arc<WatchdogContext>,
    monitor: Option<JoinHandle<Result<()>>>,
    listener: Option<JoinHandle<()>>,
}

/// Start guarding the calling program.
///
/// `args` are the program's own launch arguments, argv[0] first; the helper
/// uses them to relaunch the program if it dies. Blocks until both the helper
/// and the local monitor report ready.
///
/// Heartbeat and terminate signals are blocked in the calling thread, so call
/// this from the main thread before spawning other threads.
pub fn start(config: WatchdogConfig, args: Vec<String>) -> Result<Watchdog> {
    config.validate()?;
    if args.is_empty() {
        return Err(WatchdogError::InvalidConfig(
            "launch arguments must include the program path".to_string(),
        ));
    }

    notify::block()?;

    let me = getpid();
    let semaphore_name = config.semaphore_name(me.as_raw());
    let ctx = Arc::new(WatchdogContext::new(
        Role::Initiator,
        config,
        args,
        semaphore_name,
    ));

    let sem = Arc::new(NamedSemaphore::create(ctx.semaphore_name())?);
    let listener = match notify::spawn_listener(Arc::clone(&ctx)) {
        Ok(listener) => listener,
        Err(e) => {
            NamedSemaphore::unlink(sem.name());
            return Err(e);
        }
    };

    match bootstrap(&ctx, &sem) {
        Ok(monitor) => {
            NamedSemaphore::unlink(sem.name());
            info!(
                peer = ?ctx.peer().map(Pid::as_raw),
                threshold = ctx.config().threshold,
                interval = ctx.config().interval_secs,
                "Watchdog started"
            );
            Ok(Watchdog {
                ctx,
                monitor: Some(monitor),
                listener: Some(listener),
            })
        }
        Err(e) => {
            warn!(error = %e, "Watchdog bootstrap failed");
            NamedSemaphore::unlink(sem.name());
            if let Some(child) = ctx.take_helper() {
                let _ = revive::terminate_helper(child, ctx.config().bootstrap_timeout());
            }
            if notify::send(me, Notification::Terminate).is_ok() {
                let _ = listener.join();
            }
            Err(e)
        }
    }
}

/// Launch the helper, then the local monitor, waiting on the semaphore once
/// for each
fn bootstrap(
    ctx: &Arc<WatchdogContext>,
    sem: &Arc<NamedSemaphore>,
) -> Result<JoinHandle<Result<()>>> {
    revive::spawn_helper(ctx, sem)?;

    let monitor_ctx = Arc::clone(ctx);
    let ready = Arc::clone(sem);
    let monitor = thread::Builder::new()
        .name("wd-monitor".to_string())
        .spawn(move || monitor_loop(monitor_ctx, ready))
        .map_err(|e| WatchdogError::ProcessLaunch {
            what: "monitor thread",
            reason: e.to_string(),
        })?;

    sem.wait_for(ctx.config().bootstrap_timeout(), || {
        if monitor.is_finished() {
            Err(WatchdogError::ProcessLaunch {
                what: "monitor thread",
                reason: "exited before becoming ready".to_string(),
            })
        } else {
            Ok(())
        }
    })?;

    Ok(monitor)
}

/// Initiator side: supervise, and respawn the helper whenever it goes quiet
fn monitor_loop(ctx: Arc<WatchdogContext>, ready: Arc<NamedSemaphore>) -> Result<()> {
    let span = info_span!("watchdog", role = %ctx.role());
    let _guard = span.enter();

    let mut ready = Some(ready);
    loop {
        let state = ctx.supervise(ready.as_deref())?;
        ready = None;

        match state {
            SchedulerState::Stopped if !ctx.is_shutting_down() => {
                warn!(peer = ?ctx.peer().map(Pid::as_raw), "Helper presumed dead, respawning");
                revive::respawn_peer(&ctx)?;
                info!(peer = ?ctx.peer().map(Pid::as_raw), "Helper revived");
            }
            SchedulerState::Stopped | SchedulerState::Destroyed => return Ok(()),
            other => return Err(WatchdogError::UnexpectedExit(other)),
        }
    }
}

impl Watchdog {
    /// Pid of the helper currently paired with this program
    pub fn peer_pid(&self) -> Option<i32> {
        self.ctx.peer().map(Pid::as_raw)
    }

    /// Heartbeats sent to the helper since its last one arrived
    pub fn failures(&self) -> u32 {
        self.ctx.failures()
    }

    /// Terminate the helper, then the local monitor, and wait for both
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(monitor) = self.monitor.take() else {
            return Ok(());
        };
        self.ctx.begin_shutdown();

        if let Some(child) = self.ctx.take_helper() {
            revive::terminate_helper(child, self.ctx.config().bootstrap_timeout())?;
        }

        notify::send(Pid::this(), Notification::Terminate)?;
        let result = monitor.join().unwrap_or_else(|_| {
            Err(WatchdogError::ProcessLaunch {
                what: "monitor thread",
                reason: "panicked".to_string(),
            })
        });
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }

        NamedSemaphore::unlink(self.ctx.semaphore_name());
        info!("Watchdog stopped");
        result
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Watchdog shutdown failed");
        }
    }
}

/// Entry point of the `wd` helper: supervise the Initiator named in the
/// environment until terminated, or take its place if it dies.
pub fn run_spawned(config: WatchdogConfig, args: Vec<String>) -> Result<()> {
    config.validate()?;
    notify::block()?;

    let peer = peer_from_env()?;
    let semaphore_name = std::env::var(SEMAPHORE_ENV)
        .unwrap_or_else(|_| config.semaphore_name(peer.as_raw()));

    let sem = NamedSemaphore::open(&semaphore_name)?;
    let ctx = Arc::new(WatchdogContext::new(
        Role::Spawned,
        config,
        args,
        semaphore_name,
    ));
    ctx.set_peer(peer);

    let _listener = notify::spawn_listener(Arc::clone(&ctx))?;

    let span = info_span!("watchdog", role = %ctx.role());
    let _guard = span.enter();

    let state = ctx.supervise(Some(&sem))?;
    drop(sem);

    if !should_revive(&ctx, state)? {
        info!("Terminated by Initiator");
        return Ok(());
    }

    warn!(peer = peer.as_raw(), "Initiator presumed dead, relaunching it");
    match revive::replace_self(&ctx)? {}
}

/// Whether the helper must take the Initiator's place once supervision
/// ends. A terminate that raced a liveness stop wins.
fn should_revive(ctx: &WatchdogContext, state: SchedulerState) -> Result<bool> {
    match state {
        SchedulerState::Destroyed => Ok(false),
        SchedulerState::Stopped => Ok(!ctx.is_terminated()),
        other => Err(WatchdogError::UnexpectedExit(other)),
    }
}

fn peer_from_env() -> Result<Pid> {
    let raw = std::env::var(PEER_PID_ENV).map_err(|_| {
        WatchdogError::InvalidConfig(format!("{} is not set", PEER_PID_ENV))
    })?;
    match raw.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Pid::from_raw(pid)),
        _ => Err(WatchdogError::InvalidConfig(format!(
            "{} holds an invalid pid: {:?}",
            PEER_PID_ENV, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::notify::NotificationHandler;
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Initiator.to_string(), "Initiator");
        assert_eq!(Role::Spawned.to_string(), "Spawned");
    }

    #[test]
    #[serial]
    fn test_peer_from_env() {
        std::env::set_var(PEER_PID_ENV, "4321");
        assert_eq!(peer_from_env().unwrap(), Pid::from_raw(4321));

        std::env::set_var(PEER_PID_ENV, "not-a-pid");
        assert!(peer_from_env().is_err());

        std::env::set_var(PEER_PID_ENV, "0");
        assert!(peer_from_env().is_err());

        std::env::remove_var(PEER_PID_ENV);
        assert!(matches!(
            peer_from_env(),
            Err(WatchdogError::InvalidConfig(_))
        ));
    }

    fn spawned_context() -> WatchdogContext {
        WatchdogContext::new(
            Role::Spawned,
            WatchdogConfig::default(),
            vec!["guarded".to_string()],
            format!("/wd-mod-test-{}", std::process::id()),
        )
    }

    #[test]
    fn test_silent_initiator_is_revived() {
        let ctx = spawned_context();
        assert!(should_revive(&ctx, SchedulerState::Stopped).unwrap());
        assert!(!should_revive(&ctx, SchedulerState::Destroyed).unwrap());
    }

    #[test]
    fn test_terminate_after_liveness_stop_prevents_revival() {
        let ctx = spawned_context();
        ctx.terminate_requested();

        assert!(!should_revive(&ctx, SchedulerState::Stopped).unwrap());
    }

    #[test]
    fn test_unexpected_scheduler_exit_is_an_error() {
        let ctx = spawned_context();
        assert!(matches!(
            should_revive(&ctx, SchedulerState::Success),
            Err(WatchdogError::UnexpectedExit(SchedulerState::Success))
        ));
    }

    #[test]
    fn test_start_rejects_invalid_config_before_touching_signals() {
        let err = start(WatchdogConfig::new(0, 1), vec!["prog".to_string()]).err();
        assert!(matches!(err, Some(WatchdogError::InvalidConfig(_))));
    }

    #[test]
    fn test_start_rejects_empty_args() {
        let err = start(WatchdogConfig::default(), Vec::new()).err();
        assert!(matches!(err, Some(WatchdogError::InvalidConfig(_))));
    }
}
