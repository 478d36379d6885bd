//! Helper launch and role-specific revival
//!
//! The Initiator revives by reaping the dead helper and launching a new one.
//! The Spawned side revives by exec'ing the guarded program over itself; that
//! program starts its own watchdog and so spawns a fresh helper.

use std::convert::Infallible;
use std::ffi::CString;
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use nix::unistd::{execvp, getpid, Pid};
use tracing::{info, warn};

use crate::config::{WatchdogConfig, PEER_PID_ENV, SEMAPHORE_ENV};
use crate::error::{Result, WatchdogError};
use crate::process;

use super::context::WatchdogContext;
use super::notify::{self, Notification};
use super::semaphore::NamedSemaphore;

const REAP_POLL: Duration = Duration::from_millis(20);

/// Positional helper arguments: threshold, interval, argc, argv...
pub fn helper_args(config: &WatchdogConfig, args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + 3);
    out.push(config.threshold.to_string());
    out.push(config.interval_secs.to_string());
    out.push(args.len().to_string());
    out.extend(args.iter().cloned());
    out
}

/// Launch the helper and block until it posts `sem` to report it is ready
pub fn spawn_helper(ctx: &WatchdogContext, sem: &NamedSemaphore) -> Result<()> {
    let helper = ctx.config().helper();

    let mut child = Command::new(&helper)
        .args(helper_args(ctx.config(), ctx.args()))
        .env(PEER_PID_ENV, getpid().as_raw().to_string())
        .env(SEMAPHORE_ENV, sem.name())
        .spawn()
        .map_err(|e| WatchdogError::ProcessLaunch {
            what: "helper",
            reason: format!("{}: {}", helper.display(), e),
        })?;

    info!(pid = child.id(), helper = %helper.display(), "Helper launched");

    let waited = sem.wait_for(ctx.config().bootstrap_timeout(), || {
        match child.try_wait()? {
            None => Ok(()),
            Some(status) => Err(WatchdogError::ProcessLaunch {
                what: "helper",
                reason: format!("exited during bootstrap ({})", status),
            }),
        }
    });

    if let Err(e) = waited {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e);
    }

    ctx.set_helper(child);
    Ok(())
}

/// Initiator revival: reap the dead helper, then redo the launch handshake
pub fn respawn_peer(ctx: &WatchdogContext) -> Result<()> {
    if let Some(child) = ctx.take_helper() {
        kill_and_reap(child)?;
    }

    let sem = NamedSemaphore::create(ctx.semaphore_name())?;
    let launched = spawn_helper(ctx, &sem);
    NamedSemaphore::unlink(sem.name());
    launched?;

    // stop() may have run while the new helper was starting
    if ctx.is_shutting_down() {
        if let Some(child) = ctx.take_helper() {
            terminate_helper(child, ctx.config().bootstrap_timeout())?;
        }
    }

    Ok(())
}

/// Spawned revival: replace this process with the guarded program.
/// Never returns on success.
pub fn replace_self(ctx: &WatchdogContext) -> Result<Infallible> {
    if let Some(peer) = ctx.peer() {
        if process::is_alive(peer) {
            warn!(peer = peer.as_raw(), "Initiator still present, killing it");
            let _ = process::force_kill(peer);
        }
    }

    let argv = exec_argv(ctx.args())?;
    info!(program = ?argv[0], "Replacing helper with guarded program");

    execvp(&argv[0], &argv).map_err(|e| WatchdogError::ProcessLaunch {
        what: "guarded program",
        reason: e.to_string(),
    })
}

/// Ask the helper to terminate and wait for it, killing it if it lingers
pub fn terminate_helper(child: Child, timeout: Duration) -> Result<()> {
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = notify::send(pid, Notification::Terminate) {
        warn!(error = %e, "Could not deliver terminate to helper");
    }
    reap(child, timeout)
}

fn kill_and_reap(mut child: Child) -> Result<()> {
    let raw = child.id() as i32;
    process::force_kill(Pid::from_raw(raw))
        .map_err(|source| WatchdogError::PeerUnreachable { pid: raw, source })?;
    let status = child.wait()?;
    info!(pid = raw, %status, "Dead helper reaped");
    Ok(())
}

fn reap(mut child: Child, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while child.try_wait()?.is_none() {
        if Instant::now() >= deadline {
            warn!(pid = child.id(), "Helper ignored terminate, killing it");
            return kill_and_reap(child);
        }
        thread::sleep(REAP_POLL);
    }
    Ok(())
}

fn exec_argv(args: &[String]) -> Result<Vec<CString>> {
    if args.is_empty() {
        return Err(WatchdogError::InvalidConfig(
            "no program to relaunch".to_string(),
        ));
    }

    args.iter()
        .map(|arg| {
            CString::new(arg.as_str())
                .map_err(|e| WatchdogError::InvalidConfig(format!("bad argument {:?}: {}", arg, e)))
        })
        .collect()
}
