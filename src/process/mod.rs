//! Process utilities for peer liveness and teardown

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

/// Whether `pid` names a running (non-zombie) process
pub fn is_alive(pid: Pid) -> bool {
    #[cfg(target_os = "linux")]
    {
        linux::is_alive(pid)
    }

    #[cfg(target_os = "macos")]
    {
        macos::is_alive(pid)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        kill(pid, None).is_ok()
    }
}

/// SIGKILL a presumed-dead peer. A process that is already gone is not an error.
pub fn force_kill(pid: Pid) -> nix::Result<()> {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) => {
            debug!(pid = pid.as_raw(), "Sent SIGKILL");
            Ok(())
        }
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e),
    }
}
