//! macOS-specific process utilities

use std::process::Command;

use nix::sys::signal::kill;
use nix::unistd::Pid;

/// A process counts as alive if it accepts signal 0 and `ps` does not report
/// it as a zombie
pub fn is_alive(pid: Pid) -> bool {
    if kill(pid, None).is_err() {
        return false;
    }

    let Ok(output) = Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.as_raw().to_string()])
        .output()
    else {
        return true;
    };

    !String::from_utf8_lossy(&output.stdout).trim().starts_with('Z')
}
