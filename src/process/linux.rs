//! Linux-specific process utilities

use std::fs;

use nix::unistd::Pid;

/// A process counts as alive while /proc lists it in any state but zombie/dead
pub fn is_alive(pid: Pid) -> bool {
    let stat_path = format!("/proc/{}/stat", pid.as_raw());
    let Ok(content) = fs::read_to_string(stat_path) else {
        return false;
    };

    !matches!(parse_stat_state(&content), Some('Z' | 'X' | 'x') | None)
}

/// Parse the state field from /proc/[pid]/stat
/// comm (field 2) can contain spaces and parens, so parse after the last ')'
fn parse_stat_state(content: &str) -> Option<char> {
    let close_paren = content.rfind(')')?;
    let after_comm = content.get(close_paren + 1..)?;
    after_comm.split_whitespace().next()?.chars().next()
}
