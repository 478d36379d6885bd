//! End-to-end tests: run `wd-demo` as the guarded program with the real `wd`
//! helper and watch the pair from outside.
//!
//! These need working named semaphores; on hosts without them (some
//! sandboxes lack /dev/shm) they skip rather than fail.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serial_test::serial;

use mutual_watchdog::watchdog::NamedSemaphore;

fn semaphores_available() -> bool {
    let name = format!("/wd-probe-{}", std::process::id());
    let ok = NamedSemaphore::create(&name).is_ok();
    NamedSemaphore::unlink(&name);
    if !ok {
        eprintln!("named semaphores unavailable, skipping");
    }
    ok
}

fn launch_demo(threshold: u32, interval: u64, duration: u64) -> (Child, Receiver<String>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_wd-demo"))
        .args([
            "--threshold",
            &threshold.to_string(),
            "--interval",
            &interval.to_string(),
            "--duration",
            &duration.to_string(),
        ])
        .env("WD_HELPER", env!("CARGO_BIN_EXE_wd"))
        .stdout(Stdio::piped())
        .spawn()
        .expect("Failed to launch wd-demo");

    let stdout = child.stdout.take().expect("stdout is piped");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    (child, rx)
}

/// Collect lines until `done` matches one or `timeout` passes
fn read_until(rx: &Receiver<String>, timeout: Duration, done: impl Fn(&str) -> bool) -> Vec<String> {
    let deadline = Instant::now() + timeout;
    let mut lines = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(line) => {
                let finished = done(&line);
                lines.push(line);
                if finished {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    lines
}

fn peers(lines: &[String]) -> Vec<i32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("peer "))
        .filter_map(|pid| pid.trim().parse().ok())
        .collect()
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

fn gone(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_err()
}

fn wait_until_gone(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !gone(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
    true
}

fn assert_healthy_pair(duration: u64) {
    let (mut child, rx) = launch_demo(3, 1, duration);
    let lines = read_until(&rx, Duration::from_secs(duration + 15), |l| l == "stopped");

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.is_some_and(|s| s.success()), "wd-demo failed: {:?}", lines);

    let peers = peers(&lines);
    assert_eq!(peers.len(), 1, "unexpected revival: {:?}", lines);
    assert!(lines.iter().any(|l| l == "stopped"));
    assert!(gone(peers[0]), "helper {} outlived stop", peers[0]);
}

#[test]
#[serial]
fn test_healthy_pair_runs_without_revival_and_stops_cleanly() {
    if !semaphores_available() {
        return;
    }
    assert_healthy_pair(5);
}

#[test]
#[serial]
#[ignore = "runs for over 30 seconds"]
fn test_healthy_pair_survives_thirty_intervals() {
    if !semaphores_available() {
        return;
    }
    assert_healthy_pair(32);
}

#[test]
#[serial]
fn test_killed_helper_is_revived() {
    if !semaphores_available() {
        return;
    }

    let (mut child, rx) = launch_demo(2, 1, 15);

    let first = read_until(&rx, Duration::from_secs(10), |l| l.starts_with("peer "));
    let original = *peers(&first).first().expect("helper never reported");
    kill(Pid::from_raw(original), Signal::SIGKILL).unwrap();

    let after = read_until(&rx, Duration::from_secs(12), |l| l.starts_with("peer "));
    let revived = peers(&after);
    assert_eq!(revived.len(), 1, "helper not revived: {:?}", after);
    assert_ne!(revived[0], original);

    let rest = read_until(&rx, Duration::from_secs(20), |l| l == "stopped");
    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.is_some_and(|s| s.success()), "wd-demo failed: {:?}", rest);
    assert!(gone(revived[0]), "revived helper {} outlived stop", revived[0]);
}

#[test]
#[serial]
fn test_killed_guarded_program_is_relaunched_by_helper() {
    if !semaphores_available() {
        return;
    }

    let (mut child, rx) = launch_demo(3, 1, 12);
    let guarded = child.id() as i32;

    let first = read_until(&rx, Duration::from_secs(10), |l| l.starts_with("peer "));
    assert!(first.contains(&format!("started {}", guarded)), "{:?}", first);
    let helper = *peers(&first).first().expect("helper never reported");

    kill(Pid::from_raw(guarded), Signal::SIGKILL).unwrap();
    child.wait().unwrap();

    // The helper execs the guarded program in place, so it keeps its pid
    let relaunched = read_until(&rx, Duration::from_secs(15), |l| l.starts_with("peer "));
    assert!(
        relaunched.contains(&format!("started {}", helper)),
        "guarded program not relaunched: {:?}",
        relaunched
    );
    let new_helper = *peers(&relaunched).first().expect("relaunched program has no helper");
    assert_ne!(new_helper, helper);

    // Not our child any more; only its output and its helper are observable
    let rest = read_until(&rx, Duration::from_secs(30), |l| l == "stopped");
    assert!(rest.iter().any(|l| l == "stopped"), "relaunched program never stopped: {:?}", rest);
    assert!(
        wait_until_gone(new_helper, Duration::from_secs(5)),
        "helper {} outlived stop",
        new_helper
    );
}
