//! wd-demo - a guarded program that runs for a while under the watchdog
//!
//! Prints `peer <pid>` each time a different helper is paired with it, which
//! makes helper revivals visible from the outside.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use mutual_watchdog::{logging, start, WatchdogConfig};

const POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Parser)]
#[command(name = "wd-demo", version, about)]
struct DemoArgs {
    /// Missed heartbeats tolerated before the helper is presumed dead
    #[arg(short = 't', long, default_value_t = 3)]
    threshold: u32,

    /// Seconds between heartbeats
    #[arg(short = 'i', long, default_value_t = 1)]
    interval: u64,

    /// Seconds to run before stopping the watchdog (0 runs forever)
    #[arg(short = 'd', long, default_value_t = 10)]
    duration: u64,
}

fn main() -> Result<()> {
    logging::init();
    let args = DemoArgs::parse();

    let config = WatchdogConfig::new(args.threshold, args.interval).with_env_overrides();
    let watchdog = start(config, std::env::args().collect()).context("Failed to start watchdog")?;
    println!("started {}", std::process::id());

    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));
    let mut last_peer = None;
    loop {
        let peer = watchdog.peer_pid();
        if peer != last_peer {
            if let Some(pid) = peer {
                println!("peer {}", pid);
            }
            last_peer = peer;
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(POLL);
    }

    watchdog.stop().context("Failed to stop watchdog")?;
    println!("stopped");
    Ok(())
}
