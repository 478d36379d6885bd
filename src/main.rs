//! wd - watchdog helper launched by a guarded program

use anyhow::{Context, Result};
use clap::Parser;

use mutual_watchdog::cli::HelperArgs;
use mutual_watchdog::{logging, run_spawned};

fn main() -> Result<()> {
    logging::init();

    let args = HelperArgs::parse();
    args.validate()?;
    let config = args
        .watchdog_config()
        .context("Failed to load helper settings")?;

    run_spawned(config, args.argv).context("Watchdog helper failed")
}
