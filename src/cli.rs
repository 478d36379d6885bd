//! Command-line arguments of the `wd` helper

use anyhow::{bail, Result};
use clap::Parser;

use crate::config::WatchdogConfig;

/// Watchdog helper, launched by a guarded program. Not meant to be run by hand.
#[derive(Debug, Parser)]
#[command(name = "wd", version, about)]
pub struct HelperArgs {
    /// Missed heartbeats tolerated before the guarded program is presumed dead
    pub threshold: u32,

    /// Seconds between heartbeats
    pub interval: u64,

    /// Number of launch arguments that follow
    pub argc: usize,

    /// Launch arguments of the guarded program, argv[0] first
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub argv: Vec<String>,

    /// TOML file with additional watchdog settings
    #[arg(long, env = "WD_CONFIG")]
    pub config: Option<std::path::PathBuf>,
}

impl HelperArgs {
    pub fn validate(&self) -> Result<()> {
        if self.argc == 0 {
            bail!("argc must be at least 1");
        }
        if self.argc != self.argv.len() {
            bail!(
                "argc is {} but {} launch arguments were given",
                self.argc,
                self.argv.len()
            );
        }
        Ok(())
    }

    /// Settings for the helper: the optional config file, with threshold and
    /// interval from the command line taking precedence
    pub fn watchdog_config(&self) -> Result<WatchdogConfig> {
        let base = match &self.config {
            Some(path) => WatchdogConfig::load(path)?,
            None => WatchdogConfig::default(),
        };
        let config = WatchdogConfig {
            threshold: self.threshold,
            interval_secs: self.interval,
            ..base
        }
        .with_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
