//! Watchdog configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WatchdogError};

/// Environment variable carrying the Initiator's pid to the helper
pub const PEER_PID_ENV: &str = "WD_PID";

/// Environment variable carrying the bootstrap semaphore name to the helper
pub const SEMAPHORE_ENV: &str = "WD_SEM";

/// Environment variable overriding the helper executable
pub const HELPER_ENV: &str = "WD_HELPER";

/// Name of the helper executable
pub const HELPER_NAME: &str = "wd";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Missed heartbeats tolerated before the peer is declared dead
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Seconds between heartbeats
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_path: Option<PathBuf>,

    #[serde(default = "default_semaphore_prefix")]
    pub semaphore_prefix: String,

    /// Upper bound on each bootstrap handshake wait
    #[serde(default = "default_bootstrap_timeout_secs")]
    pub bootstrap_timeout_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            interval_secs: default_interval_secs(),
            helper_path: None,
            semaphore_prefix: default_semaphore_prefix(),
            bootstrap_timeout_secs: default_bootstrap_timeout_secs(),
        }
    }
}

fn default_threshold() -> u32 {
    3
}

fn default_interval_secs() -> u64 {
    1
}

fn default_semaphore_prefix() -> String {
    "/watchdog".to_string()
}

fn default_bootstrap_timeout_secs() -> u64 {
    10
}

impl WatchdogConfig {
    pub fn new(threshold: u32, interval_secs: u64) -> Self {
        Self {
            threshold,
            interval_secs,
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| WatchdogError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply environment overrides (currently only the helper path)
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(helper) = std::env::var_os(HELPER_ENV).filter(|v| !v.is_empty()) {
            self.helper_path = Some(PathBuf::from(helper));
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(WatchdogError::InvalidConfig(
                "threshold must be at least 1".to_string(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(WatchdogError::InvalidConfig(
                "interval must be at least 1 second".to_string(),
            ));
        }
        if !self.semaphore_prefix.starts_with('/') || self.semaphore_prefix[1..].contains('/') {
            return Err(WatchdogError::InvalidConfig(format!(
                "semaphore prefix '{}' must start with a single '/'",
                self.semaphore_prefix
            )));
        }
        Ok(())
    }

    /// Heartbeat period
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Liveness-check period
    pub fn check_period(&self) -> Duration {
        self.interval() * self.threshold
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    /// Bootstrap semaphore name for the pair whose Initiator is `initiator_pid`
    pub fn semaphore_name(&self, initiator_pid: i32) -> String {
        format!("{}-{}", self.semaphore_prefix, initiator_pid)
    }

    /// Helper executable: configured path, else a `wd` next to the current
    /// executable, else the build-mode default under `./target`
    pub fn helper(&self) -> PathBuf {
        if let Some(path) = &self.helper_path {
            return path.clone();
        }

        let sibling = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(HELPER_NAME)))
            .filter(|path| path.is_file());

        sibling.unwrap_or_else(default_helper_path)
    }
}

fn default_helper_path() -> PathBuf {
    if cfg!(debug_assertions) {
        PathBuf::from("./target/debug").join(HELPER_NAME)
    } else {
        PathBuf::from("./target/release").join(HELPER_NAME)
    }
}
