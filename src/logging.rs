//! Tracing setup shared by the helper and the demo binary
//!
//! Logging stays off unless `WD_DEBUG` is set. In debug builds, with
//! `WD_LOG_FILE` also set, output is appended to that file instead of stderr
//! so both sides of a pair (and every revived generation) share one log.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const DEBUG_ENV: &str = "WD_DEBUG";
pub const LOG_FILE_ENV: &str = "WD_LOG_FILE";

const DEFAULT_FILTER: &str = "mutual_watchdog=debug";

pub fn init() {
    if std::env::var_os(DEBUG_ENV).is_none() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true);

    let log_file = std::env::var_os(LOG_FILE_ENV)
        .filter(|path| cfg!(debug_assertions) && !path.is_empty())
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());

    // A second init in the same process is ignored
    let _ = match log_file {
        Some(file) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
}
