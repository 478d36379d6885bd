//! Process-unique task identities
//!
//! A [`Uid`] combines a wall-clock timestamp, a per-process counter, the
//! process id and the address bytes of the first network interface, so two
//! identities only collide if all four agree.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use nix::ifaddrs::getifaddrs;
use nix::sys::socket::SockaddrStorage;
use nix::unistd::getpid;

use crate::error::{Result, WatchdogError};

/// Number of interface address bytes kept in an identity
pub const ADDR_LEN: usize = 14;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identity of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Uid {
    time: i64,
    counter: u64,
    pid: i32,
    addr: [u8; ADDR_LEN],
}

impl Uid {
    /// Sentinel that never equals a created identity (no live process has pid 0)
    pub const INVALID: Uid = Uid {
        time: 0,
        counter: 0,
        pid: 0,
        addr: [0; ADDR_LEN],
    };

    /// Create a fresh identity
    ///
    /// Fails only if network interfaces cannot be enumerated.
    pub fn create() -> Result<Self> {
        let interfaces = getifaddrs().map_err(WatchdogError::Identity)?;

        let addr = interfaces
            .filter_map(|ifa| ifa.address)
            .map(|storage| address_bytes(&storage))
            .next()
            .unwrap_or([0; ADDR_LEN]);

        Ok(Self {
            time: Utc::now().timestamp(),
            counter: COUNTER.fetch_add(1, Ordering::Relaxed),
            pid: getpid().as_raw(),
            addr,
        })
    }

    /// Field-wise equality
    pub fn is_same(&self, other: &Uid) -> bool {
        self == other
    }

    pub fn is_valid(&self) -> bool {
        !self.is_same(&Self::INVALID)
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.time, self.counter, self.pid)
    }
}

fn address_bytes(storage: &SockaddrStorage) -> [u8; ADDR_LEN] {
    let mut out = [0u8; ADDR_LEN];

    if let Some(sin) = storage.as_sockaddr_in() {
        out[..4].copy_from_slice(&sin.ip().octets());
    } else if let Some(sin6) = storage.as_sockaddr_in6() {
        out.copy_from_slice(&sin6.ip().octets()[..ADDR_LEN]);
    } else if let Some(mac) = link_bytes(storage) {
        out[..mac.len()].copy_from_slice(&mac);
    }

    out
}

fn link_bytes(storage: &SockaddrStorage) -> Option<[u8; 6]> {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "macos"))] {
            storage.as_link_addr().and_then(|link| link.addr())
        } else {
            let _ = storage;
            None
        }
    }
}
