//! Named POSIX semaphore used for the bootstrap handshake

use std::ffi::CString;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, WatchdogError};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// sem_post/sem_trywait/sem_close are thread-safe on a valid handle
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create the semaphore `name` with an initial count of zero. A leftover
    /// semaphore of the same name is discarded first, along with its count.
    pub fn create(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;
        Self::unlink(name);
        // SAFETY: c_name is NUL-terminated; O_CREAT takes mode and value varargs
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o666 as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        Self::from_raw(sem, name)
    }

    /// Open a semaphore created by the other side
    pub fn open(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is NUL-terminated; no varargs without O_CREAT
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), libc::O_RDWR) };
        Self::from_raw(sem, name)
    }

    fn from_raw(sem: *mut libc::sem_t, name: &str) -> Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(sync_error(name, io::Error::last_os_error()));
        }
        debug!(name, "Semaphore opened");
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self) -> Result<()> {
        // SAFETY: self.sem is a live handle until drop
        if unsafe { libc::sem_post(self.sem) } == -1 {
            return Err(sync_error(&self.name, io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Decrement without blocking. Ok(false) if the count is zero.
    pub fn try_wait(&self) -> Result<bool> {
        loop {
            // SAFETY: self.sem is a live handle until drop
            if unsafe { libc::sem_trywait(self.sem) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(sync_error(&self.name, err)),
            }
        }
    }

    /// Wait for a post, giving up after `timeout` or as soon as `still_waiting`
    /// says the party expected to post is gone.
    pub fn wait_for<F>(&self, timeout: Duration, mut still_waiting: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(());
            }
            still_waiting()?;
            if Instant::now() >= deadline {
                return Err(WatchdogError::BootstrapTimeout(timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Release the name. Failing because it is already gone is harmless.
    pub fn unlink(name: &str) {
        let Ok(c_name) = c_name(name) else {
            return;
        };
        // SAFETY: c_name is NUL-terminated
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            debug!(name, "Semaphore name released");
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: handle came from a successful sem_open and is closed once
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name)
        .map_err(|e| sync_error(name, io::Error::new(io::ErrorKind::InvalidInput, e)))
}

fn sync_error(name: &str, source: io::Error) -> WatchdogError {
    WatchdogError::SyncSetup {
        name: name.to_string(),
        source,
    }
}
