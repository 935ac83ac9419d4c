//! Platform services the middleware relies on
//!
//! Mutexes and condition variables come straight from `parking_lot`. What
//! is left here is the counting semaphore used for the audio flow-control
//! handshake and the hooks that differ per board (reboot, sleep).

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Counting semaphore with timed wait
///
/// `signal` adds one permit and wakes at most one waiter.
pub struct Semaphore {
    permits: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore holding `initial` permits
    pub fn new(initial: u32) -> Self {
        Self {
            permits: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    /// Release one permit
    pub fn signal(&self) {
        let mut permits = self.permits.lock();
        *permits = permits.saturating_add(1);
        drop(permits);
        self.available.notify_one();
    }

    /// Take a permit, waiting at most `timeout`
    ///
    /// Returns false if the timeout expired first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.available.wait_until(&mut permits, deadline).timed_out() {
                break;
            }
        }
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Take a permit if one is available right now
    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Discard all outstanding permits, returning how many there were
    pub fn drain(&self) -> u32 {
        std::mem::take(&mut *self.permits.lock())
    }

    /// Current permit count
    pub fn permits(&self) -> u32 {
        *self.permits.lock()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Board specific services
pub trait Platform: Send + Sync {
    /// Restart the device
    fn reboot(&self);

    /// Block the calling thread
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Platform implementation for a hosted (Linux) build
///
/// There is no reboot hook on a host, so the request is only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn reboot(&self) {
        tracing::error!("Reboot requested, no reboot hook on this platform");
    }
}
