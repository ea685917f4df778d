//! Process-wide shutdown flag.
//!
//! Cloned into every component that may block (resolver thread, lockstep
//! waits, the step loop). Setting it is safe from a signal handler task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep between shutdown checks.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Shared cancellation flag backed by an atomic.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices.
    ///
    /// Returns `true` if shutdown was requested before the time elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        sleep_until_stopped(duration, || self.is_triggered())
    }

    /// Like [`sleep`](Self::sleep), but also wakes when `other` is triggered.
    pub fn sleep_or(&self, duration: Duration, other: &ShutdownSignal) -> bool {
        sleep_until_stopped(duration, || self.is_triggered() || other.is_triggered())
    }
}

fn sleep_until_stopped(duration: Duration, stopped: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stopped() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(remaining.min(CHECK_INTERVAL));
    }
}
