//! Background host name resolution.
//!
//! Name lookup can block for seconds, so it runs on its own thread. The
//! result is handed over through a mutex-guarded slot that the simulation
//! thread polls once per step.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::TransportError;
use crate::shutdown::ShutdownSignal;

/// Maps a host name and port to a socket address.
pub trait HostLookup: Send + Sync {
    fn lookup(&self, host: &str, port: u16) -> io::Result<SocketAddr>;
}

/// Lookup through the operating system resolver, preferring IPv4.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl HostLookup for SystemLookup {
    fn lookup(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
            })
    }
}

/// Progress reported by [`EndpointResolver::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverEvent {
    Resolved(SocketAddr),
    /// Another lookup failed; `attempts` counts all failures so far.
    Failed { attempts: u32 },
}

#[derive(Debug, Default)]
struct Slot {
    resolved: Option<SocketAddr>,
    failures: u32,
}

/// Handle to a running resolver thread.
#[derive(Debug)]
pub struct EndpointResolver {
    slot: Arc<Mutex<Slot>>,
    cancel: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
    reported_failures: u32,
}

impl EndpointResolver {
    /// Start resolving `host:port`.
    ///
    /// The thread waits `initial_delay`, then retries every `retry` until a
    /// lookup succeeds, `shutdown` is triggered or the resolver is cancelled.
    pub fn spawn(
        host: String,
        port: u16,
        lookup: Arc<dyn HostLookup>,
        shutdown: ShutdownSignal,
        initial_delay: Duration,
        retry: Duration,
    ) -> Result<Self, TransportError> {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let cancel = ShutdownSignal::new();

        let thread_slot = Arc::clone(&slot);
        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("sitl-resolver".into())
            .spawn(move || {
                let stop = Stop {
                    shutdown,
                    cancel: thread_cancel,
                };
                run(&host, port, lookup.as_ref(), &thread_slot, &stop, initial_delay, retry)
            })
            .map_err(TransportError::Spawn)?;

        Ok(Self {
            slot,
            cancel,
            handle: Some(handle),
            reported_failures: 0,
        })
    }

    /// Check for a result without blocking.
    ///
    /// A resolved address is reported once; failures are reported each time
    /// the count has grown since the previous poll.
    pub fn poll(&mut self) -> Option<ResolverEvent> {
        let mut slot = lock_slot(&self.slot);
        if let Some(addr) = slot.resolved.take() {
            return Some(ResolverEvent::Resolved(addr));
        }
        if slot.failures > self.reported_failures {
            self.reported_failures = slot.failures;
            return Some(ResolverEvent::Failed {
                attempts: slot.failures,
            });
        }
        None
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the thread and wait for it. Idempotent.
    pub fn cancel_and_join(&mut self) {
        self.cancel.trigger();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("resolver: thread panicked");
            }
        }
    }
}

impl Drop for EndpointResolver {
    fn drop(&mut self) {
        self.cancel_and_join();
    }
}

struct Stop {
    shutdown: ShutdownSignal,
    cancel: ShutdownSignal,
}

impl Stop {
    fn requested(&self) -> bool {
        self.shutdown.is_triggered() || self.cancel.is_triggered()
    }

    /// `true` if stopped before `duration` elapsed.
    fn sleep(&self, duration: Duration) -> bool {
        self.cancel.sleep_or(duration, &self.shutdown)
    }
}

/// The slot holds plain data, so a panic while it was held leaves nothing
/// half-written.
fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn run(
    host: &str,
    port: u16,
    lookup: &dyn HostLookup,
    slot: &Mutex<Slot>,
    stop: &Stop,
    initial_delay: Duration,
    retry: Duration,
) {
    if stop.sleep(initial_delay) {
        return;
    }
    let mut failures = 0u32;
    loop {
        if stop.requested() {
            debug!("resolver: stopped before resolving {host}:{port}");
            return;
        }
        match lookup.lookup(host, port) {
            Ok(addr) => {
                info!("resolver: {host}:{port} -> {addr}");
                lock_slot(slot).resolved = Some(addr);
                return;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                if failures == 1 {
                    warn!("resolver: cannot resolve {host}:{port}: {e}, retrying");
                } else {
                    debug!("resolver: attempt {failures} for {host}:{port} failed: {e}");
                }
                lock_slot(slot).failures = failures;
                if stop.sleep(retry) {
                    return;
                }
            }
        }
    }
}
