//! Network link to the autopilot.

pub mod resolver;
pub mod udp;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use resolver::{EndpointResolver, HostLookup, ResolverEvent, SystemLookup};
pub use udp::UdpTransport;

use crate::error::TransportError;
use crate::types::ConnectionState;

/// Datagram link used by the bridge.
///
/// Implementations never block longer than the caller allows and never panic
/// on network failure; failures move the link to
/// [`ConnectionState::Closed`].
pub trait FrameTransport {
    /// Advance connection setup (pick up resolution results, reconnect).
    fn poll_connection(&mut self) -> ConnectionState;

    fn state(&self) -> ConnectionState;

    /// Send one frame. A no-op while not connected.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Return a pending frame without blocking.
    fn try_receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Wait up to `timeout` for a frame.
    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the socket and stop background work. Idempotent.
    fn close(&mut self);
}

/// Connection state readable from any thread.
#[derive(Debug, Clone)]
pub struct SharedConnectionState {
    inner: Arc<AtomicU8>,
}

impl SharedConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(state.as_u8())),
        }
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ConnectionState) {
        self.inner.store(state.as_u8(), Ordering::Release);
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Unresolved)
    }
}
