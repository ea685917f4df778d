//! UDP link to the autopilot.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::resolver::{EndpointResolver, HostLookup, ResolverEvent, SystemLookup};
use super::{FrameTransport, SharedConnectionState};
use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::shutdown::ShutdownSignal;
use crate::types::ConnectionState;

const MAX_DATAGRAM: usize = 2048;

/// Non-blocking UDP socket with background resolution and reconnection.
///
/// The socket is bound immediately; frames are only sent once the peer
/// address has been resolved. Datagrams from any other address are dropped.
pub struct UdpTransport {
    config: TransportConfig,
    lookup: Arc<dyn HostLookup>,
    shutdown: ShutdownSignal,
    state: SharedConnectionState,
    socket: Option<UdpSocket>,
    peer: Option<SocketAddr>,
    resolver: Option<EndpointResolver>,
    reconnect_at: Option<Instant>,
    closed: bool,
    recv_buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind the local port and start resolving the configured peer.
    pub fn open(config: TransportConfig, shutdown: ShutdownSignal) -> Result<Self, TransportError> {
        Self::with_lookup(config, Arc::new(SystemLookup), shutdown)
    }

    pub fn with_lookup(
        config: TransportConfig,
        lookup: Arc<dyn HostLookup>,
        shutdown: ShutdownSignal,
    ) -> Result<Self, TransportError> {
        let mut transport = Self {
            config,
            lookup,
            shutdown,
            state: SharedConnectionState::default(),
            socket: None,
            peer: None,
            resolver: None,
            reconnect_at: None,
            closed: false,
            recv_buf: vec![0u8; MAX_DATAGRAM],
        };
        transport.socket = Some(transport.bind()?);
        transport.start_resolver(Duration::ZERO)?;
        Ok(transport)
    }

    /// Local socket address, if a socket is open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Handle for observing the connection state from another thread.
    pub fn state_handle(&self) -> SharedConnectionState {
        self.state.clone()
    }

    /// Whether a resolver thread is still attached.
    pub fn resolver_active(&self) -> bool {
        self.resolver.is_some()
    }

    fn bind(&self) -> Result<UdpSocket, TransportError> {
        let port = self.config.local_port;
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .map_err(|source| TransportError::Bind { port, source })?;
        socket.set_nonblocking(true)?;
        debug!("transport: bound {:?}", socket.local_addr().ok());
        Ok(socket)
    }

    fn start_resolver(&mut self, initial_delay: Duration) -> Result<(), TransportError> {
        let resolver = EndpointResolver::spawn(
            self.config.host.clone(),
            self.config.port,
            Arc::clone(&self.lookup),
            self.shutdown.clone(),
            initial_delay,
            self.config.resolve_retry(),
        )?;
        self.resolver = Some(resolver);
        self.state.store(ConnectionState::Resolving);
        Ok(())
    }

    /// Drop the socket after an irrecoverable error and schedule a reconnect.
    fn fail(&mut self, error: &io::Error) {
        warn!(
            "transport: link to {}:{} failed: {error}, reconnecting in {} ms",
            self.config.host, self.config.port, self.config.reconnect_delay_ms
        );
        self.socket = None;
        self.peer = None;
        if let Some(mut resolver) = self.resolver.take() {
            resolver.cancel_and_join();
        }
        self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay());
        self.state.store(ConnectionState::Closed);
    }

    fn try_reconnect(&mut self) {
        let due = self.reconnect_at.is_some_and(|at| Instant::now() >= at);
        if !due {
            return;
        }
        match self.bind() {
            Ok(socket) => {
                self.socket = Some(socket);
                self.reconnect_at = None;
                if let Err(e) = self.start_resolver(Duration::ZERO) {
                    warn!("transport: cannot restart resolver: {e}");
                    self.socket = None;
                    self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay());
                }
            }
            Err(e) => {
                warn!("transport: rebind failed: {e}");
                self.reconnect_at = Some(Instant::now() + self.config.reconnect_delay());
            }
        }
    }

    fn handle_datagram(&self, len: usize, from: SocketAddr) -> Option<Vec<u8>> {
        match self.peer {
            Some(peer) if peer == from => Some(self.recv_buf[..len].to_vec()),
            _ => {
                debug!("transport: ignored {len} bytes from {from}");
                None
            }
        }
    }
}

/// Errors that do not indicate a broken socket.
fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
    )
}

impl FrameTransport for UdpTransport {
    fn poll_connection(&mut self) -> ConnectionState {
        if self.closed {
            return ConnectionState::Closed;
        }
        if self.shutdown.is_triggered() {
            self.close();
            return ConnectionState::Closed;
        }

        if let Some(resolver) = self.resolver.as_mut() {
            match resolver.poll() {
                Some(ResolverEvent::Resolved(addr)) => {
                    info!("transport: connected to {addr}");
                    self.peer = Some(addr);
                    if let Some(mut resolver) = self.resolver.take() {
                        resolver.cancel_and_join();
                    }
                    self.state.store(ConnectionState::Connected);
                }
                Some(ResolverEvent::Failed { attempts }) => {
                    debug!("transport: resolution attempt {attempts} failed");
                }
                None => {}
            }
        } else if self.socket.is_none() {
            self.try_reconnect();
        }

        self.state.load()
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.poll_connection() != ConnectionState::Connected {
            return Ok(());
        }
        let (Some(socket), Some(peer)) = (self.socket.as_ref(), self.peer) else {
            return Ok(());
        };
        match socket.send_to(frame, peer) {
            Ok(_) => Ok(()),
            Err(e) if is_transient(&e) => {
                debug!("transport: send to {peer} dropped: {e}");
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(TransportError::Io(e))
            }
        }
    }

    fn try_receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(None);
        };
        match socket.recv_from(&mut self.recv_buf) {
            Ok((len, from)) => Ok(self.handle_datagram(len, from)),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => {
                self.fail(&e);
                Err(TransportError::Io(e))
            }
        }
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        if timeout.is_zero() {
            return self.try_receive();
        }
        let Some(socket) = self.socket.as_ref() else {
            std::thread::sleep(timeout);
            return Ok(None);
        };

        match recv_with_timeout(socket, &mut self.recv_buf, timeout) {
            Ok((len, from)) => Ok(self.handle_datagram(len, from)),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => {
                self.fail(&e);
                Err(TransportError::Io(e))
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut resolver) = self.resolver.take() {
            resolver.cancel_and_join();
        }
        self.socket = None;
        self.peer = None;
        self.reconnect_at = None;
        self.state.store(ConnectionState::Closed);
        debug!("transport: closed");
    }
}

/// Blocking receive bounded by `timeout`.
///
/// The socket is back in non-blocking mode on return, whatever failed.
fn recv_with_timeout(
    socket: &UdpSocket,
    buf: &mut [u8],
    timeout: Duration,
) -> io::Result<(usize, SocketAddr)> {
    socket.set_nonblocking(false)?;
    let result = socket
        .set_read_timeout(Some(timeout))
        .and_then(|()| socket.recv_from(buf));
    let restored = socket.set_nonblocking(true);
    let received = result?;
    restored?;
    Ok(received)
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state.load())
            .field("peer", &self.peer)
            .finish()
    }
}
