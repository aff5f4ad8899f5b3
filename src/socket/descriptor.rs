//! Socket descriptors
//!
//! `RawSocket` is the only place that talks to the OS. Everything above it
//! works in terms of `SocketResult`, so the rest of the crate never branches
//! on platform error codes.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use super::SocketResult;

/// Operations the crate needs from an OS stream socket
pub trait RawSocket: Send {
    /// Write bytes, returning how many were accepted by the OS
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read bytes into `buf`; `Ok(0)` means the peer shut down
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Shut down both directions
    fn shutdown(&mut self) -> io::Result<()>;

    /// Remote address, if known
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl RawSocket for TcpStream {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Exclusive owner of one OS socket
///
/// Once closed the descriptor is permanently invalid and rejects all I/O.
pub struct SocketDescriptor {
    inner: Option<Box<dyn RawSocket>>,
}

impl SocketDescriptor {
    /// Take ownership of a raw socket
    pub fn new(raw: impl RawSocket + 'static) -> Self {
        Self {
            inner: Some(Box::new(raw)),
        }
    }

    /// A descriptor that was never valid
    pub fn invalid() -> Self {
        Self { inner: None }
    }

    /// Check whether the descriptor still refers to an open socket
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Send bytes, retrying interrupted calls
    pub fn send(&mut self, buf: &[u8]) -> SocketResult {
        let Some(raw) = self.inner.as_mut() else {
            return SocketResult::Failed(io::ErrorKind::NotConnected.into());
        };

        loop {
            match raw.send(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result.into(),
            }
        }
    }

    /// Receive bytes, retrying interrupted calls
    pub fn recv(&mut self, buf: &mut [u8]) -> SocketResult {
        let Some(raw) = self.inner.as_mut() else {
            return SocketResult::Failed(io::ErrorKind::NotConnected.into());
        };

        loop {
            match raw.recv(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => return result.into(),
            }
        }
    }

    /// Remote address of the socket
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.as_ref().and_then(|raw| raw.peer_addr().ok())
    }

    /// Release the socket. Returns true if it was open.
    pub fn close(&mut self) -> bool {
        match self.inner.take() {
            Some(mut raw) => {
                // The peer may already be gone; the descriptor is released either way
                if let Err(e) = raw.shutdown() {
                    tracing::trace!("shutdown failed: {}", e);
                }
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for SocketDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketDescriptor")
            .field("valid", &self.is_valid())
            .finish()
    }
}
