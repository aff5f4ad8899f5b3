//! TCP Socket
//!
//! A non-blocking stream socket with an inbound accumulator and an outbound
//! queue. Sends never spin on would-block: whatever the OS does not accept
//! is queued and flushed on the next `update`.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{NetError, Result};
use super::{NetworkAddress, SocketDescriptor, SocketResult};

/// Socket shared between a listener and the connection built on top of it
pub type SharedSocket = Arc<Mutex<TcpSocket>>;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique socket identity, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    fn next() -> Self {
        SocketId(NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Notifications produced by a socket, drained by its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// Bytes that arrived since the previous notification
    Data(Bytes),

    /// The socket was closed; emitted exactly once
    Closed,
}

/// A non-blocking TCP socket
pub struct TcpSocket {
    id: SocketId,
    descriptor: SocketDescriptor,
    address: NetworkAddress,
    port: u16,

    /// Bytes drained from the OS and not yet handed out
    inbound: BytesMut,

    /// Bytes the OS refused with would-block, oldest first
    outbound: BytesMut,

    /// Reused read buffer, `recv_chunk_size` bytes
    scratch: Vec<u8>,

    events: VecDeque<SocketEvent>,
    max_pending_send_bytes: usize,
}

impl TcpSocket {
    /// Connect to a remote host
    ///
    /// Blocks for the connect call only, then switches the socket to
    /// non-blocking mode with Nagle's algorithm disabled.
    pub fn connect_to(address: &NetworkAddress, port: u16, config: &Config) -> Result<Self> {
        let addr = address.socket_addr(port);

        let stream = TcpStream::connect(addr).map_err(|source| NetError::Connect {
            address: addr.to_string(),
            source,
        })?;
        configure_stream(&stream)?;

        tracing::debug!("Connected to {}", addr);

        Ok(Self::from_descriptor(
            SocketDescriptor::new(stream),
            *address,
            port,
            config,
        ))
    }

    /// Wrap a stream returned by `accept`
    pub(crate) fn accepted(stream: TcpStream, peer: SocketAddr, config: &Config) -> io::Result<Self> {
        configure_stream(&stream)?;

        Ok(Self::from_descriptor(
            SocketDescriptor::new(stream),
            NetworkAddress::new(peer.ip()),
            peer.port(),
            config,
        ))
    }

    /// Build a socket over an already-open descriptor
    pub fn from_descriptor(
        descriptor: SocketDescriptor,
        address: NetworkAddress,
        port: u16,
        config: &Config,
    ) -> Self {
        Self {
            id: SocketId::next(),
            descriptor,
            address,
            port,
            inbound: BytesMut::with_capacity(config.recv_chunk_size),
            outbound: BytesMut::new(),
            scratch: vec![0u8; config.recv_chunk_size.max(1)],
            events: VecDeque::new(),
            max_pending_send_bytes: config.max_pending_send_bytes,
        }
    }

    /// Move this socket behind a shared handle
    pub fn into_shared(self) -> SharedSocket {
        Arc::new(Mutex::new(self))
    }

    /// Unique identity of this socket
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Remote host
    pub fn address(&self) -> &NetworkAddress {
        &self.address
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check whether the socket is still open
    pub fn is_valid(&self) -> bool {
        self.descriptor.is_valid()
    }

    /// Bytes queued and waiting for the socket to become writable
    pub fn pending_send_bytes(&self) -> usize {
        self.outbound.len()
    }

    /// Send bytes
    ///
    /// Returns the number of bytes accepted, either written or queued.
    /// Returns 0 if the socket is closed or a fatal error closed it.
    /// Sending an empty slice is a no-op that also returns 0; check
    /// `is_valid` to tell the two apart.
    pub fn send(&mut self, data: &[u8]) -> usize {
        if !self.is_valid() || data.is_empty() {
            return 0;
        }

        // Keep ordering: new bytes go behind anything already queued
        if !self.outbound.is_empty() {
            if !self.enqueue(data) {
                return 0;
            }
            let _ = self.flush();
            return if self.is_valid() { data.len() } else { 0 };
        }

        let mut offset = 0;
        while offset < data.len() {
            match self.descriptor.send(&data[offset..]) {
                SocketResult::Completed(0) => {
                    tracing::warn!("Socket {} to {}:{} wrote zero bytes", self.id, self.address, self.port);
                    self.close();
                    return 0;
                }
                SocketResult::Completed(n) => offset += n,
                SocketResult::WouldBlock(_) => break,
                result @ SocketResult::Failed(_) => {
                    tracing::warn!(
                        "Send to {}:{} failed: {}",
                        self.address, self.port, result.error_message()
                    );
                    self.close();
                    return 0;
                }
            }
        }

        if offset < data.len() {
            tracing::trace!("Socket {} queued {} bytes", self.id, data.len() - offset);
            if !self.enqueue(&data[offset..]) {
                return 0;
            }
        }

        data.len()
    }

    /// Write as much of the outbound queue as the OS accepts
    pub fn flush(&mut self) -> SocketResult {
        let mut written = 0;

        while !self.outbound.is_empty() {
            match self.descriptor.send(&self.outbound) {
                SocketResult::Completed(0) => {
                    self.close();
                    return SocketResult::Failed(io::ErrorKind::WriteZero.into());
                }
                SocketResult::Completed(n) => {
                    self.outbound.advance(n);
                    written += n;
                }
                would_block @ SocketResult::WouldBlock(_) => return would_block,
                failed @ SocketResult::Failed(_) => {
                    tracing::warn!(
                        "Flush to {}:{} failed: {}",
                        self.address, self.port, failed.error_message()
                    );
                    self.close();
                    return failed;
                }
            }
        }

        SocketResult::Completed(written)
    }

    /// Drain every byte currently available from the OS
    ///
    /// Emits one `SocketEvent::Data` carrying only the newly received bytes.
    /// A 0-byte read (orderly shutdown) or a fatal error closes the socket
    /// after the data notification. Returns the number of bytes drained.
    pub fn recv(&mut self) -> usize {
        if !self.is_valid() {
            return 0;
        }

        let mut total = 0;
        let mut closing = false;

        loop {
            match self.descriptor.recv(&mut self.scratch) {
                SocketResult::Completed(0) => {
                    tracing::debug!("Peer {}:{} closed the connection", self.address, self.port);
                    closing = true;
                    break;
                }
                SocketResult::Completed(n) => {
                    self.inbound.extend_from_slice(&self.scratch[..n]);
                    total += n;
                }
                SocketResult::WouldBlock(_) => break,
                failed @ SocketResult::Failed(_) => {
                    tracing::warn!(
                        "Receive from {}:{} failed: {}",
                        self.address, self.port, failed.error_message()
                    );
                    closing = true;
                    break;
                }
            }
        }

        if !self.inbound.is_empty() {
            let data = self.inbound.split().freeze();
            tracing::trace!("Socket {} received {} bytes", self.id, data.len());
            self.events.push_back(SocketEvent::Data(data));
        }

        if closing {
            self.close();
        }

        total
    }

    /// Flush queued output, then drain input
    pub fn update(&mut self) -> usize {
        if self.is_valid() && !self.outbound.is_empty() {
            let _ = self.flush();
        }
        self.recv()
    }

    /// Close the socket
    ///
    /// Idempotent: `SocketEvent::Closed` is queued only by the call that
    /// actually released the descriptor.
    pub fn close(&mut self) {
        if self.descriptor.close() {
            self.outbound.clear();
            self.events.push_back(SocketEvent::Closed);
            tracing::debug!("Socket {} to {}:{} closed", self.id, self.address, self.port);
        }
    }

    /// Take the oldest pending notification
    pub fn poll_event(&mut self) -> Option<SocketEvent> {
        self.events.pop_front()
    }

    /// Take every pending notification, oldest first
    pub fn drain_events(&mut self) -> Vec<SocketEvent> {
        self.events.drain(..).collect()
    }

    fn enqueue(&mut self, data: &[u8]) -> bool {
        self.outbound.extend_from_slice(data);

        if self.outbound.len() > self.max_pending_send_bytes {
            tracing::warn!(
                "Socket {} to {}:{} exceeded {} pending bytes, closing",
                self.id, self.address, self.port, self.max_pending_send_bytes
            );
            self.close();
            return false;
        }
        true
    }
}

impl std::fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSocket")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("valid", &self.is_valid())
            .field("pending_send_bytes", &self.outbound.len())
            .finish()
    }
}

fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    // Disable Nagle's algorithm so small packets go out immediately
    stream.set_nodelay(true)?;
    Ok(())
}
