//! TCP Socket Listener
//!
//! Accepts incoming connections and drives every accepted socket.
//!
//! ## Update pass
//! 1. Accept every pending connection (accepted notification)
//! 2. Flush and drain every managed socket (received data notification)
//! 3. Prune closed sockets (closed notification, exactly once per socket)
//!
//! A connection accepted in a pass has its first burst of data drained in
//! the same pass.

use std::io;
use std::net::{SocketAddr, TcpListener};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::Config;
use crate::error::{NetError, Result};
use super::{NetworkAddress, SharedSocket, SocketEvent, SocketResult, TcpSocket};

/// Receives listener notifications
///
/// Every method has an empty default so implementors only override what
/// they care about.
pub trait TcpSocketListenerDelegate {
    /// A new connection was accepted
    fn handle_connection_accepted(&mut self, socket: &SharedSocket) {
        let _ = socket;
    }

    /// New bytes arrived on an accepted socket
    fn handle_received_data(&mut self, socket: &mut TcpSocket, data: &Bytes) {
        let _ = (socket, data);
    }

    /// An accepted socket closed and was removed from the listener
    fn handle_connection_closed(&mut self, socket: &SharedSocket) {
        let _ = socket;
    }
}

/// A delegate that ignores every notification
impl TcpSocketListenerDelegate for () {}

/// A bound, listening TCP socket
pub struct TcpSocketListener {
    listener: Option<TcpListener>,
    port: u16,
    sockets: Vec<SharedSocket>,
    config: Config,
}

impl TcpSocketListener {
    /// Bind to a port on every interface
    ///
    /// Fails if the port is already bound. Port 0 selects an ephemeral port,
    /// reported by `port()`.
    pub fn bind_to(port: u16, config: &Config) -> Result<Self> {
        let addr = NetworkAddress::ANY.socket_addr(port);
        let listener = bind_socket(addr, config.listen_backlog)
            .map_err(|source| NetError::Bind { port, source })?;

        let port = listener.local_addr()?.port();
        tracing::debug!("Listening on port {}", port);

        Ok(Self {
            listener: Some(listener),
            port,
            sockets: Vec::new(),
            config: config.clone(),
        })
    }

    /// The bound port, 0 once closed
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check whether the listening socket is still open
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Snapshot of the live accepted sockets
    ///
    /// Not stable across the next `update` call.
    pub fn connections(&self) -> &[SharedSocket] {
        &self.sockets
    }

    /// Run one accept / drain / prune pass
    pub fn update(&mut self, delegate: &mut dyn TcpSocketListenerDelegate) {
        self.accept_pending(delegate);

        for socket in &self.sockets {
            let mut socket = socket.lock();
            socket.update();

            while let Some(event) = socket.poll_event() {
                if let SocketEvent::Data(data) = event {
                    delegate.handle_received_data(&mut *socket, &data);
                }
            }
        }

        // Delegates may close sockets above, so prune after the drain
        let mut index = 0;
        while index < self.sockets.len() {
            if self.sockets[index].lock().is_valid() {
                index += 1;
                continue;
            }

            let closed = self.sockets.remove(index);
            tracing::debug!(
                "Connection {} closed ({} active connections)",
                closed.lock().id(),
                self.sockets.len()
            );
            delegate.handle_connection_closed(&closed);
        }
    }

    /// Release the listening socket and forget the accepted sockets
    ///
    /// Accepted sockets still referenced elsewhere stay open for their
    /// other owners.
    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            tracing::debug!("Listener on port {} closed", self.port);
        }
        self.sockets.clear();
        self.port = 0;
    }

    fn accept_pending(&mut self, delegate: &mut dyn TcpSocketListenerDelegate) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };

        loop {
            let (stream, peer) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    let result = SocketResult::from(Err::<usize, _>(e));
                    if result.is_fatal() {
                        tracing::error!("Accept failed on port {}: {}", self.port, result.error_message());
                    }
                    return;
                }
            };

            let socket = match TcpSocket::accepted(stream, peer, &self.config) {
                Ok(socket) => socket.into_shared(),
                Err(e) => {
                    tracing::warn!("Failed to configure socket from {}: {}", peer, e);
                    continue;
                }
            };

            self.sockets.push(socket.clone());
            tracing::debug!(
                "Connection accepted from {} ({} active connections)",
                peer,
                self.sockets.len()
            );
            delegate.handle_connection_accepted(&socket);
        }
    }
}

impl Drop for TcpSocketListener {
    fn drop(&mut self) {
        self.close();
    }
}

fn bind_socket(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    // Lets a closed listener's port be rebound while old connections sit in
    // TIME_WAIT. Skipped on Windows, where it allows stealing a bound port.
    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}
