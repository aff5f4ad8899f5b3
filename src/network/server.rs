//! Server
//!
//! Accepts clients on a listening socket and keeps one `Connection` per
//! accepted socket. Everything happens inside `update`:
//!
//! 1. Listener pass (accept, drain, prune)
//! 2. New sockets become connections (`ClientConnected`)
//! 3. Received bytes are framed and dispatched, per connection in order
//! 4. Connection timers run
//! 5. Closed connections are removed (`ClientDisconnected`)

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::config::Config;
use crate::error::Result;
use crate::event::SubscriptionId;
use crate::protocol::RemoteError;
use crate::socket::{SharedSocket, SocketId, TcpSocket, TcpSocketListener, TcpSocketListenerDelegate};
use super::application::{Application, ClientConnected, Role, TrafficStats};
use super::connection::ConnectionPtr;
use super::rpc::{NetworkEvent, RemoteProcedure};

/// Listener notifications collected during one pass
///
/// Handled after the pass so no socket lock is held while connections
/// dispatch and reply.
#[derive(Default)]
struct ListenerEvents {
    accepted: Vec<SharedSocket>,
    received: Vec<(SocketId, Bytes)>,
    closed: Vec<SocketId>,
}

impl TcpSocketListenerDelegate for ListenerEvents {
    fn handle_connection_accepted(&mut self, socket: &SharedSocket) {
        self.accepted.push(socket.clone());
    }

    fn handle_received_data(&mut self, socket: &mut TcpSocket, data: &Bytes) {
        self.received.push((socket.id(), data.clone()));
    }

    fn handle_connection_closed(&mut self, socket: &SharedSocket) {
        self.closed.push(socket.lock().id());
    }
}

/// A listening network server
pub struct Server {
    application: Application,
    listener: TcpSocketListener,
    connections: BTreeMap<SocketId, ConnectionPtr>,
}

impl Server {
    /// Listen on a port with the default configuration
    pub fn create(port: u16) -> Result<Self> {
        Self::with_config(port, Config::default())
    }

    /// Listen on a port. Port 0 picks an ephemeral port.
    pub fn with_config(port: u16, config: Config) -> Result<Self> {
        let listener = TcpSocketListener::bind_to(port, &config)?;

        let mut application = Application::new(Role::Server, config);
        application.set_listen_port(listener.port());
        tracing::info!("Server listening on port {}", listener.port());

        Ok(Self {
            application,
            listener,
            connections: BTreeMap::new(),
        })
    }

    /// The bound port
    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    /// Run one server pass, `dt` milliseconds after the previous one
    pub fn update(&mut self, dt: u32) {
        let mut events = ListenerEvents::default();
        self.listener.update(&mut events);

        for socket in events.accepted {
            let connection = self.application.create_connection(socket);
            let socket_id = {
                let connection = connection.lock();
                tracing::info!(
                    "Client {} connected from {}:{}",
                    connection.id(),
                    connection.address(),
                    connection.port()
                );
                connection.socket_id()
            };

            self.connections.insert(socket_id, connection.clone());
            self.application.notify(&ClientConnected { connection });
        }

        for (socket_id, data) in events.received {
            let Some(connection) = self.connections.get(&socket_id).cloned() else {
                continue;
            };
            let packets = connection.lock().receive_data(&data);
            self.application.dispatch_all(&connection, packets);
        }

        for socket_id in events.closed {
            if let Some(connection) = self.connections.get(&socket_id) {
                connection.lock().mark_closed();
            }
        }

        let live: Vec<ConnectionPtr> = self.connections.values().cloned().collect();
        for connection in &live {
            self.application.update_connection(connection, dt);
        }

        for connection in live {
            let socket_id = {
                let mut connection = connection.lock();
                if !connection.take_closed() {
                    continue;
                }
                tracing::info!("Client {} disconnected", connection.id());
                connection.socket_id()
            };

            self.connections.remove(&socket_id);
            self.application.close_connection(connection);
        }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send an event to every open connection
    ///
    /// Returns how many connections accepted it. A failing connection does
    /// not stop the broadcast.
    pub fn emit<T: NetworkEvent>(&self, event: &T) -> usize {
        let mut reached = 0;

        for connection in self.connections.values() {
            let mut connection = connection.lock();
            match connection.emit(event) {
                Ok(_) => reached += 1,
                Err(e) => tracing::debug!("Failed to send {} to {}: {}", T::NAME, connection.id(), e),
            }
        }

        reached
    }

    /// Send an event to one connection
    pub fn emit_to<T: NetworkEvent>(&self, connection: &ConnectionPtr, event: &T) -> Result<usize> {
        connection.lock().emit(event)
    }

    /// Connections that receive broadcast events
    pub fn event_listeners(&self) -> Vec<ConnectionPtr> {
        self.connections
            .values()
            .filter(|connection| connection.lock().is_open())
            .cloned()
            .collect()
    }

    /// Number of connections not yet reported as disconnected
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection and stop listening
    ///
    /// Each connection is reported with `ClientDisconnected`.
    pub fn shutdown(&mut self) {
        let connections = std::mem::take(&mut self.connections);

        for connection in connections.into_values() {
            {
                let mut connection = connection.lock();
                connection.close();
                connection.take_closed();
            }
            self.application.close_connection(connection);
        }

        self.listener.close();
        tracing::info!("Server shut down");
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// See [`Application::register_event`]
    pub fn register_event<T: NetworkEvent>(&mut self) {
        self.application.register_event::<T>();
    }

    /// See [`Application::subscribe`]
    pub fn subscribe<T, F>(&mut self, handler: F) -> Result<SubscriptionId>
    where
        T: NetworkEvent,
        F: FnMut(&ConnectionPtr, &T) + Send + 'static,
    {
        self.application.subscribe::<T, F>(handler)
    }

    /// See [`Application::on`]
    pub fn on<E, F>(&mut self, handler: F) -> SubscriptionId
    where
        E: 'static,
        F: FnMut(&E) + Send + 'static,
    {
        self.application.on::<E, F>(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.application.unsubscribe(id)
    }

    /// See [`Application::register_remote_procedure`]
    pub fn register_remote_procedure<P, F>(&mut self, handler: F)
    where
        P: RemoteProcedure,
        F: FnMut(&ConnectionPtr, P::Argument) -> std::result::Result<P::Response, RemoteError>
            + Send
            + 'static,
    {
        self.application.register_remote_procedure::<P, F>(handler);
    }

    /// Bytes per packet type across every connection, closed ones included
    pub fn traffic(&self) -> TrafficStats {
        self.application.traffic(self.connections.values())
    }

    pub fn application(&self) -> &Application {
        &self.application
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("port", &self.port())
            .field("connections", &self.connections.len())
            .finish()
    }
}
