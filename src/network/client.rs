//! Client
//!
//! A single outgoing connection driven by `update`. The client measures
//! round trip time with pings and follows the server's clock.

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::event::SubscriptionId;
use crate::protocol::{DetectServers, RemoteError};
use crate::socket::{NetworkAddress, TcpSocket};
use super::application::{Application, Connected, Role, TrafficStats};
use super::connection::ConnectionPtr;
use super::rpc::{NetworkEvent, RemoteProcedure};

/// A connected network client
pub struct Client {
    application: Application,
    connection: Option<ConnectionPtr>,
    connected_notified: bool,
}

impl Client {
    /// Connect to a server with the default configuration
    pub fn create(address: &NetworkAddress, port: u16) -> Result<Self> {
        Self::with_config(address, port, Config::default())
    }

    /// Connect to a server
    ///
    /// `Connected` is emitted on the first `update`, once subscribers had a
    /// chance to attach.
    pub fn with_config(address: &NetworkAddress, port: u16, config: Config) -> Result<Self> {
        let socket = TcpSocket::connect_to(address, port, &config)?.into_shared();

        let mut application = Application::new(Role::Client, config);
        let connection = application.create_connection(socket);
        tracing::info!("Connected to {}:{}", address, port);

        Ok(Self {
            application,
            connection: Some(connection),
            connected_notified: false,
        })
    }

    /// Drive the connection: run timers, receive and dispatch, detect closing
    pub fn update(&mut self, dt: u32) {
        let Some(connection) = self.connection.clone() else {
            return;
        };

        if !self.connected_notified {
            self.connected_notified = true;
            self.application.notify(&Connected {
                connection: connection.clone(),
            });
        }

        // Advance the clock before measuring ping replies
        self.application.update_connection(&connection, dt);

        let packets = connection.lock().poll();
        self.application.dispatch_all(&connection, packets);

        if connection.lock().take_closed() {
            tracing::info!("Disconnected from server");
            self.connection = None;
            self.application.close_connection(connection);
        }
    }

    /// Close the connection now
    ///
    /// Pending calls fail with `CONNECTION_CLOSED`. `Disconnected` is
    /// emitted if `Connected` was.
    pub fn close(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        {
            let mut connection = connection.lock();
            connection.close();
            connection.take_closed();
        }

        if self.connected_notified {
            self.application.close_connection(connection);
        } else {
            self.application.retire_connection(&connection);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| connection.lock().is_open())
    }

    /// The server connection, `None` once disconnected
    pub fn connection(&self) -> Option<&ConnectionPtr> {
        self.connection.as_ref()
    }

    /// Connections that receive emitted events: the server, while open
    pub fn event_listeners(&self) -> Vec<ConnectionPtr> {
        self.connection
            .iter()
            .filter(|connection| connection.lock().is_open())
            .cloned()
            .collect()
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send an event to the server
    pub fn emit<T: NetworkEvent>(&self, event: &T) -> Result<usize> {
        self.open_connection()?.lock().emit(event)
    }

    /// Invoke a procedure on the server
    pub fn invoke<P, F>(&self, argument: &P::Argument, callback: F) -> Result<()>
    where
        P: RemoteProcedure,
        F: FnOnce(std::result::Result<P::Response, RemoteError>) + Send + 'static,
    {
        self.open_connection()?.lock().invoke::<P, F>(argument, callback)
    }

    /// Invoke a procedure on the server without waiting for a response
    pub fn invoke_void<P: RemoteProcedure>(&self, argument: &P::Argument) -> Result<()> {
        self.open_connection()?.lock().invoke_void::<P>(argument)
    }

    /// Ask the server to identify itself; answered with `ServerDetected`
    pub fn detect_servers(&self) -> Result<usize> {
        let request = DetectServers {
            name: String::new(),
            port: 0,
        };
        self.open_connection()?.lock().send_packet(&request.into())
    }

    fn open_connection(&self) -> Result<&ConnectionPtr> {
        self.connection.as_ref().ok_or(NetError::NotConnected)
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

    /// Bytes per packet type exchanged with the server
    pub fn traffic(&self) -> TrafficStats {
        self.application.traffic(self.connection.iter())
    }

    pub fn application(&self) -> &Application {
        &self.application
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.is_connected())
            .finish()
    }
}
