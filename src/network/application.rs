//! Network Application
//!
//! Dispatch core shared by `Client` and `Server`: the registries that map
//! wire identifiers to decoders and handlers, the local event bus, and the
//! handling of built-in packets (ping, keep-alive, server detection).
//!
//! User callbacks never run while a connection lock is held, so they are
//! free to send on the connection they receive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::event::{EventBus, SubscriptionId};
use crate::protocol::{
    decode_payload, encode_payload, DetectServers, Event, Packet, Ping, RemoteCall,
    PacketType, RemoteCallResponse, RemoteError,
};
use crate::socket::{NetworkAddress, SharedSocket};
use super::connection::{Connection, ConnectionId, ConnectionPtr};
use super::rpc::{NetworkEvent, RemoteProcedure};

/// Clock corrections below this many milliseconds are ignored
const CLOCK_DRIFT_TOLERANCE_MS: i64 = 50;

// =============================================================================
// Local events
// =============================================================================

/// A connection was established: the client connected, or a client
/// connected to the server
#[derive(Debug, Clone)]
pub struct Connected {
    pub connection: ConnectionPtr,
}

/// A connection was closed. Its counters are still readable.
#[derive(Debug, Clone)]
pub struct Disconnected {
    pub connection: ConnectionPtr,
}

/// Server-side name for `Connected`
pub type ClientConnected = Connected;

/// Server-side name for `Disconnected`
pub type ClientDisconnected = Disconnected;

/// A server answered a detection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDetected {
    pub name: String,
    pub address: NetworkAddress,
    pub port: u16,
}

/// A decoded network event, as published on the local bus
struct RemoteEvent<T> {
    connection: ConnectionPtr,
    event: T,
}

/// Bytes per packet type, summed across connections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub bytes_sent: HashMap<PacketType, u64>,
    pub bytes_received: HashMap<PacketType, u64>,
}

impl TrafficStats {
    fn add(&mut self, connection: &Connection) {
        for (packet_type, amount) in connection.bytes_sent_per_packet() {
            *self.bytes_sent.entry(*packet_type).or_default() += amount;
        }
        for (packet_type, amount) in connection.bytes_received_per_packet() {
            *self.bytes_received.entry(*packet_type).or_default() += amount;
        }
    }

    pub fn total_sent(&self) -> u64 {
        self.bytes_sent.values().sum()
    }

    pub fn total_received(&self) -> u64 {
        self.bytes_received.values().sum()
    }
}

/// Which side of a connection an application is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

type EventDecoder = Box<dyn FnMut(&ConnectionPtr, &[u8], &mut EventBus) -> Result<()> + Send>;
type CallHandler = Box<dyn FnMut(&ConnectionPtr, &RemoteCall) -> RemoteCallResponse + Send>;

/// Registries and dispatch shared by clients and servers
pub struct Application {
    role: Role,
    config: Config,
    bus: EventBus,
    event_decoders: HashMap<u32, (&'static str, EventDecoder)>,
    remote_procedures: HashMap<u32, (&'static str, CallHandler)>,
    next_connection_id: u32,
    listen_port: u16,
    /// Traffic of connections that already closed
    retired_traffic: TrafficStats,
}

impl Application {
    pub(crate) fn new(role: Role, config: Config) -> Self {
        Self {
            role,
            config,
            bus: EventBus::new(),
            event_decoders: HashMap::new(),
            remote_procedures: HashMap::new(),
            next_connection_id: 1,
            listen_port: 0,
            retired_traffic: TrafficStats::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn set_listen_port(&mut self, port: u16) {
        self.listen_port = port;
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an event type so it can be received and subscribed to
    pub fn register_event<T: NetworkEvent>(&mut self) {
        let event_id = T::event_id();

        if let Some((name, _)) = self.event_decoders.get(&event_id) {
            if *name != T::NAME {
                tracing::warn!(
                    "Event {} has the same identifier as {}, registration ignored",
                    T::NAME, name
                );
            }
            return;
        }

        let decoder: EventDecoder = Box::new(|connection, payload, bus| {
            let event: T = decode_payload(payload)?;
            bus.notify(&RemoteEvent {
                connection: connection.clone(),
                event,
            });
            Ok(())
        });
        self.event_decoders.insert(event_id, (T::NAME, decoder));
    }

    /// Check whether an event type was registered
    pub fn is_event_registered<T: NetworkEvent>(&self) -> bool {
        self.event_decoders.contains_key(&T::event_id())
    }

    /// Subscribe to a registered network event
    ///
    /// Fails with `EventNotRegistered` if `register_event::<T>()` was not
    /// called first.
    pub fn subscribe<T, F>(&mut self, mut handler: F) -> Result<SubscriptionId>
    where
        T: NetworkEvent,
        F: FnMut(&ConnectionPtr, &T) + Send + 'static,
    {
        if !self.is_event_registered::<T>() {
            return Err(NetError::EventNotRegistered(T::NAME));
        }

        Ok(self
            .bus
            .subscribe::<RemoteEvent<T>, _>(move |e| handler(&e.connection, &e.event)))
    }

    /// Subscribe to a local event such as `Connected` or `Disconnected`
    pub fn on<E, F>(&mut self, handler: F) -> SubscriptionId
    where
        E: 'static,
        F: FnMut(&E) + Send + 'static,
    {
        self.bus.subscribe::<E, _>(handler)
    }

    /// Remove a subscription made with `subscribe` or `on`
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Register a procedure remote peers may invoke
    ///
    /// The handler's result is sent back unless the caller used
    /// fire-and-forget invocation.
    pub fn register_remote_procedure<P, F>(&mut self, mut handler: F)
    where
        P: RemoteProcedure,
        F: FnMut(&ConnectionPtr, P::Argument) -> std::result::Result<P::Response, RemoteError>
            + Send
            + 'static,
    {
        let call_handler: CallHandler = Box::new(move |connection, call| {
            let result = decode_payload::<P::Argument>(&call.payload)
                .map_err(|e| RemoteError::new(RemoteError::INVALID_PAYLOAD, e.to_string()))
                .and_then(|argument| handler(connection, argument))
                .and_then(|response| {
                    encode_payload(&response)
                        .map_err(|e| RemoteError::new(RemoteError::INVALID_PAYLOAD, e.to_string()))
                });

            let (error, payload) = match result {
                Ok(payload) => (None, payload),
                Err(error) => (Some(error), Vec::new()),
            };

            RemoteCallResponse {
                id: call.id,
                error,
                return_type: P::return_type_id(),
                payload,
            }
        });

        if self
            .remote_procedures
            .insert(P::id(), (P::NAME, call_handler))
            .is_some()
        {
            tracing::debug!("Remote procedure {} re-registered", P::NAME);
        }
    }

    // =========================================================================
    // Connections
    // =========================================================================

    pub(crate) fn create_connection(&mut self, socket: SharedSocket) -> ConnectionPtr {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id = self.next_connection_id.wrapping_add(1).max(1);

        let connection = Connection::new(id, socket, &self.config, self.role == Role::Client);
        Arc::new(Mutex::new(connection))
    }

    /// Retire a closed connection and emit `Disconnected`
    pub(crate) fn close_connection(&mut self, connection: ConnectionPtr) {
        self.retire_connection(&connection);
        self.bus.notify(&Disconnected { connection });
    }

    /// Fail the pending calls of a closed connection and keep its traffic
    pub(crate) fn retire_connection(&mut self, connection: &ConnectionPtr) {
        let pending = {
            let mut connection = connection.lock();
            self.retired_traffic.add(&connection);
            connection.take_pending_calls()
        };
        for call in pending {
            let message = format!("connection closed before {} returned", call.name());
            call.fail(RemoteError::new(RemoteError::CONNECTION_CLOSED, message));
        }
    }

    /// Advance a connection's timers and fail its expired calls
    pub(crate) fn update_connection(&mut self, connection: &ConnectionPtr, dt: u32) {
        let expired = connection.lock().update(dt);
        for call in expired {
            tracing::warn!("Remote call {} timed out", call.name());
            let message = format!("{} timed out", call.name());
            call.fail(RemoteError::new(RemoteError::TIMEOUT, message));
        }
    }

    /// Traffic of every connection this application has seen
    pub(crate) fn traffic<'a>(&self, live: impl Iterator<Item = &'a ConnectionPtr>) -> TrafficStats {
        let mut stats = self.retired_traffic.clone();
        for connection in live {
            stats.add(&connection.lock());
        }
        stats
    }

    pub(crate) fn notify<E: 'static>(&mut self, event: &E) {
        self.bus.notify(event);
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatch packets in the order they were framed
    pub(crate) fn dispatch_all(&mut self, connection: &ConnectionPtr, packets: Vec<Packet>) {
        for packet in packets {
            self.dispatch(connection, packet);
        }
    }

    /// Route one packet to its handler
    pub(crate) fn dispatch(&mut self, connection: &ConnectionPtr, packet: Packet) {
        match packet {
            Packet::Ping(ping) => self.handle_ping(connection, ping),
            // Receiving any packet already reset the idle timeout
            Packet::KeepAlive(_) => {}
            Packet::DetectServers(packet) => self.handle_detect_servers(connection, packet),
            Packet::Event(event) => self.handle_event(connection, event),
            Packet::RemoteCall(call) => self.handle_remote_call(connection, call),
            Packet::RemoteCallResponse(response) => {
                self.handle_remote_call_response(connection, response)
            }
        }
    }

    fn handle_ping(&mut self, connection: &ConnectionPtr, ping: Ping) {
        let mut connection = connection.lock();

        if ping.iterations > 0 {
            let reply = Ping {
                iterations: ping.iterations - 1,
                timestamp: ping.timestamp,
                time: connection.time(),
            };
            let _ = connection.send_packet(&reply.into());
            return;
        }

        let now = connection.time();
        let rtt = now.wrapping_sub(ping.timestamp);
        let estimated = ping.time.wrapping_add(rtt / 2);
        let drift = i64::from(estimated) - i64::from(now);

        if drift.abs() > CLOCK_DRIFT_TOLERANCE_MS {
            tracing::debug!("{}ms time error detected on {}", drift, connection.id());
            connection.set_time(estimated);
        }
        connection.set_round_trip_time(rtt);
    }

    fn handle_detect_servers(&mut self, connection: &ConnectionPtr, packet: DetectServers) {
        match self.role {
            Role::Server => {
                let reply = DetectServers {
                    name: self.config.server_name.clone(),
                    port: self.listen_port,
                };
                let _ = connection.lock().send_packet(&reply.into());
            }
            Role::Client => {
                let address = *connection.lock().address();
                self.bus.notify(&ServerDetected {
                    name: packet.name,
                    address,
                    port: packet.port,
                });
            }
        }
    }

    fn handle_event(&mut self, connection: &ConnectionPtr, event: Event) {
        let Some((name, decoder)) = self.event_decoders.get_mut(&event.event_id) else {
            tracing::debug!("Unknown event {} received, ignored", event.event_id);
            return;
        };

        if let Err(e) = decoder(connection, &event.payload, &mut self.bus) {
            tracing::warn!("Failed to decode event {}: {}", name, e);
        }
    }

    fn handle_remote_call(&mut self, connection: &ConnectionPtr, call: RemoteCall) {
        let response = match self.remote_procedures.get_mut(&call.method) {
            Some((_, handler)) => handler(connection, &call),
            None => {
                tracing::warn!("Trying to invoke unknown remote procedure {}", call.method);
                RemoteCallResponse {
                    id: call.id,
                    error: Some(RemoteError::new(
                        RemoteError::UNKNOWN_PROCEDURE,
                        format!("unknown remote procedure {}", call.method),
                    )),
                    return_type: call.return_type,
                    payload: Vec::new(),
                }
            }
        };

        // Fire-and-forget calls get no response
        if call.id == 0 {
            return;
        }

        if let Err(e) = connection.lock().send_packet(&response.into()) {
            tracing::debug!("Failed to send remote call response: {}", e);
        }
    }

    fn handle_remote_call_response(
        &mut self,
        connection: &ConnectionPtr,
        response: RemoteCallResponse,
    ) {
        let pending = connection.lock().take_pending_call(response.id);

        match pending {
            Some(call) => call.complete(response),
            None => tracing::warn!("Response to unknown remote call {} ignored", response.id),
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("role", &self.role)
            .field("events", &self.event_decoders.len())
            .field("remote_procedures", &self.remote_procedures.len())
            .finish()
    }
}
