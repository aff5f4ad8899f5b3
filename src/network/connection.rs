//! Connection
//!
//! The application-level wrapper around one socket: frames the byte
//! stream into packets, tracks traffic and timing, and owns the remote
//! calls waiting for a response.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{NetError, Result};
use crate::protocol::{
    decode_body, encode_packet, encode_payload, Event, FrameDecoder, KeepAlive, Packet,
    PacketType, Ping, RemoteCall, RemoteError, LENGTH_PREFIX_SIZE,
};
use crate::socket::{NetworkAddress, SharedSocket, SocketEvent, SocketId};
use super::rpc::{NetworkEvent, PendingRemoteCall, RemoteProcedure};

/// Connection shared between its application and in-flight callbacks
pub type ConnectionPtr = Arc<Mutex<Connection>>;

/// Identifier assigned by the owning application, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u32);

impl ConnectionId {
    pub fn new(value: u32) -> Self {
        ConnectionId(value)
    }

    /// Raw numeric value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A packet-level connection over one TCP socket
pub struct Connection {
    id: ConnectionId,
    socket: SharedSocket,
    socket_id: SocketId,
    address: NetworkAddress,
    port: u16,

    /// Partial frames waiting for the rest of their bytes
    decoder: FrameDecoder,

    // -------------------------------------------------------------------------
    // Traffic
    // -------------------------------------------------------------------------
    total_bytes_received: u64,
    total_bytes_sent: u64,
    bytes_received_per_packet: HashMap<PacketType, u64>,
    bytes_sent_per_packet: HashMap<PacketType, u64>,

    // -------------------------------------------------------------------------
    // Timing (milliseconds)
    // -------------------------------------------------------------------------
    time: u32,
    /// Time since the last packet was received
    timeout: u32,
    round_trip_time: u32,
    ping_elapsed: u32,
    keep_alive_elapsed: u32,
    sends_pings: bool,
    ping_interval_ms: u32,
    keep_alive_interval_ms: u32,
    connection_timeout_ms: u32,

    // -------------------------------------------------------------------------
    // Remote calls
    // -------------------------------------------------------------------------
    pending_calls: HashMap<u16, PendingRemoteCall>,
    next_remote_call_id: u16,
    remote_call_timeout_ms: u32,

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    should_close: bool,
    closed: bool,
    closed_reported: bool,
}

impl Connection {
    /// Wrap a connected socket
    ///
    /// `sends_pings` is set on the client side, which measures round trip
    /// time and follows the server's clock.
    pub fn new(id: ConnectionId, socket: SharedSocket, config: &Config, sends_pings: bool) -> Self {
        let (socket_id, address, port) = {
            let socket = socket.lock();
            (socket.id(), *socket.address(), socket.port())
        };

        Self {
            id,
            socket,
            socket_id,
            address,
            port,
            decoder: FrameDecoder::new(config.max_frame_size),
            total_bytes_received: 0,
            total_bytes_sent: 0,
            bytes_received_per_packet: HashMap::new(),
            bytes_sent_per_packet: HashMap::new(),
            time: 0,
            timeout: 0,
            round_trip_time: 0,
            ping_elapsed: 0,
            keep_alive_elapsed: 0,
            sends_pings,
            ping_interval_ms: config.ping_interval_ms,
            keep_alive_interval_ms: config.keep_alive_interval_ms,
            connection_timeout_ms: config.connection_timeout_ms,
            pending_calls: HashMap::new(),
            next_remote_call_id: 1,
            remote_call_timeout_ms: config.remote_call_timeout_ms,
            should_close: false,
            closed: false,
            closed_reported: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Identity of the underlying socket
    pub fn socket_id(&self) -> SocketId {
        self.socket_id
    }

    /// The underlying socket
    pub fn socket(&self) -> &SharedSocket {
        &self.socket
    }

    /// Remote host
    pub fn address(&self) -> &NetworkAddress {
        &self.address
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Check whether packets can still be sent
    pub fn is_open(&self) -> bool {
        !self.closed && self.socket.lock().is_valid()
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Frame and send a packet
    ///
    /// Returns the number of bytes handed to the socket. Fails with
    /// `NotConnected` once the connection is closed.
    pub fn send_packet(&mut self, packet: &Packet) -> Result<usize> {
        if self.closed {
            return Err(NetError::NotConnected);
        }

        let frame = encode_packet(packet)?;
        let (sent, open) = {
            let mut socket = self.socket.lock();
            let sent = socket.send(&frame);
            (sent, socket.is_valid())
        };

        if !open {
            self.closed = true;
            return Err(NetError::NotConnected);
        }

        tracing::trace!("{} sent to {} ({} bytes)", packet.name(), self.id, sent);
        self.track_sent_amount(packet.packet_type(), sent);

        Ok(sent)
    }

    /// Send an application event
    pub fn emit<T: NetworkEvent>(&mut self, event: &T) -> Result<usize> {
        let packet = Event {
            event_id: T::event_id(),
            payload: encode_payload(event)?,
        };
        self.send_packet(&packet.into())
    }

    /// Invoke a remote procedure; `callback` receives the response
    ///
    /// The callback also runs if the call times out or the connection
    /// closes first. Fails with `TooManyPendingCalls` when every call id
    /// is in use; the callback is not kept in that case.
    pub fn invoke<P, F>(&mut self, argument: &P::Argument, callback: F) -> Result<()>
    where
        P: RemoteProcedure,
        F: FnOnce(std::result::Result<P::Response, RemoteError>) + Send + 'static,
    {
        let id = self.next_call_id()?;
        let packet = RemoteCall {
            id,
            method: P::id(),
            return_type: P::return_type_id(),
            payload: encode_payload(argument)?,
        };
        self.send_packet(&packet.into())?;

        self.pending_calls
            .insert(id, PendingRemoteCall::new::<P, F>(self.remote_call_timeout_ms, callback));
        Ok(())
    }

    /// Invoke a remote procedure without waiting for a response
    pub fn invoke_void<P: RemoteProcedure>(&mut self, argument: &P::Argument) -> Result<()> {
        let packet = RemoteCall {
            id: 0,
            method: P::id(),
            return_type: 0,
            payload: encode_payload(argument)?,
        };
        self.send_packet(&packet.into()).map(|_| ())
    }

    // =========================================================================
    // Receiving
    // =========================================================================

    /// Feed received bytes and return every packet they complete
    ///
    /// Partial frames stay buffered until the rest arrives. Packets are
    /// returned in stream order. A frame exceeding the size limit closes
    /// the connection.
    pub fn receive_data(&mut self, data: &[u8]) -> Vec<Packet> {
        let mut packets = Vec::new();
        if self.closed {
            return packets;
        }

        self.decoder.extend(data);

        loop {
            let body = match self.decoder.next_frame() {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Protocol violation on {}: {}", self.id, e);
                    self.decoder.clear();
                    self.close();
                    break;
                }
            };

            let frame_size = LENGTH_PREFIX_SIZE + body.len();
            self.timeout = 0;

            match decode_body(&body) {
                Ok(Some(packet)) => {
                    tracing::trace!("{} received from {} ({} bytes)", packet.name(), self.id, frame_size);
                    self.track_received_amount(Some(packet.packet_type()), frame_size);
                    packets.push(packet);
                }
                Ok(None) => {
                    tracing::debug!(
                        "Packet of unknown type received from {}, {} bytes skipped",
                        self.id, frame_size
                    );
                    self.track_received_amount(None, frame_size);
                }
                Err(e) => {
                    tracing::warn!("Malformed packet from {}: {}", self.id, e);
                    self.track_received_amount(None, frame_size);
                }
            }
        }

        packets
    }

    /// Drive the socket directly and return the packets it completed
    ///
    /// Used when nothing else (such as a listener) drains the socket.
    pub fn poll(&mut self) -> Vec<Packet> {
        let events = {
            let mut socket = self.socket.lock();
            socket.update();
            socket.drain_events()
        };

        let mut packets = Vec::new();
        for event in events {
            match event {
                SocketEvent::Data(data) => packets.extend(self.receive_data(&data)),
                SocketEvent::Closed => self.closed = true,
            }
        }
        packets
    }

    // =========================================================================
    // Timing
    // =========================================================================

    /// Advance timers by `dt` milliseconds
    ///
    /// Sends keep-alives and pings when due, closes the connection when the
    /// peer has been silent too long, and returns the remote calls that
    /// expired so the caller can fail them outside the lock.
    pub fn update(&mut self, dt: u32) -> Vec<PendingRemoteCall> {
        self.time = self.time.wrapping_add(dt);
        self.timeout = self.timeout.saturating_add(dt);

        if !self.closed {
            if self.keep_alive_interval_ms > 0 {
                self.keep_alive_elapsed = self.keep_alive_elapsed.saturating_add(dt);
                if self.keep_alive_elapsed >= self.keep_alive_interval_ms {
                    self.keep_alive_elapsed = 0;
                    let _ = self.send_packet(&KeepAlive.into());
                }
            }

            if self.sends_pings && self.ping_interval_ms > 0 {
                self.ping_elapsed = self.ping_elapsed.saturating_add(dt);
                if self.ping_elapsed >= self.ping_interval_ms {
                    self.ping_elapsed = 0;
                    let ping = Ping {
                        iterations: 1,
                        timestamp: self.time,
                        time: self.time,
                    };
                    let _ = self.send_packet(&ping.into());
                }
            }

            if self.connection_timeout_ms > 0 && self.timeout >= self.connection_timeout_ms {
                tracing::warn!(
                    "Connection {} timed out after {}ms without packets",
                    self.id, self.timeout
                );
                self.close();
            }
        }

        if self.should_close {
            self.close();
        }

        let expired: Vec<u16> = self
            .pending_calls
            .iter_mut()
            .filter_map(|(id, call)| call.elapse(dt).then_some(*id))
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.pending_calls.remove(&id))
            .collect()
    }

    /// Current connection time
    pub fn time(&self) -> u32 {
        self.time
    }

    pub(crate) fn set_time(&mut self, value: u32) {
        self.time = value;
    }

    /// Last measured round trip time
    pub fn round_trip_time(&self) -> u32 {
        self.round_trip_time
    }

    pub(crate) fn set_round_trip_time(&mut self, value: u32) {
        self.round_trip_time = value;
    }

    /// Milliseconds left before an idle timeout, `None` if timeouts are off
    pub fn time_to_live(&self) -> Option<u32> {
        (self.connection_timeout_ms > 0)
            .then(|| self.connection_timeout_ms.saturating_sub(self.timeout))
    }

    // =========================================================================
    // Traffic
    // =========================================================================

    pub fn total_bytes_received(&self) -> u64 {
        self.total_bytes_received
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.total_bytes_sent
    }

    /// Received bytes per packet type, frames included
    pub fn bytes_received_per_packet(&self) -> &HashMap<PacketType, u64> {
        &self.bytes_received_per_packet
    }

    /// Sent bytes per packet type, frames included
    pub fn bytes_sent_per_packet(&self) -> &HashMap<PacketType, u64> {
        &self.bytes_sent_per_packet
    }

    fn track_received_amount(&mut self, packet_type: Option<PacketType>, amount: usize) {
        let amount = amount as u64;
        self.total_bytes_received += amount;
        if let Some(packet_type) = packet_type {
            *self.bytes_received_per_packet.entry(packet_type).or_default() += amount;
        }
    }

    fn track_sent_amount(&mut self, packet_type: PacketType, amount: usize) {
        let amount = amount as u64;
        self.total_bytes_sent += amount;
        *self.bytes_sent_per_packet.entry(packet_type).or_default() += amount;
    }

    // =========================================================================
    // Remote calls
    // =========================================================================

    /// Number of calls waiting for a response
    pub fn pending_call_count(&self) -> usize {
        self.pending_calls.len()
    }

    pub(crate) fn take_pending_call(&mut self, id: u16) -> Option<PendingRemoteCall> {
        self.pending_calls.remove(&id)
    }

    pub(crate) fn take_pending_calls(&mut self) -> Vec<PendingRemoteCall> {
        self.pending_calls.drain().map(|(_, call)| call).collect()
    }

    /// Next id not held by a pending call
    fn next_call_id(&mut self) -> Result<u16> {
        // 0 marks calls that expect no response
        if self.pending_calls.len() >= usize::from(u16::MAX) {
            return Err(NetError::TooManyPendingCalls(self.pending_calls.len()));
        }

        loop {
            let id = self.next_remote_call_id;
            self.next_remote_call_id = self.next_remote_call_id.wrapping_add(1).max(1);
            if !self.pending_calls.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close the connection and its socket
    pub fn close(&mut self) {
        self.closed = true;
        self.socket.lock().close();
    }

    /// Close the connection on the next `update`
    pub fn close_later(&mut self) {
        self.should_close = true;
    }

    /// Check whether the connection is queued for closing
    pub fn will_be_closed(&self) -> bool {
        self.should_close
    }

    /// Record that the socket was closed by its other owner
    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// Returns true exactly once, after the connection has closed
    pub fn take_closed(&mut self) -> bool {
        if self.closed_reported {
            return false;
        }
        if !self.closed && self.socket.lock().is_valid() {
            return false;
        }

        self.closed = true;
        self.closed_reported = true;
        true
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("closed", &self.closed)
            .field("total_bytes_sent", &self.total_bytes_sent)
            .field("total_bytes_received", &self.total_bytes_received)
            .finish()
    }
}
