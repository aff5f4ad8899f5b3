//! Packet catalogue
//!
//! The messages that travel inside frames. `Event`, `RemoteCall` and
//! `RemoteCallResponse` carry an opaque payload whose meaning depends on
//! the identifier next to it; the dispatch layer routes on that identifier
//! before decoding the payload.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Packet type tags, written as the first byte of every frame body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketType {
    Ping = 0x01,
    KeepAlive = 0x02,
    DetectServers = 0x03,
    Event = 0x04,
    RemoteCall = 0x05,
    RemoteCallResponse = 0x06,
}

impl PacketType {
    /// Parse a wire tag. Unknown tags return `None`.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(PacketType::Ping),
            0x02 => Some(PacketType::KeepAlive),
            0x03 => Some(PacketType::DetectServers),
            0x04 => Some(PacketType::Event),
            0x05 => Some(PacketType::RemoteCall),
            0x06 => Some(PacketType::RemoteCallResponse),
            _ => None,
        }
    }

    /// Human-readable packet name
    pub fn name(&self) -> &'static str {
        match self {
            PacketType::Ping => "Ping",
            PacketType::KeepAlive => "KeepAlive",
            PacketType::DetectServers => "DetectServers",
            PacketType::Event => "Event",
            PacketType::RemoteCall => "RemoteCall",
            PacketType::RemoteCallResponse => "RemoteCallResponse",
        }
    }
}

/// Latency probe
///
/// The receiver answers with `iterations - 1`, keeping the sender's
/// `timestamp` and stamping its own clock into `time`. When `iterations`
/// reaches zero the originator computes the round trip time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub iterations: u8,
    pub timestamp: u32,
    pub time: u32,
}

/// Sent periodically so idle connections are not timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeepAlive;

/// Server discovery request (empty name, port 0) or reply
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetectServers {
    pub name: String,
    pub port: u16,
}

/// A typed application event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: u32,
    pub payload: Vec<u8>,
}

/// A remote procedure invocation; `id` 0 expects no response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCall {
    pub id: u16,
    pub method: u32,
    pub return_type: u32,
    pub payload: Vec<u8>,
}

/// Error reported by the remote side of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

impl RemoteError {
    /// The procedure is not registered on the remote side
    pub const UNKNOWN_PROCEDURE: i32 = -1;
    /// No response arrived in time
    pub const TIMEOUT: i32 = -2;
    /// The response carried a different type than the caller expects
    pub const TYPE_MISMATCH: i32 = -3;
    /// The argument or response payload could not be decoded
    pub const INVALID_PAYLOAD: i32 = -4;
    /// The connection closed before a response arrived
    pub const CONNECTION_CLOSED: i32 = -5;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remote error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Response to a `RemoteCall` with the same `id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCallResponse {
    pub id: u16,
    pub error: Option<RemoteError>,
    pub return_type: u32,
    pub payload: Vec<u8>,
}

/// Any packet of the catalogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Ping(Ping),
    KeepAlive(KeepAlive),
    DetectServers(DetectServers),
    Event(Event),
    RemoteCall(RemoteCall),
    RemoteCallResponse(RemoteCallResponse),
}

impl Packet {
    /// Wire tag of this packet
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Ping(_) => PacketType::Ping,
            Packet::KeepAlive(_) => PacketType::KeepAlive,
            Packet::DetectServers(_) => PacketType::DetectServers,
            Packet::Event(_) => PacketType::Event,
            Packet::RemoteCall(_) => PacketType::RemoteCall,
            Packet::RemoteCallResponse(_) => PacketType::RemoteCallResponse,
        }
    }

    /// Human-readable packet name
    pub fn name(&self) -> &'static str {
        self.packet_type().name()
    }
}

macro_rules! impl_from_packet {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Packet {
                fn from(packet: $variant) -> Self {
                    Packet::$variant(packet)
                }
            }
        )*
    };
}

impl_from_packet!(Ping, KeepAlive, DetectServers, Event, RemoteCall, RemoteCallResponse);
