//! Protocol Module
//!
//! Defines the wire protocol spoken over every connection.
//!
//! ## Frame Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Len (4)  │ Type (1) │        Packet body          │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Packet Types
//! - 0x01: PING                 - latency probe / clock sync
//! - 0x02: KEEP_ALIVE           - idle connection heartbeat
//! - 0x03: DETECT_SERVERS       - server discovery request / reply
//! - 0x04: EVENT                - event id + payload
//! - 0x05: REMOTE_CALL          - call id + method id + payload
//! - 0x06: REMOTE_CALL_RESPONSE - call id + error + payload

mod packets;
mod codec;

pub use packets::{
    DetectServers, Event, KeepAlive, Packet, PacketType, Ping, RemoteCall, RemoteCallResponse,
    RemoteError,
};
pub use codec::{
    decode_body, decode_payload, encode_packet, encode_payload, type_id, FrameDecoder,
    LENGTH_PREFIX_SIZE, TYPE_TAG_SIZE,
};
