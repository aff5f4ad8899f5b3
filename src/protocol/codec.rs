//! Protocol codec
//!
//! Framing and encoding for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Frame
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Len (4)  │ Type (1) │        Packet body          │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! - `Len`: little-endian u32, number of bytes after the length field
//! - `Type`: `PacketType` tag, read before the body is decoded
//! - Packet body: bincode encoding of the packet struct
//!
//! Event and remote call payloads are bincode encodings of the user type,
//! identified by a CRC32 of a stable name.

use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{NetError, Result};
use super::{
    DetectServers, Event, KeepAlive, Packet, PacketType, Ping, RemoteCall, RemoteCallResponse,
};

/// Size of the length prefix in front of every frame body
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the packet type tag at the start of every frame body
pub const TYPE_TAG_SIZE: usize = 1;

// =============================================================================
// Packet Encoding/Decoding
// =============================================================================

/// Encode a packet into a complete frame
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + TYPE_TAG_SIZE + 32);

    // Length is patched in once the body size is known
    frame.extend_from_slice(&[0u8; LENGTH_PREFIX_SIZE]);
    frame.push(packet.packet_type() as u8);

    match packet {
        Packet::Ping(p) => bincode::serialize_into(&mut frame, p)?,
        Packet::KeepAlive(p) => bincode::serialize_into(&mut frame, p)?,
        Packet::DetectServers(p) => bincode::serialize_into(&mut frame, p)?,
        Packet::Event(p) => bincode::serialize_into(&mut frame, p)?,
        Packet::RemoteCall(p) => bincode::serialize_into(&mut frame, p)?,
        Packet::RemoteCallResponse(p) => bincode::serialize_into(&mut frame, p)?,
    }

    let body_len = frame.len() - LENGTH_PREFIX_SIZE;
    let body_len = u32::try_from(body_len).map_err(|_| NetError::FrameTooLarge {
        size: body_len,
        max: u32::MAX as usize,
    })?;
    frame[..LENGTH_PREFIX_SIZE].copy_from_slice(&body_len.to_le_bytes());

    Ok(frame)
}

/// Decode a frame body (everything after the length prefix)
///
/// Returns `Ok(None)` for packet types this build does not know, so newer
/// peers can add packets without breaking older ones.
pub fn decode_body(body: &[u8]) -> Result<Option<Packet>> {
    let Some((&tag, rest)) = body.split_first() else {
        return Err(NetError::Protocol("Empty frame body".to_string()));
    };

    let Some(packet_type) = PacketType::from_u8(tag) else {
        return Ok(None);
    };

    let packet = match packet_type {
        PacketType::Ping => Packet::Ping(bincode::deserialize::<Ping>(rest)?),
        PacketType::KeepAlive => Packet::KeepAlive(bincode::deserialize::<KeepAlive>(rest)?),
        PacketType::DetectServers => {
            Packet::DetectServers(bincode::deserialize::<DetectServers>(rest)?)
        }
        PacketType::Event => Packet::Event(bincode::deserialize::<Event>(rest)?),
        PacketType::RemoteCall => Packet::RemoteCall(bincode::deserialize::<RemoteCall>(rest)?),
        PacketType::RemoteCallResponse => {
            Packet::RemoteCallResponse(bincode::deserialize::<RemoteCallResponse>(rest)?)
        }
    };

    Ok(Some(packet))
}

// =============================================================================
// Frame Buffering
// =============================================================================

/// Reassembles frames from an undifferentiated byte stream
///
/// Bytes are appended as they arrive; `next_frame` only yields a body once
/// the whole frame is buffered, and consumes exactly that frame so the
/// start of the next one is preserved.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder rejecting bodies larger than `max_frame_size`
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet consumed as frames
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete frame body, if one is fully buffered
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let body_len =
            u32::from_le_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                as usize;

        if body_len > self.max_frame_size {
            return Err(NetError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        if self.buffer.len() < LENGTH_PREFIX_SIZE + body_len {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(body_len).freeze()))
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

// =============================================================================
// Payload helpers
// =============================================================================

/// Encode an event / procedure value
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode an event / procedure value
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Stable wire identifier derived from a name
pub fn type_id(name: &str) -> u32 {
    crc32fast::hash(name.as_bytes())
}
