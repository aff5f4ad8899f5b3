//! Network Module
//!
//! Packet-level connections and the client/server layer on top of them.
//!
//! ## Architecture
//! - `Connection` frames one socket's byte stream into packets
//! - `Application` routes packets to events and remote procedures
//! - `Client` drives one outgoing connection, `Server` a listener and
//!   every connection it accepted

mod application;
mod client;
mod connection;
mod rpc;
mod server;

pub use application::{
    Application, ClientConnected, ClientDisconnected, Connected, Disconnected, Role,
    ServerDetected, TrafficStats,
};
pub use client::Client;
pub use connection::{Connection, ConnectionId, ConnectionPtr};
pub use rpc::{NetworkEvent, PendingRemoteCall, RemoteProcedure};
pub use server::Server;
