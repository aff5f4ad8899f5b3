//! # pulsenet
//!
//! A poll-driven TCP networking core with:
//! - Non-blocking sockets that never spin on would-block
//! - A listener that accepts, drains and prunes connections in one pass
//! - Length-prefixed packet framing with per-packet traffic counters
//! - Typed events and remote procedure calls between clients and servers
//! - Round trip time measurement and clock synchronization
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Client / Server (update loop)                │
//! │          events, remote calls, ping, keep-alive              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Connection                              │
//! │          [u32 length][u8 type][bincode body]                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────────┐
//!   │  TcpSocket  │◄─────────│ TcpSocketListener │
//!   │ (queued I/O)│          │ (accept / prune)  │
//!   └─────────────┘          └──────────────────┘
//! ```
//!
//! Nothing runs in the background: progress only happens inside the
//! `update` calls made by the owner.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod event;
pub mod socket;
pub mod protocol;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetError, Result};
pub use config::Config;
pub use event::{EventBus, SubscriptionId};
pub use socket::{NetworkAddress, SocketResult, TcpSocket, TcpSocketListener};
pub use network::{Client, Connection, ConnectionPtr, NetworkEvent, RemoteProcedure, Server};
pub use protocol::RemoteError;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of pulsenet
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
