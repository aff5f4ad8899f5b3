//! Socket Module
//!
//! Non-blocking TCP sockets and listeners.
//!
//! ## Layers
//! - `SocketResult`: classification of one OS call
//! - `SocketDescriptor`: exclusive owner of an OS socket
//! - `TcpSocket`: buffered, event-emitting stream socket
//! - `TcpSocketListener`: accepts and drives many sockets

mod result;
mod descriptor;
mod address;
mod tcp;
mod listener;

pub use result::SocketResult;
pub use descriptor::{RawSocket, SocketDescriptor};
pub use address::NetworkAddress;
pub use tcp::{SharedSocket, SocketEvent, SocketId, TcpSocket};
pub use listener::{TcpSocketListener, TcpSocketListenerDelegate};
