//! Shared test helpers
//!
//! `MockSocket` is an in-memory `RawSocket` whose behaviour is scripted
//! through a shared `MockState`, so tests can force would-block and
//! failures that a loopback socket never produces on demand.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use pulsenet::socket::{RawSocket, SocketDescriptor};
use pulsenet::{Config, NetworkAddress, TcpSocket};

// =============================================================================
// Mock socket
// =============================================================================

/// Scripted outcome of the next `send` call
#[derive(Debug, Clone, Copy)]
pub enum SendStep {
    /// Accept at most this many bytes
    Partial(usize),
    WouldBlock,
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Everything the socket accepted, in order
    pub written: Vec<u8>,
    /// Bytes the next `recv` calls return
    pub readable: VecDeque<u8>,
    /// Scripted send outcomes; unscripted sends accept everything
    pub send_steps: VecDeque<SendStep>,
    /// Error returned by the next `recv` once `readable` is empty
    pub recv_error: Option<io::ErrorKind>,
    /// Report an orderly shutdown once `readable` is empty
    pub eof: bool,
    pub shutdown_calls: usize,
    pub send_calls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockSocket {
    pub state: Arc<Mutex<MockState>>,
}

impl RawSocket for MockSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.send_calls += 1;

        let accepted = match state.send_steps.pop_front() {
            Some(SendStep::WouldBlock) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(SendStep::Fail(kind)) => return Err(kind.into()),
            Some(SendStep::Partial(n)) => n.min(buf.len()),
            None => buf.len(),
        };

        state.written.extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();

        if state.readable.is_empty() {
            if let Some(kind) = state.recv_error.take() {
                return Err(kind.into());
            }
            if state.eof {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(state.readable.len());
        for (slot, byte) in buf.iter_mut().zip(state.readable.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.state.lock().shutdown_calls += 1;
        Ok(())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000))
    }
}

impl MockSocket {
    /// Make bytes available to `recv`
    pub fn push_readable(&self, data: &[u8]) {
        self.state.lock().readable.extend(data.iter().copied());
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn script_send(&self, step: SendStep) {
        self.state.lock().send_steps.push_back(step);
    }
}

/// A `TcpSocket` over a fresh mock
pub fn mock_tcp_socket(config: &Config) -> (TcpSocket, MockSocket) {
    let mock = MockSocket::default();
    let socket = TcpSocket::from_descriptor(
        SocketDescriptor::new(mock.clone()),
        NetworkAddress::LOCALHOST,
        4000,
        config,
    );
    (socket, mock)
}

// =============================================================================
// Polling helpers
// =============================================================================

/// Run `pass` until it reports success, sleeping briefly between passes
///
/// Returns false if it never did. Loopback delivery is fast but not
/// synchronous, so single-pass assertions would be flaky.
pub fn pump_until(mut pass: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if pass() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Run `step` a few more times so late duplicate notifications surface
pub fn settle(mut step: impl FnMut()) {
    for _ in 0..10 {
        step();
        thread::sleep(Duration::from_millis(2));
    }
}
