//! Socket call results
//!
//! Classifies the outcome of a single OS socket call. The would-block case
//! is load-bearing: callers retry it on the next tick, while any other
//! failure is fatal to the socket.

use std::fmt;
use std::io;

/// Outcome of one OS-level send/recv/accept call
#[derive(Debug)]
pub enum SocketResult {
    /// The call transferred this many bytes (0 on recv means orderly shutdown)
    Completed(usize),

    /// The non-blocking call could not make progress right now
    WouldBlock(io::Error),

    /// The call failed; the socket should be closed
    Failed(io::Error),
}

impl SocketResult {
    /// True when the OS reported an error, including would-block
    pub fn is_error(&self) -> bool {
        !matches!(self, SocketResult::Completed(_))
    }

    /// True iff the OS reported "operation would block"
    pub fn would_block(&self) -> bool {
        matches!(self, SocketResult::WouldBlock(_))
    }

    /// True for errors that must close the socket
    pub fn is_fatal(&self) -> bool {
        matches!(self, SocketResult::Failed(_))
    }

    /// Number of bytes transferred, if the call completed
    pub fn bytes(&self) -> Option<usize> {
        match self {
            SocketResult::Completed(n) => Some(*n),
            _ => None,
        }
    }

    /// Platform-specific error code of the failed call
    pub fn error_code(&self) -> Option<i32> {
        match self {
            SocketResult::Completed(_) => None,
            SocketResult::WouldBlock(e) | SocketResult::Failed(e) => e.raw_os_error(),
        }
    }

    /// Human-readable error description, empty on success
    pub fn error_message(&self) -> String {
        match self {
            SocketResult::Completed(_) => String::new(),
            SocketResult::WouldBlock(e) | SocketResult::Failed(e) => e.to_string(),
        }
    }
}

impl From<io::Result<usize>> for SocketResult {
    fn from(result: io::Result<usize>) -> Self {
        match result {
            Ok(n) => SocketResult::Completed(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => SocketResult::WouldBlock(e),
            Err(e) => SocketResult::Failed(e),
        }
    }
}

impl fmt::Display for SocketResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketResult::Completed(n) => write!(f, "{} bytes", n),
            SocketResult::WouldBlock(_) => write!(f, "would block"),
            SocketResult::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}
