//! Typed events and remote procedures
//!
//! Application types become wire traffic through two traits: a
//! `NetworkEvent` is sent as an `Event` packet, a `RemoteProcedure` as a
//! `RemoteCall` answered by a `RemoteCallResponse`. Wire identifiers are
//! CRC32 hashes of the declared names, so both peers agree on them without
//! a shared registry.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{decode_payload, type_id, RemoteCallResponse, RemoteError};

/// An application event that can be sent over a connection
pub trait NetworkEvent: Serialize + DeserializeOwned + Send + 'static {
    /// Stable name, hashed into the wire identifier
    const NAME: &'static str;

    /// Wire identifier of this event type
    fn event_id() -> u32 {
        type_id(Self::NAME)
    }
}

/// A procedure that can be invoked on the remote peer
pub trait RemoteProcedure: 'static {
    type Argument: Serialize + DeserializeOwned + Send + 'static;
    type Response: Serialize + DeserializeOwned + Send + 'static;

    /// Stable name, hashed into the wire identifier
    const NAME: &'static str;

    /// Wire identifier of the method
    fn id() -> u32 {
        type_id(Self::NAME)
    }

    /// Wire identifier of the response type
    fn return_type_id() -> u32 {
        type_id(&format!("{}::Response", Self::NAME))
    }
}

type ResponseHandler = Box<dyn FnOnce(Result<Vec<u8>, RemoteError>) + Send>;

/// A call waiting for its response
pub struct PendingRemoteCall {
    name: &'static str,
    time_left: i64,
    return_type: u32,
    handler: ResponseHandler,
}

impl PendingRemoteCall {
    pub(crate) fn new<P, F>(timeout_ms: u32, callback: F) -> Self
    where
        P: RemoteProcedure,
        F: FnOnce(Result<P::Response, RemoteError>) + Send + 'static,
    {
        let handler: ResponseHandler = Box::new(move |result| {
            let decoded = result.and_then(|payload| {
                decode_payload::<P::Response>(&payload)
                    .map_err(|e| RemoteError::new(RemoteError::INVALID_PAYLOAD, e.to_string()))
            });
            callback(decoded);
        });

        Self {
            name: P::NAME,
            time_left: i64::from(timeout_ms),
            return_type: P::return_type_id(),
            handler,
        }
    }

    /// Name of the invoked procedure
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Advance the timer. Returns true once the call has expired.
    pub(crate) fn elapse(&mut self, dt: u32) -> bool {
        self.time_left -= i64::from(dt);
        self.time_left <= 0
    }

    /// Deliver a response to the caller
    ///
    /// The payload is only decoded when the response declares the return
    /// type the caller expects.
    pub fn complete(self, response: RemoteCallResponse) {
        let result = match response.error {
            Some(error) => Err(error),
            None if response.return_type != self.return_type => Err(RemoteError::new(
                RemoteError::TYPE_MISMATCH,
                format!("unexpected response type for {}", self.name),
            )),
            None => Ok(response.payload),
        };
        (self.handler)(result);
    }

    /// Fail the call without a response
    pub fn fail(self, error: RemoteError) {
        (self.handler)(Err(error));
    }
}

impl std::fmt::Debug for PendingRemoteCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRemoteCall")
            .field("name", &self.name)
            .field("time_left", &self.time_left)
            .finish()
    }
}
