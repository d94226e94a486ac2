//! The contract between the reactor and the service layer.
//!
//! The reactor owns sockets and exposes each accepted connection as a
//! [`ServerConnection`]. It reports readiness events for that connection to a
//! [`ServerEventHandler`], one event at a time per connection. The service
//! layer answers by calling back into the connection: submitting a response
//! head, arming or suspending input and output interest, closing.
//!
//! Every method on [`ServerConnection`] must be non-blocking and callable
//! from any thread: the handler worker commits responses from outside the
//! reactor.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::content::{ContentDecoder, ContentEncoder};
use crate::protocol::{PayloadSize, RequestHeader, ResponseHead, SendError, ServiceError};

/// Identity of a connection, stable for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared handle to a connection, as the service layer holds it.
pub type ConnectionRef = Arc<dyn ServerConnection>;

/// A reactor-managed, non-blocking HTTP server connection.
pub trait ServerConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Queues the response head for serialization. `framing` tells the reactor
    /// how the following body bytes are delimited on the wire, it may differ
    /// from the headers (e.g. a `HEAD` response keeps its `Content-Length`).
    fn submit_response(&self, head: ResponseHead, framing: PayloadSize) -> Result<(), SendError>;

    /// Queues an interim `100 Continue` response.
    fn submit_continue(&self) -> Result<(), SendError>;

    /// Resumes delivery of input: request body bytes, or the next request head.
    fn request_input(&self);

    /// Stops reading from the peer until [`request_input`](Self::request_input).
    fn suspend_input(&self);

    /// Asks for one `output_ready` event once the write buffer has room.
    fn request_output(&self);

    /// Flushes everything already submitted, then closes.
    fn close(&self);

    /// Closes immediately, discarding unsent output.
    fn shutdown(&self);

    fn is_open(&self) -> bool;
}

/// Receives the reactor's events. Implementations must never block.
pub trait ServerEventHandler: Send + Sync {
    fn on_connected(&self, conn: &ConnectionRef);

    fn on_closed(&self, conn: &ConnectionRef);

    /// A request head has been parsed; its body, if any, follows through
    /// [`on_input_ready`](Self::on_input_ready).
    fn on_request_received(&self, conn: &ConnectionRef, header: RequestHeader, payload_size: PayloadSize);

    fn on_input_ready(&self, conn: &ConnectionRef, decoder: &mut dyn ContentDecoder);

    fn on_output_ready(&self, conn: &ConnectionRef, encoder: &mut dyn ContentEncoder);

    fn on_exception(&self, conn: &ConnectionRef, error: ServiceError);

    fn on_timeout(&self, conn: &ConnectionRef);
}
