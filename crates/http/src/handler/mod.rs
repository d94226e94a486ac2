//! Request handlers: the application side of an exchange.
//!
//! A [`RequestHandler`] receives the request with a streaming [`ReqBody`] and
//! an [`ExchangeContext`], and returns a complete response head plus a
//! [`ResponseBody`] that the connection service streams out later. Handlers
//! run on the handler worker runtime, never on the reactor.
//!
//! Handlers report failures through [`HandlerError`]; its variants decide how
//! the connection service reacts (error response, silent close, or
//! connection shutdown).

mod registry;

pub use registry::HandlerRegistry;
pub use registry::HandlerRegistryBuilder;
pub use registry::NotFoundHandler;
pub use registry::RegistryError;

use std::future::Future;
use std::io;
use std::io::ErrorKind;
use std::net::SocketAddr;

use async_trait::async_trait;
use http::{Method, Request, Response, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionId;
use crate::protocol::body::ReqBody;
use crate::protocol::{BoxError, ParseError, ResponseBody};

/// Produces the response for one request.
///
/// The request body streams in while the handler runs; reading it may wait on
/// the peer. The returned body is pulled later, chunk by chunk, as the peer
/// accepts output.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request<ReqBody>, ctx: &ExchangeContext) -> Result<Response<ResponseBody>, HandlerError>;
}

/// Per exchange information handed to a handler.
#[derive(Debug, Clone)]
pub struct ExchangeContext {
    connection_id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    cancellation: CancellationToken,
}

impl ExchangeContext {
    pub fn new(connection_id: ConnectionId, peer_addr: Option<SocketAddr>, cancellation: CancellationToken) -> Self {
        Self { connection_id, peer_addr, cancellation }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Cancelled once the connection is closed or the exchange failed. Long
    /// running handlers may select on it; their result is discarded anyway.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Handler failures, see [`HandlerError::status_code`] for how each one ends
/// the exchange.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("method {0} not supported")]
    MethodNotSupported(Method),

    /// The peer went away. Not worth an error response.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    #[error("internal error: {source}")]
    Internal { source: BoxError },
}

impl HandlerError {
    pub fn protocol<S: ToString>(reason: S) -> Self {
        Self::Protocol { reason: reason.to_string() }
    }

    pub fn internal<E: Into<BoxError>>(e: E) -> Self {
        Self::Internal { source: e.into() }
    }

    /// Status of the error response to send, `None` when the failure must end
    /// the connection without a response.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            HandlerError::MethodNotSupported(_) => Some(StatusCode::METHOD_NOT_ALLOWED),
            HandlerError::Protocol { .. } => Some(StatusCode::BAD_REQUEST),
            HandlerError::Internal { .. } => Some(StatusCode::INTERNAL_SERVER_ERROR),
            HandlerError::ConnectionClosed | HandlerError::Io { .. } => None,
        }
    }
}

/// Lets handlers use `?` on request body reads: the peer disappearing is a
/// benign close, a malformed body is a protocol error.
impl From<ParseError> for HandlerError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Io { source } => match source.kind() {
                ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
                    HandlerError::ConnectionClosed
                }
                _ => HandlerError::Io { source },
            },
            e => HandlerError::protocol(e),
        }
    }
}

/// A [`RequestHandler`] backed by an async closure.
#[derive(Debug, Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps an async closure as a [`RequestHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<ReqBody>, ExchangeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<ResponseBody>, HandlerError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> RequestHandler for HandlerFn<F>
where
    F: Fn(Request<ReqBody>, ExchangeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<ResponseBody>, HandlerError>> + Send,
{
    async fn handle(&self, request: Request<ReqBody>, ctx: &ExchangeContext) -> Result<Response<ResponseBody>, HandlerError> {
        (self.f)(request, ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_is_handler<T: RequestHandler>(_handler: &T) {}

    #[test]
    fn closure_is_handler() {
        let handler = handler_fn(|_request, _ctx| async { Ok(Response::new(ResponseBody::from("ok"))) });
        assert_is_handler(&handler);
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(HandlerError::MethodNotSupported(Method::POST).status_code(), Some(StatusCode::METHOD_NOT_ALLOWED));
        assert_eq!(HandlerError::protocol("bad").status_code(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(HandlerError::internal("boom").status_code(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(HandlerError::ConnectionClosed.status_code(), None);
        assert_eq!(HandlerError::from(io::Error::other("disk")).status_code(), None);
    }

    #[test]
    fn body_read_errors() {
        let aborted = ParseError::io(io::Error::from(ErrorKind::ConnectionAborted));
        assert!(matches!(HandlerError::from(aborted), HandlerError::ConnectionClosed));

        let other = ParseError::io(io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(HandlerError::from(other), HandlerError::Io { .. }));

        assert!(matches!(HandlerError::from(ParseError::invalid_body("bad chunk")), HandlerError::Protocol { .. }));
    }
}
