//! An event driven HTTP/1.1 connection service layer.
//!
//! A non-blocking reactor owns the sockets and reports what happens on each
//! connection (connected, request received, input ready, output ready,
//! timeout, exception, closed). This crate turns those events into complete
//! request/response exchanges without ever blocking the reactor:
//!
//! - [`dispatcher::ServiceDispatcher`] receives the events and routes them to
//!   the connection's [`service::ConnectionService`]
//! - [`service::ConnectionService`] runs the exchange state machine: it
//!   streams the request body to the handler, commits the response head
//!   through the [`service::ResponsePipeline`], streams the response body out
//!   and decides whether the connection is reused
//! - [`executor::HandlerExecutor`] runs request handlers on a separate worker
//!   runtime with a bound on in-flight handlers
//! - [`handler::HandlerRegistry`] resolves the request path to a
//!   [`handler::RequestHandler`], falling back to `404 Not Found`
//!
//! The reactor side of the contract is [`connection::ServerConnection`] and
//! [`connection::ServerEventHandler`], with [`content::ContentDecoder`] and
//! [`content::ContentEncoder`] carrying body bytes. [`codec`] holds the
//! HTTP/1.x wire codec a reactor can use to implement it.
//!
//! # Exchange phases
//!
//! ```text
//! Idle ──request──▶ ReceivingRequestBody ──body done──▶ HandlerRunning
//!   │                      │                                  │
//!   │ protocol error       └──────── response committed ──────┤
//!   ▼                                                         ▼
//! ProducingResponseBody ◀─────────────────────────────────────┘
//!   │
//!   ├── keep-alive ──▶ Idle
//!   └── otherwise ───▶ Closed
//! ```
//!
//! A request without a body goes from `Idle` straight to `HandlerRunning`.
//! Any phase may end in `Closed`, which is terminal.

pub mod codec;
pub mod connection;
pub mod content;
pub mod dispatcher;
pub mod executor;
pub mod handler;
pub mod protocol;
pub mod service;

mod utils;
pub(crate) use utils::ensure;

#[cfg(test)]
mod test_support;
