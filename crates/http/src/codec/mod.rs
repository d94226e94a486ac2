//! HTTP/1.x wire codec used by the reactor.
//!
//! - [`RequestDecoder`]: request heads (via `httparse`) followed by their
//!   bodies, framed by `Content-Length` or chunked transfer coding
//! - [`ResponseEncoder`]: a response head followed by body items, framed the
//!   way the connection service declared when it committed the head
//!
//! Both implement the `tokio_util::codec` traits and work on `BytesMut`
//! buffers, so they can be driven from a `Framed` stream or by hand.

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
