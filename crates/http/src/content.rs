//! Content channels: incremental, non-blocking body transfer between the
//! reactor's buffers and the connection service.
//!
//! A [`ContentDecoder`] hands out the request body bytes the reactor already
//! has, an [`ContentEncoder`] accepts response body bytes as long as the
//! reactor's write buffer has room. Both are only borrowed for the duration of
//! one readiness callback.

use std::io;

use bytes::BytesMut;

/// Inbound body transfer.
pub trait ContentDecoder {
    /// Moves at most `limit` available body bytes into `dst`.
    ///
    /// Returns the number of bytes moved, `0` when nothing is available right
    /// now or the body is complete.
    fn read(&mut self, dst: &mut BytesMut, limit: usize) -> io::Result<usize>;

    /// True once the whole body has been handed out.
    fn is_completed(&self) -> bool;
}

/// Outbound body transfer.
pub trait ContentEncoder {
    /// Accepts a prefix of `src`, returning how many bytes were taken. A short
    /// count means the channel is full for now.
    fn write(&mut self, src: &[u8]) -> io::Result<usize>;

    /// Marks the end of the body.
    fn complete(&mut self) -> io::Result<()>;

    fn is_completed(&self) -> bool;
}
