//! Handler-facing request body.
//!
//! The reactor pushes request body bytes into a [`BodyBuffer`] from its
//! input-ready callback; the handler pulls them out through [`ReqBody`], which
//! implements `http_body::Body`. The buffer is bounded: when it fills up the
//! connection's input is suspended, and the handler draining it re-arms input.
//! Suspension and resumption are issued while holding the buffer lock, so the
//! reactor always observes them in the order they were decided.

mod body_buffer;

pub(crate) use body_buffer::BodyBuffer;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};

use crate::protocol::{ParseError, PayloadSize};

/// Streaming request body handed to request handlers.
#[derive(Debug)]
pub struct ReqBody {
    inner: Option<Arc<BodyBuffer>>,
    payload_size: PayloadSize,
}

impl ReqBody {
    /// A body without any bytes, used for requests that carry no payload.
    pub fn empty() -> Self {
        Self { inner: None, payload_size: PayloadSize::Empty }
    }

    pub(crate) fn new(buffer: Arc<BodyBuffer>, payload_size: PayloadSize) -> Self {
        Self { inner: Some(buffer), payload_size }
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match &self.get_mut().inner {
            None => Poll::Ready(None),
            Some(buffer) => buffer.poll_data(cx).map(|option| option.map(|result| result.map(Frame::data))),
        }
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            None => true,
            Some(buffer) => buffer.is_drained(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}
