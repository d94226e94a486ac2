use std::fmt;
use std::io;
use std::io::ErrorKind;
use std::sync::Weak;
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::trace;

use crate::connection::ServerConnection;
use crate::content::ContentDecoder;
use crate::protocol::ParseError;

/// Bounded buffer between the reactor's content decoder and a [`ReqBody`](super::ReqBody).
pub(crate) struct BodyBuffer {
    state: Mutex<BufferState>,
    capacity: usize,
    conn: Weak<dyn ServerConnection>,
}

#[derive(Default)]
struct BufferState {
    buf: BytesMut,
    eof: bool,
    aborted: bool,
    input_suspended: bool,
    waker: Option<Waker>,
}

impl fmt::Debug for BodyBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BodyBuffer")
            .field("buffered", &state.buf.len())
            .field("capacity", &self.capacity)
            .field("eof", &state.eof)
            .field("aborted", &state.aborted)
            .finish()
    }
}

impl BodyBuffer {
    pub(crate) fn new(capacity: usize, conn: Weak<dyn ServerConnection>) -> Self {
        Self { state: Mutex::new(BufferState::default()), capacity: capacity.max(1), conn }
    }

    /// Moves what the decoder has into the buffer, suspending input when full.
    pub(crate) fn consume(&self, decoder: &mut dyn ContentDecoder) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.aborted {
            return Ok(0);
        }

        let space = self.capacity.saturating_sub(state.buf.len());
        let read = if space > 0 { decoder.read(&mut state.buf, space)? } else { 0 };
        if decoder.is_completed() {
            state.eof = true;
        }

        if !state.eof && state.buf.len() >= self.capacity && !state.input_suspended {
            trace!(buffered = state.buf.len(), "request body buffer full, suspend input");
            state.input_suspended = true;
            if let Some(conn) = self.conn.upgrade() {
                conn.suspend_input();
            }
        }

        if (read > 0 || state.eof)
            && let Some(waker) = state.waker.take()
        {
            waker.wake();
        }
        Ok(read)
    }

    /// Stops buffering: pending bytes are dropped and a waiting reader fails.
    ///
    /// Returns true when input had been suspended by this buffer, so the
    /// caller knows it has to re-arm input itself.
    pub(crate) fn abort(&self) -> bool {
        let mut state = self.state.lock();
        state.aborted = true;
        state.buf.clear();
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
        std::mem::take(&mut state.input_suspended)
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.state.lock().eof
    }

    pub(crate) fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.eof && state.buf.is_empty()
    }

    pub(crate) fn poll_data(&self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, ParseError>>> {
        let mut state = self.state.lock();

        if !state.buf.is_empty() {
            let bytes = state.buf.split().freeze();
            if state.input_suspended {
                state.input_suspended = false;
                if let Some(conn) = self.conn.upgrade() {
                    conn.request_input();
                }
            }
            return Poll::Ready(Some(Ok(bytes)));
        }

        if state.eof {
            return Poll::Ready(None);
        }

        if state.aborted {
            let error = io::Error::new(ErrorKind::ConnectionAborted, "connection closed while reading request body");
            return Poll::Ready(Some(Err(ParseError::io(error))));
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
