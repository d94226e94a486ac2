//! Fakes of the reactor side for state machine tests.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::connection::{ConnectionId, ServerConnection};
use crate::content::{ContentDecoder, ContentEncoder};
use crate::protocol::{PayloadSize, ResponseHead, SendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnEvent {
    SubmitResponse,
    SubmitContinue,
    RequestInput,
    SuspendInput,
    RequestOutput,
    Close,
    Shutdown,
}

/// Records every call the service layer makes.
pub(crate) struct RecordingConnection {
    id: ConnectionId,
    open: AtomicBool,
    events: Mutex<Vec<ConnEvent>>,
    responses: Mutex<Vec<(ResponseHead, PayloadSize)>>,
}

impl RecordingConnection {
    pub(crate) fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(id),
            open: AtomicBool::new(true),
            events: Mutex::new(vec![]),
            responses: Mutex::new(vec![]),
        })
    }

    pub(crate) fn events(&self) -> Vec<ConnEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn count(&self, event: ConnEvent) -> usize {
        self.events.lock().iter().filter(|e| **e == event).count()
    }

    pub(crate) fn responses(&self) -> Vec<(ResponseHead, PayloadSize)> {
        self.responses.lock().iter().map(|(head, framing)| (crate::protocol::copy_head(head), *framing)).collect()
    }

    fn record(&self, event: ConnEvent) {
        self.events.lock().push(event);
    }
}

impl ServerConnection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn submit_response(&self, head: ResponseHead, framing: PayloadSize) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::ConnectionClosed);
        }
        self.record(ConnEvent::SubmitResponse);
        self.responses.lock().push((head, framing));
        Ok(())
    }

    fn submit_continue(&self) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::ConnectionClosed);
        }
        self.record(ConnEvent::SubmitContinue);
        Ok(())
    }

    fn request_input(&self) {
        self.record(ConnEvent::RequestInput);
    }

    fn suspend_input(&self) {
        self.record(ConnEvent::SuspendInput);
    }

    fn request_output(&self) {
        self.record(ConnEvent::RequestOutput);
    }

    fn close(&self) {
        self.record(ConnEvent::Close);
        self.open.store(false, Ordering::Release);
    }

    fn shutdown(&self) {
        self.record(ConnEvent::Shutdown);
        self.open.store(false, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Hands out a fixed byte string.
pub(crate) struct SliceDecoder {
    data: Bytes,
    complete_at_end: bool,
}

impl SliceDecoder {
    pub(crate) fn new(data: &'static [u8], complete_at_end: bool) -> Self {
        Self { data: Bytes::from_static(data), complete_at_end }
    }
}

impl ContentDecoder for SliceDecoder {
    fn read(&mut self, dst: &mut BytesMut, limit: usize) -> io::Result<usize> {
        let n = limit.min(self.data.len());
        dst.extend_from_slice(&self.data.split_to(n));
        Ok(n)
    }

    fn is_completed(&self) -> bool {
        self.complete_at_end && self.data.is_empty()
    }
}

/// Collects written bytes, accepting at most `room` bytes per callback.
pub(crate) struct VecEncoder {
    pub(crate) written: Vec<u8>,
    pub(crate) room: usize,
    pub(crate) completed: bool,
}

impl VecEncoder {
    pub(crate) fn new(room: usize) -> Self {
        Self { written: vec![], room, completed: false }
    }
}

impl ContentEncoder for VecEncoder {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        let n = self.room.min(src.len());
        self.written.extend_from_slice(&src[..n]);
        self.room -= n;
        Ok(n)
    }

    fn complete(&mut self) -> io::Result<()> {
        self.completed = true;
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.completed
    }
}
