//! Per-connection exchange state.
//!
//! A [`ConnectionService`] is touched from two sides: the reactor, through
//! the dispatcher, and the handler worker that reports the handler's outcome.
//! Every phase check and transition happens under the one `inner` lock, so
//! whichever side claims a transition first wins and the other side sees the
//! new phase and backs off. Nothing here blocks: the lock is only held for
//! bookkeeping and non-blocking calls into the connection.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use bytes::{Buf, Bytes, BytesMut};
use http::header::TRANSFER_ENCODING;
use http::{Method, Response, StatusCode, Version};
use http_body::Body;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionId, ConnectionRef, ServerConnection};
use crate::content::{ContentDecoder, ContentEncoder};
use crate::executor::HandlerTask;
use crate::handler::{ExchangeContext, HandlerError};
use crate::protocol::body::{BodyBuffer, ReqBody};
use crate::protocol::{
    BoxError, ParseError, PayloadSize, RequestHeader, ResponseBody, ResponseHead, copy_head, status_forbids_body,
};
use crate::service::pipeline::ResponseContext;
use crate::service::{ExchangePhase, ServiceContext};

const DISCARD_CHUNK: usize = 8 * 1024;

/// The exchange state machine of one connection.
///
/// Driven by the dispatcher's reactor events and by the handler task's
/// outcome, see the module docs for how the two sides are serialized.
pub struct ConnectionService {
    id: ConnectionId,
    conn: Weak<dyn ServerConnection>,
    context: Arc<ServiceContext>,
    inner: Mutex<Inner>,
}

struct Inner {
    phase: ExchangePhase,
    /// Copy of the current request head, for the pipeline and reuse decision.
    request: Option<RequestHeader>,
    inbound: Inbound,
    outbound: Option<Outbound>,
    cancellation: Option<CancellationToken>,
}

/// What happens to request body bytes the reactor delivers.
enum Inbound {
    /// Nothing more to read for the current exchange.
    Complete,
    /// Bytes go to the handler.
    Streaming(Arc<BodyBuffer>),
    /// The handler is done with the request; bytes are read and dropped.
    Discarding,
}

struct Outbound {
    head: ResponseHead,
    body: ResponseBody,
    pending: Option<Bytes>,
    body_done: bool,
    /// False for responses the service synthesized after a failure.
    reusable: bool,
}

/// Re-arms output interest when a pending response body becomes ready.
struct OutputWaker {
    conn: Weak<dyn ServerConnection>,
}

impl Wake for OutputWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(conn) = self.conn.upgrade() {
            conn.request_output();
        }
    }
}

impl std::fmt::Debug for ConnectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionService").field("id", &self.id).field("phase", &self.phase()).finish_non_exhaustive()
    }
}

impl ConnectionService {
    /// Binds a new service to `conn`, starting in [`ExchangePhase::Idle`]. Only a
    /// weak reference to the connection is kept.
    pub fn new(conn: &ConnectionRef, context: Arc<ServiceContext>) -> Self {
        Self {
            id: conn.id(),
            conn: Arc::downgrade(conn),
            context,
            inner: Mutex::new(Inner {
                phase: ExchangePhase::Idle,
                request: None,
                inbound: Inbound::Complete,
                outbound: None,
                cancellation: None,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The current phase, a snapshot.
    pub fn phase(&self) -> ExchangePhase {
        self.inner.lock().phase
    }

    pub(crate) fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    /// Starts an exchange: binds the request body channel and hands the
    /// request to the executor. Ignored unless the connection is idle.
    pub fn request_received(self: &Arc<Self>, conn: &ConnectionRef, header: RequestHeader, payload_size: PayloadSize) {
        let mut inner = self.inner.lock();
        if inner.phase != ExchangePhase::Idle {
            warn!(conn = %self.id, phase = %inner.phase, "request received while an exchange is in flight, ignored");
            return;
        }

        let (body, next) = if payload_size.is_empty() {
            inner.inbound = Inbound::Complete;
            (ReqBody::empty(), ExchangePhase::HandlerRunning)
        } else {
            let buffer = Arc::new(BodyBuffer::new(self.context.config().body_buffer_capacity(), Arc::downgrade(conn)));
            inner.inbound = Inbound::Streaming(Arc::clone(&buffer));
            (ReqBody::new(buffer, payload_size), ExchangePhase::ReceivingRequestBody)
        };

        if next == ExchangePhase::ReceivingRequestBody
            && header.version() >= Version::HTTP_11
            && header.expects_continue()
            && let Err(e) = conn.submit_continue()
        {
            warn!(conn = %self.id, cause = %e, "failed to send 100-continue");
            self.release(conn, &mut inner);
            return;
        }

        debug!(conn = %self.id, method = %header.method(), uri = %header.uri(), "request received");
        let cancellation = CancellationToken::new();
        let ctx = ExchangeContext::new(self.id, conn.peer_addr(), cancellation.clone());
        inner.request = Some(header.clone());
        inner.cancellation = Some(cancellation);
        self.transition(&mut inner, next);
        drop(inner);

        let task = HandlerTask::new(Arc::clone(self), header.body(body), ctx);
        if let Err(e) = self.context.executor().submit(task) {
            warn!(conn = %self.id, cause = %e, "handler rejected");
            let mut inner = self.inner.lock();
            if inner.phase.is_handler_running() {
                inner.cancellation = None;
                self.stop_inbound(conn, &mut inner);
                self.commit_error(conn, &mut inner, StatusCode::SERVICE_UNAVAILABLE);
            }
        }
    }

    /// Moves request body bytes out of the reactor's buffer.
    pub fn consume_content(&self, conn: &ConnectionRef, decoder: &mut dyn ContentDecoder) {
        let mut inner = self.inner.lock();
        let result = match &inner.inbound {
            Inbound::Streaming(buffer) => buffer.consume(decoder),
            Inbound::Discarding => discard(decoder),
            Inbound::Complete => {
                trace!(conn = %self.id, "no request body expected, input ignored");
                return;
            }
        };

        match result {
            Ok(read) => trace!(conn = %self.id, read, "consumed request body bytes"),
            Err(e) => {
                warn!(conn = %self.id, cause = %e, "failed to read request body");
                self.release(conn, &mut inner);
                return;
            }
        }

        if decoder.is_completed() {
            trace!(conn = %self.id, "request body complete");
            inner.inbound = Inbound::Complete;
            if inner.phase == ExchangePhase::ReceivingRequestBody {
                self.transition(&mut inner, ExchangePhase::HandlerRunning);
            }
        }
    }

    /// Pushes response body bytes into the reactor's buffer until it is full,
    /// the body is pending, or the body ends.
    pub fn produce_content(&self, conn: &ConnectionRef, encoder: &mut dyn ContentEncoder) {
        let mut inner = self.inner.lock();
        if inner.phase != ExchangePhase::ProducingResponseBody {
            trace!(conn = %self.id, phase = %inner.phase, "output ready outside response production, ignored");
            return;
        }

        let result = match inner.outbound.as_mut() {
            Some(outbound) => write_body(conn, outbound, encoder),
            None => return,
        };

        match result {
            Ok(true) => self.finish_exchange(conn, &mut inner),
            Ok(false) => {}
            Err(e) => {
                warn!(conn = %self.id, cause = %e, "failed to produce response body");
                self.release(conn, &mut inner);
            }
        }
    }

    /// Reports the handler's outcome. Discarded unless the exchange is still
    /// waiting for it.
    pub fn handler_completed(&self, outcome: Result<Response<ResponseBody>, HandlerError>) {
        let Some(conn) = self.conn.upgrade() else {
            debug!(conn = %self.id, "connection gone, handler result discarded");
            return;
        };

        let mut inner = self.inner.lock();
        if !inner.phase.is_handler_running() {
            debug!(conn = %self.id, phase = %inner.phase, "late handler result discarded");
            return;
        }
        inner.cancellation = None;

        match outcome {
            Ok(response) => {
                self.stop_inbound(&conn, &mut inner);
                self.commit(&conn, &mut inner, response, true);
            }
            Err(e) => match e.status_code() {
                Some(status) => {
                    warn!(conn = %self.id, cause = %e, %status, "handler failed");
                    self.stop_inbound(&conn, &mut inner);
                    self.commit_error(&conn, &mut inner, status);
                }
                None if matches!(e, HandlerError::ConnectionClosed) => {
                    debug!(conn = %self.id, "connection closed while handling request");
                    self.release(&conn, &mut inner);
                }
                None => {
                    warn!(conn = %self.id, cause = %e, "handler io failure");
                    self.release(&conn, &mut inner);
                }
            },
        }
    }

    /// The peer sent something unparsable. Answered with an error response
    /// unless a response is already on the wire.
    pub fn protocol_error(&self, conn: &ConnectionRef, error: ParseError) {
        let mut inner = self.inner.lock();
        match inner.phase {
            ExchangePhase::Closed => {}
            ExchangePhase::ProducingResponseBody => {
                warn!(conn = %self.id, cause = %error, "protocol error while producing response, shutdown");
                self.release(conn, &mut inner);
            }
            _ => {
                let status = match error {
                    ParseError::InvalidVersion(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
                    _ => self.context.config().error_status(),
                };
                warn!(conn = %self.id, cause = %error, %status, "protocol error");
                if let Some(cancellation) = inner.cancellation.take() {
                    cancellation.cancel();
                }
                abort_inbound(&mut inner);
                self.commit_error(conn, &mut inner, status);
            }
        }
    }

    /// Transport failure or timeout: no response, immediate shutdown.
    pub fn transport_error(&self, conn: &ConnectionRef, error: io::Error) {
        let mut inner = self.inner.lock();
        if inner.phase.is_closed() {
            return;
        }

        match error.kind() {
            io::ErrorKind::TimedOut => info!(conn = %self.id, phase = %inner.phase, "connection timed out"),
            _ => warn!(conn = %self.id, phase = %inner.phase, cause = %error, "transport error"),
        }
        self.release(conn, &mut inner);
    }

    /// The reactor closed the connection. Releases everything, no I/O.
    pub fn closed(&self) {
        let mut inner = self.inner.lock();
        if let Some(cancellation) = inner.cancellation.take() {
            cancellation.cancel();
        }
        abort_inbound(&mut inner);
        inner.outbound = None;
        inner.request = None;
        if !inner.phase.is_closed() {
            self.transition(&mut inner, ExchangePhase::Closed);
        }
    }

    fn transition(&self, inner: &mut Inner, next: ExchangePhase) -> bool {
        if !inner.phase.can_transition_to(next) {
            warn!(conn = %self.id, from = %inner.phase, to = %next, "invalid phase transition refused");
            return false;
        }
        trace!(conn = %self.id, from = %inner.phase, to = %next, "phase transition");
        inner.phase = next;
        true
    }

    /// Decorates the response, commits its head and arms output.
    fn commit(&self, conn: &ConnectionRef, inner: &mut Inner, response: Response<ResponseBody>, reusable: bool) {
        let (parts, body) = response.into_parts();
        let mut head = Response::from_parts(parts, ());
        *head.version_mut() = Version::HTTP_11;

        let payload_size = PayloadSize::from(body.size_hint());
        self.context.pipeline().process(&mut ResponseContext { request: inner.request.as_ref(), head: &mut head, payload_size });

        let head_only =
            inner.request.as_ref().is_some_and(|request| request.method() == Method::HEAD) || status_forbids_body(head.status());
        let (framing, body) = if head_only {
            (PayloadSize::Empty, ResponseBody::empty())
        } else if payload_size.is_chunked() && !head.headers().contains_key(TRANSFER_ENCODING) {
            // the pipeline declined chunked coding for this peer
            (PayloadSize::UntilClose, body)
        } else {
            (payload_size, body)
        };

        if !self.transition(inner, ExchangePhase::ProducingResponseBody) {
            return;
        }

        let snapshot = copy_head(&head);
        debug!(conn = %self.id, status = %head.status(), ?framing, "commit response");
        if let Err(e) = conn.submit_response(head, framing) {
            warn!(conn = %self.id, cause = %e, "failed to submit response");
            self.release(conn, inner);
            return;
        }

        inner.outbound = Some(Outbound { head: snapshot, body, pending: None, body_done: false, reusable });
        conn.request_output();
    }

    fn commit_error(&self, conn: &ConnectionRef, inner: &mut Inner, status: StatusCode) {
        let response = self.context.error_response(status);
        self.commit(conn, inner, response, false);
    }

    /// Once the body is produced: keep-alive back to `Idle`, or close.
    fn finish_exchange(&self, conn: &ConnectionRef, inner: &mut Inner) {
        let outbound = inner.outbound.take();
        let request = inner.request.take();
        let body_consumed = matches!(inner.inbound, Inbound::Complete);

        let keep_alive = outbound.is_some_and(|outbound| {
            outbound.reusable && body_consumed && self.context.reuse_strategy().keep_alive(request.as_ref(), &outbound.head)
        });

        if keep_alive && conn.is_open() {
            debug!(conn = %self.id, "exchange complete, keep alive");
            self.transition(inner, ExchangePhase::Idle);
            conn.request_input();
        } else {
            debug!(conn = %self.id, body_consumed, "exchange complete, close connection");
            abort_inbound(inner);
            self.transition(inner, ExchangePhase::Closed);
            conn.close();
        }
    }

    /// The handler is done with the request body. Whatever still arrives is
    /// read and dropped so the peer can finish sending.
    fn stop_inbound(&self, conn: &ConnectionRef, inner: &mut Inner) {
        if let Inbound::Streaming(buffer) = &inner.inbound {
            if buffer.is_eof() {
                inner.inbound = Inbound::Complete;
                return;
            }
            trace!(conn = %self.id, "request body not fully read, discard the rest");
            if buffer.abort() {
                conn.request_input();
            }
            inner.inbound = Inbound::Discarding;
        }
    }

    /// Ends the exchange without a response and shuts the connection down.
    fn release(&self, conn: &ConnectionRef, inner: &mut Inner) {
        if let Some(cancellation) = inner.cancellation.take() {
            cancellation.cancel();
        }
        abort_inbound(inner);
        inner.outbound = None;
        inner.request = None;
        if !inner.phase.is_closed() {
            self.transition(inner, ExchangePhase::Closed);
        }
        conn.shutdown();
    }
}

fn abort_inbound(inner: &mut Inner) {
    if let Inbound::Streaming(buffer) = &inner.inbound {
        buffer.abort();
    }
    inner.inbound = Inbound::Complete;
}

fn discard(decoder: &mut dyn ContentDecoder) -> io::Result<usize> {
    let mut scratch = BytesMut::with_capacity(DISCARD_CHUNK);
    let mut total = 0;
    loop {
        scratch.clear();
        let read = decoder.read(&mut scratch, DISCARD_CHUNK)?;
        if read == 0 {
            return Ok(total);
        }
        total += read;
    }
}

/// Returns `Ok(true)` once the whole body went into the encoder.
fn write_body(conn: &ConnectionRef, outbound: &mut Outbound, encoder: &mut dyn ContentEncoder) -> Result<bool, BoxError> {
    let waker = Waker::from(Arc::new(OutputWaker { conn: Arc::downgrade(conn) }));
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Some(mut pending) = outbound.pending.take() {
            let written = encoder.write(&pending)?;
            if written < pending.len() {
                pending.advance(written);
                outbound.pending = Some(pending);
                conn.request_output();
                return Ok(false);
            }
        }

        if outbound.body_done {
            break;
        }

        match Pin::new(&mut outbound.body).poll_frame(&mut cx) {
            Poll::Ready(Some(Ok(frame))) => {
                // trailers are not sent
                if let Ok(data) = frame.into_data()
                    && !data.is_empty()
                {
                    outbound.pending = Some(data);
                }
            }
            Poll::Ready(Some(Err(e))) => return Err(e),
            Poll::Ready(None) => outbound.body_done = true,
            Poll::Pending => return Ok(false),
        }
    }

    encoder.complete()?;
    Ok(true)
}
