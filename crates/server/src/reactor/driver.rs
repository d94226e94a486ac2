//! One task per accepted socket. The driver decodes requests, fires the
//! service events for its connection one at a time, and applies the commands
//! the service sends back.

use std::io;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use nio_http::codec::{RequestDecoder, ResponseEncoder};
use nio_http::connection::{ConnectionRef, ServerEventHandler};
use nio_http::content::ContentDecoder;
use nio_http::protocol::{Message, ParseError, PayloadItem, PayloadSize, ResponseHead, ServiceError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, sleep_until};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use super::channel::{BufferedContentDecoder, BufferedContentEncoder};
use super::connection::{Command, TcpServerConnection};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

#[derive(Debug, Clone, Copy)]
pub(crate) struct DriverSettings {
    pub(crate) so_timeout: Duration,
    pub(crate) buffer_size: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

enum Event {
    Command(Command),
    Read(io::Result<usize>),
    Written(io::Result<usize>),
    Timeout,
}

#[derive(Debug, Default)]
struct InputState {
    /// The service is ready for the next request head.
    head_wanted: bool,
    /// A request body is being delivered through `on_input_ready`.
    body_active: bool,
    /// New body bytes, or the end of the body, still have to be delivered.
    dirty: bool,
    suspended: bool,
    /// Parsing failed or the peer went away, nothing more is read.
    stopped: bool,
    peer_closed: bool,
}

pub(crate) struct ConnectionDriver {
    conn: Arc<TcpServerConnection>,
    conn_ref: ConnectionRef,
    handler: Arc<dyn ServerEventHandler>,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    commands: UnboundedReceiver<Command>,
    settings: DriverSettings,

    decoder: RequestDecoder,
    encoder: ResponseEncoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    content: BufferedContentDecoder,

    input: InputState,
    output_requested: bool,
    closing: bool,
}

impl std::fmt::Debug for ConnectionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDriver")
            .field("conn", &self.conn)
            .field("input", &self.input)
            .field("output_requested", &self.output_requested)
            .field("closing", &self.closing)
            .finish_non_exhaustive()
    }
}

impl ConnectionDriver {
    pub(crate) fn new(
        stream: TcpStream,
        conn: Arc<TcpServerConnection>,
        commands: UnboundedReceiver<Command>,
        handler: Arc<dyn ServerEventHandler>,
        settings: DriverSettings,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let conn_ref: ConnectionRef = Arc::<TcpServerConnection>::clone(&conn);
        Self {
            conn,
            conn_ref,
            handler,
            reader,
            writer,
            commands,
            settings,
            decoder: RequestDecoder::new(),
            encoder: ResponseEncoder::new(),
            read_buf: BytesMut::with_capacity(settings.buffer_size),
            write_buf: BytesMut::with_capacity(settings.buffer_size),
            content: BufferedContentDecoder::default(),
            input: InputState { head_wanted: true, ..Default::default() },
            output_requested: false,
            closing: false,
        }
    }

    pub(crate) async fn run(mut self) {
        self.handler.on_connected(&self.conn_ref);
        self.drive().await;
        self.conn.mark_closed();
        self.handler.on_closed(&self.conn_ref);
    }

    async fn drive(&mut self) {
        let mut deadline = Instant::now() + self.settings.so_timeout;
        let mut was_armed = false;

        loop {
            while let Ok(command) = self.commands.try_recv() {
                if self.apply(command) == Flow::Exit {
                    return;
                }
            }

            if self.process_input() {
                continue;
            }
            self.process_output();

            if self.input.peer_closed && self.input.head_wanted && self.write_buf.is_empty() {
                debug!(conn = %self.conn_ref.id(), "peer closed, no exchange left");
                return;
            }

            if self.closing && self.write_buf.is_empty() {
                if let Err(e) = self.writer.shutdown().await {
                    trace!(conn = %self.conn_ref.id(), cause = %e, "shutdown write half failed");
                }
                return;
            }

            // the socket timeout covers waiting on the peer in either direction,
            // not the time a handler takes
            let awaiting = self.wants_read();
            let writing = !self.write_buf.is_empty();
            let armed = awaiting || writing;
            if armed && !was_armed {
                deadline = Instant::now() + self.settings.so_timeout;
            }
            was_armed = armed;

            if self.read_buf.capacity() - self.read_buf.len() < self.settings.buffer_size {
                self.read_buf.reserve(self.settings.buffer_size);
            }

            let event = tokio::select! {
                biased;
                Some(command) = self.commands.recv() => Event::Command(command),
                result = self.writer.write_buf(&mut self.write_buf), if writing => Event::Written(result),
                result = self.reader.read_buf(&mut self.read_buf), if awaiting => Event::Read(result),
                _ = sleep_until(deadline), if armed => Event::Timeout,
                else => return,
            };

            let flow = match event {
                Event::Command(command) => self.apply(command),
                Event::Read(result) => {
                    deadline = Instant::now() + self.settings.so_timeout;
                    self.on_read(result)
                }
                Event::Written(result) => {
                    if matches!(result, Ok(n) if n > 0) {
                        deadline = Instant::now() + self.settings.so_timeout;
                    }
                    self.on_written(result)
                }
                Event::Timeout => {
                    debug!(conn = %self.conn_ref.id(), awaiting, writing, "no socket activity within socket timeout");
                    deadline = Instant::now() + self.settings.so_timeout;
                    self.handler.on_timeout(&self.conn_ref);
                    Flow::Continue
                }
            };
            if flow == Flow::Exit {
                return;
            }
        }
    }

    fn apply(&mut self, command: Command) -> Flow {
        trace!(conn = %self.conn_ref.id(), ?command, "apply command");
        match command {
            Command::Response(head, framing) => return self.encode_head(head, framing),
            Command::Continue => self.write_buf.extend_from_slice(CONTINUE),
            Command::RequestInput => {
                self.input.suspended = false;
                if self.input.body_active {
                    self.input.dirty = self.content.pending() > 0 || self.content.is_eof();
                } else {
                    self.input.head_wanted = true;
                }
            }
            Command::SuspendInput => self.input.suspended = true,
            Command::RequestOutput => self.output_requested = true,
            Command::Close => self.closing = true,
            Command::Shutdown => return Flow::Exit,
        }
        Flow::Continue
    }

    fn encode_head(&mut self, head: ResponseHead, framing: PayloadSize) -> Flow {
        match self.encoder.encode(Message::<_, bytes::Bytes>::Header((head, framing)), &mut self.write_buf) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(conn = %self.conn_ref.id(), cause = %e, "failed to encode response head");
                self.handler.on_exception(&self.conn_ref, ServiceError::transport(io::Error::other(e)));
                Flow::Exit
            }
        }
    }

    /// Decodes what is buffered and fires at most one input event. Returns
    /// true when something happened, so the caller runs again before waiting.
    fn process_input(&mut self) -> bool {
        if self.closing || self.input.stopped || self.input.suspended {
            return false;
        }

        if self.input.body_active {
            let mut progressed = false;
            while self.content.pending() < self.settings.buffer_size && !self.content.is_eof() {
                match self.decoder.decode(&mut self.read_buf) {
                    Ok(Some(Message::Payload(PayloadItem::Chunk(chunk)))) => self.content.push(chunk),
                    Ok(Some(Message::Payload(PayloadItem::Eof))) => self.content.finish(),
                    Ok(Some(Message::Header(_))) => {
                        self.input_failed(ParseError::invalid_body("request head inside a body"));
                        return true;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        self.input_failed(e);
                        return true;
                    }
                }
                self.input.dirty = true;
            }

            if self.input.dirty {
                self.input.dirty = false;
                self.handler.on_input_ready(&self.conn_ref, &mut self.content);
                progressed = true;
            }
            if self.content.is_completed() {
                trace!(conn = %self.conn_ref.id(), "request body delivered");
                self.input.body_active = false;
                self.content.reset();
            }
            return progressed;
        }

        if !self.input.head_wanted {
            return false;
        }

        match self.decoder.decode(&mut self.read_buf) {
            Ok(Some(Message::Header((header, payload_size)))) => {
                self.input.head_wanted = false;
                self.input.body_active = !payload_size.is_empty();
                self.handler.on_request_received(&self.conn_ref, header, payload_size);
                true
            }
            Ok(Some(Message::Payload(_))) => {
                self.input_failed(ParseError::invalid_body("body without a request head"));
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.input_failed(e);
                true
            }
        }
    }

    fn process_output(&mut self) {
        if !self.output_requested || self.closing || self.write_buf.len() >= self.settings.buffer_size {
            return;
        }
        self.output_requested = false;
        let mut channel = BufferedContentEncoder::new(&mut self.encoder, &mut self.write_buf, self.settings.buffer_size);
        self.handler.on_output_ready(&self.conn_ref, &mut channel);
    }

    fn wants_read(&self) -> bool {
        if self.closing || self.input.stopped || self.input.suspended {
            return false;
        }
        if self.input.body_active {
            self.content.pending() < self.settings.buffer_size && !self.content.is_eof()
        } else {
            self.input.head_wanted
        }
    }

    fn on_read(&mut self, result: io::Result<usize>) -> Flow {
        match result {
            Ok(0) => self.on_peer_eof(),
            Ok(n) => {
                trace!(conn = %self.conn_ref.id(), read = n, "read from peer");
                Flow::Continue
            }
            Err(e) => {
                debug!(conn = %self.conn_ref.id(), cause = %e, "read failed");
                self.handler.on_exception(&self.conn_ref, ServiceError::transport(e));
                Flow::Exit
            }
        }
    }

    fn on_peer_eof(&mut self) -> Flow {
        self.input.stopped = true;
        self.input.peer_closed = true;
        if self.input.body_active || !self.read_buf.is_empty() {
            debug!(conn = %self.conn_ref.id(), "peer closed in the middle of a request");
            let error = io::Error::new(ErrorKind::UnexpectedEof, "peer closed in the middle of a request");
            self.handler.on_exception(&self.conn_ref, ServiceError::transport(error));
            return Flow::Continue;
        }
        if self.input.head_wanted {
            debug!(conn = %self.conn_ref.id(), "peer closed the connection");
            return Flow::Exit;
        }
        // half close while an exchange is in flight, the response is still sent
        Flow::Continue
    }

    fn on_written(&mut self, result: io::Result<usize>) -> Flow {
        let error = match result {
            Ok(0) => io::Error::from(ErrorKind::WriteZero),
            Ok(n) => {
                trace!(conn = %self.conn_ref.id(), written = n, "wrote to peer");
                return Flow::Continue;
            }
            Err(e) => e,
        };
        debug!(conn = %self.conn_ref.id(), cause = %error, "write failed");
        self.handler.on_exception(&self.conn_ref, ServiceError::transport(error));
        Flow::Exit
    }

    fn input_failed(&mut self, error: ParseError) {
        debug!(conn = %self.conn_ref.id(), cause = %error, "can't decode request");
        self.input.stopped = true;
        self.handler.on_exception(&self.conn_ref, ServiceError::from(error));
    }
}
