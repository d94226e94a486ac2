use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use nio_http::connection::{ConnectionId, ServerConnection};
use nio_http::protocol::{PayloadSize, ResponseHead, SendError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

/// What the service layer asked the connection driver to do.
#[derive(Debug)]
pub(crate) enum Command {
    Response(ResponseHead, PayloadSize),
    Continue,
    RequestInput,
    SuspendInput,
    RequestOutput,
    Close,
    Shutdown,
}

/// The service-facing half of an accepted socket. Calls are turned into
/// [`Command`]s and applied by the connection's driver task, in call order.
#[derive(Debug)]
pub(crate) struct TcpServerConnection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    commands: UnboundedSender<Command>,
    open: AtomicBool,
}

impl TcpServerConnection {
    pub(crate) fn new(id: ConnectionId, peer_addr: Option<SocketAddr>, commands: UnboundedSender<Command>) -> Self {
        Self { id, peer_addr, commands, open: AtomicBool::new(true) }
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn send(&self, command: Command) -> bool {
        if !self.is_open() {
            trace!(conn = %self.id, ?command, "command on closed connection dropped");
            return false;
        }
        self.commands.send(command).is_ok()
    }
}

impl ServerConnection for TcpServerConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn submit_response(&self, head: ResponseHead, framing: PayloadSize) -> Result<(), SendError> {
        if self.send(Command::Response(head, framing)) { Ok(()) } else { Err(SendError::ConnectionClosed) }
    }

    fn submit_continue(&self) -> Result<(), SendError> {
        if self.send(Command::Continue) { Ok(()) } else { Err(SendError::ConnectionClosed) }
    }

    fn request_input(&self) {
        self.send(Command::RequestInput);
    }

    fn suspend_input(&self) {
        self.send(Command::SuspendInput);
    }

    fn request_output(&self) {
        self.send(Command::RequestOutput);
    }

    fn close(&self) {
        if self.send(Command::Close) {
            self.mark_closed();
        }
    }

    fn shutdown(&self) {
        if self.send(Command::Shutdown) {
            self.mark_closed();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Response;
    use tokio::sync::mpsc;

    #[test]
    fn nothing_is_sent_after_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = TcpServerConnection::new(ConnectionId::new(1), None, tx);

        conn.request_output();
        conn.close();
        assert!(!conn.is_open());
        conn.submit_response(Response::new(()), PayloadSize::Empty).unwrap_err();
        conn.shutdown();

        assert!(matches!(rx.try_recv(), Ok(Command::RequestOutput)));
        assert!(matches!(rx.try_recv(), Ok(Command::Close)));
        rx.try_recv().unwrap_err();
    }
}
