//! A small tokio reactor that drives the [`ServerEventHandler`] contract over
//! TCP.
//!
//! Every accepted socket gets its own driver task, so the events of one
//! connection are serialized by construction. The service talks back through
//! a [`TcpServerConnection`], whose calls are queued as commands for the
//! driver and never block.

mod channel;
mod connection;
mod driver;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nio_http::connection::{ConnectionId, ServerEventHandler};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use connection::TcpServerConnection;
use driver::{ConnectionDriver, DriverSettings};

/// Socket settings applied to every accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct ReactorSettings {
    /// Time without progress allowed while waiting on the peer.
    pub so_timeout: Duration,
    /// Read chunk size and write buffer high-water mark.
    pub buffer_size: usize,
    pub tcp_nodelay: bool,
}

/// Accepts connections and drives each one on its own task.
pub struct Reactor {
    listener: TcpListener,
    handler: Arc<dyn ServerEventHandler>,
    settings: ReactorSettings,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor").field("listener", &self.listener).field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl Reactor {
    pub fn new(listener: TcpListener, handler: Arc<dyn ServerEventHandler>, settings: ReactorSettings) -> Self {
        Self { listener, handler, settings, next_id: AtomicU64::new(1) }
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let driver_settings = DriverSettings { so_timeout: self.settings.so_timeout, buffer_size: self.settings.buffer_size };

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("reactor stopped accepting connections");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(self.settings.tcp_nodelay) {
                warn!(cause = %e, "failed to set TCP_NODELAY");
            }

            let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = Arc::new(TcpServerConnection::new(id, Some(peer_addr), tx));
            let driver = ConnectionDriver::new(stream, conn, rx, Arc::clone(&self.handler), driver_settings);
            tokio::spawn(driver.run());
        }
    }
}
