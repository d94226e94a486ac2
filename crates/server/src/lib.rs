//! A runnable HTTP server on top of `nio-http`: a tokio [`reactor`] that
//! drives the connection service events over TCP, a document root
//! [`file_handler`], and TOML [`config`].
//!
//! ```no_run
//! use nio_http::handler::HandlerRegistry;
//! use nio_server::{HttpFileHandler, Server, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HandlerRegistry::builder().register("*", HttpFileHandler::new("/var/www")).build()?;
//! let server = Server::bind(&ServerConfig::default(), registry, tokio::runtime::Handle::current()).await?;
//! server.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod file_handler;
pub mod reactor;

pub use config::{ConfigError, ServerConfig};
pub use file_handler::HttpFileHandler;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use nio_http::dispatcher::ServiceDispatcher;
use nio_http::handler::HandlerRegistry;
use nio_http::service::ServiceContext;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use reactor::{Reactor, ReactorSettings};

/// Errors starting a [`Server`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("can't listen on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
}

/// A bound listener plus the service layer behind it.
#[derive(Debug)]
pub struct Server {
    reactor: Reactor,
    dispatcher: Arc<ServiceDispatcher>,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the listening socket. Handlers will run on `worker_runtime`,
    /// connections are driven on the runtime that calls [`run`](Self::run).
    pub async fn bind(config: &ServerConfig, registry: HandlerRegistry, worker_runtime: Handle) -> Result<Self, ServerError> {
        config.validate()?;
        let context = ServiceContext::new(registry, config.service_config()?, worker_runtime);
        let dispatcher = Arc::new(ServiceDispatcher::new(context));

        let listener =
            TcpListener::bind(config.listen).await.map_err(|source| ServerError::Bind { addr: config.listen, source })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind { addr: config.listen, source })?;

        let settings = ReactorSettings {
            so_timeout: config.so_timeout(),
            buffer_size: config.socket_buffer_size,
            tcp_nodelay: config.tcp_nodelay,
        };
        let reactor = Reactor::new(listener, Arc::<ServiceDispatcher>::clone(&dispatcher), settings);
        Ok(Self { reactor, dispatcher, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The dispatcher holding the live connections.
    pub fn dispatcher(&self) -> &Arc<ServiceDispatcher> {
        &self.dispatcher
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(addr = %self.local_addr, "start listening");
        self.reactor.run(shutdown).await;
    }
}
