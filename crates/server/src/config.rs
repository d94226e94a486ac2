//! Server configuration, loadable from a TOML file. Every field has a default,
//! so an empty file (or no file at all) gives a working server.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use http::StatusCode;
use nio_http::service::ServiceConfig;
use serde::Deserialize;
use thiserror::Error;

/// Errors loading or validating a [`ServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("invalid config: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Server settings, loaded from TOML. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen: SocketAddr,
    /// Time allowed without progress while waiting on the peer to send a
    /// request or to read a response, in milliseconds.
    pub so_timeout_ms: u64,
    /// Read buffer capacity and write buffer high-water mark.
    pub socket_buffer_size: usize,
    /// Sets `TCP_NODELAY` on accepted sockets.
    pub tcp_nodelay: bool,
    /// Threads driving sockets.
    pub reactor_threads: usize,
    /// Threads running request handlers.
    pub worker_threads: usize,
    /// The `[service]` table.
    pub service: ServiceSection,
}

/// Connection service settings, the `[service]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceSection {
    /// `Server` header value, `nio-server/<version>` by default.
    pub origin_server: Option<String>,
    /// Status answered to malformed requests, `400` by default.
    pub error_status: u16,
    /// Request body bytes buffered per connection before reading pauses.
    pub body_buffer_capacity: usize,
    /// Handlers allowed to run at once; more requests are answered with `503`.
    pub max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            so_timeout_ms: 5000,
            socket_buffer_size: 8 * 1024,
            tcp_nodelay: true,
            reactor_threads: 1,
            worker_threads: 4,
            service: ServiceSection::default(),
        }
    }
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            origin_server: Some(concat!("nio-server/", env!("CARGO_PKG_VERSION")).to_owned()),
            error_status: 400,
            body_buffer_capacity: 8 * 1024,
            max_in_flight: 1024,
        }
    }
}

impl ServerConfig {
    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file can't be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        content.parse()
    }

    pub fn so_timeout(&self) -> Duration {
        Duration::from_millis(self.so_timeout_ms)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero timeout, buffer size or thread
    /// count, or an error status outside `4xx`/`5xx`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.so_timeout_ms == 0 {
            return Err(ConfigError::Invalid { field: "so-timeout-ms", reason: "must be positive".into() });
        }
        if self.socket_buffer_size == 0 {
            return Err(ConfigError::Invalid { field: "socket-buffer-size", reason: "must be positive".into() });
        }
        if self.reactor_threads == 0 || self.worker_threads == 0 {
            return Err(ConfigError::Invalid { field: "threads", reason: "thread counts must be positive".into() });
        }
        self.error_status().map(|_| ())
    }

    fn error_status(&self) -> Result<StatusCode, ConfigError> {
        match StatusCode::from_u16(self.service.error_status) {
            Ok(status) if status.is_client_error() || status.is_server_error() => Ok(status),
            _ => Err(ConfigError::Invalid {
                field: "service.error-status",
                reason: format!("{} is not an error status", self.service.error_status),
            }),
        }
    }

    /// Converts the `[service]` table for the connection service layer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the error status is not an error.
    pub fn service_config(&self) -> Result<ServiceConfig, ConfigError> {
        let mut builder = ServiceConfig::builder()
            .error_status(self.error_status()?)
            .body_buffer_capacity(self.service.body_buffer_capacity)
            .max_in_flight(self.service.max_in_flight);
        if let Some(origin_server) = &self.service.origin_server {
            builder = builder.origin_server(origin_server.as_str());
        }
        Ok(builder.build())
    }
}

impl std::str::FromStr for ServerConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: ServerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
