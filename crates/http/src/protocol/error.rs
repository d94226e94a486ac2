use std::io;
use std::io::ErrorKind;
use thiserror::Error;

/// Errors while decoding a request.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors while encoding or queueing a response.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("connection is closed")]
    ConnectionClosed,

    /// Required by the `tokio_util` encoder contract.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }
}

/// Errors the reactor reports to the service layer for one connection.
///
/// Transport errors are fatal to the connection. Protocol errors are
/// recoverable at the exchange boundary by sending an error response.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: io::Error,
    },

    #[error("protocol error: {source}")]
    Protocol { source: ParseError },
}

impl ServiceError {
    pub fn transport<E: Into<io::Error>>(e: E) -> Self {
        Self::Transport { source: e.into() }
    }

    pub fn timeout() -> Self {
        Self::Transport { source: io::Error::new(ErrorKind::TimedOut, "socket timeout") }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ServiceError::Transport { .. })
    }
}

/// An io failure while parsing is a transport failure, everything else is a
/// protocol violation by the peer.
impl From<ParseError> for ServiceError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::Io { source } => Self::Transport { source },
            source => Self::Protocol { source },
        }
    }
}
