//! The response interceptor pipeline.
//!
//! Every committed response head passes through the same four stages, in a
//! fixed order: [`ResponseDate`], [`ResponseServer`], [`ResponseContent`] and
//! [`ResponseConnControl`]. Stages only touch response metadata; the body is
//! never inspected beyond its size.

use http::header::{CONNECTION, CONTENT_LENGTH, DATE, SERVER, TRANSFER_ENCODING};
use http::{HeaderValue, StatusCode, Version};
use tracing::warn;

use crate::protocol::{PayloadSize, RequestHeader, ResponseHead, status_forbids_body};
use crate::service::date::DateService;

/// What a stage sees of the exchange.
#[derive(Debug)]
pub struct ResponseContext<'a> {
    /// `None` when the request head could not be parsed.
    pub request: Option<&'a RequestHeader>,
    /// The head being decorated.
    pub head: &'a mut ResponseHead,
    /// Size of the body the handler produced.
    pub payload_size: PayloadSize,
}

/// One stage of the [`ResponsePipeline`].
pub trait ResponseInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, ctx: &mut ResponseContext<'_>);
}

/// Adds `Date` to final responses.
#[derive(Debug, Default)]
pub struct ResponseDate;

impl ResponseInterceptor for ResponseDate {
    fn name(&self) -> &'static str {
        "date"
    }

    fn process(&self, ctx: &mut ResponseContext<'_>) {
        if ctx.head.status().is_informational() || ctx.head.headers().contains_key(DATE) {
            return;
        }
        if let Some(date) = DateService::global().http_date() {
            ctx.head.headers_mut().insert(DATE, date);
        }
    }
}

/// Adds `Server` with the configured origin server name when absent.
#[derive(Debug, Default)]
pub struct ResponseServer {
    origin_server: Option<HeaderValue>,
}

impl ResponseServer {
    pub fn new(origin_server: Option<&str>) -> Self {
        let origin_server = origin_server.and_then(|name| match HeaderValue::from_str(name) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin_server = name, "origin server name is not a valid header value, Server header disabled");
                None
            }
        });
        Self { origin_server }
    }
}

impl ResponseInterceptor for ResponseServer {
    fn name(&self) -> &'static str {
        "server"
    }

    fn process(&self, ctx: &mut ResponseContext<'_>) {
        if let Some(origin_server) = &self.origin_server
            && !ctx.head.headers().contains_key(SERVER)
        {
            ctx.head.headers_mut().insert(SERVER, origin_server.clone());
        }
    }
}

/// Declares the body framing: `Content-Length` when the size is known,
/// `Transfer-Encoding: chunked` otherwise, nothing for bodyless statuses.
///
/// HTTP/1.0 peers can't read chunked coding, so an unknown size gets no
/// framing header at all and `Connection: close`; the body then ends with the
/// connection.
#[derive(Debug, Default)]
pub struct ResponseContent;

impl ResponseInterceptor for ResponseContent {
    fn name(&self) -> &'static str {
        "content"
    }

    fn process(&self, ctx: &mut ResponseContext<'_>) {
        let status = ctx.head.status();
        let legacy_peer = ctx.request.is_some_and(|request| request.version() < Version::HTTP_11);
        let headers = ctx.head.headers_mut();
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);

        if status_forbids_body(status) {
            return;
        }

        match ctx.payload_size {
            PayloadSize::Length(length) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            }
            PayloadSize::Empty => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
            PayloadSize::Chunked if !legacy_peer => {
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Chunked | PayloadSize::UntilClose => {
                headers.insert(CONNECTION, HeaderValue::from_static("close"));
            }
        }
    }
}

/// Decides the `Connection` header.
#[derive(Debug, Default)]
pub struct ResponseConnControl;

impl ResponseConnControl {
    /// Statuses after which the request stream can't be trusted any more.
    pub fn status_forces_close(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::BAD_REQUEST
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::LENGTH_REQUIRED
                | StatusCode::PAYLOAD_TOO_LARGE
                | StatusCode::URI_TOO_LONG
                | StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::NOT_IMPLEMENTED
                | StatusCode::SERVICE_UNAVAILABLE
        )
    }
}

impl ResponseInterceptor for ResponseConnControl {
    fn name(&self) -> &'static str {
        "conn-control"
    }

    fn process(&self, ctx: &mut ResponseContext<'_>) {
        if Self::status_forces_close(ctx.head.status()) {
            ctx.head.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
            return;
        }

        if ctx.head.headers().contains_key(CONNECTION) {
            return;
        }

        let Some(request) = ctx.request else {
            return;
        };
        match request.headers().get(CONNECTION) {
            Some(value) => {
                ctx.head.headers_mut().insert(CONNECTION, value.clone());
            }
            None if request.version() < Version::HTTP_11 => {
                ctx.head.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
            }
            None => {}
        }
    }
}

/// The fixed, ordered set of response interceptors.
#[derive(Debug, Default)]
pub struct ResponsePipeline {
    date: ResponseDate,
    server: ResponseServer,
    content: ResponseContent,
    conn_control: ResponseConnControl,
}

impl ResponsePipeline {
    pub fn new(origin_server: Option<&str>) -> Self {
        Self {
            date: ResponseDate,
            server: ResponseServer::new(origin_server),
            content: ResponseContent,
            conn_control: ResponseConnControl,
        }
    }

    /// The stages in the order they run.
    pub fn stages(&self) -> [&dyn ResponseInterceptor; 4] {
        [&self.date, &self.server, &self.content, &self.conn_control]
    }

    /// Runs every stage over `ctx`.
    pub fn process(&self, ctx: &mut ResponseContext<'_>) {
        for stage in self.stages() {
            stage.process(ctx);
        }
    }
}
