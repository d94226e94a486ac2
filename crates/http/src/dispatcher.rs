//! The service dispatcher: reactor events in, connection services out.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, trace};

use crate::connection::{ConnectionId, ConnectionRef, ServerEventHandler};
use crate::content::{ContentDecoder, ContentEncoder};
use crate::protocol::{PayloadSize, RequestHeader, ServiceError};
use crate::service::{ConnectionService, ServiceContext};

/// Owns the connection → [`ConnectionService`] map and routes every
/// reactor event to the right service. Events for unknown connections are
/// dropped.
#[derive(Debug)]
pub struct ServiceDispatcher {
    services: DashMap<ConnectionId, Arc<ConnectionService>>,
    context: Arc<ServiceContext>,
}

impl ServiceDispatcher {
    /// Creates a dispatcher with no connections bound.
    pub fn new(context: ServiceContext) -> Self {
        Self { services: DashMap::new(), context: Arc::new(context) }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    /// Number of connections currently bound to a service.
    pub fn connection_count(&self) -> usize {
        self.services.len()
    }

    /// The service bound to connection `id`, if it is still open.
    pub fn service(&self, id: ConnectionId) -> Option<Arc<ConnectionService>> {
        // clone out so no map shard stays locked while the service runs
        self.services.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn bound(&self, conn: &ConnectionRef, event: &'static str) -> Option<Arc<ConnectionService>> {
        let service = self.service(conn.id());
        if service.is_none() {
            debug!(conn = %conn.id(), event, "event for unknown connection, ignored");
        }
        service
    }
}

impl ServerEventHandler for ServiceDispatcher {
    fn on_connected(&self, conn: &ConnectionRef) {
        info!(conn = %conn.id(), peer = ?conn.peer_addr(), "connection established");
        let service = Arc::new(ConnectionService::new(conn, Arc::clone(&self.context)));
        self.services.insert(conn.id(), service);
    }

    fn on_closed(&self, conn: &ConnectionRef) {
        match self.services.remove(&conn.id()) {
            Some((_, service)) => {
                service.closed();
                info!(conn = %conn.id(), "connection closed");
            }
            None => trace!(conn = %conn.id(), "close of unknown connection"),
        }
    }

    fn on_request_received(&self, conn: &ConnectionRef, header: RequestHeader, payload_size: PayloadSize) {
        if let Some(service) = self.bound(conn, "request_received") {
            service.request_received(conn, header, payload_size);
        }
    }

    fn on_input_ready(&self, conn: &ConnectionRef, decoder: &mut dyn ContentDecoder) {
        if let Some(service) = self.bound(conn, "input_ready") {
            service.consume_content(conn, decoder);
        }
    }

    fn on_output_ready(&self, conn: &ConnectionRef, encoder: &mut dyn ContentEncoder) {
        if let Some(service) = self.bound(conn, "output_ready") {
            service.produce_content(conn, encoder);
        }
    }

    fn on_exception(&self, conn: &ConnectionRef, error: ServiceError) {
        let Some(service) = self.bound(conn, "exception") else {
            return;
        };
        match error {
            ServiceError::Protocol { source } => service.protocol_error(conn, source),
            ServiceError::Transport { source } => service.transport_error(conn, source),
        }
    }

    fn on_timeout(&self, conn: &ConnectionRef) {
        self.on_exception(conn, ServiceError::timeout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ExchangeContext, HandlerError, HandlerRegistry, handler_fn};
    use crate::protocol::body::ReqBody;
    use crate::protocol::{ParseError, ResponseBody, ResponseHead};
    use crate::service::{ExchangePhase, ReuseStrategy, ServiceConfig};
    use crate::test_support::{ConnEvent, RecordingConnection, SliceDecoder, VecEncoder};
    use bytes::Bytes;
    use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
    use http::{Method, Request, Response, StatusCode, Version};
    use http_body::Frame;
    use http_body_util::{BodyExt, StreamBody};
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::builder()
            .register("/hello", handler_fn(|_request, _ctx| async { Ok(Response::new(ResponseBody::from("hello"))) }))
            .register(
                "/echo",
                handler_fn(|request: Request<ReqBody>, _ctx| async move {
                    let body = request.into_body().collect().await?.to_bytes();
                    Ok(Response::new(ResponseBody::from(body)))
                }),
            )
            .register(
                "/wait",
                handler_fn(|_request, ctx: ExchangeContext| async move {
                    ctx.cancellation().cancelled().await;
                    Err(HandlerError::ConnectionClosed)
                }),
            )
            .register(
                "/stream",
                handler_fn(|_request, _ctx| async {
                    let frames = futures::stream::iter([Ok::<_, Infallible>(Frame::data(Bytes::from_static(b"streamed")))]);
                    Ok(Response::new(ResponseBody::stream(StreamBody::new(frames))))
                }),
            )
            .register("/post-only", handler_fn(|request: Request<ReqBody>, _ctx| async move {
                Err(HandlerError::MethodNotSupported(request.method().clone()))
            }))
            .register(
                "/panic",
                handler_fn(|_request, _ctx| async {
                    if true {
                        panic!("boom");
                    }
                    Ok(Response::new(ResponseBody::empty()))
                }),
            )
            .build()
            .unwrap()
    }

    fn dispatcher_with(config: ServiceConfig) -> ServiceDispatcher {
        ServiceDispatcher::new(ServiceContext::new(registry(), config, Handle::current()))
    }

    #[derive(Debug)]
    struct NeverReuse;

    impl ReuseStrategy for NeverReuse {
        fn keep_alive(&self, _request: Option<&RequestHeader>, _response: &ResponseHead) -> bool {
            false
        }
    }

    fn dispatcher() -> ServiceDispatcher {
        dispatcher_with(ServiceConfig::default())
    }

    fn connect(dispatcher: &ServiceDispatcher, id: u64) -> (Arc<RecordingConnection>, ConnectionRef) {
        let recording = RecordingConnection::new(id);
        let conn: ConnectionRef = recording.clone();
        dispatcher.on_connected(&conn);
        (recording, conn)
    }

    fn request(method: Method, path: &str) -> RequestHeader {
        RequestHeader::from(Request::builder().method(method).uri(path).body(()).unwrap())
    }

    fn phase(dispatcher: &ServiceDispatcher, conn: &ConnectionRef) -> Option<ExchangePhase> {
        dispatcher.service(conn.id()).map(|service| service.phase())
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn keep_alive_round_trip() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Idle));

        for round in 1..=2 {
            dispatcher.on_request_received(&conn, request(Method::GET, "/hello"), PayloadSize::Empty);
            eventually(|| recording.count(ConnEvent::SubmitResponse) == round).await;
            assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::ProducingResponseBody));

            let mut encoder = VecEncoder::new(1024);
            dispatcher.on_output_ready(&conn, &mut encoder);
            assert_eq!(encoder.written, b"hello");
            assert!(encoder.completed);
            assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Idle));
        }

        let responses = recording.responses();
        assert_eq!(responses.len(), 2);
        let (head, framing) = &responses[0];
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(head.headers()[CONTENT_LENGTH], "5");
        assert_eq!(*framing, PayloadSize::Length(5));
        assert_eq!(recording.count(ConnEvent::RequestInput), 2);
        assert_eq!(recording.count(ConnEvent::Close), 0);
    }

    #[tokio::test]
    async fn short_writes_resume_on_next_output_ready() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        dispatcher.on_request_received(&conn, request(Method::GET, "/hello"), PayloadSize::Empty);
        eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;
        let output_requests = recording.count(ConnEvent::RequestOutput);

        let mut encoder = VecEncoder::new(3);
        dispatcher.on_output_ready(&conn, &mut encoder);
        assert_eq!(encoder.written, b"hel");
        assert!(!encoder.completed);
        assert_eq!(recording.count(ConnEvent::RequestOutput), output_requests + 1);
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::ProducingResponseBody));

        encoder.room = 16;
        dispatcher.on_output_ready(&conn, &mut encoder);
        assert_eq!(encoder.written, b"hello");
        assert!(encoder.completed);
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Idle));
    }

    #[tokio::test]
    async fn request_body_streams_to_handler() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);

        dispatcher.on_request_received(&conn, request(Method::POST, "/echo"), PayloadSize::Length(5));
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::ReceivingRequestBody));

        dispatcher.on_input_ready(&conn, &mut SliceDecoder::new(b"hello", true));
        eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;

        let mut encoder = VecEncoder::new(1024);
        dispatcher.on_output_ready(&conn, &mut encoder);
        assert_eq!(encoder.written, b"hello");
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Idle));
    }

    #[tokio::test]
    async fn unread_request_body_prevents_reuse() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);

        dispatcher.on_request_received(&conn, request(Method::POST, "/hello"), PayloadSize::Length(100));
        eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;

        // more body arrives and is dropped
        dispatcher.on_input_ready(&conn, &mut SliceDecoder::new(b"partial", false));

        let mut encoder = VecEncoder::new(1024);
        dispatcher.on_output_ready(&conn, &mut encoder);
        assert!(encoder.completed);
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Closed));
        assert_eq!(recording.count(ConnEvent::Close), 1);
    }

    #[tokio::test]
    async fn second_request_in_flight_is_ignored() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);

        dispatcher.on_request_received(&conn, request(Method::GET, "/wait"), PayloadSize::Empty);
        dispatcher.on_request_received(&conn, request(Method::GET, "/hello"), PayloadSize::Empty);
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::HandlerRunning));
        eventually(|| dispatcher.context().executor().in_flight() == 1).await;

        dispatcher.on_closed(&conn);
        eventually(|| dispatcher.context().executor().in_flight() == 0).await;
        assert_eq!(recording.count(ConnEvent::SubmitResponse), 0);
        assert_eq!(dispatcher.connection_count(), 0);
    }

    #[tokio::test]
    async fn late_handler_result_after_close_is_discarded() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        let service = dispatcher.service(conn.id()).unwrap();

        dispatcher.on_request_received(&conn, request(Method::GET, "/wait"), PayloadSize::Empty);
        dispatcher.on_closed(&conn);
        let before = recording.events();

        service.handler_completed(Ok(Response::new(ResponseBody::from("too late"))));
        assert_eq!(service.phase(), ExchangePhase::Closed);
        assert_eq!(recording.events(), before);
    }

    #[tokio::test]
    async fn protocol_error_sends_one_error_response() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);

        dispatcher.on_exception(&conn, ServiceError::from(ParseError::InvalidMethod));

        let responses = recording.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0.status(), StatusCode::BAD_REQUEST);
        assert_eq!(responses[0].0.headers()[CONNECTION], "close");

        let mut encoder = VecEncoder::new(1024);
        dispatcher.on_output_ready(&conn, &mut encoder);
        assert!(encoder.written.starts_with(b"400"));
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Closed));
        assert_eq!(recording.count(ConnEvent::Close), 1);

        // nothing more happens on a closed connection
        let before = recording.events();
        dispatcher.on_exception(&conn, ServiceError::from(ParseError::InvalidMethod));
        dispatcher.on_request_received(&conn, request(Method::GET, "/hello"), PayloadSize::Empty);
        dispatcher.on_output_ready(&conn, &mut VecEncoder::new(1024));
        assert_eq!(recording.events(), before);
    }

    #[tokio::test]
    async fn protocol_error_while_handler_runs_cancels_it() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        let service = dispatcher.service(conn.id()).unwrap();

        dispatcher.on_request_received(&conn, request(Method::POST, "/wait"), PayloadSize::Chunked);
        dispatcher.on_input_ready(&conn, &mut SliceDecoder::new(b"hel", false));
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::ReceivingRequestBody));
        eventually(|| dispatcher.context().executor().in_flight() == 1).await;

        dispatcher.on_exception(&conn, ServiceError::from(ParseError::invalid_body("bad chunk size")));

        // the waiting handler only returns once its token is cancelled
        eventually(|| dispatcher.context().executor().in_flight() == 0).await;
        service.handler_completed(Ok(Response::new(ResponseBody::from("too late"))));

        let responses = recording.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0.status(), StatusCode::BAD_REQUEST);
        assert_eq!(responses[0].0.headers()[CONNECTION], "close");

        let mut encoder = VecEncoder::new(1024);
        dispatcher.on_output_ready(&conn, &mut encoder);
        assert_eq!(encoder.written, b"400 Bad Request");
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Closed));
        assert_eq!(recording.count(ConnEvent::Close), 1);
        assert_eq!(recording.count(ConnEvent::SubmitResponse), 1);
    }

    #[tokio::test]
    async fn http_10_stream_runs_until_close() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        let header = RequestHeader::from(
            Request::builder().version(Version::HTTP_10).uri("/stream").header(CONNECTION, "keep-alive").body(()).unwrap(),
        );

        dispatcher.on_request_received(&conn, header, PayloadSize::Empty);
        eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;

        let (head, framing) = &recording.responses()[0];
        assert_eq!(*framing, PayloadSize::UntilClose);
        assert!(!head.headers().contains_key(TRANSFER_ENCODING));
        assert!(!head.headers().contains_key(CONTENT_LENGTH));
        assert_eq!(head.headers()[CONNECTION], "close");

        let mut encoder = VecEncoder::new(1024);
        dispatcher.on_output_ready(&conn, &mut encoder);
        assert_eq!(encoder.written, b"streamed");
        assert!(encoder.completed);
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Closed));
        assert_eq!(recording.count(ConnEvent::Close), 1);
    }

    #[tokio::test]
    async fn http_11_stream_is_chunked() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        dispatcher.on_request_received(&conn, request(Method::GET, "/stream"), PayloadSize::Empty);
        eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;

        let (head, framing) = &recording.responses()[0];
        assert_eq!(*framing, PayloadSize::Chunked);
        assert_eq!(head.headers()[TRANSFER_ENCODING], "chunked");

        dispatcher.on_output_ready(&conn, &mut VecEncoder::new(1024));
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Idle));
    }

    #[tokio::test]
    async fn custom_reuse_strategy_decides_close() {
        let context = ServiceContext::new(registry(), ServiceConfig::default(), Handle::current()).with_reuse_strategy(NeverReuse);
        let dispatcher = ServiceDispatcher::new(context);
        let (recording, conn) = connect(&dispatcher, 1);

        dispatcher.on_request_received(&conn, request(Method::GET, "/hello"), PayloadSize::Empty);
        eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;
        dispatcher.on_output_ready(&conn, &mut VecEncoder::new(1024));

        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Closed));
        assert_eq!(recording.count(ConnEvent::Close), 1);
        assert_eq!(recording.count(ConnEvent::RequestInput), 0);
    }

    #[tokio::test]
    async fn configured_error_status_and_version_error() {
        let dispatcher = dispatcher_with(ServiceConfig::builder().error_status(StatusCode::UNPROCESSABLE_ENTITY).build());
        let (recording, conn) = connect(&dispatcher, 1);
        dispatcher.on_exception(&conn, ServiceError::from(ParseError::invalid_header("bad")));
        assert_eq!(recording.responses()[0].0.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let (recording, conn) = connect(&dispatcher, 2);
        dispatcher.on_exception(&conn, ServiceError::from(ParseError::InvalidVersion(Some(2))));
        assert_eq!(recording.responses()[0].0.status(), StatusCode::HTTP_VERSION_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn protocol_error_while_producing_shuts_down() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        dispatcher.on_request_received(&conn, request(Method::GET, "/hello"), PayloadSize::Empty);
        eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;

        dispatcher.on_exception(&conn, ServiceError::from(ParseError::InvalidMethod));
        assert_eq!(recording.count(ConnEvent::SubmitResponse), 1);
        assert_eq!(recording.count(ConnEvent::Shutdown), 1);
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Closed));
    }

    #[tokio::test]
    async fn timeout_shuts_down_without_response() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);

        dispatcher.on_timeout(&conn);
        assert_eq!(recording.events(), vec![ConnEvent::Shutdown]);
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Closed));
    }

    #[tokio::test]
    async fn handler_errors_map_to_statuses() {
        let dispatcher = dispatcher();
        for (id, path, status) in
            [(1, "/post-only", StatusCode::METHOD_NOT_ALLOWED), (2, "/panic", StatusCode::INTERNAL_SERVER_ERROR), (3, "/nope", StatusCode::NOT_FOUND)]
        {
            let (recording, conn) = connect(&dispatcher, id);
            dispatcher.on_request_received(&conn, request(Method::POST, path), PayloadSize::Empty);
            eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;
            assert_eq!(recording.responses()[0].0.status(), status, "{path}");
        }
    }

    #[tokio::test]
    async fn saturated_executor_answers_503() {
        let dispatcher = dispatcher_with(ServiceConfig::builder().max_in_flight(1).build());
        let (_busy, busy_conn) = connect(&dispatcher, 1);
        dispatcher.on_request_received(&busy_conn, request(Method::GET, "/wait"), PayloadSize::Empty);

        let (recording, conn) = connect(&dispatcher, 2);
        dispatcher.on_request_received(&conn, request(Method::GET, "/hello"), PayloadSize::Empty);
        let responses = recording.responses();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(responses[0].0.headers()[CONNECTION], "close");

        dispatcher.on_closed(&busy_conn);
    }

    #[tokio::test]
    async fn head_response_keeps_length_without_body() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        dispatcher.on_request_received(&conn, request(Method::HEAD, "/hello"), PayloadSize::Empty);
        eventually(|| recording.count(ConnEvent::SubmitResponse) == 1).await;

        let (head, framing) = &recording.responses()[0];
        assert_eq!(head.headers()[CONTENT_LENGTH], "5");
        assert_eq!(*framing, PayloadSize::Empty);

        let mut encoder = VecEncoder::new(1024);
        dispatcher.on_output_ready(&conn, &mut encoder);
        assert!(encoder.written.is_empty());
        assert_eq!(phase(&dispatcher, &conn), Some(ExchangePhase::Idle));
    }

    #[tokio::test]
    async fn expect_continue_before_body() {
        let dispatcher = dispatcher();
        let (recording, conn) = connect(&dispatcher, 1);
        let header = RequestHeader::from(
            Request::builder().method(Method::POST).uri("/echo").header("expect", "100-continue").body(()).unwrap(),
        );
        dispatcher.on_request_received(&conn, header, PayloadSize::Length(2));
        assert_eq!(recording.events().first(), Some(&ConnEvent::SubmitContinue));
        dispatcher.on_closed(&conn);
    }

    #[tokio::test]
    async fn events_for_unknown_connection_are_ignored() {
        let dispatcher = dispatcher();
        let recording = RecordingConnection::new(9);
        let conn: ConnectionRef = recording.clone();

        dispatcher.on_request_received(&conn, request(Method::GET, "/hello"), PayloadSize::Empty);
        dispatcher.on_timeout(&conn);
        dispatcher.on_closed(&conn);
        assert!(recording.events().is_empty());
    }
}
