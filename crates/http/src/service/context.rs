use http::header::CONNECTION;
use http::{HeaderValue, Response, StatusCode};
use tokio::runtime::Handle;

use crate::executor::HandlerExecutor;
use crate::handler::HandlerRegistry;
use crate::protocol::ResponseBody;
use crate::service::{DefaultReuseStrategy, ResponsePipeline, ReuseStrategy, ServiceConfig};

/// Everything the connection services share. Read only once built.
pub struct ServiceContext {
    registry: HandlerRegistry,
    pipeline: ResponsePipeline,
    reuse: Box<dyn ReuseStrategy>,
    executor: HandlerExecutor,
    config: ServiceConfig,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext").field("config", &self.config).finish_non_exhaustive()
    }
}

impl ServiceContext {
    /// Handlers run on `worker_runtime`.
    pub fn new(registry: HandlerRegistry, config: ServiceConfig, worker_runtime: Handle) -> Self {
        Self {
            registry,
            pipeline: ResponsePipeline::new(config.origin_server()),
            reuse: Box::new(DefaultReuseStrategy),
            executor: HandlerExecutor::new(worker_runtime, config.max_in_flight()),
            config,
        }
    }

    /// Replaces the [`DefaultReuseStrategy`].
    pub fn with_reuse_strategy(mut self, reuse: impl ReuseStrategy + 'static) -> Self {
        self.reuse = Box::new(reuse);
        self
    }

    /// Handlers requests are resolved against.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &ResponsePipeline {
        &self.pipeline
    }

    pub fn reuse_strategy(&self) -> &dyn ReuseStrategy {
        self.reuse.as_ref()
    }

    pub fn executor(&self) -> &HandlerExecutor {
        &self.executor
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The response sent when the service itself gives up on an exchange.
    pub fn error_response(&self, status: StatusCode) -> Response<ResponseBody> {
        let reason = status.canonical_reason().unwrap_or("Error");
        let mut response = Response::new(ResponseBody::from(format!("{} {reason}", status.as_str())));
        *response.status_mut() = status;
        response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        response
    }
}
