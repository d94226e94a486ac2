//! Request target → handler resolution.
//!
//! Patterns are either an exact path (`/status`), a prefix wildcard ending in
//! `/*` (`/static/*`), or the catch-all `*`. An exact match wins over any
//! wildcard and the longest matching prefix wins among wildcards. There is
//! always a handler to fall back to: the `*` registration, or
//! [`NotFoundHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use http::{Request, Response, StatusCode};
use thiserror::Error;
use tracing::trace;

use crate::handler::{ExchangeContext, HandlerError, RequestHandler};
use crate::protocol::ResponseBody;
use crate::protocol::body::ReqBody;

const CATCH_ALL: &str = "*";

/// Maps request paths to handlers.
///
/// Patterns are `*` (the fallback), `/prefix/*` (the prefix and everything
/// below it) or an exact path. The most specific match wins.
pub struct HandlerRegistry {
    router: matchit::Router<Arc<dyn RequestHandler>>,
    fallback: Arc<dyn RequestHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").finish_non_exhaustive()
    }
}

/// Rejected handler patterns.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid handler pattern '{pattern}': must be '*' or start with '/'")]
    InvalidPattern { pattern: String },

    #[error("handler pattern '{pattern}' rejected: {source}")]
    Insert { pattern: String, source: matchit::InsertError },
}

impl HandlerRegistry {
    /// Starts an empty registry whose fallback answers `404`.
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder { entries: vec![], fallback: None }
    }

    /// Never fails: unmatched paths get the fallback handler.
    pub fn resolve(&self, path: &str) -> &dyn RequestHandler {
        match self.router.at(path) {
            Ok(matched) => matched.value.as_ref(),
            Err(_) => {
                trace!(path, "no handler registered, use fallback");
                self.fallback.as_ref()
            }
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self { router: matchit::Router::new(), fallback: Arc::new(NotFoundHandler) }
    }
}

/// Collects handler registrations, see [`HandlerRegistry::builder`].
pub struct HandlerRegistryBuilder {
    entries: Vec<(String, Arc<dyn RequestHandler>)>,
    fallback: Option<Arc<dyn RequestHandler>>,
}

impl std::fmt::Debug for HandlerRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns: Vec<_> = self.entries.iter().map(|(pattern, _)| pattern.as_str()).collect();
        f.debug_struct("HandlerRegistryBuilder").field("patterns", &patterns).finish_non_exhaustive()
    }
}

impl HandlerRegistryBuilder {
    /// Registers `handler` for `pattern`. Patterns are checked by
    /// [`build`](Self::build); registering the same path twice fails there.
    pub fn register(mut self, pattern: impl Into<String>, handler: impl RequestHandler + 'static) -> Self {
        let pattern = pattern.into();
        let handler: Arc<dyn RequestHandler> = Arc::new(handler);
        if pattern == CATCH_ALL {
            self.fallback = Some(handler);
        } else {
            self.entries.push((pattern, handler));
        }
        self
    }

    /// # Errors
    ///
    /// Returns [`RegistryError`] when a pattern is malformed or registered twice.
    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        let mut router = matchit::Router::new();

        for (pattern, handler) in self.entries {
            if !pattern.starts_with('/') {
                return Err(RegistryError::InvalidPattern { pattern });
            }

            let routes = match pattern.strip_suffix('*') {
                Some(prefix) if prefix.ends_with('/') => {
                    let prefix = escape(prefix);
                    vec![prefix.clone(), format!("{prefix}{{*rest}}")]
                }
                _ => vec![escape(&pattern)],
            };

            for route in routes {
                router
                    .insert(route, Arc::clone(&handler))
                    .map_err(|source| RegistryError::Insert { pattern: pattern.clone(), source })?;
            }
        }

        Ok(HandlerRegistry { router, fallback: self.fallback.unwrap_or_else(|| Arc::new(NotFoundHandler)) })
    }
}

/// Braces are route parameters for the router, but literal in our patterns.
fn escape(path: &str) -> String {
    path.replace('{', "{{").replace('}', "}}")
}

/// Answers every request with `404 Not Found`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundHandler;

#[async_trait]
impl RequestHandler for NotFoundHandler {
    async fn handle(&self, _request: Request<ReqBody>, _ctx: &ExchangeContext) -> Result<Response<ResponseBody>, HandlerError> {
        let mut response = Response::new(ResponseBody::from("Not Found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use tokio_util::sync::CancellationToken;

    struct Named(&'static str);

    #[async_trait]
    impl RequestHandler for Named {
        async fn handle(&self, _request: Request<ReqBody>, _ctx: &ExchangeContext) -> Result<Response<ResponseBody>, HandlerError> {
            Ok(Response::new(ResponseBody::from(self.0)))
        }
    }

    async fn call(registry: &HandlerRegistry, path: &str) -> (StatusCode, String) {
        use http_body_util::BodyExt;

        let ctx = ExchangeContext::new(ConnectionId::new(1), None, CancellationToken::new());
        let request = Request::builder().uri(path).body(ReqBody::empty()).unwrap();
        let response = registry.resolve(path).handle(request, &ctx).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn exact_then_longest_prefix_then_default() {
        let registry = HandlerRegistry::builder()
            .register("*", Named("default"))
            .register("/static/*", Named("static"))
            .register("/static/img/*", Named("img"))
            .register("/static/index.html", Named("index"))
            .build()
            .unwrap();

        assert_eq!(call(&registry, "/static/index.html").await.1, "index");
        assert_eq!(call(&registry, "/static/app.js").await.1, "static");
        assert_eq!(call(&registry, "/static/").await.1, "static");
        assert_eq!(call(&registry, "/static/img/a/b.png").await.1, "img");
        assert_eq!(call(&registry, "/other").await.1, "default");
    }

    #[tokio::test]
    async fn not_found_without_catch_all() {
        let registry = HandlerRegistry::builder().register("/ping", Named("pong")).build().unwrap();
        assert_eq!(call(&registry, "/ping").await, (StatusCode::OK, "pong".to_owned()));
        assert_eq!(call(&registry, "/missing").await.0, StatusCode::NOT_FOUND);
        assert_eq!(call(&HandlerRegistry::default(), "/").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn braces_are_literal() {
        let registry = HandlerRegistry::builder().register("/{id}", Named("literal")).build().unwrap();
        assert_eq!(call(&registry, "/{id}").await.1, "literal");
        assert_eq!(call(&registry, "/42").await.0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn rejects_relative_pattern() {
        assert!(matches!(HandlerRegistry::builder().register("static", Named("x")).build(), Err(RegistryError::InvalidPattern { .. })));
    }
}
