//! HTTP request header handling.
//!
//! [`RequestHeader`] wraps a bodyless `http::Request<()>` produced by the
//! request decoder. The connection service keeps a copy of it for the whole
//! exchange so the response pipeline and the reuse strategy can inspect the
//! request after the handler took ownership of the original.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// Represents an HTTP request header.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body to this header, converting it into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    /// Returns the request target.
    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    /// Returns the HTTP version the peer spoke.
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// True when the client asked for a `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.headers()
            .get(http::header::EXPECT)
            .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
    }
}

/// Copies method, uri, version and headers. Extensions are not carried over.
impl Clone for RequestHeader {
    fn clone(&self) -> Self {
        let mut inner = Request::new(());
        *inner.method_mut() = self.method().clone();
        *inner.uri_mut() = self.uri().clone();
        *inner.version_mut() = self.version();
        *inner.headers_mut() = self.headers().clone();
        Self { inner }
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}
