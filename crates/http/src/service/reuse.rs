use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Version};

use crate::protocol::{RequestHeader, ResponseHead, status_forbids_body};

/// Decides, once the response body is fully produced, whether the
/// connection may carry another exchange.
pub trait ReuseStrategy: Send + Sync {
    fn keep_alive(&self, request: Option<&RequestHeader>, response: &ResponseHead) -> bool;
}

/// Keep-alive unless the response framing is indeterminate, either side asked
/// for `close`, or an HTTP/1.0 request didn't ask for `keep-alive`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultReuseStrategy;

impl ReuseStrategy for DefaultReuseStrategy {
    fn keep_alive(&self, request: Option<&RequestHeader>, response: &ResponseHead) -> bool {
        let Some(request) = request else {
            return false;
        };

        let headers = response.headers();
        let framed = headers.contains_key(CONTENT_LENGTH) || headers.contains_key(TRANSFER_ENCODING);
        if !framed && !status_forbids_body(response.status()) {
            return false;
        }
        if headers.get_all(CONTENT_LENGTH).iter().count() > 1 {
            return false;
        }

        if has_token(headers, "close") || has_token(request.headers(), "close") {
            return false;
        }

        if request.version() < Version::HTTP_11 || response.version() < Version::HTTP_11 {
            return has_token(request.headers(), "keep-alive") && has_token(headers, "keep-alive");
        }
        true
    }
}

fn has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Request, Response, StatusCode};

    fn request(version: Version, connection: Option<&str>) -> RequestHeader {
        let mut builder = Request::builder().uri("/").version(version);
        if let Some(connection) = connection {
            builder = builder.header(CONNECTION, connection);
        }
        RequestHeader::from(builder.body(()).unwrap())
    }

    fn response(headers: &[(&str, &str)]) -> ResponseHead {
        let mut builder = Response::builder().status(StatusCode::OK);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn http_11_defaults_to_keep_alive() {
        let strategy = DefaultReuseStrategy;
        assert!(strategy.keep_alive(Some(&request(Version::HTTP_11, None)), &response(&[("content-length", "3")])));
        assert!(strategy.keep_alive(Some(&request(Version::HTTP_11, None)), &response(&[("transfer-encoding", "chunked")])));
    }

    #[test]
    fn close_from_either_side() {
        let strategy = DefaultReuseStrategy;
        let request_close = request(Version::HTTP_11, Some("close"));
        assert!(!strategy.keep_alive(Some(&request_close), &response(&[("content-length", "3")])));

        let plain = request(Version::HTTP_11, None);
        assert!(!strategy.keep_alive(Some(&plain), &response(&[("content-length", "3"), ("connection", "Close")])));
    }

    #[test]
    fn indeterminate_framing_closes() {
        let strategy = DefaultReuseStrategy;
        assert!(!strategy.keep_alive(Some(&request(Version::HTTP_11, None)), &response(&[])));
        assert!(!strategy.keep_alive(None, &response(&[("content-length", "3")])));
    }

    #[test]
    fn http_10_needs_keep_alive() {
        let strategy = DefaultReuseStrategy;
        let old = request(Version::HTTP_10, None);
        assert!(!strategy.keep_alive(Some(&old), &response(&[("content-length", "3")])));

        let old_keep_alive = request(Version::HTTP_10, Some("keep-alive"));
        assert!(strategy.keep_alive(Some(&old_keep_alive), &response(&[("content-length", "3"), ("connection", "keep-alive")])));
    }
}
