//! Request head decoding on top of `httparse`.
//!
//! Header values are sliced out of the received buffer rather than copied.
//! The decoder also decides the request body framing from the
//! `Transfer-Encoding` and `Content-Length` headers.

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Method, Request, Uri, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

const MAX_HEADER_NUM: usize = 64;

const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Parses a request head and decides how its body is framed.
#[derive(Debug)]
pub struct HeaderDecoder;

struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let body_offset = match req.parse(src).map_err(map_httparse_error)? {
            Status::Complete(body_offset) => body_offset,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };
        trace!(header_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            other => return Err(ParseError::InvalidVersion(other)),
        };
        let method = req.method.map(str::as_bytes).ok_or(ParseError::InvalidMethod)?;
        let Ok(method) = Method::from_bytes(method) else {
            return Err(ParseError::InvalidMethod);
        };
        let uri = req.path.ok_or(ParseError::InvalidUri)?;
        let Ok(uri) = Uri::try_from(uri) else {
            return Err(ParseError::InvalidUri);
        };

        let base = src.as_ptr() as usize;
        let indices: Vec<HeaderIndex> = req
            .headers
            .iter()
            .map(|header| {
                let name = header.name.as_ptr() as usize - base;
                let value = header.value.as_ptr() as usize - base;
                HeaderIndex { name: (name, name + header.name.len()), value: (value, value + header.value.len()) }
            })
            .collect();

        let head_bytes = src.split_to(body_offset).freeze();
        let mut request = Request::new(());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;

        let header_map = request.headers_mut();
        header_map.reserve(indices.len());
        for index in &indices {
            let name = HeaderName::from_bytes(&head_bytes[index.name.0..index.name.1]).map_err(ParseError::invalid_header)?;
            let value =
                HeaderValue::from_maybe_shared(head_bytes.slice(index.value.0..index.value.1)).map_err(ParseError::invalid_header)?;
            header_map.append(name, value);
        }

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;
        Ok(Some((header, payload_size)))
    }
}

fn map_httparse_error(e: httparse::Error) -> ParseError {
    match e {
        httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
        httparse::Error::Version => ParseError::InvalidVersion(None),
        httparse::Error::Token => ParseError::InvalidMethod,
        e => ParseError::invalid_header(e),
    }
}

/// Request framing per RFC 9112 section 6.3: chunked wins, a final coding
/// other than chunked is rejected, conflicting lengths are rejected.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let mut cl_headers = header.headers().get_all(http::header::CONTENT_LENGTH).iter();

    if let Some(te_value) = te_header {
        ensure!(cl_headers.next().is_none(), ParseError::invalid_content_length("transfer-encoding and content-length both present"));
        ensure!(is_chunked(te_value), ParseError::invalid_body("unsupported transfer-encoding"));
        return Ok(PayloadSize::new_chunked());
    }

    let Some(cl_value) = cl_headers.next() else {
        return Ok(PayloadSize::new_empty());
    };
    ensure!(cl_headers.all(|other| other == cl_value), ParseError::invalid_content_length("conflicting content-length values"));

    let cl_str = cl_value.to_str().map_err(|e| ParseError::invalid_content_length(format!("value is not visible ascii: {e}")))?;
    let length = cl_str
        .trim()
        .parse::<u64>()
        .map_err(|e| ParseError::invalid_content_length(format!("value {cl_str} is not u64: {e}")))?;

    Ok(if length == 0 { PayloadSize::new_empty() } else { PayloadSize::new_length(length) })
}

fn is_chunked(value: &HeaderValue) -> bool {
    value.as_bytes().rsplit(|b| *b == b',').next().is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
