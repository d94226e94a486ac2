use bytes::{BufMut, BytesMut};
use http::Version;
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::{ResponseHead, SendError};

const INIT_HEADER_SIZE: usize = 1024;

/// Writes the status line and the headers exactly as the response head holds
/// them. Framing headers are the response pipeline's business.
#[derive(Debug)]
pub struct HeaderEncoder;

impl Encoder<ResponseHead> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, head: ResponseHead, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let version: &[u8] = match head.version() {
            Version::HTTP_11 => b"HTTP/1.1 ",
            Version::HTTP_10 => b"HTTP/1.0 ",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(SendError::invalid_body(format!("unsupported response version {v:?}")));
            }
        };

        dst.reserve(INIT_HEADER_SIZE);
        dst.put_slice(version);
        dst.put_slice(head.status().as_str().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(head.status().canonical_reason().unwrap_or("").as_bytes());
        dst.put_slice(b"\r\n");

        for (name, value) in head.headers() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
