//! Content channels backed by the driver's buffers.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use nio_http::codec::ResponseEncoder;
use nio_http::content::{ContentDecoder, ContentEncoder};
use nio_http::protocol::{Message, PayloadItem, PayloadSize, ResponseHead};
use tokio_util::codec::Encoder;

/// Request body bytes decoded from the socket but not yet taken by the
/// service.
#[derive(Debug, Default)]
pub(crate) struct BufferedContentDecoder {
    pending: BytesMut,
    eof: bool,
}

impl BufferedContentDecoder {
    pub(crate) fn push(&mut self, chunk: Bytes) {
        self.pending.extend_from_slice(&chunk);
    }

    pub(crate) fn finish(&mut self) {
        self.eof = true;
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    pub(crate) fn reset(&mut self) {
        self.pending.clear();
        self.eof = false;
    }
}

impl ContentDecoder for BufferedContentDecoder {
    fn read(&mut self, dst: &mut BytesMut, limit: usize) -> io::Result<usize> {
        let n = limit.min(self.pending.len());
        dst.extend_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    fn is_completed(&self) -> bool {
        self.eof && self.pending.is_empty()
    }
}

/// Frames response body bytes straight into the write buffer, accepting no
/// more than the high-water mark allows.
#[derive(Debug)]
pub(crate) struct BufferedContentEncoder<'a> {
    encoder: &'a mut ResponseEncoder,
    dst: &'a mut BytesMut,
    high_water: usize,
    completed: bool,
}

impl<'a> BufferedContentEncoder<'a> {
    pub(crate) fn new(encoder: &'a mut ResponseEncoder, dst: &'a mut BytesMut, high_water: usize) -> Self {
        Self { encoder, dst, high_water, completed: false }
    }
}

impl ContentEncoder for BufferedContentEncoder<'_> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        if self.completed {
            return Err(io::Error::other("response body already completed"));
        }
        let n = self.high_water.saturating_sub(self.dst.len()).min(src.len());
        if n == 0 {
            return Ok(0);
        }
        let item = Message::<(ResponseHead, PayloadSize)>::Payload(PayloadItem::Chunk(Bytes::copy_from_slice(&src[..n])));
        self.encoder.encode(item, self.dst).map_err(io::Error::other)?;
        Ok(n)
    }

    fn complete(&mut self) -> io::Result<()> {
        if self.completed {
            return Ok(());
        }
        let item = Message::<(ResponseHead, PayloadSize)>::Payload(PayloadItem::Eof);
        self.encoder.encode(item, self.dst).map_err(io::Error::other)?;
        self.completed = true;
        Ok(())
    }

    fn is_completed(&self) -> bool {
        self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Response;

    #[test]
    fn decoder_hands_out_up_to_limit() {
        let mut decoder = BufferedContentDecoder::default();
        decoder.push(Bytes::from_static(b"hello"));
        decoder.finish();

        let mut dst = BytesMut::new();
        assert_eq!(decoder.read(&mut dst, 3).unwrap(), 3);
        assert!(!decoder.is_completed());
        assert_eq!(decoder.read(&mut dst, 10).unwrap(), 2);
        assert!(decoder.is_completed());
        assert_eq!(&dst[..], b"hello");
    }

    #[test]
    fn encoder_respects_high_water_mark() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let head = Message::<_, Bytes>::Header((Response::new(()), PayloadSize::Length(10)));
        encoder.encode(head, &mut dst).unwrap();
        let head_len = dst.len();

        let mut channel = BufferedContentEncoder::new(&mut encoder, &mut dst, head_len + 4);
        assert_eq!(channel.write(b"0123456789").unwrap(), 4);
        assert_eq!(channel.write(b"456789").unwrap(), 0);
        assert!(!channel.is_completed());
        drop(channel);

        dst.advance(head_len);
        assert_eq!(&dst[..], b"0123");
    }
}
