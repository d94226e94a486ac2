use bytes::{Buf, BytesMut};
use tokio_util::codec::Encoder;

use super::chunked_encoder::ChunkedEncoder;
use super::length_encoder::LengthEncoder;
use super::raw_encoder::RawEncoder;
use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Response body encoder selected by the framing the service committed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadEncoder {
    Length(LengthEncoder),
    Chunked(ChunkedEncoder),
    UntilClose(RawEncoder),
    Empty { eof: bool },
}

impl PayloadEncoder {
    pub fn is_finish(&self) -> bool {
        match self {
            PayloadEncoder::Length(encoder) => encoder.is_finish(),
            PayloadEncoder::Chunked(encoder) => encoder.is_finish(),
            PayloadEncoder::UntilClose(encoder) => encoder.is_finish(),
            PayloadEncoder::Empty { eof } => *eof,
        }
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => PayloadEncoder::Length(LengthEncoder::new(length)),
            PayloadSize::Chunked => PayloadEncoder::Chunked(ChunkedEncoder::new()),
            PayloadSize::UntilClose => PayloadEncoder::UntilClose(RawEncoder::new()),
            PayloadSize::Empty => PayloadEncoder::Empty { eof: false },
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match self {
            PayloadEncoder::Length(encoder) => encoder.encode(item, dst),
            PayloadEncoder::Chunked(encoder) => encoder.encode(item, dst),
            PayloadEncoder::UntilClose(encoder) => encoder.encode(item, dst),
            PayloadEncoder::Empty { eof } => match item {
                PayloadItem::Chunk(bytes) if bytes.has_remaining() => Err(SendError::invalid_body("response must not carry a body")),
                PayloadItem::Chunk(_) => Ok(()),
                PayloadItem::Eof => {
                    *eof = true;
                    Ok(())
                }
            },
        }
    }
}
