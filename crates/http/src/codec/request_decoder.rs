//! Streaming request decoding: one head, then its body items, then the next
//! head.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Decodes a request stream: a head, then its body items, then the next head.
#[derive(Debug)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// True while the body of the last decoded head is still being read.
    pub fn in_body(&self) -> bool {
        self.payload_decoder.is_some()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(PayloadItem::Eof) => {
                    self.payload_decoder = None;
                    Some(Message::Payload(PayloadItem::Eof))
                }
                None => None,
            };
            return Ok(message);
        }

        Ok(self.header_decoder.decode(src)?.map(|(header, payload_size)| {
            // a bodyless request has nothing to deliver after its head
            if !payload_size.is_empty() {
                self.payload_decoder = Some(payload_size.into());
            }
            Message::Header((header, payload_size))
        }))
    }
}
