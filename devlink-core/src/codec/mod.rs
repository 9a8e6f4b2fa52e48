//! Framed codec for devlink messages over a byte stream.

use tokio_util::codec::{Decoder, Encoder};

use crate::error::LinkError;
use crate::frame::{FrameHeader, FrameHeaderBytes, HEADER_LEN};
use crate::message::Message;

/// `tokio_util` codec turning a TCP byte stream into whole [`Message`]s.
///
/// Decoding is incremental: it waits for a full header, validates it
/// (which bounds the declared payload), then waits for the full
/// payload before yielding. Header or CRC errors poison the stream —
/// the connection layer tears down on them.
#[derive(Debug, Default)]
pub struct LinkCodec;

impl Decoder for LinkCodec {
    type Item = Message;
    type Error = LinkError;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header_bytes: FrameHeaderBytes = src[..HEADER_LEN]
            .try_into()
            .map_err(|_| LinkError::InvalidHeader("short header slice"))?;
        // Validates magic, version and payload bounds.
        let header = FrameHeader::from_bytes(header_bytes)?;

        let frame_len = HEADER_LEN + header.payload_len() as usize;
        if src.len() < frame_len {
            // Wait for the rest of the payload.
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let message = Message::from_bytes(&frame)?;
        Ok(Some(message))
    }
}

impl Encoder<Message> for LinkCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Message, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        let bytes = item.to_bytes()?;
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
