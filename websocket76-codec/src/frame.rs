use std::str;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Error, Result};

/// Marker byte that opens every text frame on the wire.
const FRAME_START: u8 = 0x00;

/// Marker byte that closes every text frame on the wire.
const FRAME_END: u8 = 0xff;

/// Tokio codec for the delimited text frames exchanged after the handshake.
///
/// Frames have no length prefix and no masking: each message is its raw UTF-8 bytes
/// between a 0x00 start marker and a 0xFF end marker. The end marker is unambiguous
/// because 0xFF never occurs inside well-formed UTF-8.
///
/// A frame whose payload is not valid UTF-8 makes `decode` return an error, but the
/// offending frame is consumed first: calling `decode` again resumes at the next
/// frame, so one bad frame does not poison the stream.
#[derive(Debug, Default)]
pub struct TextFrameCodec;

impl Decoder for TextFrameCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        let start = match src.iter().position(|&b| b == FRAME_START) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let end = match src[start + 1..].iter().position(|&b| b == FRAME_END) {
            Some(pos) => start + 1 + pos,
            None => {
                // The frame is still in flight. Reserve room for the rest of it.
                src.reserve(512);
                return Ok(None);
            }
        };

        let frame = src.split_to(end + 1);
        let payload = &frame[start + 1..frame.len() - 1];
        let message = str::from_utf8(payload)
            .map_err(|e| format!("text frame is not valid UTF-8: {e}", e = e))?;
        Ok(Some(message.to_owned()))
    }
}

impl<'a> Encoder<&'a str> for TextFrameCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a str, dst: &mut BytesMut) -> Result<()> {
        // A NUL inside the payload would be read back as an empty frame followed by
        // garbage, so it is not representable in this framing.
        if item.bytes().any(|b| b == FRAME_START) {
            return Err("text frame must not contain a NUL character".into());
        }

        dst.reserve(item.len() + 2);
        dst.put_u8(FRAME_START);
        dst.put_slice(item.as_bytes());
        dst.put_u8(FRAME_END);
        Ok(())
    }
}
