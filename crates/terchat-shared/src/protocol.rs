//! Wire record and its length-prefixed framing.
//!
//! Every request and response shares one record shape:
//!
//! ```text
//! u32 frame_len | i32 kind | i32 to | i32 from | u32 body_len | body[body_len]
//! ```
//!
//! All integers are big-endian and `frame_len` counts every byte after
//! itself. The body is UTF-8 text and is bounded by a configurable maximum
//! (64 KiB by default); oversized bodies are refused rather than truncated.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::{HEADER_LEN, LENGTH_PREFIX_LEN, MAX_BODY_SIZE};
use crate::error::WireError;
use crate::types::{RecordKind, UserId};

/// One request or response on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    /// Recipient identity, or a kind-specific integer (contact count, peer id).
    pub to: UserId,
    /// Sender identity; [`UserId::SERVER`] for server-originated records.
    pub from: UserId,
    pub body: String,
}

impl Record {
    pub fn new(kind: RecordKind, to: UserId, from: UserId, body: impl Into<String>) -> Self {
        Self {
            kind,
            to,
            from,
            body: body.into(),
        }
    }

    /// Generic acknowledgement or error text from the server.
    pub fn confirmation(text: impl Into<String>) -> Self {
        Self::new(RecordKind::Confirmation, UserId::SERVER, UserId::SERVER, text)
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(RecordKind::ServerNotice, UserId::SERVER, UserId::SERVER, text)
    }

    pub fn disconnect() -> Self {
        Self::new(RecordKind::Disconnect, UserId::SERVER, UserId::SERVER, "")
    }

    pub fn registration_required(id: UserId) -> Self {
        Self::new(RecordKind::Registration, id, UserId::SERVER, "")
    }

    /// Append the framed record to `dst`.
    pub fn encode(&self, dst: &mut BytesMut, max_body: usize) -> Result<(), WireError> {
        let body = self.body.as_bytes();
        if body.len() > max_body {
            return Err(WireError::FieldTooLarge {
                size: body.len(),
                max: max_body,
            });
        }

        dst.reserve(LENGTH_PREFIX_LEN + HEADER_LEN + body.len());
        dst.put_u32((HEADER_LEN + body.len()) as u32);
        dst.put_i32(self.kind.code());
        dst.put_i32(self.to.0);
        dst.put_i32(self.from.0);
        dst.put_u32(body.len() as u32);
        dst.put_slice(body);
        Ok(())
    }

    /// Parse the payload of one frame (everything after the length prefix).
    pub fn decode(mut frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() < HEADER_LEN {
            return Err(WireError::Malformed(format!(
                "header needs {HEADER_LEN} bytes, got {}",
                frame.len()
            )));
        }

        let code = frame.get_i32();
        let to = UserId(frame.get_i32());
        let from = UserId(frame.get_i32());
        let body_len = frame.get_u32() as usize;

        if frame.remaining() != body_len {
            return Err(WireError::Malformed(format!(
                "body length {body_len} does not match frame ({} bytes left)",
                frame.remaining()
            )));
        }

        let kind = RecordKind::from_code(code).ok_or(WireError::UnknownKind(code))?;
        let body = std::str::from_utf8(frame)
            .map_err(|e| WireError::Malformed(format!("body is not UTF-8: {e}")))?
            .to_string();

        Ok(Self {
            kind,
            to,
            from,
            body,
        })
    }

    /// Serialize to a standalone frame using the default body limit.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, MAX_BODY_SIZE)?;
        Ok(buf.to_vec())
    }
}

/// Splits a byte stream into frames and writes records back as frames.
///
/// Decoding yields the raw frame payload so that a malformed record inside a
/// well-formed frame can be rejected without losing stream alignment. Only an
/// oversized length prefix is a decoder error.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    max_body: usize,
}

impl RecordCodec {
    pub fn new(max_body: usize) -> Self {
        Self { max_body }
    }

    fn max_frame_len(&self) -> usize {
        HEADER_LEN + self.max_body
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new(MAX_BODY_SIZE)
    }
}

impl Decoder for RecordCodec {
    type Item = BytesMut;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut prefix = &src[..LENGTH_PREFIX_LEN];
        let frame_len = prefix.get_u32() as usize;
        if frame_len > self.max_frame_len() {
            return Err(WireError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_len(),
            });
        }

        let total = LENGTH_PREFIX_LEN + frame_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        Ok(Some(src.split_to(frame_len)))
    }
}

impl Encoder<Record> for RecordCodec {
    type Error = WireError;

    fn encode(&mut self, item: Record, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst, self.max_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::new(RecordKind::SendMessage, UserId(8), UserId(7), "hi, there")
    }

    #[test]
    fn test_record_roundtrip() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(bytes.len(), LENGTH_PREFIX_LEN + HEADER_LEN + 9);

        let restored = Record::decode(&bytes[LENGTH_PREFIX_LEN..]).unwrap();
        assert_eq!(restored, sample());
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let bytes = sample().to_bytes().unwrap();
        let mut codec = RecordCodec::default();

        let mut buf = BytesMut::from(&bytes[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[10..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(Record::decode(&frame).unwrap(), sample());
    }

    #[test]
    fn test_decoder_splits_back_to_back_frames() {
        let mut codec = RecordCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Record::confirmation("one"), &mut buf).unwrap();
        codec.encode(Record::disconnect(), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Record::decode(&first).unwrap().body, "one");
        assert_eq!(
            Record::decode(&second).unwrap().kind,
            RecordKind::Disconnect
        );
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_body_rejected_on_encode() {
        let mut codec = RecordCodec::new(4);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Record::confirmation("too long"), &mut buf)
            .unwrap_err();
        assert!(matches!(err, WireError::FieldTooLarge { size: 8, max: 4 }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_frame_rejected_on_decode() {
        let mut codec = RecordCodec::new(4);
        let mut buf = BytesMut::new();
        buf.put_u32(1_000_000);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_unknown_kind() {
        let mut payload = BytesMut::new();
        payload.put_i32(42);
        payload.put_i32(0);
        payload.put_i32(0);
        payload.put_u32(0);
        let err = Record::decode(&payload).unwrap_err();
        assert!(matches!(err, WireError::UnknownKind(42)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_body_length_mismatch() {
        let mut payload = BytesMut::new();
        payload.put_i32(RecordKind::ServerNotice.code());
        payload.put_i32(-1);
        payload.put_i32(3);
        payload.put_u32(10);
        payload.put_slice(b"abc");
        assert!(matches!(
            Record::decode(&payload),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_body() {
        let mut payload = BytesMut::new();
        payload.put_i32(RecordKind::SendMessage.code());
        payload.put_i32(1);
        payload.put_i32(2);
        payload.put_u32(2);
        payload.put_slice(&[0xC3, 0x28]);
        assert!(matches!(
            Record::decode(&payload),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(
            Record::decode(&[0, 0, 0, 1]),
            Err(WireError::Malformed(_))
        ));
    }
}
