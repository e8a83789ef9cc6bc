//! LDAP message frame codec.
//!
//! Implements tokio's `Decoder` and `Encoder` traits for LDAP over TCP.
//! LDAP has no separate length prefix: every message is a single BER
//! `SEQUENCE` whose own length header says how many bytes follow.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{decode_message, parse_complete, LdapMessage, ResponseFrame};

/// Maximum frame size (1 MiB by default).
const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// BER universal constructed SEQUENCE.
const SEQUENCE_TAG: u8 = 0x30;

/// Codec for LDAP messages.
#[derive(Debug, Clone)]
pub struct LdapCodec {
    max_frame_size: usize,
}

impl LdapCodec {
    /// Create a new codec with default max frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with custom max frame size.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for LdapCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

/// Read the BER header at the start of `src`.
///
/// Returns `(header_len, content_len)`, or `None` if more bytes are needed.
fn frame_header(src: &[u8]) -> io::Result<Option<(usize, usize)>> {
    if src.len() < 2 {
        return Ok(None);
    }
    if src[0] != SEQUENCE_TAG {
        return Err(invalid(format!(
            "expected LDAPMessage sequence, got tag 0x{:02x}",
            src[0]
        )));
    }

    let first = src[1];
    if first & 0x80 == 0 {
        return Ok(Some((2, usize::from(first))));
    }

    let count = usize::from(first & 0x7f);
    if count == 0 {
        return Err(invalid("indefinite length encoding is not allowed"));
    }
    if count > 4 {
        return Err(invalid(format!("length field of {count} bytes is too large")));
    }
    if src.len() < 2 + count {
        return Ok(None);
    }

    let length = src[2..2 + count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    Ok(Some((2 + count, length)))
}

impl Decoder for LdapCodec {
    type Item = LdapMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((header_len, length)) = frame_header(src)? else {
            return Ok(None);
        };

        // Validate frame size
        if length > self.max_frame_size {
            return Err(invalid(format!(
                "frame size {length} exceeds maximum {}",
                self.max_frame_size
            )));
        }

        let total = header_len + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        let tag = parse_complete(&frame).map_err(|e| invalid(e.to_string()))?;

        decode_message(tag)
            .map(Some)
            .map_err(|e| invalid(e.to_string()))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => {
                let remaining = buf.remaining();
                buf.clear();
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed with {remaining} bytes of a partial message"),
                ))
            }
        }
    }
}

impl Encoder<ResponseFrame> for LdapCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        lber::write::encode_into(dst, item.into_structure())
    }
}

#[cfg(test)]
mod tests {
    use lber::common::TagClass;
    use lber::structures::{ASNTag, Integer, OctetString, Sequence, Tag};

    use super::*;
    use crate::network::message::{op_tags, LdapOp, LdapResponse, LdapResult, ResultCode};

    /// `levels` empty SEQUENCEs, each wrapped in the next.
    fn nested_sequences(levels: usize) -> BytesMut {
        let mut lengths = vec![0usize];
        for _ in 1..levels {
            let inner = *lengths.last().unwrap();
            lengths.push(inner + 1 + length_octets(inner).len());
        }

        let mut buf = BytesMut::new();
        for length in lengths.into_iter().rev() {
            buf.extend_from_slice(&[0x30]);
            buf.extend_from_slice(&length_octets(length));
        }
        buf
    }

    fn length_octets(length: usize) -> Vec<u8> {
        if length < 0x80 {
            return vec![length as u8];
        }
        let bytes: Vec<u8> = length
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        let mut octets = vec![0x80 | bytes.len() as u8];
        octets.extend(bytes);
        octets
    }

    fn unbind_bytes(message_id: i64) -> BytesMut {
        let tag = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: message_id,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    class: TagClass::Application,
                    id: op_tags::UNBIND_REQUEST,
                    inner: vec![],
                }),
            ],
            ..Default::default()
        });
        let mut buf = BytesMut::new();
        lber::write::encode_into(&mut buf, tag.into_structure()).unwrap();
        buf
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let mut codec = LdapCodec::new();
        let full = unbind_bytes(1);

        let mut buf = BytesMut::from(&full[..1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), full.len() - 1);
    }

    #[test]
    fn test_decode_complete_frame() {
        let mut codec = LdapCodec::new();
        let mut buf = unbind_bytes(42);

        let message = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(message.message_id, 42);
        assert!(matches!(message.op, LdapOp::Unbind));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_pipelined_frames() {
        let mut codec = LdapCodec::new();
        let mut buf = unbind_bytes(1);
        buf.extend_from_slice(&unbind_bytes(2));

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.message_id, 1);
        assert_eq!(second.message_id, 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_long_form_length() {
        // SEQUENCE with a two-byte length header announcing 300 bytes.
        let mut codec = LdapCodec::new();
        let mut buf = BytesMut::from(&[0x30, 0x82, 0x01, 0x2c, 0x02][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.capacity() >= 304);
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut codec = LdapCodec::with_max_frame_size(100);
        let mut buf = BytesMut::from(&[0x30, 0x82, 0x01, 0x2c][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_decode_rejects_non_sequence() {
        let mut codec = LdapCodec::new();
        let mut buf = BytesMut::from(&[0x04, 0x01, 0x00][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_rejects_indefinite_length() {
        let mut codec = LdapCodec::new();
        let mut buf = BytesMut::from(&[0x30, 0x80, 0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_eof_with_partial_frame() {
        let mut codec = LdapCodec::new();
        let full = unbind_bytes(1);
        let mut buf = BytesMut::from(&full[..3]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_encode_bind_response() {
        let mut codec = LdapCodec::new();
        let mut dst = BytesMut::new();
        let frame = ResponseFrame::new(
            2,
            LdapResponse::Bind(LdapResult::new(ResultCode::InvalidCredentials, "no")),
        );
        codec.encode(frame, &mut dst).unwrap();

        assert_eq!(
            &dst[..],
            &[
                0x30, 0x0e, 0x02, 0x01, 0x02, 0x61, 0x09, 0x0a, 0x01, 0x31, 0x04, 0x00, 0x04,
                0x02, b'n', b'o'
            ]
        );
    }

    #[test]
    fn test_default_frame_cap() {
        let mut codec = LdapCodec::new();
        // Announces 2 MiB.
        let mut buf = BytesMut::from(&[0x30, 0x83, 0x20, 0x00, 0x00][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds maximum 1048576"));
    }

    #[test]
    fn test_decode_rejects_deep_nesting() {
        let mut codec = LdapCodec::new();
        let mut buf = nested_sequences(100);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("nested deeper than 64 levels"));
    }

    #[test]
    fn test_decode_survives_pathological_nesting() {
        // Deep enough to exhaust the stack of a recursive parser.
        let mut codec = LdapCodec::new();
        let mut buf = nested_sequences(20_000);
        assert!(buf.len() < DEFAULT_MAX_FRAME_SIZE);
        assert!(codec.decode(&mut buf).is_err());
    }
}
