//! Length-prefixed envelopes for carrying posted values over byte streams.

use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;

use crate::error::{Result, TransportError};

/// Envelope header: magic (2) + body length (4).
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "BP" (0x42 0x50).
pub const MAGIC: [u8; 2] = [0x42, 0x50];

/// Default maximum envelope body: 16 MiB.
pub const DEFAULT_MAX_ENVELOPE: usize = 16 * 1024 * 1024;

/// Encode a value as one envelope.
///
/// ```text
/// ┌────────────┬────────────┬──────────────────────┐
/// │ Magic (2B) │ Length     │ Body (JSON, Length B) │
/// │ "BP"       │ (4B LE)    │                       │
/// └────────────┴────────────┴──────────────────────┘
/// ```
pub fn encode_envelope(value: &Value, max_body: usize, dst: &mut BytesMut) -> Result<()> {
    let body = serde_json::to_vec(value)?;
    if body.len() > max_body || body.len() > u32::MAX as usize {
        return Err(TransportError::EnvelopeTooLarge {
            size: body.len(),
            max: max_body.min(u32::MAX as usize),
        });
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(body.len() as u32);
    dst.put_slice(&body);
    Ok(())
}

/// Decode one envelope from the front of `src`.
///
/// Returns `Ok(None)` until a complete envelope is buffered; consumes the
/// envelope bytes on success.
pub fn decode_envelope(src: &mut BytesMut, max_body: usize) -> Result<Option<Value>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let mut header = &src[2..HEADER_SIZE];
    let body_len = header.get_u32_le() as usize;
    if body_len > max_body {
        return Err(TransportError::EnvelopeTooLarge {
            size: body_len,
            max: max_body,
        });
    }
    if src.len() < HEADER_SIZE + body_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(body_len).freeze();
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_waits_for_complete_header_and_body() {
        let mut wire = BytesMut::new();
        encode_envelope(&json!({"k": "v"}), DEFAULT_MAX_ENVELOPE, &mut wire).unwrap();
        let full = wire.clone();

        let mut partial = BytesMut::from(&full[..3]);
        assert!(decode_envelope(&mut partial, DEFAULT_MAX_ENVELOPE)
            .unwrap()
            .is_none());

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(decode_envelope(&mut partial, DEFAULT_MAX_ENVELOPE)
            .unwrap()
            .is_none());
        assert_eq!(partial.len(), full.len() - 1, "nothing consumed");
    }

    #[test]
    fn consecutive_envelopes_decode_in_order() {
        let mut wire = BytesMut::new();
        encode_envelope(&json!(1), DEFAULT_MAX_ENVELOPE, &mut wire).unwrap();
        encode_envelope(&json!("two"), DEFAULT_MAX_ENVELOPE, &mut wire).unwrap();

        let first = decode_envelope(&mut wire, DEFAULT_MAX_ENVELOPE).unwrap();
        let second = decode_envelope(&mut wire, DEFAULT_MAX_ENVELOPE).unwrap();
        assert_eq!(first, Some(json!(1)));
        assert_eq!(second, Some(json!("two")));
        assert!(wire.is_empty());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut wire = BytesMut::from(&[0xFF, 0xFF, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_envelope(&mut wire, DEFAULT_MAX_ENVELOPE),
            Err(TransportError::InvalidMagic)
        ));
    }

    #[test]
    fn oversized_envelope_is_rejected_both_ways() {
        let mut wire = BytesMut::new();
        let big = json!("x".repeat(64));
        assert!(matches!(
            encode_envelope(&big, 16, &mut wire),
            Err(TransportError::EnvelopeTooLarge { .. })
        ));

        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u32_le(1024);
        assert!(matches!(
            decode_envelope(&mut wire, 16),
            Err(TransportError::EnvelopeTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn malformed_json_body_is_an_error() {
        let mut wire = BytesMut::new();
        wire.put_slice(&MAGIC);
        wire.put_u32_le(3);
        wire.put_slice(b"{no");
        assert!(matches!(
            decode_envelope(&mut wire, DEFAULT_MAX_ENVELOPE),
            Err(TransportError::Json(_))
        ));
    }
}
