//! Binary codec and text framing for [`Envelope`]s.
//!
//! Binary layout:
//! ```text
//! [version:1][reserved:1][command:4][target:4][token_len:2][token:N][payload_len:4][payload:M]
//! ```
//! All multi-byte integers are big-endian.
//!
//! # Framing
//!
//! The transport carries exactly one envelope per WebSocket message, so the
//! codec never has to search for message boundaries.  Robots accept two
//! shapes:
//!
//! - **Text frames**: the binary envelope, base64-encoded, followed by a single
//!   `&` terminator.  This is what the client sends.
//! - **Binary frames**: the raw binary envelope.  Some firmware answers this
//!   way, so the reader accepts both.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

use crate::protocol::envelope::{Envelope, FIXED_HEADER_SIZE, PAYLOAD_LEN_SIZE, PROTOCOL_VERSION};
use crate::protocol::token::CorrelationToken;

/// Terminator appended to every text frame.
pub const FRAME_TERMINATOR: char = '&';

/// Errors that can occur while encoding or decoding an envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The version byte is not one this codec understands.
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// The bytes do not form a valid envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A text frame was not valid base64.
    #[error("invalid base64 frame: {0}")]
    InvalidBase64(String),

    /// The correlation token does not fit the 2-byte length prefix.
    #[error("correlation token is {0} bytes, the limit is 65535")]
    TokenTooLong(usize),

    /// The payload does not fit the 4-byte length prefix.
    #[error("payload is {0} bytes, the limit is 4294967295")]
    PayloadTooLarge(usize),
}

// ── Binary envelope ───────────────────────────────────────────────────────────

/// Encodes an [`Envelope`] into its binary form.
///
/// # Errors
///
/// Returns [`ProtocolError::TokenTooLong`] or [`ProtocolError::PayloadTooLarge`]
/// when a length does not fit its prefix.
///
/// # Examples
///
/// ```rust
/// use robot_core::protocol::{decode_envelope, encode_envelope, CorrelationToken, Envelope};
///
/// let env = Envelope::request(3, CorrelationToken::from(1u64), b"hello".to_vec());
/// let bytes = encode_envelope(&env).unwrap();
/// assert_eq!(decode_envelope(&bytes).unwrap(), env);
/// ```
pub fn encode_envelope(env: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let token = env.token.as_str().as_bytes();
    let token_len =
        u16::try_from(token.len()).map_err(|_| ProtocolError::TokenTooLong(token.len()))?;
    let payload_len = u32::try_from(env.payload.len())
        .map_err(|_| ProtocolError::PayloadTooLarge(env.payload.len()))?;

    let mut buf =
        Vec::with_capacity(FIXED_HEADER_SIZE + token.len() + PAYLOAD_LEN_SIZE + env.payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(0x00); // reserved
    buf.extend_from_slice(&env.command.to_be_bytes());
    buf.extend_from_slice(&env.target.to_be_bytes());
    buf.extend_from_slice(&token_len.to_be_bytes());
    buf.extend_from_slice(token);
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&env.payload);
    Ok(buf)
}

/// Decodes one binary envelope.  The slice must contain exactly one envelope.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are short, carry an unknown version,
/// contain a non-UTF-8 token, or have bytes left over after the payload.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    if bytes.len() < FIXED_HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: FIXED_HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    // bytes[1] is reserved – ignored on decode

    let command = read_u32(bytes, 2)?;
    let target = read_u32(bytes, 6)? as i32;
    let (token, payload_len_at) = read_length_prefixed_string(bytes, 10)?;

    let payload_len = read_u32(bytes, payload_len_at)? as usize;
    let payload_start = payload_len_at + PAYLOAD_LEN_SIZE;
    let payload_end = payload_start
        .checked_add(payload_len)
        .ok_or_else(|| ProtocolError::MalformedEnvelope("payload length overflow".to_string()))?;

    if bytes.len() < payload_end {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "payload declares {payload_len} bytes, only {} available",
            bytes.len() - payload_start
        )));
    }
    if bytes.len() > payload_end {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "{} trailing bytes after payload",
            bytes.len() - payload_end
        )));
    }

    Ok(Envelope {
        command,
        token: CorrelationToken::from(token),
        target,
        payload: bytes[payload_start..payload_end].to_vec(),
    })
}

// ── Text framing ──────────────────────────────────────────────────────────────

/// Encodes an envelope as a text frame: base64 of the binary form plus `&`.
///
/// # Errors
///
/// Propagates [`encode_envelope`] errors.
pub fn encode_frame(env: &Envelope) -> Result<String, ProtocolError> {
    let bytes = encode_envelope(env)?;
    let mut frame = STANDARD.encode(bytes);
    frame.push(FRAME_TERMINATOR);
    Ok(frame)
}

/// Decodes a text frame produced by [`encode_frame`].
///
/// The trailing `&` is stripped when present; a frame without it is still
/// accepted.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidBase64`] for bad base64 and any
/// [`decode_envelope`] error for a bad envelope.
pub fn decode_frame(frame: &str) -> Result<Envelope, ProtocolError> {
    let body = frame.trim_end();
    let body = body.strip_suffix(FRAME_TERMINATOR).unwrap_or(body);
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))?;
    decode_envelope(&bytes)
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    if buf.len() < offset + 4 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        });
    }
    Ok(u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::InsufficientData {
            needed: offset + 2,
            available: buf.len(),
        });
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedEnvelope(format!(
            "token of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedEnvelope(format!("token is not UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::TARGET_UNSUPPORTED;

    fn sample() -> Envelope {
        Envelope::request(0x0102_0304, CorrelationToken::from(17u64), vec![0xDE, 0xAD, 0xBE, 0xEF])
    }

    #[test]
    fn test_encode_writes_header_fields_big_endian() {
        // Arrange
        let env = sample();

        // Act
        let bytes = encode_envelope(&env).unwrap();

        // Assert
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], 0x00, "reserved byte must be zero");
        assert_eq!(&bytes[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[6..10], &0i32.to_be_bytes());
        assert_eq!(&bytes[10..12], &2u16.to_be_bytes(), "token \"17\" is 2 bytes");
        assert_eq!(&bytes[12..14], b"17");
        assert_eq!(&bytes[14..18], &4u32.to_be_bytes());
        assert_eq!(&bytes[18..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_binary_round_trip() {
        let env = sample();
        let decoded = decode_envelope(&encode_envelope(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_unsupported_target_survives_round_trip() {
        let env = Envelope::unsupported(5, CorrelationToken::from(9u64));
        let decoded = decode_envelope(&encode_envelope(&env).unwrap()).unwrap();
        assert_eq!(decoded.target, TARGET_UNSUPPORTED);
        assert!(decoded.is_unsupported());
    }

    #[test]
    fn test_empty_payload_and_empty_token_round_trip() {
        let env = Envelope::request(1, CorrelationToken::from(""), Vec::new());
        assert_eq!(decode_envelope(&encode_envelope(&env).unwrap()).unwrap(), env);
    }

    #[test]
    fn test_decode_rejects_short_header() {
        let result = decode_envelope(&[PROTOCOL_VERSION, 0, 0]);
        assert_eq!(
            result,
            Err(ProtocolError::InsufficientData {
                needed: FIXED_HEADER_SIZE,
                available: 3
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut bytes = encode_envelope(&sample()).unwrap();
        bytes[0] = 0x7F;
        assert_eq!(decode_envelope(&bytes), Err(ProtocolError::UnsupportedVersion(0x7F)));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        // Arrange – drop the last payload byte
        let mut bytes = encode_envelope(&sample()).unwrap();
        bytes.pop();

        // Act
        let result = decode_envelope(&bytes);

        // Assert
        assert!(matches!(result, Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode_envelope(&sample()).unwrap();
        bytes.push(0x00);
        assert!(matches!(decode_envelope(&bytes), Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_non_utf8_token() {
        // Arrange – overwrite the token bytes "17" with invalid UTF-8
        let mut bytes = encode_envelope(&sample()).unwrap();
        bytes[12] = 0xFF;
        bytes[13] = 0xFE;

        // Act / Assert
        assert!(matches!(decode_envelope(&bytes), Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_token_length_past_end() {
        let mut bytes = encode_envelope(&sample()).unwrap();
        bytes[10] = 0xFF;
        bytes[11] = 0xFF;
        assert!(matches!(decode_envelope(&bytes), Err(ProtocolError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_token() {
        let long = "9".repeat(u16::MAX as usize + 1);
        let env = Envelope::request(1, CorrelationToken::from(long.as_str()), Vec::new());
        assert_eq!(encode_envelope(&env), Err(ProtocolError::TokenTooLong(long.len())));
    }

    #[test]
    fn test_frame_ends_with_terminator() {
        let frame = encode_frame(&sample()).unwrap();
        assert!(frame.ends_with(FRAME_TERMINATOR));
        assert!(!frame[..frame.len() - 1].contains(FRAME_TERMINATOR));
    }

    #[test]
    fn test_frame_round_trip() {
        let env = sample();
        assert_eq!(decode_frame(&encode_frame(&env).unwrap()).unwrap(), env);
    }

    #[test]
    fn test_frame_without_terminator_is_accepted() {
        // Arrange
        let env = sample();
        let frame = encode_frame(&env).unwrap();
        let bare = frame.trim_end_matches(FRAME_TERMINATOR);

        // Act / Assert
        assert_eq!(decode_frame(bare).unwrap(), env);
    }

    #[test]
    fn test_frame_rejects_invalid_base64() {
        assert!(matches!(decode_frame("not base64!&"), Err(ProtocolError::InvalidBase64(_))));
    }

    #[test]
    fn test_frame_rejects_valid_base64_of_garbage() {
        // "AAAA" decodes to three zero bytes: too short for a header
        assert!(matches!(
            decode_frame("AAAA&"),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }
}
