//! Integration tests for the robot-core protocol codec.
//!
//! These tests drive the public API the way the channel does: tokens come
//! from a [`TokenAllocator`], envelopes are framed as text for sending, and
//! replies may arrive either framed or as raw binary.

use robot_core::{
    decode_envelope, decode_frame, encode_envelope, encode_frame, CorrelationToken, Envelope,
    ProtocolError, TokenAllocator, TARGET_UNSUPPORTED,
};

/// Frames an envelope as text and parses it back.
fn roundtrip(env: Envelope) -> Envelope {
    let frame = encode_frame(&env).expect("encode must succeed");
    decode_frame(&frame).expect("decode must succeed")
}

#[test]
fn test_roundtrip_request_with_fresh_token() {
    let tokens = TokenAllocator::new();
    let original = Envelope::request(1, tokens.next(), b"play action: wave".to_vec());

    assert_eq!(original, roundtrip(original.clone()));
}

#[test]
fn test_roundtrip_fire_and_forget() {
    let original = Envelope::fire_and_forget(42, vec![0x08, 0x01]);

    let decoded = roundtrip(original.clone());

    assert_eq!(original, decoded);
    assert!(decoded.token.is_fire_and_forget());
}

#[test]
fn test_roundtrip_unsupported_reply() {
    let original = Envelope::unsupported(9001, CorrelationToken::from(12u64));

    let decoded = roundtrip(original.clone());

    assert_eq!(decoded.target, TARGET_UNSUPPORTED);
    assert_eq!(original, decoded);
}

#[test]
fn test_roundtrip_arbitrary_target_is_echoed() {
    let original = Envelope {
        command: u32::MAX,
        token: CorrelationToken::from(u64::MAX),
        target: i32::MIN,
        payload: (0..=255).collect(),
    };

    assert_eq!(original, roundtrip(original.clone()));
}

#[test]
fn test_roundtrip_large_payload() {
    // A camera frame sized payload
    let original = Envelope::request(
        30,
        CorrelationToken::from(3u64),
        vec![0xA5; 512 * 1024],
    );

    assert_eq!(original, roundtrip(original.clone()));
}

#[test]
fn test_binary_and_text_forms_decode_to_same_envelope() {
    // Arrange
    let original = Envelope::request(5, CorrelationToken::from(77u64), b"xyz".to_vec());

    // Act
    let from_binary = decode_envelope(&encode_envelope(&original).unwrap()).unwrap();
    let from_text = decode_frame(&encode_frame(&original).unwrap()).unwrap();

    // Assert
    assert_eq!(from_binary, from_text);
}

#[test]
fn test_tokens_from_allocator_survive_framing_in_order() {
    let tokens = TokenAllocator::new();

    let decoded: Vec<String> = (0..5)
        .map(|_| roundtrip(Envelope::request(1, tokens.next(), Vec::new())))
        .map(|env| env.token.into_string())
        .collect();

    assert_eq!(decoded, vec!["1", "2", "3", "4", "5"]);
}

#[test]
fn test_corrupted_frame_is_reported_not_panicking() {
    // Arrange – flip a character inside the base64 body so the header breaks
    let frame = encode_frame(&Envelope::request(1, CorrelationToken::from(1u64), Vec::new()))
        .unwrap();
    let corrupted = format!("////{}", &frame[4..]);

    // Act
    let result = decode_frame(&corrupted);

    // Assert
    assert!(matches!(
        result,
        Err(ProtocolError::UnsupportedVersion(_)) | Err(ProtocolError::MalformedEnvelope(_))
    ));
}
