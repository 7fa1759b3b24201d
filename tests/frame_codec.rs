//! Integration-level frame codec scenarios exercised through the
//! public `stormsocket::ws` API: streaming decode across arbitrary
//! chunk boundaries and a mixed control/data stream, distinct from the
//! exhaustive single-frame coverage in the codec's own unit tests
//! (spec.md §4.4).

use stormsocket::ws::{decode, encode, CloseCode, OpCode, WsFrame};

/// Feeds `wire` into `decode` one byte at a time, proving the codec
/// never needs more than the bytes it has actually been given.
fn decode_streaming(wire: &[u8]) -> Vec<WsFrame> {
    let mut buffer = Vec::new();
    let mut frames = Vec::new();
    for &byte in wire {
        buffer.push(byte);
        while let Some(frame) = decode(&mut buffer, 1 << 20).unwrap() {
            frames.push(frame);
        }
    }
    assert!(buffer.is_empty(), "trailing bytes left undecoded: {buffer:?}");
    frames
}

#[test]
fn decodes_a_message_fed_one_byte_at_a_time() {
    let mut wire = Vec::new();
    encode(&WsFrame::text(b"streamed".to_vec()), false, &mut wire);

    let frames = decode_streaming(&wire);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, OpCode::Text);
    assert_eq!(frames[0].payload, b"streamed");
}

#[test]
fn decodes_interleaved_data_and_control_frames_in_order() {
    let mut wire = Vec::new();
    encode(&WsFrame::text(b"hello".to_vec()), false, &mut wire);
    encode(&WsFrame::ping(b"are you there".to_vec()), false, &mut wire);
    encode(&WsFrame::text(b"world".to_vec()), false, &mut wire);
    encode(&WsFrame::close(CloseCode::NormalClosure), false, &mut wire);

    let frames = decode_streaming(&wire);
    let opcodes: Vec<OpCode> = frames.iter().map(|f| f.opcode).collect();
    assert_eq!(
        opcodes,
        vec![OpCode::Text, OpCode::Ping, OpCode::Text, OpCode::Close]
    );
    assert_eq!(frames[0].payload, b"hello");
    assert_eq!(frames[2].payload, b"world");
    assert_eq!(frames[3].close_status(), CloseCode::NormalClosure);
}

#[test]
fn masked_client_frame_decodes_to_the_same_payload_as_unmasked() {
    let frame = WsFrame::binary(vec![10, 20, 30, 40, 50]);

    let mut masked_wire = Vec::new();
    encode(&frame, true, &mut masked_wire);
    let mut unmasked_wire = Vec::new();
    encode(&frame, false, &mut unmasked_wire);

    // A masked frame is longer on the wire (carries the 4-byte key)
    // but decodes to the identical logical payload.
    assert!(masked_wire.len() > unmasked_wire.len());
    let decoded_masked = decode(&mut masked_wire, 1 << 20).unwrap().unwrap();
    let decoded_unmasked = decode(&mut unmasked_wire, 1 << 20).unwrap().unwrap();
    assert_eq!(decoded_masked.payload, decoded_unmasked.payload);
    assert!(decoded_masked.masked);
    assert!(!decoded_unmasked.masked);
}

#[test]
fn large_binary_payload_spanning_the_two_byte_length_field_round_trips() {
    // 70000 bytes forces the 127 (8-byte) length field rather than the
    // 126 (2-byte) one, a size boundary none of the codec's own unit
    // tests exercise.
    let payload = vec![0xABu8; 70_000];
    let mut wire = Vec::new();
    encode(&WsFrame::binary(payload.clone()), false, &mut wire);

    let frames = decode_streaming(&wire);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload.len(), payload.len());
    assert_eq!(frames[0].payload, payload);
}
