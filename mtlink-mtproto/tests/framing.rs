use mtlink_mtproto::transport::{Codec, FrameError, Framing, crc32, transport_error_code};

/// Feed `wire` through the codec the way the async transport does.
fn read_frame(codec: &mut Codec, wire: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut at = codec.header_len();
    let extra = codec.extended_header_len(&wire[..at]);
    let header = &wire[..at + extra];
    at += extra;
    let len = codec.body_len(header)?;
    let body = wire[at..at + len].to_vec();
    assert_eq!(at + len, wire.len(), "frame length");
    codec.decode(header, body)
}

#[test]
fn crc32_check_value() {
    assert_eq!(crc32(b"123456789"), 0xcbf43926);
}

#[test]
fn abridged_short_and_long_headers() {
    let mut codec = Codec::new(Framing::Abridged);

    let short = vec![7u8; 8];
    let wire = codec.encode(&short);
    assert_eq!(wire[0], 2);
    assert_eq!(read_frame(&mut codec, &wire).unwrap(), short);

    let long = vec![9u8; 0x7f * 4 + 4];
    let wire = codec.encode(&long);
    assert_eq!(&wire[..4], &[0x7f, 0x80, 0x00, 0x00]);
    assert_eq!(read_frame(&mut codec, &wire).unwrap(), long);
}

#[test]
fn intermediate_prefixes_byte_length() {
    let mut codec = Codec::new(Framing::Intermediate);
    let wire = codec.encode(&[1, 2, 3, 4]);
    assert_eq!(&wire[..4], &4u32.to_le_bytes());
    assert_eq!(read_frame(&mut codec, &wire).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(Framing::Intermediate.init_bytes(), &[0xee; 4]);
}

#[test]
fn full_frames_carry_seq_and_crc() {
    let mut tx = Codec::new(Framing::Full);
    let mut rx = Codec::new(Framing::Full);

    let first = tx.encode(b"abcd");
    let second = tx.encode(b"efgh");
    assert_eq!(&first[..4], &16u32.to_le_bytes());
    assert_eq!(&second[4..8], &1u32.to_le_bytes());

    assert_eq!(read_frame(&mut rx, &first).unwrap(), b"abcd");
    assert_eq!(read_frame(&mut rx, &second).unwrap(), b"efgh");
}

#[test]
fn full_frame_corruption_is_detected() {
    let mut tx = Codec::new(Framing::Full);
    let mut wire = tx.encode(b"abcd");
    wire[9] ^= 0xff;
    let mut rx = Codec::new(Framing::Full);
    assert!(matches!(read_frame(&mut rx, &wire), Err(FrameError::Crc { .. })));
}

#[test]
fn full_frame_out_of_sequence_is_detected() {
    let mut tx = Codec::new(Framing::Full);
    let _skipped = tx.encode(b"abcd");
    let wire = tx.encode(b"efgh");
    let mut rx = Codec::new(Framing::Full);
    assert_eq!(read_frame(&mut rx, &wire), Err(FrameError::Seq { expected: 0, got: 1 }));
}

#[test]
fn transport_error_frames() {
    assert_eq!(transport_error_code(&(-404i32).to_le_bytes()), Some(404));
    assert_eq!(transport_error_code(&[0; 8]), None);
}

#[test]
fn full_framing_cannot_be_obfuscated() {
    assert_eq!(Framing::Abridged.obfuscation_tag(), Some([0xef; 4]));
    assert_eq!(Framing::Full.obfuscation_tag(), None);
}
