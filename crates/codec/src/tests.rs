use super::*;

// -------------------- Scalar round-trips --------------------

#[test]
fn scalar_roundtrip() {
    let mut buf = Vec::new();
    write_u16(&mut buf, 0xBEEF).unwrap();
    write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
    write_u64(&mut buf, u64::MAX - 1).unwrap();

    let mut sl = Slice::new(&buf);
    assert_eq!(sl.read_u16().unwrap(), 0xBEEF);
    assert_eq!(sl.read_u32().unwrap(), 0xDEAD_BEEF);
    assert_eq!(sl.read_u64().unwrap(), u64::MAX - 1);
    assert!(sl.is_empty());
}

#[test]
fn scalars_are_little_endian() {
    let mut buf = Vec::new();
    write_u32(&mut buf, 5).unwrap();
    assert_eq!(buf, vec![0x05, 0x00, 0x00, 0x00]);

    let mut buf = Vec::new();
    write_u16(&mut buf, 0x0102).unwrap();
    assert_eq!(buf, vec![0x02, 0x01]);
}

// -------------------- EOF behavior --------------------

#[test]
fn integer_read_past_end_is_eof() {
    let mut sl = Slice::new(&[0x01, 0x02, 0x03]);
    assert_eq!(sl.read_u32(), Err(CodecError::UnexpectedEof));
    // A failed read consumes nothing.
    assert_eq!(sl.remaining(), 3);
    assert_eq!(sl.read_u16().unwrap(), 0x0201);
}

#[test]
fn read_u64_needs_eight_bytes() {
    let mut sl = Slice::new(&[0u8; 7]);
    assert_eq!(sl.read_u64(), Err(CodecError::UnexpectedEof));
}

#[test]
fn empty_slice() {
    let mut sl = Slice::new(&[]);
    assert!(sl.is_empty());
    assert_eq!(sl.remaining(), 0);
    assert_eq!(sl.read_u8(), Err(CodecError::UnexpectedEof));
}

// -------------------- Blobs --------------------

#[test]
fn blob_roundtrip() {
    let mut buf = Vec::new();
    write_blob(&mut buf, b"hello").unwrap();
    write_blob(&mut buf, b"").unwrap();
    write_blob(&mut buf, b"world").unwrap();

    let mut sl = Slice::new(&buf);
    assert_eq!(sl.read_blob().unwrap(), b"hello");
    assert_eq!(sl.read_blob().unwrap(), b"");
    assert_eq!(sl.read_blob().unwrap(), b"world");
    assert!(sl.is_empty());
}

#[test]
fn blob_overrun_reports_lengths() {
    // Declared length 10, only 5 bytes follow.
    let mut buf = Vec::new();
    write_u32(&mut buf, 10).unwrap();
    buf.extend_from_slice(b"short");

    let mut sl = Slice::new(&buf);
    assert_eq!(
        sl.read_blob(),
        Err(CodecError::BlobOverrun {
            declared: 10,
            remaining: 5
        })
    );
}

#[test]
fn blob_with_truncated_length_prefix_is_eof() {
    let mut sl = Slice::new(&[0x05, 0x00]);
    assert_eq!(sl.read_blob(), Err(CodecError::UnexpectedEof));
}

// -------------------- Cursor ops --------------------

#[test]
fn skip_and_pos() {
    let mut sl = Slice::new(b"abcdef");
    sl.skip(2).unwrap();
    assert_eq!(sl.pos(), 2);
    assert_eq!(sl.read_exact(3).unwrap(), b"cde");
    assert_eq!(sl.remaining(), 1);
    assert_eq!(sl.skip(2), Err(CodecError::UnexpectedEof));
    sl.skip(1).unwrap();
    assert!(sl.is_empty());
}

#[test]
fn read_exact_borrows_input() {
    let data = b"payload".to_vec();
    let mut sl = Slice::new(&data);
    let head = sl.read_exact(3).unwrap();
    let tail = sl.read_exact(4).unwrap();
    assert_eq!(head, b"pay");
    assert_eq!(tail, b"load");
}

// -------------------- Checksum --------------------

#[test]
fn checksum_is_stable_crc32() {
    // Known CRC-32 (IEEE) test vector.
    assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    assert_eq!(checksum(b""), 0);
}

#[test]
fn checksum_detects_single_bit_flip() {
    let a = checksum(b"block payload");
    let b = checksum(b"block qayload");
    assert_ne!(a, b);
}
