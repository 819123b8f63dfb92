use crate::*;

// ============================================================================
//  BYTE ORDER
// ============================================================================

#[test]
fn test_integers_are_big_endian() {
    let mut enc = Encoder::new();
    enc.u16(0x0102);
    enc.u32(0x0304_0506);
    enc.u64(0x0708_090A_0B0C_0D0E);

    assert_eq!(
        enc.as_bytes(),
        &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E]
    );
}

#[test]
fn test_signed_and_float_roundtrip() -> Result<()> {
    let mut enc = Encoder::new();
    enc.i8(i8::MIN);
    enc.i16(-2);
    enc.i32(i32::MIN);
    enc.i64(i64::MAX);
    enc.f32(1.5);
    enc.f64(std::f64::consts::PI);
    enc.char('🦀');
    enc.bool(true);

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);

    assert_eq!(dec.i8()?, i8::MIN);
    assert_eq!(dec.i16()?, -2);
    assert_eq!(dec.i32()?, i32::MIN);
    assert_eq!(dec.i64()?, i64::MAX);
    assert_eq!(dec.f32()?, 1.5);
    assert_eq!(dec.f64()?, std::f64::consts::PI);
    assert_eq!(dec.char()?, '🦀');
    assert!(dec.bool()?);
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

// ============================================================================
//  SINK / SOURCE CONTRACT
// ============================================================================

#[test]
fn test_allocate_does_not_write() {
    let mut enc = Encoder::new();
    enc.allocate(1024);
    assert_eq!(enc.size(), 0);

    enc.write_bytes(&[1, 2, 3]);
    enc.write_bytes(&[4]);
    assert_eq!(enc.size(), 4);
    assert_eq!(enc.as_bytes(), &[1, 2, 3, 4]);
}

#[test]
fn test_read_past_end_is_an_error() {
    let bytes = [0xAA, 0xBB];
    let mut dec = Decoder::new(&bytes);

    assert_eq!(dec.u32(), Err(Error::UnexpectedEnd { wanted: 4, remaining: 2 }));
    // A failed read leaves the cursor untouched.
    assert_eq!(dec.tell(), 0);
    assert_eq!(dec.u16(), Ok(0xAABB));
    assert_eq!(dec.u8(), Err(Error::UnexpectedEnd { wanted: 1, remaining: 0 }));
}

#[test]
fn test_truncated_string_restores_cursor() {
    let mut enc = Encoder::new();
    enc.u32(10);
    enc.write_bytes(b"abc");
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes);
    assert!(matches!(dec.str(), Err(Error::UnexpectedEnd { .. })));
    assert_eq!(dec.tell(), 0);
}

#[test]
fn test_take_rest() -> Result<()> {
    let bytes = [0, 1, 9, 9, 9];
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.u16()?, 1);
    assert_eq!(dec.rest(), &[9, 9, 9]);
    assert_eq!(dec.take_rest(), &[9, 9, 9]);
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

// ============================================================================
//  BLOBS
// ============================================================================

#[test]
fn test_strings_and_bytes() -> Result<()> {
    let mut enc = Encoder::new();
    enc.str("hello")?;
    enc.str("")?;
    enc.bytes(&[1, 2, 3])?;

    let bytes = enc.into_bytes();
    assert_eq!(&bytes[..4], &[0, 0, 0, 5]);

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str()?, "hello");
    assert_eq!(dec.str()?, "");
    assert_eq!(dec.bytes()?, &[1, 2, 3]);
    Ok(())
}

#[test]
fn test_invalid_utf8() {
    let mut enc = Encoder::new();
    enc.bytes(&[0xFF, 0xFE]).unwrap();
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str(), Err(Error::InvalidUtf8));
}

#[test]
fn test_invalid_bool_and_char() {
    let mut dec = Decoder::new(&[7]);
    assert_eq!(dec.bool(), Err(Error::InvalidBool(7)));

    let surrogate = 0xD800u32.to_be_bytes();
    let mut dec = Decoder::new(&surrogate);
    assert_eq!(dec.char(), Err(Error::InvalidChar(0xD800)));
}

// ============================================================================
//  PACK / UNPACK
// ============================================================================

#[test]
fn test_tuple_packs_in_declared_order() -> Result<()> {
    let mut enc = Encoder::new();
    enc.pack(&(1u8, 2u16, "three"))?;

    assert_eq!(enc.as_bytes(), &[1, 0, 2, 0, 0, 0, 5, b't', b'h', b'r', b'e', b'e']);

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);
    let (a, b, c): (u8, u16, String) = dec.unpack()?;
    assert_eq!((a, b, c.as_str()), (1, 2, "three"));
    Ok(())
}

#[test]
fn test_unit_is_empty() -> Result<()> {
    let mut enc = Encoder::new();
    enc.pack(&())?;
    assert_eq!(enc.size(), 0);

    let mut dec = Decoder::new(&[]);
    dec.unpack::<()>()?;
    Ok(())
}

#[test]
fn test_nested_containers() -> Result<()> {
    let value: Vec<Option<(u32, String)>> = vec![
        Some((1, "a".into())),
        None,
        Some((3, "ccc".into())),
    ];

    let mut enc = Encoder::new();
    enc.pack(&value)?;
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes);
    let decoded: Vec<Option<(u32, String)>> = dec.unpack()?;
    assert_eq!(decoded, value);
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

#[test]
fn test_bytes_newtype_matches_vec_u8_layout() -> Result<()> {
    let mut a = Encoder::new();
    a.pack(&Bytes(vec![9, 8, 7]))?;

    let mut b = Encoder::new();
    b.pack(&vec![9u8, 8, 7])?;

    assert_eq!(a.as_bytes(), b.as_bytes());
    Ok(())
}

#[test]
fn test_invalid_option_discriminant() {
    let mut dec = Decoder::new(&[2, 0, 0]);
    assert_eq!(dec.unpack::<Option<u16>>(), Err(Error::InvalidOption(2)));
}

#[test]
fn test_huge_sequence_count_fails_cleanly() {
    // Claims u32::MAX items but carries none.
    let mut dec = Decoder::new(&[0xFF, 0xFF, 0xFF, 0xFF]);
    assert!(matches!(dec.unpack::<Vec<u64>>(), Err(Error::UnexpectedEnd { .. })));
}
