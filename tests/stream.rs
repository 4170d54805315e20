//! Bit-stream primitive tests: every write has an exact inverse read, the
//! variable-byte encoding is the identity with the predicted length, and
//! atom boundaries resynchronize the reader.

use proptest::prelude::*;

use til::bytecode::{BitReader, BitWriter};

/// Runs `write` into a buffer, flushes, and returns the bytes.
fn encode(write: impl FnOnce(&mut BitWriter<&mut Vec<u8>>)) -> Vec<u8> {
    let mut out = Vec::new();
    let mut w = BitWriter::new(&mut out);
    write(&mut w);
    w.flush().expect("flush");
    drop(w);
    out
}

// ---------------------------------------------------------------------------
// 1. Fixed-width bit round-trips
// ---------------------------------------------------------------------------
#[test]
fn test_bits_roundtrip_mixed_widths() {
    let bytes = encode(|w| {
        w.write_bits32(1, 1).unwrap();
        w.write_bits32(0b101, 3).unwrap();
        w.write_bits32(19, 6).unwrap();
        w.write_bits32(0xABCD, 16).unwrap();
        w.write_bits32(u32::MAX, 32).unwrap();
        w.write_bits64(0x0123_4567_89AB_CDEF, 64).unwrap();
        w.write_bits64(0x1_FFFF_FFFF, 33).unwrap();
    });
    let mut r = BitReader::new(bytes.as_slice());
    assert_eq!(r.read_bits32(1).unwrap(), 1);
    assert_eq!(r.read_bits32(3).unwrap(), 0b101);
    assert_eq!(r.read_bits32(6).unwrap(), 19);
    assert_eq!(r.read_bits32(16).unwrap(), 0xABCD);
    assert_eq!(r.read_bits32(32).unwrap(), u32::MAX);
    assert_eq!(r.read_bits64(64).unwrap(), 0x0123_4567_89AB_CDEF);
    assert_eq!(r.read_bits64(33).unwrap(), 0x1_FFFF_FFFF);
}

// ---------------------------------------------------------------------------
// 2. Typed primitives round-trip in sequence
// ---------------------------------------------------------------------------
#[test]
fn test_typed_primitives_roundtrip() {
    let bytes = encode(|w| {
        w.write_bool(true).unwrap();
        w.write_bool(false).unwrap();
        w.write_u8(0xFE).unwrap();
        w.write_u16(40_000).unwrap();
        w.write_u32(3_000_000_000).unwrap();
        w.write_u64(u64::MAX).unwrap();
        w.write_i8(-1).unwrap();
        w.write_i16(-32_768).unwrap();
        w.write_i32(-7).unwrap();
        w.write_i64(i64::MIN).unwrap();
        w.write_f32(1.5).unwrap();
        w.write_f64(-2.25e300).unwrap();
        w.write_str("atoms & bits").unwrap();
        w.write_str("").unwrap();
    });
    let mut r = BitReader::new(bytes.as_slice());
    assert!(r.read_bool().unwrap());
    assert!(!r.read_bool().unwrap());
    assert_eq!(r.read_u8().unwrap(), 0xFE);
    assert_eq!(r.read_u16().unwrap(), 40_000);
    assert_eq!(r.read_u32().unwrap(), 3_000_000_000);
    assert_eq!(r.read_u64().unwrap(), u64::MAX);
    assert_eq!(r.read_i8().unwrap(), -1);
    assert_eq!(r.read_i16().unwrap(), -32_768);
    assert_eq!(r.read_i32().unwrap(), -7);
    assert_eq!(r.read_i64().unwrap(), i64::MIN);
    assert_eq!(r.read_f32().unwrap(), 1.5);
    assert_eq!(r.read_f64().unwrap(), -2.25e300);
    assert_eq!(r.read_str().unwrap(), "atoms & bits");
    assert_eq!(r.read_str().unwrap(), "");
}

// ---------------------------------------------------------------------------
// 3. Atom boundaries byte-align and resynchronize
// ---------------------------------------------------------------------------
#[test]
fn test_atom_boundary_resynchronizes() {
    let bytes = encode(|w| {
        w.write_bits32(0b10110, 5).unwrap();
        w.end_atom().unwrap();
        w.write_u8(0x42).unwrap();
        w.end_atom().unwrap();
    });
    // 5 bits pad to one byte, so the u8 lands on the second byte.
    assert_eq!(bytes.len(), 2);
    assert_eq!(bytes[1], 0x42);
    assert!(
        til::bytecode::dump_bytes(&bytes).starts_with("000000:"),
        "hex dump should label offsets"
    );

    let mut r = BitReader::new(bytes.as_slice());
    assert_eq!(r.read_bits32(5).unwrap(), 0b10110);
    r.end_atom().unwrap();
    assert_eq!(r.read_u8().unwrap(), 0x42);
    r.end_atom().unwrap();
    assert!(r.empty(), "all atoms consumed");
}

// ---------------------------------------------------------------------------
// 4. Truncation is an error, not a panic
// ---------------------------------------------------------------------------
#[test]
fn test_truncated_read_fails() {
    let bytes = encode(|w| w.write_u8(0x7F).unwrap());
    let mut r = BitReader::new(bytes.as_slice());
    assert_eq!(r.read_u8().unwrap(), 0x7F);
    assert!(r.read_u8().is_err(), "reading past the end must fail");
}

// ---------------------------------------------------------------------------
// 5. Large payloads cross buffer boundaries intact
// ---------------------------------------------------------------------------
#[test]
fn test_large_payload_crosses_buffers() {
    let big: String = "x".repeat(200_000);
    let bytes = encode(|w| {
        w.write_str(&big).unwrap();
        w.end_atom().unwrap();
        w.write_u32(7).unwrap();
        w.end_atom().unwrap();
    });
    let mut r = BitReader::new(bytes.as_slice());
    assert_eq!(r.read_str().unwrap(), big);
    r.end_atom().unwrap();
    assert_eq!(r.read_u32().unwrap(), 7);
}

// ---------------------------------------------------------------------------
// 6. Variable-byte encoded length is ceil(bits/7)
// ---------------------------------------------------------------------------
#[test]
fn test_vbr_encoded_length() {
    for (value, expected_len) in [
        (0u64, 1),
        (1, 1),
        (127, 1),
        (128, 2),
        (16_383, 2),
        (16_384, 3),
        (u32::MAX as u64, 5),
        (u64::MAX, 10),
    ] {
        let bytes = encode(|w| w.write_vbr64(value).unwrap());
        assert_eq!(
            bytes.len(),
            expected_len,
            "encoded length of {} should be {}",
            value,
            expected_len
        );
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

/// A sequence of (width, value) pairs with the value masked to the width.
fn bit_runs() -> impl Strategy<Value = Vec<(u32, u64)>> {
    prop::collection::vec(
        (1u32..=64).prop_flat_map(|w| {
            let mask = if w == 64 { u64::MAX } else { (1u64 << w) - 1 };
            (Just(w), any::<u64>().prop_map(move |v| v & mask))
        }),
        0..200,
    )
}

proptest! {
    /// readVBR64(writeVBR64(x)) = x, and the length matches ceil(bits/7).
    #[test]
    fn vbr64_identity(x in any::<u64>()) {
        let bytes = encode(|w| w.write_vbr64(x).unwrap());
        let expected_len = if x == 0 {
            1
        } else {
            (64 - x.leading_zeros() as usize + 6) / 7
        };
        prop_assert_eq!(bytes.len(), expected_len);
        let mut r = BitReader::new(bytes.as_slice());
        prop_assert_eq!(r.read_vbr64().unwrap(), x);
    }

    /// readVBR32(writeVBR32(x)) = x.
    #[test]
    fn vbr32_identity(x in any::<u32>()) {
        let bytes = encode(|w| w.write_vbr32(x).unwrap());
        let mut r = BitReader::new(bytes.as_slice());
        prop_assert_eq!(r.read_vbr32().unwrap(), x);
    }

    /// Any sequence of bit-width writes reads back exactly.
    #[test]
    fn bit_sequence_identity(runs in bit_runs()) {
        let bytes = encode(|w| {
            for &(width, value) in &runs {
                w.write_bits64(value, width).unwrap();
            }
        });
        let mut r = BitReader::new(bytes.as_slice());
        for &(width, value) in &runs {
            prop_assert_eq!(r.read_bits64(width).unwrap(), value);
        }
    }

    /// Strings of arbitrary content survive the stream.
    #[test]
    fn string_identity(s in "\\PC*") {
        let bytes = encode(|w| w.write_str(&s).unwrap());
        let mut r = BitReader::new(bytes.as_slice());
        prop_assert_eq!(r.read_str().unwrap(), s);
    }
}
