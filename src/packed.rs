//! Variable-length integer readers shared by the metadata backends.
//!
//! Every reader works on a byte window whose length bounds the read, and
//! fails softly: an overrun yields `is_valid == false` instead of an error.

/// A decoded integer together with the number of bytes it occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedUint {
    pub value: u64,
    pub byte_size: usize,
    pub is_valid: bool,
}

impl PackedUint {
    fn valid(value: u64, byte_size: usize) -> Self {
        Self { value, byte_size, is_valid: true }
    }
}

/// A decoded signed integer together with the number of bytes it occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedInt {
    pub value: i64,
    pub byte_size: usize,
    pub is_valid: bool,
}

/// Read a 7-Zip style packed number.
///
/// The count of leading one bits in the first byte gives the number of
/// little-endian bytes that follow; the remaining low bits of the first byte
/// hold the most significant part of the value.
pub fn read_packed(bytes: &[u8]) -> PackedUint {
    let Some(&first) = bytes.first() else {
        return PackedUint::default();
    };

    let mut value = 0u64;
    let mut mask = 0x80u8;
    for i in 0..8usize {
        if first & mask == 0 {
            let high = u64::from(first & mask.wrapping_sub(1));
            value |= high << (8 * i);
            return PackedUint::valid(value, i + 1);
        }
        let Some(&next) = bytes.get(i + 1) else {
            return PackedUint::default();
        };
        value |= u64::from(next) << (8 * i);
        mask >>= 1;
    }

    PackedUint::valid(value, 9)
}

/// Read an unsigned LEB128 value.
pub fn read_uleb128(bytes: &[u8]) -> PackedUint {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        let low = u64::from(byte & 0x7f);
        if shift >= 64 || (shift == 63 && low > 1) {
            return PackedUint::default();
        }
        value |= low << shift;
        if byte & 0x80 == 0 {
            return PackedUint::valid(value, i + 1);
        }
        shift += 7;
    }

    PackedUint::default()
}

/// Read a signed LEB128 value. Encodings that do not fit in 64 bits are invalid.
pub fn read_sleb128(bytes: &[u8]) -> PackedInt {
    let mut value = 0i64;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        let low = byte & 0x7f;
        // the tenth byte may only carry the sign
        if shift >= 64 || (shift == 63 && low != 0 && low != 0x7f) {
            return PackedInt::default();
        }
        value |= i64::from(low) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && low & 0x40 != 0 {
                value |= -1i64 << shift;
            }
            return PackedInt { value, byte_size: i + 1, is_valid: true };
        }
    }

    PackedInt::default()
}

/// Read a NUL-terminated string of at most `max_len` bytes (terminator excluded).
///
/// Returns the text and the consumed byte count including the terminator.
pub fn read_ansi_string(bytes: &[u8], max_len: usize) -> Option<(String, usize)> {
    let window = &bytes[..bytes.len().min(max_len + 1)];
    let end = window.iter().position(|&b| b == 0)?;
    let text = String::from_utf8_lossy(&window[..end]).into_owned();
    Some((text, end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0x00], 0, 1)]
    #[case(&[0x7f], 0x7f, 1)]
    #[case(&[0x80, 0xff], 0xff, 2)]
    #[case(&[0x81, 0x34], 0x134, 2)]
    #[case(&[0xc0, 0x34, 0x12], 0x1234, 3)]
    #[case(&[0xc1, 0x00, 0x00], 0x01_0000, 3)]
    #[case(&[0xff, 1, 2, 3, 4, 5, 6, 7, 8], 0x0807_0605_0403_0201, 9)]
    fn test_read_packed(#[case] bytes: &[u8], #[case] value: u64, #[case] size: usize) {
        let packed = read_packed(bytes);
        assert!(packed.is_valid);
        assert_eq!(packed.value, value);
        assert_eq!(packed.byte_size, size);
    }

    #[test]
    fn test_read_packed_truncated() {
        assert!(!read_packed(&[]).is_valid);
        assert!(!read_packed(&[0xc0, 0x34]).is_valid);
        assert!(!read_packed(&[0xff, 1, 2]).is_valid);
    }

    #[rstest]
    #[case(&[0x00], 0, 1)]
    #[case(&[0x7f], 0x7f, 1)]
    #[case(&[0xe5, 0x8e, 0x26], 624_485, 3)]
    #[case(&[0x80, 0x01, 0xaa], 0x80, 2)]
    fn test_read_uleb128(#[case] bytes: &[u8], #[case] value: u64, #[case] size: usize) {
        let packed = read_uleb128(bytes);
        assert!(packed.is_valid);
        assert_eq!(packed.value, value);
        assert_eq!(packed.byte_size, size);
    }

    #[test]
    fn test_read_uleb128_failures() {
        assert!(!read_uleb128(&[]).is_valid);
        assert!(!read_uleb128(&[0x80, 0x80]).is_valid);
        // Eleven continuation bytes overflow 64 bits.
        assert!(!read_uleb128(&[0xff; 11]).is_valid);
    }

    #[rstest]
    #[case(&[0x00], 0, 1)]
    #[case(&[0x3f], 63, 1)]
    #[case(&[0x40], -64, 1)]
    #[case(&[0x78], -8, 1)]
    #[case(&[0x80, 0x7f], -128, 2)]
    #[case(&[0xc0, 0xbb, 0x78], -123_456, 3)]
    #[case(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f], -1, 10)]
    #[case(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x7f], i64::MIN, 10)]
    fn test_read_sleb128(#[case] bytes: &[u8], #[case] value: i64, #[case] size: usize) {
        let packed = read_sleb128(bytes);
        assert!(packed.is_valid);
        assert_eq!(packed.value, value);
        assert_eq!(packed.byte_size, size);
    }

    #[test]
    fn test_read_sleb128_failures() {
        assert!(!read_sleb128(&[]).is_valid);
        assert!(!read_sleb128(&[0xff, 0xff]).is_valid);
        assert!(!read_sleb128(&[0xff; 11]).is_valid);
        let mut too_wide = [0xff; 10];
        too_wide[9] = 0x01;
        assert!(!read_sleb128(&too_wide).is_valid);
    }

    #[test]
    fn test_read_ansi_string() {
        assert_eq!(read_ansi_string(b"_main\0rest", 256), Some(("_main".to_string(), 6)));
        assert_eq!(read_ansi_string(b"\0", 256), Some((String::new(), 1)));
        assert_eq!(read_ansi_string(b"abc", 256), None);
        assert_eq!(read_ansi_string(b"abcdef\0", 3), None);
    }

    fn encode_uleb128(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    fn encode_sleb128(mut value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            if done {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    proptest! {
        #[test]
        fn prop_sleb128_consumes_exact_encoding(value in any::<i64>(), tail in proptest::collection::vec(any::<u8>(), 0..4)) {
            let mut bytes = encode_sleb128(value);
            let encoded_len = bytes.len();
            bytes.extend_from_slice(&tail);
            let packed = read_sleb128(&bytes);
            prop_assert!(packed.is_valid);
            prop_assert_eq!(packed.value, value);
            prop_assert_eq!(packed.byte_size, encoded_len);
        }

        #[test]
        fn prop_uleb128_consumes_exact_encoding(value in any::<u64>(), tail in proptest::collection::vec(any::<u8>(), 0..4)) {
            let mut bytes = encode_uleb128(value);
            let encoded_len = bytes.len();
            bytes.extend_from_slice(&tail);
            let packed = read_uleb128(&bytes);
            prop_assert!(packed.is_valid);
            prop_assert_eq!(packed.value, value);
            prop_assert_eq!(packed.byte_size, encoded_len);
        }

        #[test]
        fn prop_packed_never_exceeds_window(bytes in proptest::collection::vec(any::<u8>(), 0..12)) {
            let packed = read_packed(&bytes);
            if packed.is_valid {
                prop_assert!(packed.byte_size >= 1 && packed.byte_size <= bytes.len().min(9));
            }
        }
    }
}
