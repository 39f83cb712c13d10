//! DeviceSQL string encoding for Pioneer databases
//!
//! DeviceSQL strings use three encoding formats:
//! - Short ASCII (flag LSB=1): Length encoded in header byte, max 126 chars
//! - Long ASCII (0x40): 4-byte header + ASCII data
//! - UTF-16LE (0x90): 4-byte header + UTF-16LE encoded data
//!
//! Reference: https://djl-analysis.deepsymmetry.org/rekordbox-export-analysis/exports.html

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum payload length for short ASCII strings
pub const MAX_SHORT_ASCII_LEN: usize = 126;

/// Flag byte values
const FLAG_LONG_ASCII: u8 = 0x40;
const FLAG_UTF16LE: u8 = 0x90;

/// Size of the header in front of long strings: flag, u16 length, pad
const LONG_HEADER_LEN: usize = 4;

/// Maximum payload length for long strings, bounded by the u16 total length
pub const MAX_LONG_LEN: usize = u16::MAX as usize - LONG_HEADER_LEN;

/// Which of the three on-disk forms a string uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StringVariant {
    ShortAscii,
    LongAscii,
    LongUtf16,
}

/// A string read back from row bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedString {
    pub text: String,
    /// Bytes occupied by header and payload
    pub consumed: usize,
    pub variant: StringVariant,
    /// A short string whose payload ends in a NUL that `text` leaves out
    pub nul_terminated: bool,
}

/// Decode the DeviceSQL string starting at `offset`.
///
/// A NUL closing a short string's payload is dropped from the text. Bytes
/// past the declared length are never consumed, so a NUL written after the
/// payload is tolerated without being required.
pub fn decode(bytes: &[u8], offset: usize) -> Result<DecodedString> {
    let header = *bytes.get(offset).ok_or(Error::Truncated {
        context: "string header",
        needed: offset + 1,
        available: bytes.len(),
    })?;

    if header & 0x01 == 1 {
        let len = ((header >> 1) as usize)
            .checked_sub(1)
            .ok_or(Error::InvalidStringEncoding { header, offset })?;
        let payload = slice(bytes, offset + 1, len, "short string")?;
        let text = payload.strip_suffix(&[0]);
        return Ok(DecodedString {
            text: String::from_utf8_lossy(text.unwrap_or(payload)).into_owned(),
            consumed: 1 + len,
            variant: StringVariant::ShortAscii,
            nul_terminated: text.is_some(),
        });
    }

    let variant = match header {
        FLAG_LONG_ASCII => StringVariant::LongAscii,
        FLAG_UTF16LE => StringVariant::LongUtf16,
        _ => return Err(Error::InvalidStringEncoding { header, offset }),
    };

    let len_bytes = slice(bytes, offset + 1, 2, "long string length")?;
    let total = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let payload_len = total
        .checked_sub(LONG_HEADER_LEN)
        .ok_or(Error::InvalidStringEncoding { header, offset })?;
    let payload = slice(bytes, offset + LONG_HEADER_LEN, payload_len, "long string")?;

    let text = match variant {
        StringVariant::LongUtf16 => {
            if payload.len() % 2 != 0 {
                return Err(Error::InvalidStringEncoding { header, offset });
            }
            let units: Vec<u16> = payload
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::from_utf8_lossy(payload).into_owned(),
    };

    Ok(DecodedString {
        text,
        consumed: total,
        variant,
        nul_terminated: false,
    })
}

fn slice<'a>(bytes: &'a [u8], start: usize, len: usize, context: &'static str) -> Result<&'a [u8]> {
    bytes.get(start..start + len).ok_or(Error::Truncated {
        context,
        needed: start + len,
        available: bytes.len(),
    })
}

/// Encode a string in DeviceSQL format
///
/// Automatically selects the appropriate encoding:
/// - Short ASCII for ASCII strings ≤126 chars
/// - Long ASCII for longer ASCII strings
/// - UTF-16LE for strings containing non-ASCII characters
pub fn encode_string(s: &str) -> Result<Vec<u8>> {
    if s.is_ascii() && s.len() <= MAX_SHORT_ASCII_LEN {
        Ok(short_ascii(s.as_bytes()))
    } else if s.is_ascii() {
        encode_long_ascii(s)
    } else {
        encode_utf16le(s)
    }
}

/// Encode as short ASCII string
/// Header byte: ((length + 1) << 1) | 1
pub fn encode_short(s: &str) -> Result<Vec<u8>> {
    if s.len() > MAX_SHORT_ASCII_LEN {
        return Err(Error::StringTooLong {
            len: s.len(),
            max: MAX_SHORT_ASCII_LEN,
        });
    }
    Ok(short_ascii(s.as_bytes()))
}

fn short_ascii(payload: &[u8]) -> Vec<u8> {
    let header = (((payload.len() + 1) << 1) | 1) as u8;

    let mut result = Vec::with_capacity(1 + payload.len());
    result.push(header);
    result.extend_from_slice(payload);
    result
}

/// Encode as long ASCII string
/// Format: [0x40, len_lo, len_hi, 0x00, ...ascii_data...]
pub fn encode_long_ascii(s: &str) -> Result<Vec<u8>> {
    long_string(FLAG_LONG_ASCII, s.as_bytes())
}

/// Encode as UTF-16LE string
/// Format: [0x90, len_lo, len_hi, 0x00, ...utf16_data...]
pub fn encode_utf16le(s: &str) -> Result<Vec<u8>> {
    let payload: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
    long_string(FLAG_UTF16LE, &payload)
}

fn long_string(flag: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_LONG_LEN {
        return Err(Error::StringTooLong {
            len: payload.len(),
            max: MAX_LONG_LEN,
        });
    }
    let total_len = (LONG_HEADER_LEN + payload.len()) as u16;

    let mut result = Vec::with_capacity(total_len as usize);
    result.push(flag);
    result.extend_from_slice(&total_len.to_le_bytes());
    result.push(0x00); // padding
    result.extend_from_slice(payload);
    Ok(result)
}

/// Re-encode `s` in a fixed variant, as needed when overwriting a stored value.
pub fn encode_as(variant: StringVariant, s: &str) -> Result<Vec<u8>> {
    if variant != StringVariant::LongUtf16 && !s.is_ascii() {
        return Err(Error::Format(format!("{:?} cannot hold non-ASCII text {:?}", variant, s)));
    }
    match variant {
        StringVariant::ShortAscii => encode_short(s),
        StringVariant::LongAscii => encode_long_ascii(s),
        StringVariant::LongUtf16 => encode_utf16le(s),
    }
}

/// Encode `s` in the same form as a stored string, keeping the NUL that
/// closes some short payloads.
pub fn encode_like(stored: &DecodedString, s: &str) -> Result<Vec<u8>> {
    if stored.nul_terminated {
        encode_as(stored.variant, &format!("{}\0", s))
    } else {
        encode_as(stored.variant, s)
    }
}

/// Get the encoded length of a string without actually encoding it
pub fn encoded_length(s: &str) -> usize {
    if s.is_ascii() && s.len() <= MAX_SHORT_ASCII_LEN {
        1 + s.len()
    } else if s.is_ascii() {
        LONG_HEADER_LEN + s.len()
    } else {
        LONG_HEADER_LEN + s.encode_utf16().count() * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string() {
        let encoded = encode_string("").unwrap();
        assert_eq!(encoded, vec![0x03]);

        let decoded = decode(&encoded, 0).unwrap();
        assert_eq!(decoded.text, "");
        assert_eq!(decoded.consumed, 1);
    }

    #[test]
    fn test_short_ascii() {
        let encoded = encode_short("foo").unwrap();
        // Length = 4 (3 chars + 1 header), header = (4 << 1) | 1 = 9
        assert_eq!(encoded[0], 0x09);
        assert_eq!(&encoded[1..], b"foo");
    }

    #[test]
    fn test_short_ascii_decode_all_lengths() {
        for len in [0usize, 1, 17, 64, 125, 126] {
            let text = "x".repeat(len);
            let decoded = decode(&encode_short(&text).unwrap(), 0).unwrap();
            assert_eq!(decoded.text, text);
            assert_eq!(decoded.consumed, len + 1);
            assert_eq!(decoded.variant, StringVariant::ShortAscii);
        }
    }

    #[test]
    fn test_short_ascii_too_long() {
        let err = encode_short(&"a".repeat(127)).unwrap_err();
        assert!(matches!(err, Error::StringTooLong { len: 127, max: 126 }));
    }

    #[test]
    fn test_trailing_nul_tolerated() {
        // NUL counted inside the declared payload
        let bytes = [0x0b, b'a', b'b', b'c', 0x00];
        let decoded = decode(&bytes, 0).unwrap();
        assert_eq!(decoded.text, "abc");
        assert_eq!(decoded.consumed, 5);
        assert!(decoded.nul_terminated);

        // NUL after the payload is left alone
        let bytes = [0x09, b'a', b'b', b'c', 0x00];
        let decoded = decode(&bytes, 0).unwrap();
        assert_eq!(decoded.text, "abc");
        assert_eq!(decoded.consumed, 4);
        assert!(!decoded.nul_terminated);
    }

    #[test]
    fn test_long_ascii() {
        let long_str = "a".repeat(200);
        let encoded = encode_long_ascii(&long_str).unwrap();

        assert_eq!(encoded[0], FLAG_LONG_ASCII);
        let len = encoded[1] as u16 | ((encoded[2] as u16) << 8);
        assert_eq!(len as usize, 4 + 200);
        assert_eq!(&encoded[4..], long_str.as_bytes());

        let decoded = decode(&encoded, 0).unwrap();
        assert_eq!(decoded.text, long_str);
        assert_eq!(decoded.variant, StringVariant::LongAscii);
    }

    #[test]
    fn test_utf16le() {
        let encoded = encode_utf16le("日本語").unwrap();

        assert_eq!(encoded[0], FLAG_UTF16LE);
        // 3 characters * 2 bytes + 4 byte header = 10
        let len = encoded[1] as u16 | ((encoded[2] as u16) << 8);
        assert_eq!(len, 10);

        let decoded = decode(&encoded, 0).unwrap();
        assert_eq!(decoded.text, "日本語");
        assert_eq!(decoded.consumed, 10);
        assert_eq!(decoded.variant, StringVariant::LongUtf16);
    }

    #[test]
    fn test_decode_at_offset() {
        let mut bytes = vec![0xAA, 0xBB];
        bytes.extend(encode_string("Genre").unwrap());
        let decoded = decode(&bytes, 2).unwrap();
        assert_eq!(decoded.text, "Genre");
    }

    #[test]
    fn test_invalid_header() {
        let err = decode(&[0x22, 0, 0, 0], 0).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidStringEncoding { header: 0x22, offset: 0 }
        ));
    }

    #[test]
    fn test_truncated_payload() {
        // Header claims 3 bytes of payload, only 1 present
        let err = decode(&[0x09, b'a'], 0).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn test_encode_as_keeps_variant() {
        assert_eq!(encode_as(StringVariant::LongUtf16, "ab").unwrap().len(), 8);
        assert_eq!(encode_as(StringVariant::LongAscii, "ab").unwrap().len(), 6);
        assert_eq!(encode_as(StringVariant::ShortAscii, "ab").unwrap().len(), 3);
        assert!(matches!(
            encode_as(StringVariant::ShortAscii, "é"),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_encode_like_keeps_nul() {
        let stored = decode(&[0x0b, b'a', b'b', b'c', 0x00], 0).unwrap();
        let encoded = encode_like(&stored, "xyz").unwrap();
        assert_eq!(encoded, vec![0x0b, b'x', b'y', b'z', 0x00]);

        let stored = decode(&[0x09, b'a', b'b', b'c'], 0).unwrap();
        assert_eq!(encode_like(&stored, "xyz").unwrap(), vec![0x09, b'x', b'y', b'z']);
    }

    #[test]
    fn test_long_string_limit() {
        let longest = "a".repeat(MAX_LONG_LEN);
        let encoded = encode_string(&longest).unwrap();
        assert_eq!(encoded.len(), u16::MAX as usize);
        assert_eq!(decode(&encoded, 0).unwrap().text, longest);

        let err = encode_long_ascii(&"a".repeat(70_000)).unwrap_err();
        assert!(matches!(err, Error::StringTooLong { len: 70_000, max: MAX_LONG_LEN }));
        assert!(matches!(
            encode_string(&"é".repeat(40_000)),
            Err(Error::StringTooLong { len: 80_000, .. })
        ));
    }

    #[test]
    fn test_odd_utf16_payload() {
        // Total length 7 leaves 3 payload bytes
        let err = decode(&[0x90, 0x07, 0x00, 0x00, b'a', 0x00, b'b'], 0).unwrap_err();
        assert!(matches!(err, Error::InvalidStringEncoding { header: 0x90, offset: 0 }));
    }

    #[test]
    fn test_encoded_length() {
        assert_eq!(encoded_length(""), 1);
        assert_eq!(encoded_length("foo"), 4); // 1 + 3
        assert_eq!(encoded_length("日本語"), 4 + 6); // 4 header + 3 chars * 2 bytes
        assert_eq!(encoded_length(&"a".repeat(130)), 134);
    }
}
