//! Variable Byte Integer encoding/decoding for MQTT.
//!
//! The remaining-length field of every MQTT fixed header uses 7 bits per
//! byte for the value, with the high bit flagging that another byte
//! follows. At most four bytes are allowed:
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes
//! - 2097152-268435455: 4 bytes

use crate::error::{ProtocolError, Result};

/// Largest value representable in four bytes.
pub const MAX_VALUE: usize = 268_435_455;

const MAX_BYTES: usize = 4;

/// Decode a variable byte integer from the start of `buf`.
///
/// Returns `Ok(Some((value, bytes_consumed)))` if complete, `Ok(None)` if
/// more bytes are needed, or `Err` if a fifth continuation byte shows up.
///
/// # Example
/// ```
/// use dhtlink_core::varint::decode;
/// let (value, consumed) = decode(&[0x80, 0x01]).unwrap().unwrap();
/// assert_eq!(value, 128);
/// assert_eq!(consumed, 2);
/// ```
pub fn decode(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut value = 0usize;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_BYTES {
            return Err(ProtocolError::InvalidRemainingLength);
        }

        value |= ((byte & 0x7F) as usize) << (7 * i);

        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }

    if buf.len() >= MAX_BYTES {
        return Err(ProtocolError::InvalidRemainingLength);
    }

    Ok(None)
}

/// Encode `value` as a variable byte integer, appending to `buf`.
///
/// Returns the number of bytes written, or an error when `value` does not
/// fit in four bytes.
///
/// # Example
/// ```
/// use dhtlink_core::varint::encode;
/// let mut buf = Vec::new();
/// assert_eq!(encode(300, &mut buf).unwrap(), 2);
/// assert_eq!(buf, [0xAC, 0x02]);
/// ```
pub fn encode(mut value: usize, buf: &mut Vec<u8>) -> Result<usize> {
    if value > MAX_VALUE {
        return Err(ProtocolError::PacketTooLarge {
            size: value,
            max: MAX_VALUE,
        });
    }

    let start = buf.len();
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Number of bytes needed to encode `value`.
pub fn encoded_len(value: usize) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_boundaries() {
        assert_eq!(decode(&[0]).unwrap(), Some((0, 1)));
        assert_eq!(decode(&[0x7F]).unwrap(), Some((127, 1)));
        assert_eq!(decode(&[0xFF, 0x7F]).unwrap(), Some((16_383, 2)));
        assert_eq!(decode(&[0x80, 0x80, 0x01]).unwrap(), Some((16_384, 3)));
        assert_eq!(
            decode(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(),
            Some((MAX_VALUE, 4))
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(decode(&[0x05, 0xAA, 0xBB]).unwrap(), Some((5, 1)));
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode(&[]).unwrap(), None);
        assert_eq!(decode(&[0x80]).unwrap(), None);
        assert_eq!(decode(&[0x80, 0x80, 0x80]).unwrap(), None);
    }

    #[test]
    fn test_decode_fifth_byte_rejected() {
        assert!(decode(&[0x80, 0x80, 0x80, 0x80]).is_err());
        assert!(decode(&[0x80, 0x80, 0x80, 0x80, 0x01]).is_err());
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let mut buf = Vec::new();
        assert!(encode(MAX_VALUE + 1, &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_matches_encoded_len() {
        for value in [0, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152, MAX_VALUE] {
            let mut buf = Vec::new();
            let written = encode(value, &mut buf).unwrap();
            assert_eq!(written, encoded_len(value));
            assert_eq!(decode(&buf).unwrap(), Some((value, written)));
        }
    }
}
