//! # Wire Codec Primitives
//!
//! Byte-order conversion primitives for GEP payload parsing. Multi-byte
//! fields inside payloads are big-endian; only the outer frame size is
//! little-endian. Signal identifiers arrive in the publisher's mixed-endian
//! GUID layout and are converted to RFC 4122 order at this boundary, which is
//! the single canonical in-memory layout used throughout the crate.

use crate::transport::common::SubscriberError;
use uuid::Uuid;

/// Sequential big-endian reader over a payload slice.
///
/// Every read checks the remaining length and fails with a decode error
/// instead of panicking, so malformed payloads surface as per-packet errors.
pub struct PayloadReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PayloadReader { data, position: 0 }
    }

    /// Current read position within the payload.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], SubscriberError> {
        if self.remaining() < count {
            return Err(SubscriberError::Decode {
                message: format!(
                    "Unexpected end of payload: needed {} bytes at offset {}, {} available",
                    count,
                    self.position,
                    self.remaining()
                ),
            });
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, SubscriberError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, SubscriberError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, SubscriberError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, SubscriberError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, SubscriberError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(raw))
    }

    pub fn read_f32(&mut self) -> Result<f32, SubscriberError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Reads `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], SubscriberError> {
        self.take(count)
    }

    /// Reads a length-delimited UTF-8 string of `size` bytes.
    pub fn read_string(&mut self, size: usize) -> Result<String, SubscriberError> {
        let bytes = self.take(size)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| SubscriberError::Decode {
            message: format!("Invalid UTF-8 string in payload: {}", e),
        })
    }

    /// Reads a signal identifier in publisher wire order.
    pub fn read_guid(&mut self) -> Result<Uuid, SubscriberError> {
        let bytes = self.take(16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(guid_from_wire(raw))
    }
}

/// Converts a publisher-order GUID to the canonical RFC 4122 layout.
///
/// The wire carries the first three fields little-endian (4, 2 and 2 bytes);
/// the trailing 8 bytes are already in network order.
pub fn guid_from_wire(bytes: [u8; 16]) -> Uuid {
    let d1 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let d2 = u16::from_le_bytes([bytes[4], bytes[5]]);
    let d3 = u16::from_le_bytes([bytes[6], bytes[7]]);
    let mut d4 = [0u8; 8];
    d4.copy_from_slice(&bytes[8..16]);
    Uuid::from_fields(d1, d2, d3, &d4)
}

/// Converts a canonical `Uuid` back to publisher wire order.
pub fn guid_to_wire(guid: &Uuid) -> [u8; 16] {
    let (d1, d2, d3, d4) = guid.as_fields();
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&d1.to_le_bytes());
    bytes[4..6].copy_from_slice(&d2.to_le_bytes());
    bytes[6..8].copy_from_slice(&d3.to_le_bytes());
    bytes[8..16].copy_from_slice(d4);
    bytes
}

/// Reads a 7-bit variable-length u32 starting at `*position`.
///
/// Each byte contributes seven value bits; the high bit marks continuation
/// and is XOR-cleared from the accumulator as bytes arrive.
pub fn read_7bit_u32(data: &[u8], position: &mut usize) -> Result<u32, SubscriberError> {
    Ok(read_7bit_u64(data, position)? as u32)
}

/// Reads a 7-bit variable-length u64 starting at `*position`.
pub fn read_7bit_u64(data: &[u8], position: &mut usize) -> Result<u64, SubscriberError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    loop {
        if *position >= data.len() {
            return Err(SubscriberError::Decode {
                message: "Unexpected end of payload in 7-bit encoded integer".to_string(),
            });
        }
        if shift > 63 {
            return Err(SubscriberError::Decode {
                message: "7-bit encoded integer exceeds 64 bits".to_string(),
            });
        }

        let byte = data[*position] as u64;
        *position += 1;
        value ^= byte << shift;

        if byte & 0x80 == 0 {
            return Ok(value);
        }

        value ^= 0x80u64 << shift;
        shift += 7;
    }
}

/// Writes a 7-bit variable-length u32 at `*position`, advancing it.
pub fn write_7bit_u32(data: &mut [u8], position: &mut usize, value: u32) {
    write_7bit_u64(data, position, value as u64);
}

/// Writes a 7-bit variable-length u64 at `*position`, advancing it.
pub fn write_7bit_u64(data: &mut [u8], position: &mut usize, mut value: u64) {
    while value >= 128 {
        data[*position] = (value as u8) | 0x80;
        *position += 1;
        value >>= 7;
    }
    data[*position] = value as u8;
    *position += 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_reads() {
        let payload = [
            0x12, 0x34, // u16
            0x00, 0x01, 0xE2, 0x40, // u32 = 123456
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC, 0x18, // i64 = -1000
            0x3F, 0xC0, 0x00, 0x00, // f32 = 1.5
        ];
        let mut reader = PayloadReader::new(&payload);

        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_u32().unwrap(), 123_456);
        assert_eq!(reader.read_i64().unwrap(), -1000);
        assert_eq!(reader.read_f32().unwrap(), 1.5);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_read_past_end_is_decode_error() {
        let mut reader = PayloadReader::new(&[0x00]);
        assert!(reader.read_u32().is_err());
        // Position is unchanged after a failed read
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_endianness_round_trip() {
        for value in [0u64, 1, 0xFF, 0x1234, 0xDEAD_BEEF, u64::MAX] {
            assert_eq!(u64::from_be_bytes(value.to_be_bytes()), value);
            assert_eq!(u64::from_le_bytes(value.to_le_bytes()), value);
        }
        for value in [0u16, 1, 0x8000, u16::MAX] {
            assert_eq!(u16::from_be_bytes(value.to_be_bytes()), value);
        }
        for value in [0i64, -1, i64::MIN, i64::MAX] {
            assert_eq!(i64::from_be_bytes(value.to_be_bytes()), value);
        }
    }

    #[test]
    fn test_guid_wire_round_trip() {
        let guid = Uuid::parse_str("6f9a9b3e-2a38-4dcb-8c3e-01a3f0b2e6a9").unwrap();
        let wire = guid_to_wire(&guid);
        assert_eq!(guid_from_wire(wire), guid);

        // First field is little-endian on the wire
        assert_eq!(wire[0..4], [0x3E, 0x9B, 0x9A, 0x6F]);
        // Trailing 8 bytes pass through untouched
        assert_eq!(wire[8..16], guid.as_bytes()[8..16]);
    }

    #[test]
    fn test_7bit_round_trip() {
        let mut buffer = [0u8; 10];
        for value in [0u64, 1, 127, 128, 200, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut write_pos = 0;
            write_7bit_u64(&mut buffer, &mut write_pos, value);

            let mut read_pos = 0;
            let decoded = read_7bit_u64(&buffer, &mut read_pos).unwrap();

            assert_eq!(decoded, value);
            assert_eq!(read_pos, write_pos, "length mismatch for {}", value);
        }
    }

    #[test]
    fn test_7bit_single_byte_values() {
        let mut buffer = [0u8; 10];
        let mut pos = 0;
        write_7bit_u64(&mut buffer, &mut pos, 127);
        assert_eq!(pos, 1);
        assert_eq!(buffer[0], 127);
    }

    #[test]
    fn test_7bit_truncated_is_decode_error() {
        // Continuation bit set with no following byte
        let data = [0x80];
        let mut pos = 0;
        assert!(read_7bit_u64(&data, &mut pos).is_err());
    }
}
