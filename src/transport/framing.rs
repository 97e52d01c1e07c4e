//! # Frame Transport
//!
//! Length-prefixed framing for the GEP command channel. Every payload in
//! either direction is preceded by an 8-byte header: the 4-byte payload
//! marker `AA BB CC DD` followed by the payload size as a little-endian u32.
//! The marker is validated on receive; a mismatch means the stream has
//! desynchronized and the connection must be terminated. UDP data-channel
//! traffic is not framed; each datagram is a complete frame body.

use crate::transport::common::{MAX_PACKET_SIZE, PAYLOAD_HEADER_SIZE};
use bytes::{BufMut, BytesMut};
use std::io::{self, Read};

/// Marker bytes leading every framed payload.
pub const PAYLOAD_MARKER: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

/// Minimum frame body: response code plus command code.
pub const RESPONSE_HEADER_SIZE: usize = 2;

/// Reassembles framed payloads from a byte stream.
///
/// The internal buffer grows to the largest payload observed and is never
/// shrunk, so steady-state reads allocate nothing. Chunking of the underlying
/// stream is immaterial: reads are driven with `read_exact`.
pub struct FrameReader<R: Read> {
    inner: R,
    buffer: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        FrameReader {
            inner,
            buffer: vec![0; MAX_PACKET_SIZE],
        }
    }

    /// Reads the next frame, returning its body.
    ///
    /// # Returns
    ///
    /// * `Ok(&[u8])`: the complete frame body.
    /// * `Err(e)` with `e.kind() == UnexpectedEof` when the peer closed the
    ///   stream between frames.
    /// * `Err(InvalidData)` on marker mismatch or an undersized body.
    pub fn read_frame(&mut self) -> io::Result<&[u8]> {
        let mut header = [0u8; PAYLOAD_HEADER_SIZE];
        self.inner.read_exact(&mut header)?;

        if header[0..4] != PAYLOAD_MARKER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Payload marker mismatch ({:02X} {:02X} {:02X} {:02X}); command channel has desynchronized",
                    header[0], header[1], header[2], header[3]
                ),
            ));
        }

        let payload_size =
            u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

        if payload_size < RESPONSE_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Undersized frame body: {} bytes", payload_size),
            ));
        }

        if payload_size > self.buffer.len() {
            self.buffer.resize(payload_size, 0);
        }

        self.inner.read_exact(&mut self.buffer[..payload_size])?;
        Ok(&self.buffer[..payload_size])
    }
}

/// Serializes a command frame into `buffer`, reusing its allocation.
///
/// Layout: payload marker, little-endian packet size (`1 + body length`),
/// command code, body.
pub fn write_command_frame(buffer: &mut BytesMut, command_code: u8, body: &[u8]) {
    let packet_size = 1 + body.len() as u32;

    buffer.clear();
    buffer.reserve(PAYLOAD_HEADER_SIZE + packet_size as usize);
    buffer.put_slice(&PAYLOAD_MARKER);
    buffer.put_u32_le(packet_size);
    buffer.put_u8(command_code);
    buffer.put_slice(body);
}

/// Serializes a response frame (marker, little-endian payload size, response
/// code, echoed command code, body). The subscriber itself never sends
/// responses; this is the publisher half used by the mock publisher and the
/// framing tests.
pub fn write_response_frame(buffer: &mut BytesMut, response_code: u8, command_code: u8, body: &[u8]) {
    let payload_size = (RESPONSE_HEADER_SIZE + body.len()) as u32;

    buffer.clear();
    buffer.reserve(PAYLOAD_HEADER_SIZE + payload_size as usize);
    buffer.put_slice(&PAYLOAD_MARKER);
    buffer.put_u32_le(payload_size);
    buffer.put_u8(response_code);
    buffer.put_u8(command_code);
    buffer.put_slice(body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Wraps a reader and yields at most `chunk` bytes per read call.
    struct ChunkedReader<R: Read> {
        inner: R,
        chunk: usize,
    }

    impl<R: Read> Read for ChunkedReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let limit = self.chunk.min(buf.len());
            self.inner.read(&mut buf[..limit])
        }
    }

    fn framed(bodies: &[&[u8]]) -> Vec<u8> {
        let mut stream = Vec::new();
        for body in bodies {
            let mut frame = BytesMut::new();
            write_response_frame(&mut frame, body[0], body[1], &body[2..]);
            stream.extend_from_slice(&frame);
        }
        stream
    }

    #[test]
    fn test_framing_round_trip_any_chunking() {
        let bodies: Vec<&[u8]> = vec![
            &[0x80, 0x08, b'O', b'K'],
            &[0xFF, 0x00],
            &[0x82, 0x00, 1, 2, 3, 4, 5, 6, 7, 8, 9],
        ];
        let stream = framed(&bodies);

        // Frame boundaries must be recovered regardless of read chunking
        for chunk in 1..=stream.len() {
            let mut reader = FrameReader::new(ChunkedReader {
                inner: Cursor::new(stream.clone()),
                chunk,
            });

            for expected in &bodies {
                assert_eq!(reader.read_frame().unwrap(), *expected);
            }

            let err = reader.read_frame().unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        }
    }

    #[test]
    fn test_marker_mismatch_is_invalid_data() {
        let mut stream = framed(&[&[0x80, 0x08, b'O', b'K']]);
        stream[0] = 0xAB;

        let mut reader = FrameReader::new(Cursor::new(stream));
        let err = reader.read_frame().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_undersized_body_is_invalid_data() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&PAYLOAD_MARKER);
        stream.extend_from_slice(&1u32.to_le_bytes());
        stream.push(0x80);

        let mut reader = FrameReader::new(Cursor::new(stream));
        assert_eq!(
            reader.read_frame().unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_buffer_grows_for_large_frames() {
        let body: Vec<u8> = std::iter::once(0x82u8)
            .chain(std::iter::once(0x00u8))
            .chain((0..MAX_PACKET_SIZE * 2).map(|i| i as u8))
            .collect();
        let stream = framed(&[&body]);

        let mut reader = FrameReader::new(Cursor::new(stream));
        assert_eq!(reader.read_frame().unwrap(), &body[..]);
    }

    #[test]
    fn test_command_frame_layout() {
        let mut buffer = BytesMut::new();
        write_command_frame(&mut buffer, 0x05, &[0xDE, 0xAD]);

        assert_eq!(&buffer[0..4], &PAYLOAD_MARKER);
        assert_eq!(u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]), 3);
        assert_eq!(buffer[8], 0x05);
        assert_eq!(&buffer[9..], &[0xDE, 0xAD]);
    }
}
