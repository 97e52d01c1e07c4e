//! # Mock Publisher
//!
//! A minimal in-process GEP publisher used by the integration tests and
//! benchmarks: accepts one subscriber, parses its command frames, and emits
//! response frames, signal index caches, base-time updates, and compact or
//! TSSC data packets. Only the publisher behavior the subscriber exercises
//! is modeled; this is test scaffolding, not a data publisher.

use crate::transport::codec::guid_to_wire;
use crate::transport::common::PAYLOAD_HEADER_SIZE;
use crate::transport::constants::{data_packet_flags, server_command, server_response};
use crate::transport::framing::{write_response_frame, PAYLOAD_MARKER};
use crate::transport::tssc::{TsscEncoder, TSSC_VERSION};
use bytes::BytesMut;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::Rng;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;
use uuid::Uuid;

/// A signal the mock publisher maps into its signal index cache.
#[derive(Debug, Clone)]
pub struct MockSignal {
    pub signal_index: u16,
    pub signal_id: Uuid,
    pub source: String,
    pub id: u32,
}

impl MockSignal {
    pub fn new(signal_index: u16, source: &str, id: u32) -> Self {
        MockSignal {
            signal_index,
            signal_id: Uuid::new_v4(),
            source: source.to_string(),
            id,
        }
    }
}

/// Listening side of the mock publisher.
pub struct MockPublisher {
    listener: TcpListener,
    address: SocketAddr,
}

impl MockPublisher {
    /// Binds to an ephemeral localhost port.
    pub fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?;
        Ok(MockPublisher { listener, address })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Accepts one subscriber connection.
    pub fn accept(&self) -> io::Result<PublisherSession> {
        let (stream, _) = self.listener.accept()?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        Ok(PublisherSession {
            stream,
            write_buffer: BytesMut::new(),
            encoder: TsscEncoder::new(),
            tssc_sequence: 0,
        })
    }
}

/// One accepted subscriber connection on the mock publisher.
pub struct PublisherSession {
    stream: TcpStream,
    write_buffer: BytesMut,
    encoder: TsscEncoder,
    tssc_sequence: u16,
}

impl PublisherSession {
    /// Reads the next command frame, returning its code and body.
    pub fn read_command(&mut self) -> io::Result<(u8, Vec<u8>)> {
        let mut header = [0u8; PAYLOAD_HEADER_SIZE];
        self.stream.read_exact(&mut header)?;

        if header[0..4] != PAYLOAD_MARKER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "command frame missing payload marker",
            ));
        }

        let packet_size =
            u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if packet_size < 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "command frame has no command code",
            ));
        }

        let mut packet = vec![0u8; packet_size];
        self.stream.read_exact(&mut packet)?;
        Ok((packet[0], packet[1..].to_vec()))
    }

    /// Reads command frames until `command_code` arrives, returning its body.
    pub fn expect_command(&mut self, command_code: u8) -> io::Result<Vec<u8>> {
        loop {
            let (code, body) = self.read_command()?;
            if code == command_code {
                return Ok(body);
            }
        }
    }

    /// Sends a raw response frame.
    pub fn send_response(
        &mut self,
        response_code: u8,
        command_code: u8,
        body: &[u8],
    ) -> io::Result<()> {
        write_response_frame(&mut self.write_buffer, response_code, command_code, body);
        self.stream.write_all(&self.write_buffer)
    }

    pub fn send_succeeded(&mut self, command_code: u8, message: &str) -> io::Result<()> {
        self.send_response(server_response::SUCCEEDED, command_code, message.as_bytes())
    }

    pub fn send_failed(&mut self, command_code: u8, message: &str) -> io::Result<()> {
        self.send_response(server_response::FAILED, command_code, message.as_bytes())
    }

    pub fn send_no_op(&mut self) -> io::Result<()> {
        self.send_response(server_response::NO_OP, server_command::CONNECT, &[])
    }

    pub fn send_data_start_time(&mut self, start_time: i64) -> io::Result<()> {
        self.send_response(
            server_response::DATA_START_TIME,
            server_command::SUBSCRIBE,
            &start_time.to_be_bytes(),
        )
    }

    pub fn send_processing_complete(&mut self, message: &str) -> io::Result<()> {
        self.send_response(
            server_response::PROCESSING_COMPLETE,
            server_command::SUBSCRIBE,
            message.as_bytes(),
        )
    }

    pub fn send_configuration_changed(&mut self) -> io::Result<()> {
        self.send_response(
            server_response::CONFIGURATION_CHANGED,
            server_command::CONNECT,
            &[],
        )
    }

    /// Sends an `UpdateBaseTimes` response.
    pub fn send_base_times(&mut self, time_index: i32, offsets: [i64; 2]) -> io::Result<()> {
        let mut body = Vec::with_capacity(20);
        body.extend_from_slice(&time_index.to_be_bytes());
        body.extend_from_slice(&offsets[0].to_be_bytes());
        body.extend_from_slice(&offsets[1].to_be_bytes());
        self.send_response(
            server_response::UPDATE_BASE_TIMES,
            server_command::SUBSCRIBE,
            &body,
        )
    }

    /// Sends an `UpdateSignalIndexCache` response for `signals`, GZip
    /// compressed when `compressed`.
    pub fn send_signal_index_cache(
        &mut self,
        signals: &[MockSignal],
        compressed: bool,
    ) -> io::Result<()> {
        let payload = build_signal_index_cache_payload(signals);

        let body = if compressed {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload)?;
            encoder.finish()?
        } else {
            payload
        };

        self.send_response(
            server_response::UPDATE_SIGNAL_INDEX_CACHE,
            server_command::SUBSCRIBE,
            &body,
        )
    }

    /// Sends a compact data packet with full per-measurement timestamps.
    pub fn send_compact_data_packet(
        &mut self,
        measurements: &[(u16, i64, f32)],
    ) -> io::Result<()> {
        let body = build_compact_data_packet(measurements);
        self.send_response(server_response::DATA_PACKET, server_command::SUBSCRIBE, &body)
    }

    /// Sends a TSSC data packet with the session's running sequence number.
    pub fn send_tssc_data_packet(
        &mut self,
        measurements: &[(u16, i64, u32, f32)],
    ) -> io::Result<()> {
        let sequence = self.tssc_sequence;
        let result = self.send_tssc_data_packet_with_sequence(sequence, measurements);

        self.tssc_sequence = self.tssc_sequence.wrapping_add(1);
        if self.tssc_sequence == 0 {
            self.tssc_sequence = 1;
        }

        result
    }

    /// Sends a TSSC data packet with an explicit sequence number; the
    /// session's own sequence tracking is left alone.
    pub fn send_tssc_data_packet_with_sequence(
        &mut self,
        sequence: u16,
        measurements: &[(u16, i64, u32, f32)],
    ) -> io::Result<()> {
        self.encoder.set_buffer(256 + measurements.len() * 32);
        for &(id, timestamp, quality, value) in measurements {
            if !self.encoder.try_add_measurement(id, timestamp, quality, value) {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "mock TSSC block overflow",
                ));
            }
        }
        let block = self.encoder.finish_block().to_vec();

        let mut body = Vec::with_capacity(8 + block.len());
        body.push(data_packet_flags::COMPRESSED);
        body.extend_from_slice(&(measurements.len() as u32).to_be_bytes());
        body.push(TSSC_VERSION);
        body.extend_from_slice(&sequence.to_be_bytes());
        body.extend_from_slice(&block);

        self.send_response(server_response::DATA_PACKET, server_command::SUBSCRIBE, &body)
    }

    /// Sends a data packet whose TSSC version byte is wrong.
    pub fn send_bad_tssc_version_packet(&mut self) -> io::Result<()> {
        let mut body = Vec::new();
        body.push(data_packet_flags::COMPRESSED);
        body.extend_from_slice(&1u32.to_be_bytes());
        body.push(TSSC_VERSION - 1);
        body.extend_from_slice(&0u16.to_be_bytes());
        self.send_response(server_response::DATA_PACKET, server_command::SUBSCRIBE, &body)
    }

    /// Restarts the compressed stream: resets the encoder and returns the
    /// sequence to zero, as a publisher does on (re)subscription.
    pub fn reset_tssc(&mut self) {
        self.encoder.reset();
        self.tssc_sequence = 0;
    }

    /// Sends a compact data packet as a UDP datagram to the subscriber's
    /// local data channel port.
    pub fn send_udp_compact_data_packet(
        &self,
        data_channel_port: u16,
        measurements: &[(u16, i64, f32)],
    ) -> io::Result<()> {
        let frame = build_udp_data_frame(measurements);
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.send_to(&frame, ("127.0.0.1", data_channel_port))?;
        Ok(())
    }

    /// Closes the session socket, simulating a publisher-side termination.
    pub fn close(self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

/// Builds the uncompressed signal index cache payload for `signals`.
pub fn build_signal_index_cache_payload(signals: &[MockSignal]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 16]); // subscriber ID
    body.extend_from_slice(&(signals.len() as u32).to_be_bytes());

    for signal in signals {
        body.extend_from_slice(&signal.signal_index.to_be_bytes());
        body.extend_from_slice(&guid_to_wire(&signal.signal_id));
        body.extend_from_slice(&(signal.source.len() as u32).to_be_bytes());
        body.extend_from_slice(signal.source.as_bytes());
        body.extend_from_slice(&signal.id.to_be_bytes());
    }

    let mut payload = Vec::with_capacity(body.len() + 4);
    payload.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
    payload.extend_from_slice(&body);
    payload
}

/// Builds a compact data packet body with full 8-byte timestamps.
pub fn build_compact_data_packet(measurements: &[(u16, i64, f32)]) -> Vec<u8> {
    let mut body = Vec::with_capacity(5 + measurements.len() * 15);
    body.push(data_packet_flags::COMPACT);
    body.extend_from_slice(&(measurements.len() as u32).to_be_bytes());

    for &(signal_index, timestamp, value) in measurements {
        body.push(0); // compact flags: normal quality, full timestamp
        body.extend_from_slice(&signal_index.to_be_bytes());
        body.extend_from_slice(&value.to_bits().to_be_bytes());
        body.extend_from_slice(&timestamp.to_be_bytes());
    }

    body
}

/// Builds a complete UDP data-channel frame: response header plus a compact
/// data packet. Datagrams carry no outer payload header.
pub fn build_udp_data_frame(measurements: &[(u16, i64, f32)]) -> Vec<u8> {
    let packet = build_compact_data_packet(measurements);
    let mut frame = Vec::with_capacity(2 + packet.len());
    frame.push(server_response::DATA_PACKET);
    frame.push(server_command::SUBSCRIBE);
    frame.extend_from_slice(&packet);
    frame
}

/// Generates a batch of pseudo-random measurement tuples shaped like a
/// steady phasor stream, for benchmarks and codec tests.
pub fn random_measurement_batch(points: u16, frames: usize) -> Vec<(u16, i64, u32, f32)> {
    let mut rng = rand::thread_rng();
    let mut batch = Vec::with_capacity(points as usize * frames);
    let base_time: i64 = 638_000_000_000_000_000;

    for frame in 0..frames {
        let timestamp = base_time + frame as i64 * 333_333;
        for id in 0..points {
            let value = 60.0 + rng.gen_range(-0.05f32..0.05);
            let quality = if rng.gen_ratio(1, 1000) { 8 } else { 0 };
            batch.push((id, timestamp, quality, value));
        }
    }

    batch
}
