//! # GEP Common Types
//!
//! Core types shared across the transport layer: the `Measurement` record
//! delivered to subscribers, and the `SubscriberError` enumeration used for
//! error propagation throughout the crate.
//!
//! ## Key Components
//!
//! - `Measurement`: a timestamped, quality-flagged sample of a single signal.
//! - `SubscriberError`: enumerates lifecycle, transport and decoding failures
//!   with their recovery class.
//!
//! ## Usage
//!
//! `Measurement` values are produced by the compact and TSSC decoders and
//! handed to the registered new-measurements callback in batches, one batch
//! per data packet.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Largest packet the transport will buffer for either channel.
pub const MAX_PACKET_SIZE: usize = 32768;

/// Size of the payload header preceding every command-channel frame:
/// a 4-byte marker followed by a 4-byte little-endian payload size.
pub const PAYLOAD_HEADER_SIZE: usize = 8;

/// Number of 100-ns ticks between 0001-01-01T00:00:00Z and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Ticks per second in publisher timestamps (100-ns resolution).
const TICKS_PER_SECOND: i64 = 10_000_000;

/// A timestamped sample of a signal with a quality flag.
///
/// Timestamps use the publisher convention of 100-ns ticks since
/// 0001-01-01T00:00:00Z.
///
/// # Fields
///
/// * `signal_id`: 128-bit signal identifier, stable across subscriptions.
/// * `source`: measurement source (e.g. the publisher's point-tag acronym).
/// * `id`: numeric point identifier within `source`.
/// * `timestamp`: 100-ns ticks since 0001-01-01T00:00:00Z.
/// * `flags`: 32-bit quality flags; zero means a normal measurement.
/// * `value`: the measured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub signal_id: Uuid,
    pub source: String,
    pub id: u32,
    pub timestamp: i64,
    pub flags: u32,
    pub value: f32,
}

impl Measurement {
    /// Converts the tick timestamp to a UTC datetime.
    ///
    /// Sub-100ns precision is preserved up to nanoseconds; timestamps before
    /// the Unix epoch saturate to it.
    pub fn datetime(&self) -> DateTime<Utc> {
        let unix_ticks = (self.timestamp - UNIX_EPOCH_TICKS).max(0);
        let secs = unix_ticks / TICKS_PER_SECOND;
        let nanos = (unix_ticks % TICKS_PER_SECOND) * 100;
        match Utc.timestamp_opt(secs, nanos as u32) {
            chrono::LocalResult::Single(dt) => dt,
            _ => Utc.timestamp_opt(0, 0).unwrap(),
        }
    }
}

/// Represents errors raised by the subscriber transport.
///
/// The variants divide into connection-level failures, which terminate the
/// connection (and are the only class the reconnector retries), and
/// packet-level failures, which are reported through the error-message
/// callback and never terminate the connection.
///
/// # Variants
///
/// * `AlreadyConnected`: `connect` was called on a connected subscriber.
/// * `ConnectFailed`: the connection sequence failed (DNS, TCP connect).
/// * `BindFailed`: the local UDP data channel could not be bound.
/// * `Io`: a network failure during steady-state operation.
/// * `Protocol`: malformed frame, unknown response code or bad payload.
/// * `Sequence`: a TSSC packet arrived out of sequence.
/// * `Decode`: a measurement payload could not be decoded.
#[derive(Debug)]
pub enum SubscriberError {
    AlreadyConnected,
    ConnectFailed { message: String },
    BindFailed { message: String },
    Io { message: String },
    Protocol { message: String },
    Sequence { message: String },
    Decode { message: String },
}

impl fmt::Display for SubscriberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberError::AlreadyConnected => {
                write!(f, "Subscriber is already connected; disconnect first")
            }
            SubscriberError::ConnectFailed { message } => {
                write!(f, "Connect failed: {}", message)
            }
            SubscriberError::BindFailed { message } => write!(f, "Bind failed: {}", message),
            SubscriberError::Io { message } => write!(f, "I/O error: {}", message),
            SubscriberError::Protocol { message } => write!(f, "Protocol error: {}", message),
            SubscriberError::Sequence { message } => write!(f, "Sequence error: {}", message),
            SubscriberError::Decode { message } => write!(f, "Decode error: {}", message),
        }
    }
}

impl std::error::Error for SubscriberError {}

impl From<std::io::Error> for SubscriberError {
    fn from(error: std::io::Error) -> Self {
        SubscriberError::Io {
            message: error.to_string(),
        }
    }
}
