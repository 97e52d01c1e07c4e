//! # GEP Protocol Constants
//!
//! Wire-level constant tables for the Gateway Exchange Protocol: server
//! command codes sent by the subscriber, server response codes received from
//! the publisher, data packet flags, per-measurement compact state flags, and
//! the operational-mode bitfield negotiated once per connection.
//!
//! Code values are preserved for wire compatibility with existing publishers;
//! command and response values are kept distinct so either direction can be
//! identified from a wire capture.

/// Server commands sent from subscriber to publisher over the command channel.
///
/// Handshake and confirmation commands occupy `0x00`–`0x07`, subscription
/// management `0x08`–`0x0A`, and user-defined commands `0xD0`–`0xDF`.
pub mod server_command {
    /// Connection state element only; carries no meaning to the publisher.
    pub const CONNECT: u8 = 0x00;
    /// Requests an updated metadata set.
    pub const METADATA_REFRESH: u8 = 0x01;
    /// Requests client authentication using the payload that follows.
    pub const AUTHENTICATE: u8 = 0x02;
    /// Requests a new set of cipher keys for data packet encryption.
    pub const ROTATE_CIPHER_KEYS: u8 = 0x03;
    /// Sets the desired measurement processing interval.
    pub const UPDATE_PROCESSING_INTERVAL: u8 = 0x04;
    /// Establishes operational modes; sent once immediately after connect.
    pub const DEFINE_OPERATIONAL_MODES: u8 = 0x05;
    /// Confirms receipt of a notification.
    pub const CONFIRM_NOTIFICATION: u8 = 0x06;
    /// Confirms receipt of a buffer block measurement.
    pub const CONFIRM_BUFFER_BLOCK: u8 = 0x07;
    /// Requests a streaming data subscription described by the connection
    /// string that follows.
    pub const SUBSCRIBE: u8 = 0x08;
    /// Cancels the current subscription.
    pub const UNSUBSCRIBE: u8 = 0x09;
    /// Provides publish-command measurements to the publisher.
    pub const PUBLISH_COMMAND_MEASUREMENTS: u8 = 0x0A;

    // User-defined commands
    pub const USER_COMMAND_00: u8 = 0xD0;
    pub const USER_COMMAND_01: u8 = 0xD1;
    pub const USER_COMMAND_02: u8 = 0xD2;
    pub const USER_COMMAND_03: u8 = 0xD3;
    pub const USER_COMMAND_04: u8 = 0xD4;
    pub const USER_COMMAND_05: u8 = 0xD5;
    pub const USER_COMMAND_06: u8 = 0xD6;
    pub const USER_COMMAND_07: u8 = 0xD7;
    pub const USER_COMMAND_08: u8 = 0xD8;
    pub const USER_COMMAND_09: u8 = 0xD9;
    pub const USER_COMMAND_10: u8 = 0xDA;
    pub const USER_COMMAND_11: u8 = 0xDB;
    pub const USER_COMMAND_12: u8 = 0xDC;
    pub const USER_COMMAND_13: u8 = 0xDD;
    pub const USER_COMMAND_14: u8 = 0xDE;
    pub const USER_COMMAND_15: u8 = 0xDF;
}

/// Server responses received from publisher on either channel.
pub mod server_response {
    /// Command succeeded; payload semantics depend on the echoed command.
    pub const SUCCEEDED: u8 = 0x80;
    /// Command failed; payload is a UTF-8 error message.
    pub const FAILED: u8 = 0x81;
    /// A batch of measurements in compact or TSSC form.
    pub const DATA_PACKET: u8 = 0x82;
    /// Replacement signal index cache, optionally GZip compressed.
    pub const UPDATE_SIGNAL_INDEX_CACHE: u8 = 0x83;
    /// New base-time offsets for compact timestamp reconstruction.
    pub const UPDATE_BASE_TIMES: u8 = 0x84;
    /// New cipher keys for the data channel.
    pub const UPDATE_CIPHER_KEYS: u8 = 0x85;
    /// Publisher-side start time of the data stream, in ticks.
    pub const DATA_START_TIME: u8 = 0x86;
    /// End of a temporal processing session.
    pub const PROCESSING_COMPLETE: u8 = 0x87;
    /// An out-of-band buffer block measurement.
    pub const BUFFER_BLOCK: u8 = 0x88;
    /// A notification message requiring confirmation.
    pub const NOTIFY: u8 = 0x89;
    /// The publisher's source configuration has changed.
    pub const CONFIGURATION_CHANGED: u8 = 0x8A;

    // User-defined responses
    pub const USER_RESPONSE_00: u8 = 0xE0;
    pub const USER_RESPONSE_01: u8 = 0xE1;
    pub const USER_RESPONSE_02: u8 = 0xE2;
    pub const USER_RESPONSE_03: u8 = 0xE3;
    pub const USER_RESPONSE_04: u8 = 0xE4;
    pub const USER_RESPONSE_05: u8 = 0xE5;
    pub const USER_RESPONSE_06: u8 = 0xE6;
    pub const USER_RESPONSE_07: u8 = 0xE7;
    pub const USER_RESPONSE_08: u8 = 0xE8;
    pub const USER_RESPONSE_09: u8 = 0xE9;
    pub const USER_RESPONSE_10: u8 = 0xEA;
    pub const USER_RESPONSE_11: u8 = 0xEB;
    pub const USER_RESPONSE_12: u8 = 0xEC;
    pub const USER_RESPONSE_13: u8 = 0xED;
    pub const USER_RESPONSE_14: u8 = 0xEE;
    pub const USER_RESPONSE_15: u8 = 0xEF;

    /// Keep-alive; carries no payload and requires no action.
    pub const NO_OP: u8 = 0xFF;
}

/// Data packet flags: first byte of every `DATA_PACKET` payload.
pub mod data_packet_flags {
    /// Packet carries a frame-level timestamp applied to all measurements.
    pub const SYNCHRONIZED: u8 = 0x01;
    /// Measurements are serialized in the compact format.
    pub const COMPACT: u8 = 0x02;
    /// Measurements are compressed with TSSC.
    pub const COMPRESSED: u8 = 0x80;
    /// No flags.
    pub const NO_FLAGS: u8 = 0x00;
}

/// Per-measurement state flags of the compact format, with the masks that
/// expand each bit to the full 32-bit measurement flag word.
pub mod compact_flags {
    /// Measurement value is out of its normal range.
    pub const DATA_RANGE: u8 = 0x01;
    /// Measurement value quality is suspect.
    pub const DATA_QUALITY: u8 = 0x02;
    /// Measurement timestamp quality is suspect.
    pub const TIME_QUALITY: u8 = 0x04;
    /// Publisher-side system issue affected this measurement.
    pub const SYSTEM_ISSUE: u8 = 0x08;
    /// Value was calculated rather than measured.
    pub const CALCULATED_VALUE: u8 = 0x10;
    /// Value was discarded from normal processing.
    pub const DISCARDED_VALUE: u8 = 0x20;
    /// Timestamp is serialized as an offset from a base time.
    pub const BASE_TIME_OFFSET: u8 = 0x40;
    /// Selects base-time slot 1 instead of slot 0.
    pub const TIME_INDEX: u8 = 0x80;

    pub const DATA_RANGE_MASK: u32 = 0x0000_00FC;
    pub const DATA_QUALITY_MASK: u32 = 0x0000_EF03;
    pub const TIME_QUALITY_MASK: u32 = 0x00BF_0000;
    pub const SYSTEM_ISSUE_MASK: u32 = 0xE000_0000;
    pub const CALCULATED_VALUE_MASK: u32 = 0x0000_1000;
    pub const DISCARDED_VALUE_MASK: u32 = 0x0040_0000;

    /// Expands 8-bit compact state flags to the full 32-bit flag word.
    pub fn map_to_full_flags(compact: u8) -> u32 {
        let mut full = 0;

        if compact & DATA_RANGE > 0 {
            full |= DATA_RANGE_MASK;
        }
        if compact & DATA_QUALITY > 0 {
            full |= DATA_QUALITY_MASK;
        }
        if compact & TIME_QUALITY > 0 {
            full |= TIME_QUALITY_MASK;
        }
        if compact & SYSTEM_ISSUE > 0 {
            full |= SYSTEM_ISSUE_MASK;
        }
        if compact & CALCULATED_VALUE > 0 {
            full |= CALCULATED_VALUE_MASK;
        }
        if compact & DISCARDED_VALUE > 0 {
            full |= DISCARDED_VALUE_MASK;
        }

        full
    }
}

/// Operational modes: u32 bitfield negotiated once per connection via
/// `DEFINE_OPERATIONAL_MODES`, governing encoding and compression of all
/// subsequent traffic.
pub mod operational_modes {
    /// Protocol version bits.
    pub const VERSION_MASK: u32 = 0x0000_001F;
    /// Compression mode bits (see `compression_modes`).
    pub const COMPRESSION_MODE_MASK: u32 = 0x0000_00E0;
    /// Character encoding bits (see `operational_encoding`).
    pub const ENCODING_MASK: u32 = 0x0000_0300;
    /// Use the common serialization format for exchanged payloads.
    pub const USE_COMMON_SERIALIZATION_FORMAT: u32 = 0x0100_0000;
    /// Receive metadata for externally defined points.
    pub const RECEIVE_EXTERNAL_METADATA: u32 = 0x0200_0000;
    /// Receive metadata for internally defined points.
    pub const RECEIVE_INTERNAL_METADATA: u32 = 0x0400_0000;
    /// Compress data packet payloads (TSSC).
    pub const COMPRESS_PAYLOAD_DATA: u32 = 0x2000_0000;
    /// Compress the signal index cache (GZip).
    pub const COMPRESS_SIGNAL_INDEX_CACHE: u32 = 0x4000_0000;
    /// Compress metadata exchanges (GZip).
    pub const COMPRESS_METADATA: u32 = 0x8000_0000;
    /// No flags.
    pub const NO_FLAGS: u32 = 0x0000_0000;
}

/// Character encodings selectable inside the operational modes word.
pub mod operational_encoding {
    pub const UNICODE: u32 = 0x0000_0000;
    pub const BIG_ENDIAN_UNICODE: u32 = 0x0000_0100;
    pub const UTF8: u32 = 0x0000_0200;
    pub const ANSI: u32 = 0x0000_0300;
}

/// Compression algorithms selectable inside the operational modes word.
pub mod compression_modes {
    pub const GZIP: u32 = 0x0000_0020;
    pub const TSSC: u32 = 0x0000_0040;
    pub const NONE: u32 = 0x0000_0000;
}
