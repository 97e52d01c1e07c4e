//! # TSSC: Time Series Special Compression
//!
//! Stateful, predictive compression for measurement streams. Every point
//! carries its own history (previous values, qualities and the next expected
//! point id) plus an adaptive code table that migrates the most frequent
//! codewords onto one-, two- and three-bit prefixes. Timestamps are encoded
//! against a ladder of the four smallest deltas recently observed; values and
//! point ids are XOR-encoded against their predecessors in 4-bit increments.
//!
//! The decoder consumes the stream the publisher produces; the encoder is the
//! exact inverse and exists so the mock publisher and the test suite can
//! produce genuine TSSC blocks.
//!
//! Compressed blocks interleave a bit stream with byte-aligned fields: the
//! writer reserves a byte for the bit cache at the current position the first
//! time bits are buffered, so readers naturally consume those bytes when
//! their own bit cache drains. Sequence numbering and reset negotiation are
//! the subscriber's responsibility, not the codec's.

pub mod decoder;
pub mod encoder;

pub use decoder::TsscDecoder;
pub use encoder::TsscEncoder;

/// TSSC packet version byte expected ahead of every compressed block.
pub const TSSC_VERSION: u8 = 85;

/// Codewords of the compressed stream.
pub(crate) mod code_words {
    pub const END_OF_STREAM: u8 = 0;

    pub const POINT_ID_XOR4: u8 = 1;
    pub const POINT_ID_XOR8: u8 = 2;
    pub const POINT_ID_XOR12: u8 = 3;
    pub const POINT_ID_XOR16: u8 = 4;

    pub const TIME_DELTA1_FORWARD: u8 = 5;
    pub const TIME_DELTA2_FORWARD: u8 = 6;
    pub const TIME_DELTA3_FORWARD: u8 = 7;
    pub const TIME_DELTA4_FORWARD: u8 = 8;
    pub const TIME_DELTA1_REVERSE: u8 = 9;
    pub const TIME_DELTA2_REVERSE: u8 = 10;
    pub const TIME_DELTA3_REVERSE: u8 = 11;
    pub const TIME_DELTA4_REVERSE: u8 = 12;
    pub const TIMESTAMP2: u8 = 13;
    pub const TIME_XOR_7BIT: u8 = 14;

    pub const QUALITY2: u8 = 15;
    pub const QUALITY_7BIT32: u8 = 16;

    pub const VALUE1: u8 = 17;
    pub const VALUE2: u8 = 18;
    pub const VALUE3: u8 = 19;
    pub const VALUE_ZERO: u8 = 20;
    pub const VALUE_XOR4: u8 = 21;
    pub const VALUE_XOR8: u8 = 22;
    pub const VALUE_XOR12: u8 = 23;
    pub const VALUE_XOR16: u8 = 24;
    pub const VALUE_XOR20: u8 = 25;
    pub const VALUE_XOR24: u8 = 26;
    pub const VALUE_XOR28: u8 = 27;
    pub const VALUE_XOR32: u8 = 28;
}

/// Per-point predictor state and adaptive code table.
///
/// The code table starts in mode 4 with the three value-repeat codes on the
/// short prefixes, then re-ranks as codes accumulate so each point converges
/// on its own distribution. Encoder and decoder run the
/// identical adaptation from the identical code sequence, which keeps their
/// tables in lockstep without any side channel.
#[derive(Debug, Clone)]
pub(crate) struct PointMetadata {
    pub prev_next_point_id: u16,
    pub prev_quality1: u32,
    pub prev_quality2: u32,
    pub prev_value1: u32,
    pub prev_value2: u32,
    pub prev_value3: u32,

    command_stats: [u8; 32],
    commands_sent: u32,

    pub mode: u8,
    // Codes granted the short prefixes in each mode (mode 1 has none)
    pub mode21: u8,
    pub mode31: u8,
    pub mode301: u8,
    pub mode41: u8,
    pub mode401: u8,
    pub mode4001: u8,

    startup_mode: u8,
}

impl PointMetadata {
    pub(crate) fn new() -> Self {
        PointMetadata {
            prev_next_point_id: 0,
            prev_quality1: 0,
            prev_quality2: 0,
            prev_value1: 0,
            prev_value2: 0,
            prev_value3: 0,
            command_stats: [0; 32],
            commands_sent: 0,
            mode: 4,
            mode21: 0,
            mode31: 0,
            mode301: 0,
            mode41: code_words::VALUE1,
            mode401: code_words::VALUE2,
            mode4001: code_words::VALUE3,
            startup_mode: 0,
        }
    }

    /// Records an observed code and re-ranks the table after the first 5
    /// codes, the next 20, and every 100 codes thereafter.
    pub(crate) fn update_code_statistics(&mut self, code: u8) {
        self.commands_sent += 1;
        self.command_stats[code as usize] = self.command_stats[code as usize].saturating_add(1);

        if self.startup_mode == 0 && self.commands_sent > 5 {
            self.startup_mode += 1;
            self.adapt_commands();
        } else if self.startup_mode == 1 && self.commands_sent > 20 {
            self.startup_mode += 1;
            self.adapt_commands();
        } else if self.startup_mode == 2 && self.commands_sent > 100 {
            self.adapt_commands();
        }
    }

    /// Picks the mode minimizing the bit cost of the codes seen since the
    /// last adaptation, assigning the three most frequent codes to the
    /// one-, two- and three-bit prefixes.
    fn adapt_commands(&mut self) {
        let mut code1: u8 = 0;
        let mut count1: i64 = 0;
        let mut code2: u8 = 1;
        let mut count2: i64 = 0;
        let mut code3: u8 = 2;
        let mut count3: i64 = 0;
        let mut total: i64 = 0;

        for (i, stat) in self.command_stats.iter_mut().enumerate() {
            let count = *stat as i64;
            *stat = 0;
            total += count;

            if count > count3 {
                if count > count1 {
                    code3 = code2;
                    count3 = count2;
                    code2 = code1;
                    count2 = count1;
                    code1 = i as u8;
                    count1 = count;
                } else if count > count2 {
                    code3 = code2;
                    count3 = count2;
                    code2 = i as u8;
                    count2 = count;
                } else {
                    code3 = i as u8;
                    count3 = count;
                }
            }
        }

        let mode1_size = total * 5;
        let mode2_size = count1 + (total - count1) * 6;
        let mode3_size = count1 + count2 * 2 + (total - count1 - count2) * 7;
        let mode4_size =
            count1 + count2 * 2 + count3 * 3 + (total - count1 - count2 - count3) * 8;

        let min_size = mode1_size.min(mode2_size).min(mode3_size).min(mode4_size);

        if min_size == mode1_size {
            self.mode = 1;
        } else if min_size == mode2_size {
            self.mode = 2;
            self.mode21 = code1;
        } else if min_size == mode3_size {
            self.mode = 3;
            self.mode31 = code1;
            self.mode301 = code2;
        } else {
            self.mode = 4;
            self.mode41 = code1;
            self.mode401 = code2;
            self.mode4001 = code3;
        }

        self.commands_sent = 0;
    }
}

/// Identifies which point currently owns the code stream: the synthetic
/// starting point, or a real point by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PointSlot {
    Head,
    Index(u16),
}

/// Folds the newest observed timestamp delta into the four-slot delta
/// ladder, keeping the ladder sorted ascending and free of duplicates.
pub(crate) fn update_time_deltas(prev_timestamp: i64, timestamp: i64, deltas: &mut [i64; 4]) {
    let min_delta = prev_timestamp.wrapping_sub(timestamp).wrapping_abs();

    if min_delta < deltas[3]
        && min_delta != deltas[0]
        && min_delta != deltas[1]
        && min_delta != deltas[2]
    {
        if min_delta < deltas[0] {
            deltas[3] = deltas[2];
            deltas[2] = deltas[1];
            deltas[1] = deltas[0];
            deltas[0] = min_delta;
        } else if min_delta < deltas[1] {
            deltas[3] = deltas[2];
            deltas[2] = deltas[1];
            deltas[1] = min_delta;
        } else if min_delta < deltas[2] {
            deltas[3] = deltas[2];
            deltas[2] = min_delta;
        } else {
            deltas[3] = min_delta;
        }
    }
}
