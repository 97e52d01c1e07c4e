//! TSSC block encoder, the inverse of the decoder. The subscriber never
//! sends compressed data; this half drives the mock publisher and the codec
//! tests with genuine TSSC streams.

use super::{code_words, update_time_deltas, PointMetadata, PointSlot};
use crate::transport::codec::{write_7bit_u32, write_7bit_u64};

/// Headroom required before accepting another measurement into the block:
/// worst-case codes, point id, varint timestamp and quality, and value.
const MINIMUM_HEADROOM: usize = 100;

/// Stateful encoder for TSSC-compressed measurement blocks.
pub struct TsscEncoder {
    data: Vec<u8>,
    position: usize,
    last_position: usize,

    prev_timestamp1: i64,
    prev_timestamp2: i64,
    prev_time_deltas: [i64; 4],

    head_point: PointMetadata,
    last_point: PointSlot,
    points: Vec<Option<PointMetadata>>,

    // Bits are buffered here and written into a byte reserved at the
    // position where the decoder's bit cache will drain
    bit_stream_buffer_index: Option<usize>,
    bit_stream_count: u32,
    bit_stream_cache: u64,
}

impl TsscEncoder {
    pub fn new() -> Self {
        let mut encoder = TsscEncoder {
            data: Vec::new(),
            position: 0,
            last_position: 0,
            prev_timestamp1: 0,
            prev_timestamp2: 0,
            prev_time_deltas: [i64::MAX; 4],
            head_point: PointMetadata::new(),
            last_point: PointSlot::Head,
            points: Vec::new(),
            bit_stream_buffer_index: None,
            bit_stream_count: 0,
            bit_stream_cache: 0,
        };
        encoder.reset();
        encoder
    }

    /// Drops all predictor state. A publisher performs this reset when it
    /// restarts a stream, signalled to subscribers by sequence number zero.
    pub fn reset(&mut self) {
        self.points.clear();
        self.head_point = PointMetadata::new();
        self.last_point = PointSlot::Head;
        self.prev_timestamp1 = 0;
        self.prev_timestamp2 = 0;
        self.prev_time_deltas = [i64::MAX; 4];
        self.bit_stream_buffer_index = None;
        self.bit_stream_count = 0;
        self.bit_stream_cache = 0;
        self.data.clear();
        self.position = 0;
        self.last_position = 0;
    }

    /// Starts a new block with `capacity` output bytes available.
    pub fn set_buffer(&mut self, capacity: usize) {
        self.bit_stream_buffer_index = None;
        self.bit_stream_count = 0;
        self.bit_stream_cache = 0;
        self.data.clear();
        self.data.resize(capacity, 0);
        self.position = 0;
        self.last_position = capacity;
    }

    /// Appends one measurement to the block.
    ///
    /// # Returns
    ///
    /// `false` when the remaining buffer headroom is too small; the caller
    /// should finish this block and start another.
    pub fn try_add_measurement(&mut self, id: u16, timestamp: i64, quality: u32, value: f32) -> bool {
        if self.last_position - self.position < MINIMUM_HEADROOM {
            return false;
        }

        self.ensure_point(id);
        let last = self.last_point;

        if self.point(last).prev_next_point_id != id {
            self.write_point_id_change(last, id);
            self.point_mut(last).prev_next_point_id = id;
        }

        if self.prev_timestamp1 != timestamp {
            self.write_timestamp_change(last, timestamp);
        }

        let current = PointSlot::Index(id);

        if self.point(current).prev_quality1 != quality {
            self.write_quality_change(last, current, quality);
            let point = self.point_mut(current);
            point.prev_quality2 = point.prev_quality1;
            point.prev_quality1 = quality;
        }

        self.write_value(last, current, value.to_bits());

        self.last_point = current;
        true
    }

    /// Flushes pending bits and returns the finished block.
    pub fn finish_block(&mut self) -> &[u8] {
        self.flush_bit_stream();
        &self.data[..self.position]
    }

    fn write_point_id_change(&mut self, last: PointSlot, id: u16) {
        let xor = id ^ self.point(last).prev_next_point_id;

        if xor < 16 {
            self.write_code(last, code_words::POINT_ID_XOR4);
            self.write_bits(xor as u32 & 15, 4);
        } else if xor < 256 {
            self.write_code(last, code_words::POINT_ID_XOR8);
            self.write_byte(xor as u8);
        } else if xor < 4096 {
            self.write_code(last, code_words::POINT_ID_XOR12);
            self.write_bits(xor as u32 & 15, 4);
            self.write_byte((xor >> 4) as u8);
        } else {
            self.write_code(last, code_words::POINT_ID_XOR16);
            self.write_byte(xor as u8);
            self.write_byte((xor >> 8) as u8);
        }
    }

    fn write_timestamp_change(&mut self, last: PointSlot, timestamp: i64) {
        if self.prev_timestamp2 == timestamp {
            self.write_code(last, code_words::TIMESTAMP2);
        } else if self.prev_timestamp1 < timestamp {
            if self.prev_timestamp1.wrapping_add(self.prev_time_deltas[0]) == timestamp {
                self.write_code(last, code_words::TIME_DELTA1_FORWARD);
            } else if self.prev_timestamp1.wrapping_add(self.prev_time_deltas[1]) == timestamp {
                self.write_code(last, code_words::TIME_DELTA2_FORWARD);
            } else if self.prev_timestamp1.wrapping_add(self.prev_time_deltas[2]) == timestamp {
                self.write_code(last, code_words::TIME_DELTA3_FORWARD);
            } else if self.prev_timestamp1.wrapping_add(self.prev_time_deltas[3]) == timestamp {
                self.write_code(last, code_words::TIME_DELTA4_FORWARD);
            } else {
                self.write_code(last, code_words::TIME_XOR_7BIT);
                let xor = (timestamp ^ self.prev_timestamp1) as u64;
                write_7bit_u64(&mut self.data, &mut self.position, xor);
            }
        } else if self.prev_timestamp1.wrapping_sub(self.prev_time_deltas[0]) == timestamp {
            self.write_code(last, code_words::TIME_DELTA1_REVERSE);
        } else if self.prev_timestamp1.wrapping_sub(self.prev_time_deltas[1]) == timestamp {
            self.write_code(last, code_words::TIME_DELTA2_REVERSE);
        } else if self.prev_timestamp1.wrapping_sub(self.prev_time_deltas[2]) == timestamp {
            self.write_code(last, code_words::TIME_DELTA3_REVERSE);
        } else if self.prev_timestamp1.wrapping_sub(self.prev_time_deltas[3]) == timestamp {
            self.write_code(last, code_words::TIME_DELTA4_REVERSE);
        } else {
            self.write_code(last, code_words::TIME_XOR_7BIT);
            let xor = (timestamp ^ self.prev_timestamp1) as u64;
            write_7bit_u64(&mut self.data, &mut self.position, xor);
        }

        update_time_deltas(self.prev_timestamp1, timestamp, &mut self.prev_time_deltas);
        self.prev_timestamp2 = self.prev_timestamp1;
        self.prev_timestamp1 = timestamp;
    }

    fn write_quality_change(&mut self, last: PointSlot, current: PointSlot, quality: u32) {
        if self.point(current).prev_quality2 == quality {
            self.write_code(last, code_words::QUALITY2);
        } else {
            self.write_code(last, code_words::QUALITY_7BIT32);
            write_7bit_u32(&mut self.data, &mut self.position, quality);
        }
    }

    fn write_value(&mut self, last: PointSlot, current: PointSlot, value_raw: u32) {
        let (prev1, prev2, prev3) = {
            let point = self.point(current);
            (point.prev_value1, point.prev_value2, point.prev_value3)
        };

        if prev1 == value_raw {
            self.write_code(last, code_words::VALUE1);
            return;
        }

        if prev2 == value_raw {
            self.write_code(last, code_words::VALUE2);
            let point = self.point_mut(current);
            point.prev_value2 = point.prev_value1;
            point.prev_value1 = value_raw;
            return;
        }

        if prev3 == value_raw {
            self.write_code(last, code_words::VALUE3);
            let point = self.point_mut(current);
            point.prev_value3 = point.prev_value2;
            point.prev_value2 = point.prev_value1;
            point.prev_value1 = value_raw;
            return;
        }

        if value_raw == 0 {
            self.write_code(last, code_words::VALUE_ZERO);
        } else {
            let xor = value_raw ^ prev1;

            if xor < 1 << 4 {
                self.write_code(last, code_words::VALUE_XOR4);
                self.write_bits(xor & 15, 4);
            } else if xor < 1 << 8 {
                self.write_code(last, code_words::VALUE_XOR8);
                self.write_byte(xor as u8);
            } else if xor < 1 << 12 {
                self.write_code(last, code_words::VALUE_XOR12);
                self.write_bits(xor & 15, 4);
                self.write_byte((xor >> 4) as u8);
            } else if xor < 1 << 16 {
                self.write_code(last, code_words::VALUE_XOR16);
                self.write_byte(xor as u8);
                self.write_byte((xor >> 8) as u8);
            } else if xor < 1 << 20 {
                self.write_code(last, code_words::VALUE_XOR20);
                self.write_bits(xor & 15, 4);
                self.write_byte((xor >> 4) as u8);
                self.write_byte((xor >> 12) as u8);
            } else if xor < 1 << 24 {
                self.write_code(last, code_words::VALUE_XOR24);
                self.write_byte(xor as u8);
                self.write_byte((xor >> 8) as u8);
                self.write_byte((xor >> 16) as u8);
            } else if xor < 1 << 28 {
                self.write_code(last, code_words::VALUE_XOR28);
                self.write_bits(xor & 15, 4);
                self.write_byte((xor >> 4) as u8);
                self.write_byte((xor >> 12) as u8);
                self.write_byte((xor >> 20) as u8);
            } else {
                self.write_code(last, code_words::VALUE_XOR32);
                self.write_byte(xor as u8);
                self.write_byte((xor >> 8) as u8);
                self.write_byte((xor >> 16) as u8);
                self.write_byte((xor >> 24) as u8);
            }
        }

        let point = self.point_mut(current);
        point.prev_value3 = point.prev_value2;
        point.prev_value2 = point.prev_value1;
        point.prev_value1 = value_raw;
    }

    /// Writes `code` through the code table of `slot`.
    fn write_code(&mut self, slot: PointSlot, code: u8) {
        let (mode, mode21, mode31, mode301, mode41, mode401, mode4001) = {
            let point = self.point(slot);
            (
                point.mode,
                point.mode21,
                point.mode31,
                point.mode301,
                point.mode41,
                point.mode401,
                point.mode4001,
            )
        };

        match mode {
            1 => self.write_bits(code as u32, 5),
            2 => {
                if code == mode21 {
                    self.write_bits(1, 1);
                } else {
                    self.write_bits(code as u32, 6);
                }
            }
            3 => {
                if code == mode31 {
                    self.write_bits(1, 1);
                } else if code == mode301 {
                    self.write_bits(1, 2);
                } else {
                    self.write_bits(code as u32, 7);
                }
            }
            _ => {
                if code == mode41 {
                    self.write_bits(1, 1);
                } else if code == mode401 {
                    self.write_bits(1, 2);
                } else if code == mode4001 {
                    self.write_bits(1, 3);
                } else {
                    self.write_bits(code as u32, 8);
                }
            }
        }

        self.point_mut(slot).update_code_statistics(code);
    }

    fn point(&self, slot: PointSlot) -> &PointMetadata {
        match slot {
            PointSlot::Head => &self.head_point,
            PointSlot::Index(id) => match self.points.get(id as usize).and_then(|p| p.as_ref()) {
                Some(point) => point,
                None => &self.head_point,
            },
        }
    }

    fn point_mut(&mut self, slot: PointSlot) -> &mut PointMetadata {
        match slot {
            PointSlot::Head => &mut self.head_point,
            PointSlot::Index(id) => {
                self.ensure_point(id);
                self.points[id as usize].get_or_insert_with(PointMetadata::new)
            }
        }
    }

    fn ensure_point(&mut self, id: u16) {
        let index = id as usize;
        if index >= self.points.len() {
            self.points.resize_with(index + 1, || None);
        }
        if self.points[index].is_none() {
            let mut point = PointMetadata::new();
            point.prev_next_point_id = id.wrapping_add(1);
            self.points[index] = Some(point);
        }
    }

    fn write_byte(&mut self, byte: u8) {
        self.data[self.position] = byte;
        self.position += 1;
    }

    fn write_bits(&mut self, code: u32, count: u32) {
        if self.bit_stream_buffer_index.is_none() {
            self.bit_stream_buffer_index = Some(self.position);
            self.position += 1;
        }

        self.bit_stream_cache = (self.bit_stream_cache << count) | code as u64;
        self.bit_stream_count += count;

        if self.bit_stream_count > 7 {
            self.drain_bit_stream();
        }
    }

    fn drain_bit_stream(&mut self) {
        while self.bit_stream_count > 7 {
            if let Some(index) = self.bit_stream_buffer_index {
                self.data[index] = (self.bit_stream_cache >> (self.bit_stream_count - 8)) as u8;
            }
            self.bit_stream_count -= 8;

            if self.bit_stream_count > 0 {
                self.bit_stream_buffer_index = Some(self.position);
                self.position += 1;
            } else {
                self.bit_stream_buffer_index = None;
            }
        }
    }

    fn flush_bit_stream(&mut self) {
        if self.bit_stream_count == 0 {
            return;
        }

        // Terminate the partial byte so the decoder reads a definite end
        // rather than padding bits
        let last = self.last_point;
        self.write_code(last, code_words::END_OF_STREAM);

        if self.bit_stream_count > 7 {
            self.drain_bit_stream();
        }

        if self.bit_stream_count > 0 {
            if let Some(index) = self.bit_stream_buffer_index {
                self.data[index] = (self.bit_stream_cache << (8 - self.bit_stream_count)) as u8;
            }
            self.bit_stream_buffer_index = None;
            self.bit_stream_count = 0;
            self.bit_stream_cache = 0;
        }
    }
}

impl Default for TsscEncoder {
    fn default() -> Self {
        Self::new()
    }
}
