//! TSSC block decoder. Holds per-point predictor state across packets; the
//! subscriber resets it when the publisher signals a stream reset via
//! sequence number zero.

use super::{code_words, update_time_deltas, PointMetadata, PointSlot};
use crate::transport::codec::{read_7bit_u32, read_7bit_u64};
use crate::transport::common::SubscriberError;

/// Stateful decoder for TSSC-compressed measurement blocks.
pub struct TsscDecoder {
    data: Vec<u8>,
    position: usize,
    last_position: usize,

    prev_timestamp1: i64,
    prev_timestamp2: i64,
    prev_time_deltas: [i64; 4],

    head_point: PointMetadata,
    last_point: PointSlot,
    points: Vec<Option<PointMetadata>>,

    bit_stream_count: u32,
    bit_stream_cache: u32,
}

impl TsscDecoder {
    pub fn new() -> Self {
        let mut decoder = TsscDecoder {
            data: Vec::new(),
            position: 0,
            last_position: 0,
            prev_timestamp1: 0,
            prev_timestamp2: 0,
            prev_time_deltas: [i64::MAX; 4],
            head_point: PointMetadata::new(),
            last_point: PointSlot::Head,
            points: Vec::new(),
            bit_stream_count: 0,
            bit_stream_cache: 0,
        };
        decoder.reset();
        decoder
    }

    /// Drops all predictor state, returning the decoder to its initial
    /// condition. Called when the publisher restarts the compressed stream.
    pub fn reset(&mut self) {
        self.points.clear();
        self.head_point = PointMetadata::new();
        self.last_point = PointSlot::Head;
        self.prev_timestamp1 = 0;
        self.prev_timestamp2 = 0;
        self.prev_time_deltas = [i64::MAX; 4];
        self.bit_stream_count = 0;
        self.bit_stream_cache = 0;
        self.data.clear();
        self.position = 0;
        self.last_position = 0;
    }

    /// Loads the compressed body of one packet for decoding.
    pub fn set_buffer(&mut self, buffer: &[u8]) {
        self.clear_bit_stream();
        self.data.clear();
        self.data.extend_from_slice(buffer);
        self.position = 0;
        self.last_position = self.data.len();
    }

    /// Decodes the next measurement from the current buffer.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((id, timestamp, quality, value)))`: one decoded tuple.
    /// * `Ok(None)`: the buffer is exhausted or the stream-end code was read.
    /// * `Err`: the block is malformed; the packet must be abandoned.
    pub fn try_get_measurement(
        &mut self,
    ) -> Result<Option<(u16, i64, u32, f32)>, SubscriberError> {
        if self.position == self.last_position && self.bit_stream_is_empty() {
            self.clear_bit_stream();
            return Ok(None);
        }

        // The previous point's code table describes the codes for this
        // measurement; measurement streams are sequential enough for the
        // prediction to hold most of the time.
        let last = self.last_point;
        let mut code = self.read_code(last)?;

        if code == code_words::END_OF_STREAM {
            self.clear_bit_stream();
            return Ok(None);
        }

        if code <= code_words::POINT_ID_XOR16 {
            self.decode_point_id(code, last)?;
            code = self.read_code(last)?;
            if code < code_words::TIME_DELTA1_FORWARD {
                return Err(SubscriberError::Decode {
                    message: format!(
                        "Expecting a time, quality or value code after point ID change, received {} at position {} of {}",
                        code, self.position, self.last_position
                    ),
                });
            }
        }

        let point_id = self.point(last).prev_next_point_id;
        let current = PointSlot::Index(point_id);
        self.ensure_point(point_id);

        let timestamp = if code <= code_words::TIME_XOR_7BIT {
            let timestamp = self.decode_timestamp(code)?;
            code = self.read_code(last)?;
            if code < code_words::QUALITY2 {
                return Err(SubscriberError::Decode {
                    message: format!(
                        "Expecting a quality or value code after timestamp change, received {} at position {} of {}",
                        code, self.position, self.last_position
                    ),
                });
            }
            timestamp
        } else {
            self.prev_timestamp1
        };

        let quality = if code <= code_words::QUALITY_7BIT32 {
            let quality = self.decode_quality(code, current)?;
            code = self.read_code(last)?;
            if code < code_words::VALUE1 {
                return Err(SubscriberError::Decode {
                    message: format!(
                        "Expecting a value code after quality change, received {} at position {} of {}",
                        code, self.position, self.last_position
                    ),
                });
            }
            quality
        } else {
            self.point(current).prev_quality1
        };

        let value_raw = self.decode_value(code, current)?;

        self.last_point = current;
        Ok(Some((point_id, timestamp, quality, f32::from_bits(value_raw))))
    }

    fn decode_point_id(&mut self, code: u8, last: PointSlot) -> Result<(), SubscriberError> {
        let xor: u16 = match code {
            code_words::POINT_ID_XOR4 => self.read_bits4()? as u16,
            code_words::POINT_ID_XOR8 => self.read_byte()? as u16,
            code_words::POINT_ID_XOR12 => {
                let low = self.read_bits4()? as u16;
                low | (self.read_byte()? as u16) << 4
            }
            _ => {
                let low = self.read_byte()? as u16;
                low | (self.read_byte()? as u16) << 8
            }
        };

        let point = self.point_mut(last);
        point.prev_next_point_id ^= xor;
        Ok(())
    }

    fn decode_timestamp(&mut self, code: u8) -> Result<i64, SubscriberError> {
        // Wrapping arithmetic keeps malformed input from panicking; the
        // encoder computes the same deltas the same way
        let timestamp = match code {
            code_words::TIME_DELTA1_FORWARD => {
                self.prev_timestamp1.wrapping_add(self.prev_time_deltas[0])
            }
            code_words::TIME_DELTA2_FORWARD => {
                self.prev_timestamp1.wrapping_add(self.prev_time_deltas[1])
            }
            code_words::TIME_DELTA3_FORWARD => {
                self.prev_timestamp1.wrapping_add(self.prev_time_deltas[2])
            }
            code_words::TIME_DELTA4_FORWARD => {
                self.prev_timestamp1.wrapping_add(self.prev_time_deltas[3])
            }
            code_words::TIME_DELTA1_REVERSE => {
                self.prev_timestamp1.wrapping_sub(self.prev_time_deltas[0])
            }
            code_words::TIME_DELTA2_REVERSE => {
                self.prev_timestamp1.wrapping_sub(self.prev_time_deltas[1])
            }
            code_words::TIME_DELTA3_REVERSE => {
                self.prev_timestamp1.wrapping_sub(self.prev_time_deltas[2])
            }
            code_words::TIME_DELTA4_REVERSE => {
                self.prev_timestamp1.wrapping_sub(self.prev_time_deltas[3])
            }
            code_words::TIMESTAMP2 => self.prev_timestamp2,
            _ => {
                let xor = read_7bit_u64(&self.data, &mut self.position)?;
                self.prev_timestamp1 ^ xor as i64
            }
        };

        update_time_deltas(self.prev_timestamp1, timestamp, &mut self.prev_time_deltas);
        self.prev_timestamp2 = self.prev_timestamp1;
        self.prev_timestamp1 = timestamp;

        Ok(timestamp)
    }

    fn decode_quality(&mut self, code: u8, slot: PointSlot) -> Result<u32, SubscriberError> {
        let quality = if code == code_words::QUALITY2 {
            self.point(slot).prev_quality2
        } else {
            read_7bit_u32(&self.data, &mut self.position)?
        };

        // The two-deep quality history only rotates on change
        let point = self.point_mut(slot);
        if quality != point.prev_quality1 {
            point.prev_quality2 = point.prev_quality1;
            point.prev_quality1 = quality;
        }

        Ok(quality)
    }

    fn decode_value(&mut self, code: u8, slot: PointSlot) -> Result<u32, SubscriberError> {
        match code {
            code_words::VALUE1 => Ok(self.point(slot).prev_value1),
            code_words::VALUE2 => {
                let point = self.point_mut(slot);
                let value = point.prev_value2;
                point.prev_value2 = point.prev_value1;
                point.prev_value1 = value;
                Ok(value)
            }
            code_words::VALUE3 => {
                let point = self.point_mut(slot);
                let value = point.prev_value3;
                point.prev_value3 = point.prev_value2;
                point.prev_value2 = point.prev_value1;
                point.prev_value1 = value;
                Ok(value)
            }
            code_words::VALUE_ZERO => {
                let point = self.point_mut(slot);
                point.prev_value3 = point.prev_value2;
                point.prev_value2 = point.prev_value1;
                point.prev_value1 = 0;
                Ok(0)
            }
            code_words::VALUE_XOR4..=code_words::VALUE_XOR32 => {
                let xor: u32 = match code {
                    code_words::VALUE_XOR4 => self.read_bits4()? as u32,
                    code_words::VALUE_XOR8 => self.read_byte()? as u32,
                    code_words::VALUE_XOR12 => {
                        self.read_bits4()? as u32 | (self.read_byte()? as u32) << 4
                    }
                    code_words::VALUE_XOR16 => {
                        self.read_byte()? as u32 | (self.read_byte()? as u32) << 8
                    }
                    code_words::VALUE_XOR20 => {
                        self.read_bits4()? as u32
                            | (self.read_byte()? as u32) << 4
                            | (self.read_byte()? as u32) << 12
                    }
                    code_words::VALUE_XOR24 => {
                        self.read_byte()? as u32
                            | (self.read_byte()? as u32) << 8
                            | (self.read_byte()? as u32) << 16
                    }
                    code_words::VALUE_XOR28 => {
                        self.read_bits4()? as u32
                            | (self.read_byte()? as u32) << 4
                            | (self.read_byte()? as u32) << 12
                            | (self.read_byte()? as u32) << 20
                    }
                    _ => {
                        self.read_byte()? as u32
                            | (self.read_byte()? as u32) << 8
                            | (self.read_byte()? as u32) << 16
                            | (self.read_byte()? as u32) << 24
                    }
                };

                let point = self.point_mut(slot);
                let value = xor ^ point.prev_value1;
                point.prev_value3 = point.prev_value2;
                point.prev_value2 = point.prev_value1;
                point.prev_value1 = value;
                Ok(value)
            }
            _ => Err(SubscriberError::Decode {
                message: format!(
                    "Invalid code received {} at position {} of {}",
                    code, self.position, self.last_position
                ),
            }),
        }
    }

    /// Reads the next code through the code table of `slot`.
    fn read_code(&mut self, slot: PointSlot) -> Result<u8, SubscriberError> {
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

        let code = match mode {
            1 => self.read_bits5()?,
            2 => {
                if self.read_bit()? == 1 {
                    mode21
                } else {
                    self.read_bits5()?
                }
            }
            3 => {
                if self.read_bit()? == 1 {
                    mode31
                } else if self.read_bit()? == 1 {
                    mode301
                } else {
                    self.read_bits5()?
                }
            }
            _ => {
                if self.read_bit()? == 1 {
                    mode41
                } else if self.read_bit()? == 1 {
                    mode401
                } else if self.read_bit()? == 1 {
                    mode4001
                } else {
                    self.read_bits5()?
                }
            }
        };

        self.point_mut(slot).update_code_statistics(code);
        Ok(code)
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
            // A fresh point predicts its successor id
            point.prev_next_point_id = id.wrapping_add(1);
            self.points[index] = Some(point);
        }
    }

    fn read_byte(&mut self) -> Result<u8, SubscriberError> {
        if self.position >= self.last_position {
            return Err(SubscriberError::Decode {
                message: "Unexpected end of buffer in compressed block".to_string(),
            });
        }
        let byte = self.data[self.position];
        self.position += 1;
        Ok(byte)
    }

    fn read_bit(&mut self) -> Result<u8, SubscriberError> {
        if self.bit_stream_count == 0 {
            self.bit_stream_cache = self.read_byte()? as u32;
            self.bit_stream_count = 8;
        }
        self.bit_stream_count -= 1;
        Ok(((self.bit_stream_cache >> self.bit_stream_count) & 1) as u8)
    }

    fn read_bits4(&mut self) -> Result<u8, SubscriberError> {
        Ok(self.read_bit()? << 3 | self.read_bit()? << 2 | self.read_bit()? << 1 | self.read_bit()?)
    }

    fn read_bits5(&mut self) -> Result<u8, SubscriberError> {
        Ok(self.read_bit()? << 4
            | self.read_bit()? << 3
            | self.read_bit()? << 2
            | self.read_bit()? << 1
            | self.read_bit()?)
    }

    fn bit_stream_is_empty(&self) -> bool {
        self.bit_stream_count == 0
    }

    fn clear_bit_stream(&mut self) {
        self.bit_stream_count = 0;
        self.bit_stream_cache = 0;
    }
}

impl Default for TsscDecoder {
    fn default() -> Self {
        Self::new()
    }
}
