//! # Compact Measurement Format
//!
//! Stateless per-measurement decoder for uncompressed data packets. Each
//! compact measurement is a flag byte, a 16-bit runtime signal index and a
//! 32-bit value, followed by one of three timestamp encodings: a full 8-byte
//! tick count, a 4-byte tick offset against the active base time, or a
//! 2-byte millisecond offset against the active base time. Synchronized
//! packets omit per-measurement time entirely and apply a frame-level
//! timestamp supplied by the caller.

use crate::transport::codec::PayloadReader;
use crate::transport::common::{Measurement, SubscriberError};
use crate::transport::constants::compact_flags;
use crate::transport::signal_index_cache::SignalIndexCache;

/// Ticks per millisecond in publisher timestamps.
const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Decoder for the compact measurement format.
///
/// Borrows the current signal index cache and base-time offsets for the
/// duration of one data packet; the reader thread that owns both is the only
/// caller, so the snapshot stays consistent across the packet.
pub struct CompactMeasurementDecoder<'a> {
    cache: &'a SignalIndexCache,
    base_time_offsets: [i64; 2],
    include_time: bool,
    use_millisecond_resolution: bool,
}

impl<'a> CompactMeasurementDecoder<'a> {
    pub fn new(
        cache: &'a SignalIndexCache,
        base_time_offsets: [i64; 2],
        include_time: bool,
        use_millisecond_resolution: bool,
    ) -> Self {
        CompactMeasurementDecoder {
            cache,
            base_time_offsets,
            include_time,
            use_millisecond_resolution,
        }
    }

    /// Decodes the next measurement from `reader`.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(measurement))`: a decoded measurement.
    /// * `Ok(None)`: the measurement referenced an unmapped signal index and
    ///   was skipped; the reader has advanced past it.
    /// * `Err`: truncated data; decoding of the current packet must stop.
    pub fn parse(
        &self,
        reader: &mut PayloadReader<'_>,
    ) -> Result<Option<Measurement>, SubscriberError> {
        let flags = reader.read_u8()?;

        let using_base_time_offset = flags & compact_flags::BASE_TIME_OFFSET > 0;
        let time_index = if flags & compact_flags::TIME_INDEX > 0 { 1 } else { 0 };

        let signal_index = reader.read_u16()?;
        let value = reader.read_f32()?;

        let mut timestamp = 0i64;

        if self.include_time {
            if !using_base_time_offset {
                timestamp = reader.read_i64()?;
            } else if !self.use_millisecond_resolution {
                timestamp = reader.read_u32()? as i64 + self.base_time_offsets[time_index];
            } else {
                timestamp = reader.read_u16()? as i64 * TICKS_PER_MILLISECOND
                    + self.base_time_offsets[time_index];
            }
        }

        // Unmapped signal indexes are dropped, not errored
        let key = match self.cache.measurement_key(signal_index) {
            Some(key) => key,
            None => return Ok(None),
        };

        Ok(Some(Measurement {
            signal_id: key.signal_id,
            source: key.source.clone(),
            id: key.id,
            timestamp,
            flags: compact_flags::map_to_full_flags(flags),
            value,
        }))
    }
}
