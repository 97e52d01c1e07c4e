//! # Signal Index Cache
//!
//! Publishers assign each subscribed signal a compact 16-bit runtime index
//! and describe the mapping in an `UpdateSignalIndexCache` response, remapped
//! on every (re)subscription. This module parses that payload, optionally
//! GZip wrapped, into a fresh cache which the subscriber swaps in wholesale,
//! so a malformed update can never corrupt the previous mapping.

use crate::transport::codec::PayloadReader;
use crate::transport::common::SubscriberError;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use uuid::Uuid;

/// Identity of a single signal: GUID, source acronym, and point id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementKey {
    pub signal_id: Uuid,
    pub source: String,
    pub id: u32,
}

/// Runtime signal-index → measurement-key mapping with reverse GUID lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalIndexCache {
    subscriber_id: [u8; 16],
    reference: HashMap<u16, MeasurementKey>,
    signal_id_cache: HashMap<Uuid, u16>,
}

impl SignalIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a cache payload, decompressing first when `compressed` is set.
    ///
    /// Decompressed layout, all multi-byte fields big-endian:
    /// `u32 length; u8[16] subscriberID; u32 referenceCount;` then per entry
    /// `u16 signalIndex, u8[16] signalID, u32 sourceSize, source bytes,
    /// u32 id`. Trailing unauthorized-signal data is ignored.
    pub fn parse(payload: &[u8], compressed: bool) -> Result<Self, SubscriberError> {
        let uncompressed;
        let data: &[u8] = if compressed {
            let mut decoder = GzDecoder::new(payload);
            let mut buffer = Vec::new();
            decoder
                .read_to_end(&mut buffer)
                .map_err(|e| SubscriberError::Protocol {
                    message: format!("Failed to decompress signal index cache: {}", e),
                })?;
            uncompressed = buffer;
            &uncompressed
        } else {
            payload
        };

        let mut reader = PayloadReader::new(data);

        // Leading length word describes the full buffer; the byte count we
        // trust is the slice itself.
        let _length = reader.read_u32()?;

        let mut subscriber_id = [0u8; 16];
        subscriber_id.copy_from_slice(reader.read_bytes(16)?);

        let reference_count = reader.read_u32()?;

        let mut cache = SignalIndexCache {
            subscriber_id,
            reference: HashMap::with_capacity(reference_count as usize),
            signal_id_cache: HashMap::with_capacity(reference_count as usize),
        };

        for _ in 0..reference_count {
            let signal_index = reader.read_u16()?;
            let signal_id = reader.read_guid()?;
            let source_size = reader.read_u32()? as usize;
            let source = reader.read_string(source_size)?;
            let id = reader.read_u32()?;

            cache.add_measurement_key(signal_index, signal_id, source, id);
        }

        // Unauthorized signal ID trailer is opaque to the subscriber

        Ok(cache)
    }

    /// Inserts a mapping for `signal_index`.
    pub fn add_measurement_key(
        &mut self,
        signal_index: u16,
        signal_id: Uuid,
        source: String,
        id: u32,
    ) {
        self.signal_id_cache.insert(signal_id, signal_index);
        self.reference.insert(
            signal_index,
            MeasurementKey {
                signal_id,
                source,
                id,
            },
        );
    }

    /// Whether `signal_index` is mapped.
    pub fn contains(&self, signal_index: u16) -> bool {
        self.reference.contains_key(&signal_index)
    }

    /// Resolves a runtime signal index to its measurement key.
    pub fn measurement_key(&self, signal_index: u16) -> Option<&MeasurementKey> {
        self.reference.get(&signal_index)
    }

    /// Reverse lookup from signal GUID to runtime index.
    pub fn signal_index(&self, signal_id: &Uuid) -> Option<u16> {
        self.signal_id_cache.get(signal_id).copied()
    }

    /// The 16-byte subscriber identity the publisher assigned.
    pub fn subscriber_id(&self) -> &[u8; 16] {
        &self.subscriber_id
    }

    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// Removes every mapping.
    pub fn clear(&mut self) {
        self.reference.clear();
        self.signal_id_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::codec::guid_to_wire;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_payload(entries: &[(u16, Uuid, &str, u32)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0u8; 16]); // subscriber ID
        body.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (index, signal_id, source, id) in entries {
            body.extend_from_slice(&index.to_be_bytes());
            body.extend_from_slice(&guid_to_wire(signal_id));
            body.extend_from_slice(&(source.len() as u32).to_be_bytes());
            body.extend_from_slice(source.as_bytes());
            body.extend_from_slice(&id.to_be_bytes());
        }

        let mut payload = Vec::with_capacity(body.len() + 4);
        payload.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        payload.extend_from_slice(&body);
        payload
    }

    #[test]
    fn test_parse_uncompressed() {
        let signal_id = Uuid::new_v4();
        let payload = build_payload(&[(7, signal_id, "PPA", 42)]);

        let cache = SignalIndexCache::parse(&payload, false).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(7));

        let key = cache.measurement_key(7).unwrap();
        assert_eq!(key.signal_id, signal_id);
        assert_eq!(key.source, "PPA");
        assert_eq!(key.id, 42);

        assert_eq!(cache.signal_index(&signal_id), Some(7));
        assert_eq!(cache.signal_index(&Uuid::new_v4()), None);
    }

    #[test]
    fn test_parse_compressed() {
        let signal_id = Uuid::new_v4();
        let payload = build_payload(&[(1, signal_id, "SHELBY!FREQ", 9)]);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let cache = SignalIndexCache::parse(&compressed, true).unwrap();
        assert_eq!(cache.measurement_key(1).unwrap().source, "SHELBY!FREQ");
    }

    #[test]
    fn test_reload_replaces_previous_contents() {
        let first = build_payload(&[(1, Uuid::new_v4(), "PPA", 1), (2, Uuid::new_v4(), "PPA", 2)]);
        let second_id = Uuid::new_v4();
        let second = build_payload(&[(5, second_id, "PPB", 10)]);

        // Parse-then-swap: the second payload alone defines the cache
        let _old = SignalIndexCache::parse(&first, false).unwrap();
        let cache = SignalIndexCache::parse(&second, false).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(!cache.contains(1));
        assert!(!cache.contains(2));
        assert_eq!(cache.measurement_key(5).unwrap().signal_id, second_id);
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let payload = build_payload(&[(7, Uuid::new_v4(), "PPA", 42)]);
        assert!(SignalIndexCache::parse(&payload[..payload.len() - 2], false).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut payload = build_payload(&[(3, Uuid::new_v4(), "PPA", 5)]);
        payload.extend_from_slice(&[0xAB; 24]); // unauthorized signal trailer

        let cache = SignalIndexCache::parse(&payload, false).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
