//! Record codec: lossless MessagePack encoding of search records.
//!
//! Each record is written as one MessagePack map (field name → value) and
//! records are concatenated back to back. The stream carries no framing of
//! its own; the artifact header holds the record count and the decoder
//! treats end-of-stream between two records as the clean end.
//!
//! ```text
//! [map(n) [str key][value] x n]   record 0
//! [map(n) [str key][value] x n]   record 1
//! ...
//! ```
//!
//! Both directions work on bounded buffers: the encoder appends one record
//! at a time to a caller-owned chunk, the decoder pulls bytes from any
//! `Read` and yields records or batches.

pub mod decode;
pub mod encode;

pub use decode::{RecordBatch, RecordDecoder};
pub use encode::{encode_record, encoded_len, RecordEncoder};

/// Maximum nesting depth of arrays/maps inside one field value.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Upper bound on element pre-allocation for decoded arrays and maps.
/// Counts above this grow the collection incrementally.
pub(crate) const MAX_PREALLOC: usize = 1024;

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Cursor;

    use super::*;
    use crate::record::{FieldValue, SearchRecord};

    fn sample_records() -> Vec<SearchRecord> {
        let mut nested = BTreeMap::new();
        nested.insert("speaker".to_string(), FieldValue::from("host"));
        nested.insert("confidence".to_string(), FieldValue::Float(0.93));

        vec![
            SearchRecord::new()
                .with("id", "ep-1:0")
                .with("text", "welcome to the show")
                .with("startTimeMs", 0)
                .with("endTimeMs", 4_250)
                .with("episodeId", "ep-1")
                .with("explicit", false),
            SearchRecord::new()
                .with("id", "ep-1:1")
                .with("text", "x".repeat(70_000))
                .with("offsets", vec![FieldValue::Int(-1), FieldValue::Int(i64::MAX)])
                .with("annotations", FieldValue::Map(nested))
                .with("raw", FieldValue::Bytes(vec![0, 1, 2, 255]))
                .with("missing", FieldValue::Nil),
        ]
    }

    #[test]
    fn test_encode_decode_stream() {
        let records = sample_records();
        let mut encoder = RecordEncoder::new(usize::MAX);
        let mut buf = Vec::new();
        for record in &records {
            encoder.encode_into(record, &mut buf).unwrap();
        }

        let mut decoder = RecordDecoder::new(Cursor::new(&buf), usize::MAX);
        let mut decoded = Vec::new();
        while let Some(record) = decoder.next_record().unwrap() {
            decoded.push(record);
        }

        assert_eq!(decoded, records);
        assert_eq!(decoder.offset(), buf.len() as u64);
        assert_eq!(decoder.records_decoded(), 2);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let records = sample_records();
        let mut a = Vec::new();
        let mut b = Vec::new();
        for record in &records {
            RecordEncoder::new(usize::MAX).encode_into(record, &mut a).unwrap();
        }
        for record in records.clone() {
            // Rebuild each record with fields inserted in reverse order.
            let rebuilt: SearchRecord = record
                .fields()
                .iter()
                .rev()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            RecordEncoder::new(usize::MAX).encode_into(&rebuilt, &mut b).unwrap();
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_truncation_is_corrupt() {
        let records = sample_records();
        let mut encoder = RecordEncoder::new(usize::MAX);
        let mut buf = Vec::new();
        encoder.encode_into(&records[0], &mut buf).unwrap();

        // Every strict prefix of a single record must fail, never yield None.
        for cut in 1..buf.len() {
            let mut decoder = RecordDecoder::new(Cursor::new(&buf[..cut]), usize::MAX);
            let err = decoder.next_record().unwrap_err();
            assert!(err.is_corrupt(), "cut={cut}: {err}");
        }
    }
}
