//! Record encoder.
//!
//! Uses the smallest MessagePack form for every integer and length. Floats
//! are always written as float64 so decoding never loses precision.

use std::io;

use rmp::encode::{self, ValueWriteError};

use crate::codec::MAX_NESTING_DEPTH;
use crate::error::{Phase, Result, SnapshotError};
use crate::record::{FieldValue, SearchRecord};

/// Encodes records into caller-owned chunk buffers.
#[derive(Debug, Clone)]
pub struct RecordEncoder {
    /// Largest encoded record accepted (memory ceiling).
    max_record_bytes: usize,
    records_encoded: u64,
    bytes_encoded: u64,
}

impl RecordEncoder {
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            max_record_bytes,
            records_encoded: 0,
            bytes_encoded: 0,
        }
    }

    /// Append one record to `out`. Returns the number of bytes written.
    ///
    /// A record whose encoding exceeds the ceiling, or whose values nest
    /// deeper than the decoder accepts, is rolled back out of `out` and
    /// reported as `ResourceExhaustion`.
    pub fn encode_into(&mut self, record: &SearchRecord, out: &mut Vec<u8>) -> Result<usize> {
        let start = out.len();
        if let Err(e) = write_record(record, out) {
            out.truncate(start);
            return Err(e);
        }

        let written = out.len() - start;
        if written > self.max_record_bytes {
            out.truncate(start);
            return Err(SnapshotError::ResourceExhaustion {
                phase: Phase::Encode,
                requested: written as u64,
                ceiling: self.max_record_bytes as u64,
            });
        }

        self.records_encoded += 1;
        self.bytes_encoded += written as u64;
        Ok(written)
    }

    pub fn records_encoded(&self) -> u64 {
        self.records_encoded
    }

    pub fn bytes_encoded(&self) -> u64 {
        self.bytes_encoded
    }
}

/// Encode a single record into a fresh buffer.
pub fn encode_record(record: &SearchRecord) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(record.approx_size());
    write_record(record, &mut out)?;
    Ok(out)
}

/// Size of a record's encoding.
pub fn encoded_len(record: &SearchRecord) -> Result<usize> {
    encode_record(record).map(|bytes| bytes.len())
}

fn write_record(record: &SearchRecord, out: &mut Vec<u8>) -> Result<()> {
    let fields = record.fields();
    encode::write_map_len(out, checked_len(fields.len())?).map_err(value_err)?;
    for (name, value) in fields {
        write_str(out, name)?;
        write_value(out, value, 1)?;
    }
    Ok(())
}

/// `depth` counts the same way as on the decoding side: a field value is
/// depth 1, its elements depth 2, and so on.
fn write_value(out: &mut Vec<u8>, value: &FieldValue, depth: usize) -> Result<()> {
    if depth > MAX_NESTING_DEPTH {
        return Err(SnapshotError::ResourceExhaustion {
            phase: Phase::Encode,
            requested: depth as u64,
            ceiling: MAX_NESTING_DEPTH as u64,
        });
    }
    match value {
        FieldValue::Nil => encode::write_nil(out).map_err(io_err)?,
        FieldValue::Bool(v) => encode::write_bool(out, *v).map_err(io_err)?,
        FieldValue::Int(v) => {
            encode::write_sint(out, *v).map_err(value_err)?;
        }
        FieldValue::Float(v) => encode::write_f64(out, *v).map_err(value_err)?,
        FieldValue::Str(s) => write_str(out, s)?,
        FieldValue::Bytes(b) => {
            checked_len(b.len())?;
            encode::write_bin(out, b).map_err(value_err)?;
        }
        FieldValue::Array(items) => {
            encode::write_array_len(out, checked_len(items.len())?).map_err(value_err)?;
            for item in items {
                write_value(out, item, depth + 1)?;
            }
        }
        FieldValue::Map(map) => {
            encode::write_map_len(out, checked_len(map.len())?).map_err(value_err)?;
            for (key, item) in map {
                write_str(out, key)?;
                write_value(out, item, depth + 1)?;
            }
        }
    }
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    checked_len(s.len())?;
    encode::write_str(out, s).map_err(value_err)
}

/// MessagePack lengths are u32; anything longer cannot be represented.
fn checked_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| SnapshotError::ResourceExhaustion {
        phase: Phase::Encode,
        requested: len as u64,
        ceiling: u32::MAX as u64,
    })
}

fn io_err(e: io::Error) -> SnapshotError {
    SnapshotError::io(Phase::Encode, e)
}

fn value_err(e: ValueWriteError<io::Error>) -> SnapshotError {
    match e {
        ValueWriteError::InvalidMarkerWrite(e) | ValueWriteError::InvalidDataWrite(e) => io_err(e),
    }
}
