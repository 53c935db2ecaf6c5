//! Streaming record decoder.
//!
//! Pulls bytes from any `Read` one marker at a time. The reader should be
//! buffered; the decoder issues many small reads.
//!
//! Every length prefix is checked against the memory ceiling before any
//! allocation, so a corrupt length cannot make the decoder reserve
//! gigabytes. The whole encoded record is held to the same ceiling, so a
//! record made of many small fields fails as soon as it grows past it. Errors carry the byte offset (in the decoded stream) of the
//! marker or payload that failed.

use std::collections::BTreeMap;
use std::io::{self, Read};

use rmp::Marker;

use crate::codec::{MAX_NESTING_DEPTH, MAX_PREALLOC};
use crate::error::{Phase, Result, SnapshotError};
use crate::record::{FieldValue, SearchRecord};

/// A batch of decoded records plus the number of stream bytes it used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub records: Vec<SearchRecord>,
    pub bytes: u64,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Decodes a concatenated stream of MessagePack record maps.
pub struct RecordDecoder<R> {
    reader: R,
    /// Bytes consumed so far.
    offset: u64,
    /// Longest string/binary/collection, and largest encoded record, accepted.
    max_len: usize,
    /// Stream offset of the record being decoded.
    record_start: u64,
    records_decoded: u64,
}

impl<R: Read> RecordDecoder<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            offset: 0,
            max_len,
            record_start: 0,
            records_decoded: 0,
        }
    }

    /// Bytes consumed from the underlying reader.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn records_decoded(&self) -> u64 {
        self.records_decoded
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Decode the next record.
    ///
    /// Returns `Ok(None)` only when the stream ends exactly on a record
    /// boundary. Running out of bytes anywhere inside a record is corrupt.
    pub fn next_record(&mut self) -> Result<Option<SearchRecord>> {
        let start = self.offset;
        self.record_start = start;
        let Some(byte) = self.read_first_byte()? else {
            return Ok(None);
        };

        let len = match Marker::from_u8(byte) {
            Marker::FixMap(n) => n as usize,
            Marker::Map16 => self.read_be_u16()? as usize,
            Marker::Map32 => self.read_be_u32()? as usize,
            other => {
                return Err(self.corrupt_at(
                    start,
                    format!("record {} is not a map (marker {:?})", self.records_decoded, other),
                ))
            }
        };
        self.check_len(len)?;

        let mut fields = BTreeMap::new();
        for _ in 0..len {
            let key_at = self.offset;
            let key = self.read_key()?;
            let value = self.read_value(1)?;
            if fields.insert(key, value).is_some() {
                return Err(self.corrupt_at(key_at, "duplicate field name in record"));
            }
        }

        self.records_decoded += 1;
        Ok(Some(SearchRecord::from(fields)))
    }

    /// Decode up to `max_records` records, stopping early once the batch has
    /// consumed at least `max_bytes` stream bytes. `Ok(None)` at end of stream.
    pub fn next_batch(&mut self, max_records: usize, max_bytes: u64) -> Result<Option<RecordBatch>> {
        let start = self.offset;
        let mut records = Vec::with_capacity(max_records.min(MAX_PREALLOC));

        while records.len() < max_records && self.offset - start < max_bytes {
            match self.next_record()? {
                Some(record) => records.push(record),
                None => break,
            }
        }

        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(RecordBatch {
            records,
            bytes: self.offset - start,
        }))
    }

    // ── Values ─────────────────────────────────────────────────────

    fn read_value(&mut self, depth: usize) -> Result<FieldValue> {
        let at = self.offset;
        if depth > MAX_NESTING_DEPTH {
            return Err(self.corrupt_at(at, "value nesting too deep"));
        }

        let marker = Marker::from_u8(self.read_u8()?);
        let value = match marker {
            Marker::Null => FieldValue::Nil,
            Marker::True => FieldValue::Bool(true),
            Marker::False => FieldValue::Bool(false),
            Marker::FixPos(v) => FieldValue::Int(v as i64),
            Marker::FixNeg(v) => FieldValue::Int(v as i64),
            Marker::U8 => FieldValue::Int(self.read_u8()? as i64),
            Marker::U16 => FieldValue::Int(self.read_be_u16()? as i64),
            Marker::U32 => FieldValue::Int(self.read_be_u32()? as i64),
            Marker::U64 => {
                let v = u64::from_be_bytes(self.read_array::<8>()?);
                let v = i64::try_from(v)
                    .map_err(|_| self.corrupt_at(at, "unsigned integer above i64 range"))?;
                FieldValue::Int(v)
            }
            Marker::I8 => FieldValue::Int(self.read_u8()? as i8 as i64),
            Marker::I16 => FieldValue::Int(i16::from_be_bytes(self.read_array::<2>()?) as i64),
            Marker::I32 => FieldValue::Int(i32::from_be_bytes(self.read_array::<4>()?) as i64),
            Marker::I64 => FieldValue::Int(i64::from_be_bytes(self.read_array::<8>()?)),
            Marker::F32 => FieldValue::Float(f32::from_be_bytes(self.read_array::<4>()?) as f64),
            Marker::F64 => FieldValue::Float(f64::from_be_bytes(self.read_array::<8>()?)),
            Marker::FixStr(n) => FieldValue::Str(self.read_string(n as usize)?),
            Marker::Str8 => {
                let n = self.read_u8()? as usize;
                FieldValue::Str(self.read_string(n)?)
            }
            Marker::Str16 => {
                let n = self.read_be_u16()? as usize;
                FieldValue::Str(self.read_string(n)?)
            }
            Marker::Str32 => {
                let n = self.read_be_u32()? as usize;
                FieldValue::Str(self.read_string(n)?)
            }
            Marker::Bin8 => {
                let n = self.read_u8()? as usize;
                FieldValue::Bytes(self.read_bytes(n)?)
            }
            Marker::Bin16 => {
                let n = self.read_be_u16()? as usize;
                FieldValue::Bytes(self.read_bytes(n)?)
            }
            Marker::Bin32 => {
                let n = self.read_be_u32()? as usize;
                FieldValue::Bytes(self.read_bytes(n)?)
            }
            Marker::FixArray(n) => self.read_array_items(n as usize, depth)?,
            Marker::Array16 => {
                let n = self.read_be_u16()? as usize;
                self.read_array_items(n, depth)?
            }
            Marker::Array32 => {
                let n = self.read_be_u32()? as usize;
                self.read_array_items(n, depth)?
            }
            Marker::FixMap(n) => self.read_map_entries(n as usize, depth)?,
            Marker::Map16 => {
                let n = self.read_be_u16()? as usize;
                self.read_map_entries(n, depth)?
            }
            Marker::Map32 => {
                let n = self.read_be_u32()? as usize;
                self.read_map_entries(n, depth)?
            }
            other => {
                return Err(self.corrupt_at(at, format!("unsupported marker {:?}", other)));
            }
        };
        Ok(value)
    }

    fn read_array_items(&mut self, len: usize, depth: usize) -> Result<FieldValue> {
        self.check_len(len)?;
        let mut items = Vec::with_capacity(len.min(MAX_PREALLOC));
        for _ in 0..len {
            items.push(self.read_value(depth + 1)?);
        }
        Ok(FieldValue::Array(items))
    }

    fn read_map_entries(&mut self, len: usize, depth: usize) -> Result<FieldValue> {
        self.check_len(len)?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let key_at = self.offset;
            let key = self.read_key()?;
            let value = self.read_value(depth + 1)?;
            if map.insert(key, value).is_some() {
                return Err(self.corrupt_at(key_at, "duplicate key in map value"));
            }
        }
        Ok(FieldValue::Map(map))
    }

    fn read_key(&mut self) -> Result<String> {
        let at = self.offset;
        let len = match Marker::from_u8(self.read_u8()?) {
            Marker::FixStr(n) => n as usize,
            Marker::Str8 => self.read_u8()? as usize,
            Marker::Str16 => self.read_be_u16()? as usize,
            Marker::Str32 => self.read_be_u32()? as usize,
            other => {
                return Err(self.corrupt_at(at, format!("map key is not a string ({:?})", other)))
            }
        };
        self.read_string(len)
    }

    fn read_string(&mut self, len: usize) -> Result<String> {
        let at = self.offset;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| self.corrupt_at(at, "string is not valid UTF-8"))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.check_len(len)?;
        self.check_record_size(len)?;
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    // ── Raw reads ──────────────────────────────────────────────────

    /// Read the marker that opens a record. EOF here is a clean end.
    fn read_first_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.offset += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SnapshotError::io(Phase::Decode, e)),
            }
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_be_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array::<2>()?))
    }

    fn read_be_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array::<4>()?))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_record_size(buf.len())?;
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(self.corrupt_at(
                self.offset,
                format!(
                    "stream ended inside record {} ({} more bytes expected)",
                    self.records_decoded,
                    buf.len()
                ),
            )),
            Err(e) => Err(SnapshotError::io(Phase::Decode, e)),
        }
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_len {
            return Err(SnapshotError::ResourceExhaustion {
                phase: Phase::Decode,
                requested: len as u64,
                ceiling: self.max_len as u64,
            });
        }
        Ok(())
    }

    /// Fail once the current record would grow past the ceiling after
    /// `more` further bytes.
    fn check_record_size(&self, more: usize) -> Result<()> {
        let size = self.offset - self.record_start + more as u64;
        if size > self.max_len as u64 {
            return Err(SnapshotError::ResourceExhaustion {
                phase: Phase::Decode,
                requested: size,
                ceiling: self.max_len as u64,
            });
        }
        Ok(())
    }

    fn corrupt_at(&self, offset: u64, reason: impl Into<String>) -> SnapshotError {
        SnapshotError::corrupt(Phase::Decode, offset, reason)
    }
}

impl<R: Read> Iterator for RecordDecoder<R> {
    type Item = Result<SearchRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
