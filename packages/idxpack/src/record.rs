//! Search record model.
//!
//! A `SearchRecord` is a flat map of named fields. Field names are kept in a
//! `BTreeMap` so iteration order (and therefore the encoded byte stream) is
//! canonical for a given record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the identifier field.
pub const ID_FIELD: &str = "id";

// ── FieldValue ─────────────────────────────────────────────────────

/// A single field value. Mirrors the MessagePack value space minus
/// extension types and unsigned integers above `i64::MAX`.
///
/// Equality follows `f64`: a `Float(NaN)` survives encoding bit for bit but
/// never compares equal, so records holding NaN are not `==` to themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Rough in-memory footprint, used for batch sizing.
    pub fn approx_size(&self) -> usize {
        match self {
            FieldValue::Nil | FieldValue::Bool(_) | FieldValue::Int(_) | FieldValue::Float(_) => 9,
            FieldValue::Str(s) => 5 + s.len(),
            FieldValue::Bytes(b) => 5 + b.len(),
            FieldValue::Array(items) => 5 + items.iter().map(FieldValue::approx_size).sum::<usize>(),
            FieldValue::Map(map) => {
                5 + map
                    .iter()
                    .map(|(k, v)| 5 + k.len() + v.approx_size())
                    .sum::<usize>()
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::Array(v)
    }
}

// ── SearchRecord ───────────────────────────────────────────────────

/// One indexable unit (a transcript segment, an episode, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl SearchRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Record identifier (`"id"` string field).
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(FieldValue::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn approx_size(&self) -> usize {
        5 + self
            .fields
            .iter()
            .map(|(k, v)| 5 + k.len() + v.approx_size())
            .sum::<usize>()
    }
}

impl From<BTreeMap<String, FieldValue>> for SearchRecord {
    fn from(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { fields }
    }
}

impl FromIterator<(String, FieldValue)> for SearchRecord {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Snapshot header: everything about a snapshot except its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Schema version shared by every record in the snapshot.
    pub schema_version: u32,
    /// Number of records. Recomputed by the writer while streaming.
    pub record_count: u64,
    /// Creation time supplied by the producer (ms since Unix epoch).
    pub created_at_ms: u64,
}

/// A complete, self-contained set of search records captured at one point
/// in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub records: Vec<SearchRecord>,
}

impl Snapshot {
    pub fn new(schema_version: u32, created_at_ms: u64, records: Vec<SearchRecord>) -> Self {
        Self {
            meta: SnapshotMeta {
                schema_version,
                record_count: records.len() as u64,
                created_at_ms,
            },
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Anything the streaming writer can persist.
pub trait SnapshotSource {
    /// Header fields. `record_count` is advisory; the writer counts.
    fn meta(&self) -> SnapshotMeta;

    /// Records in export order.
    fn records(&self) -> Box<dyn Iterator<Item = SearchRecord> + '_>;
}

impl SnapshotSource for Snapshot {
    fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            record_count: self.records.len() as u64,
            ..self.meta
        }
    }

    fn records(&self) -> Box<dyn Iterator<Item = SearchRecord> + '_> {
        Box::new(self.records.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder_and_id() {
        let rec = SearchRecord::new()
            .with("id", "ep-1:seg-3")
            .with("text", "hello world")
            .with("startTimeMs", 1500i64);

        assert_eq!(rec.id(), Some("ep-1:seg-3"));
        assert_eq!(rec.get("startTimeMs").and_then(FieldValue::as_i64), Some(1500));
        assert_eq!(rec.len(), 3);
    }

    #[test]
    fn test_record_without_string_id() {
        let rec = SearchRecord::new().with("id", 7i64);
        assert_eq!(rec.id(), None);
    }

    #[test]
    fn test_fields_are_sorted() {
        let rec = SearchRecord::new().with("z", 1i64).with("a", 2i64).with("m", 3i64);
        let names: Vec<&str> = rec.fields().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_snapshot_source_counts_records() {
        let mut snap = Snapshot::new(3, 1_700_000_000_000, vec![SearchRecord::new().with("id", "a")]);
        snap.records.push(SearchRecord::new().with("id", "b"));

        let meta = snap.meta();
        assert_eq!(meta.record_count, 2);
        assert_eq!(meta.schema_version, 3);
        assert_eq!(snap.records().count(), 2);
    }
}
