//! Index engine contract.
//!
//! The full-text engine is external: the pipeline only needs to export its
//! records and to bulk-load a fresh instance. `MemoryIndex` is a small
//! reference engine (exact id lookup plus naive term search) used by tests
//! and by deployments that only need a warm record store.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::record::{FieldValue, SearchRecord, SnapshotMeta, SnapshotSource};

/// Rejection reported by an index engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct IndexError(pub String);

/// Capabilities the persistence engine needs from a full-text index.
pub trait SearchIndex {
    /// Load a batch of records. Batches arrive in artifact order.
    fn bulk_insert(&mut self, records: Vec<SearchRecord>) -> Result<(), IndexError>;

    /// Every record currently held, in a stable order.
    fn export(&self) -> Box<dyn Iterator<Item = SearchRecord> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Produces fresh, empty index instances for a restore.
pub trait IndexFactory {
    type Index: SearchIndex;

    fn create(&self) -> Self::Index;
}

impl<F, I> IndexFactory for F
where
    F: Fn() -> I,
    I: SearchIndex,
{
    type Index = I;

    fn create(&self) -> I {
        self()
    }
}

// ── IndexSnapshot ──────────────────────────────────────────────────

/// Adapts a live index into something the writer can persist.
pub struct IndexSnapshot<'a, I: SearchIndex + ?Sized> {
    index: &'a I,
    schema_version: u32,
    created_at_ms: u64,
}

impl<'a, I: SearchIndex + ?Sized> IndexSnapshot<'a, I> {
    pub fn new(index: &'a I, schema_version: u32, created_at_ms: u64) -> Self {
        Self {
            index,
            schema_version,
            created_at_ms,
        }
    }
}

impl<I: SearchIndex + ?Sized> SnapshotSource for IndexSnapshot<'_, I> {
    fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            schema_version: self.schema_version,
            record_count: self.index.len() as u64,
            created_at_ms: self.created_at_ms,
        }
    }

    fn records(&self) -> Box<dyn Iterator<Item = SearchRecord> + '_> {
        self.index.export()
    }
}

// ── MemoryIndex ────────────────────────────────────────────────────

/// In-memory record store keyed by the `id` field.
///
/// Records without an `id` are kept but cannot be looked up by id.
/// Inserting an id that is already present rejects the whole batch.
#[derive(Debug, Default, Clone)]
pub struct MemoryIndex {
    records: Vec<SearchRecord>,
    by_id: HashMap<String, usize>,
    /// Lowercased term -> record positions.
    terms: HashMap<String, BTreeSet<usize>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&SearchRecord> {
        self.by_id.get(id).map(|&pos| &self.records[pos])
    }

    pub fn records(&self) -> &[SearchRecord] {
        &self.records
    }

    /// Records containing every whitespace-separated term of `query` in any
    /// string field (case-insensitive), in insertion order.
    pub fn search(&self, query: &str) -> Vec<&SearchRecord> {
        let mut hits: Option<BTreeSet<usize>> = None;
        for term in tokenize(query) {
            let Some(postings) = self.terms.get(&term) else {
                return Vec::new();
            };
            hits = Some(match hits {
                None => postings.clone(),
                Some(acc) => acc.intersection(postings).copied().collect(),
            });
        }
        hits.unwrap_or_default()
            .into_iter()
            .map(|pos| &self.records[pos])
            .collect()
    }

    fn index_terms(&mut self, pos: usize) {
        let mut words = Vec::new();
        for value in self.records[pos].fields().values() {
            collect_text(value, &mut words);
        }
        for word in words {
            self.terms.entry(word).or_default().insert(pos);
        }
    }
}

impl SearchIndex for MemoryIndex {
    fn bulk_insert(&mut self, records: Vec<SearchRecord>) -> Result<(), IndexError> {
        // Validate the whole batch before touching any state.
        let mut batch_ids = BTreeSet::new();
        for record in &records {
            if let Some(id) = record.id() {
                if self.by_id.contains_key(id) || !batch_ids.insert(id) {
                    return Err(IndexError(format!("duplicate record id {:?}", id)));
                }
            }
        }

        for record in records {
            let pos = self.records.len();
            if let Some(id) = record.id() {
                self.by_id.insert(id.to_string(), pos);
            }
            self.records.push(record);
            self.index_terms(pos);
        }
        Ok(())
    }

    fn export(&self) -> Box<dyn Iterator<Item = SearchRecord> + '_> {
        Box::new(self.records.iter().cloned())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn collect_text(value: &FieldValue, out: &mut Vec<String>) {
    match value {
        FieldValue::Str(s) => out.extend(tokenize(s)),
        FieldValue::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        FieldValue::Map(map) => map.values().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}
