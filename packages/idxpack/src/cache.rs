//! Warm-instance cache.
//!
//! A long-lived worker can keep rebuilt indexes between invocations to skip
//! the restore cost. The cache is a plain value owned by the caller; the
//! crate holds no process-wide state.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::artifact::{RestoreStats, Restored};
use crate::error::Result;

struct CachedIndex<I> {
    index: I,
    stats: RestoreStats,
    loaded_at: Instant,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Rebuilt indexes keyed by artifact key.
pub struct WarmCache<I> {
    entries: HashMap<String, CachedIndex<I>>,
    hits: u64,
    misses: u64,
}

impl<I> WarmCache<I> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached index for `key`, restoring it with `restore` on a miss.
    ///
    /// `force_fresh` discards any cached instance first. A failed restore
    /// caches nothing.
    pub fn get_or_restore<F>(&mut self, key: &str, force_fresh: bool, restore: F) -> Result<&I>
    where
        F: FnOnce() -> Result<Restored<I>>,
    {
        if force_fresh && self.entries.remove(key).is_some() {
            tracing::debug!(key, "warm index discarded for a fresh restore");
        }

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                Ok(&entry.into_mut().index)
            }
            Entry::Vacant(slot) => {
                self.misses += 1;
                let restored = restore()?;
                tracing::debug!(
                    key,
                    records = restored.stats.records,
                    elapsed_ms = restored.stats.total_time.as_millis() as u64,
                    "warm index cached"
                );
                let cached = slot.insert(CachedIndex {
                    index: restored.index,
                    stats: restored.stats,
                    loaded_at: Instant::now(),
                });
                Ok(&cached.index)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&I> {
        self.entries.get(key).map(|c| &c.index)
    }

    /// Restore stats of the cached instance.
    pub fn restore_stats(&self, key: &str) -> Option<&RestoreStats> {
        self.entries.get(key).map(|c| &c.stats)
    }

    /// How long the cached instance has been held.
    pub fn age(&self, key: &str) -> Option<Duration> {
        self.entries.get(key).map(|c| c.loaded_at.elapsed())
    }

    /// Drop the cached instance for `key`. Returns whether one was held.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

impl<I> Default for WarmCache<I> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{persist_snapshot, restore_snapshot};
    use crate::compression::Compression;
    use crate::error::SnapshotError;
    use crate::index::{MemoryIndex, SearchIndex};
    use crate::record::{SearchRecord, Snapshot};
    use std::cell::Cell;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_artifact(path: &Path, n: usize) {
        let records = (0..n)
            .map(|i| SearchRecord::new().with("id", format!("{i}")))
            .collect();
        persist_snapshot(&Snapshot::new(1, 0, records), path, Compression::Gzip).unwrap();
    }

    #[test]
    fn test_hit_after_miss() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.idx");
        write_artifact(&path, 3);

        let restores = Cell::new(0);
        let mut cache = WarmCache::new();
        for _ in 0..3 {
            let index = cache
                .get_or_restore("a", false, || {
                    restores.set(restores.get() + 1);
                    restore_snapshot(&path, Compression::Gzip, &MemoryIndex::new)
                })
                .unwrap();
            assert_eq!(index.len(), 3);
        }
        assert_eq!(restores.get(), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 2,
                misses: 1,
                entries: 1
            }
        );
        assert_eq!(cache.restore_stats("a").unwrap().records, 3);
    }

    #[test]
    fn test_force_fresh_and_invalidate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.idx");
        write_artifact(&path, 1);

        let mut cache = WarmCache::new();
        let restore = || restore_snapshot(&path, Compression::Gzip, &MemoryIndex::new);
        cache.get_or_restore("a", false, restore).unwrap();

        write_artifact(&path, 5);
        assert_eq!(cache.get_or_restore("a", false, restore).unwrap().len(), 1);
        assert_eq!(cache.get_or_restore("a", true, restore).unwrap().len(), 5);

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_restore_caches_nothing() {
        let mut cache: WarmCache<MemoryIndex> = WarmCache::new();
        let err = cache
            .get_or_restore("missing", false, || {
                Err(SnapshotError::Configuration("no artifact".into()))
            })
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Configuration(_)));
        assert!(cache.get("missing").is_none());

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
