//! Integration test: producer → object store → consumer pipeline.
//!
//! Validates that:
//! - Shipped artifacts restore through the store with a Downloading phase
//! - Staging files never outlive a restore
//! - Download and restore failures are classified and counted
//! - A warm cache skips the store on repeated invocations

use std::cell::Cell;
use std::io::{self, Read};

use idxpack::artifact::RestoreState;
use idxpack::{
    fetch_artifact, inspect_artifact, persist_snapshot, restore_from_store, ship_artifact,
    Compression, EngineConfig, LocalDirStore, MemoryIndex, Metrics, ObjectStore, Phase,
    SearchIndex, SearchRecord, Snapshot, SnapshotError, WarmCache,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn snapshot(n: usize) -> Snapshot {
    let records = (0..n)
        .map(|i| {
            SearchRecord::new()
                .with("id", format!("seg-{i}"))
                .with("text", format!("show notes and transcript line {i}"))
        })
        .collect();
    Snapshot::new(1, 42, records)
}

/// Produce an artifact and ship it under `key`.
fn publish(store: &LocalDirStore, work: &TempDir, key: &str, n: usize, codec: Compression) {
    let path = work.path().join("out.idx");
    persist_snapshot(&snapshot(n), &path, codec).unwrap();
    ship_artifact(store, key, &path).unwrap();
}

fn staging_is_empty(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path()).unwrap().next().is_none()
}

/// Store whose reads fail halfway through.
struct FlakyStore {
    inner: LocalDirStore,
}

struct FailAfter<R> {
    inner: R,
    left: usize,
}

impl<R: Read> Read for FailAfter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.left == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
        }
        let max = buf.len().min(self.left);
        let n = self.inner.read(&mut buf[..max])?;
        self.left -= n;
        Ok(n)
    }
}

impl ObjectStore for FlakyStore {
    fn get(&self, key: &str) -> io::Result<Box<dyn Read + '_>> {
        Ok(Box::new(FailAfter {
            inner: self.inner.get(key)?,
            left: 40,
        }))
    }

    fn put(&self, key: &str, data: &mut dyn Read) -> io::Result<()> {
        self.inner.put(key, data)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn ship_then_restore_from_store() {
    let (root, work, staging) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    let store = LocalDirStore::new(root.path()).unwrap();
    publish(&store, &work, "shows/7/index.idx", 250, Compression::Zstd);

    let config = EngineConfig::default().with_compression(Compression::Zstd);
    let restored =
        restore_from_store(&store, "shows/7/index.idx", staging.path(), &config, &MemoryIndex::new)
            .unwrap();
    assert_eq!(restored.index.len(), 250);
    assert_eq!(restored.stats.transitions[0].state, RestoreState::Downloading);
    assert_eq!(
        restored.stats.transitions.last().unwrap().state,
        RestoreState::Ready
    );
    assert!(staging_is_empty(&staging), "staging file left behind");
}

#[test]
fn fetch_matches_shipped_artifact() {
    let (root, work, staging) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    let store = LocalDirStore::new(root.path()).unwrap();
    publish(&store, &work, "a.idx", 10, Compression::Gzip);

    let fetched = staging.path().join("a.idx");
    let bytes = fetch_artifact(&store, "a.idx", &fetched).unwrap();
    assert_eq!(bytes, std::fs::metadata(&fetched).unwrap().len());
    assert_eq!(
        std::fs::read(&fetched).unwrap(),
        std::fs::read(work.path().join("out.idx")).unwrap()
    );
    assert_eq!(inspect_artifact(&fetched).unwrap().meta.record_count, 10);
}

#[test]
fn shipping_a_damaged_artifact_is_refused() {
    let (root, work) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let store = LocalDirStore::new(root.path()).unwrap();
    let path = work.path().join("out.idx");
    persist_snapshot(&snapshot(10), &path, Compression::Gzip).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

    assert!(ship_artifact(&store, "a.idx", &path).unwrap_err().is_corrupt());
    assert!(store.get("a.idx").is_err());
}

#[test]
fn failures_are_classified_and_counted() {
    let (root, work, staging) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    let store = LocalDirStore::new(root.path()).unwrap();
    publish(&store, &work, "good.idx", 100, Compression::Gzip);
    let metrics = Metrics::new();
    let config = EngineConfig::default();

    // Missing object.
    let err = restore_from_store(&store, "absent.idx", staging.path(), &config, &MemoryIndex::new)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::UpstreamIo { phase: Phase::Read, .. }), "{err}");
    metrics.record_failure(&err);

    // Connection drops mid-download.
    let flaky = FlakyStore { inner: store.clone() };
    let err = restore_from_store(&flaky, "good.idx", staging.path(), &config, &MemoryIndex::new)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::UpstreamIo { phase: Phase::Read, .. }), "{err}");
    metrics.record_failure(&err);

    // Missing staging directory.
    let err = restore_from_store(
        &store,
        "good.idx",
        staging.path().join("nope"),
        &config,
        &MemoryIndex::new,
    )
    .unwrap_err();
    assert!(matches!(err, SnapshotError::Configuration(_)), "{err}");
    metrics.record_failure(&err);

    // Corrupt object in the store.
    store.put("bad.idx", &mut &b"definitely not an artifact"[..]).unwrap();
    let err = restore_from_store(&store, "bad.idx", staging.path(), &config, &MemoryIndex::new)
        .unwrap_err();
    assert!(err.is_corrupt(), "{err}");
    metrics.record_failure(&err);

    let snap = metrics.snapshot();
    assert_eq!(snap.failures_read, 3);
    assert_eq!(snap.failures_configuration, 1);
    assert!(staging_is_empty(&staging));
}

#[test]
fn warm_cache_skips_the_store() {
    let (root, work, staging) = (TempDir::new().unwrap(), TempDir::new().unwrap(), TempDir::new().unwrap());
    let store = LocalDirStore::new(root.path()).unwrap();
    publish(&store, &work, "idx", 30, Compression::Brotli);
    let config = EngineConfig::default();

    let downloads = Cell::new(0);
    let mut cache = WarmCache::new();
    let invoke = |cache: &mut WarmCache<MemoryIndex>, force_fresh: bool| -> usize {
        cache
            .get_or_restore("idx", force_fresh, || {
                downloads.set(downloads.get() + 1);
                restore_from_store(&store, "idx", staging.path(), &config, &MemoryIndex::new)
            })
            .unwrap()
            .len()
    };

    assert_eq!(invoke(&mut cache, false), 30);
    assert_eq!(invoke(&mut cache, false), 30);
    assert_eq!(downloads.get(), 1);

    publish(&store, &work, "idx", 45, Compression::Brotli);
    assert_eq!(invoke(&mut cache, false), 30, "cache serves the warm instance");
    assert_eq!(invoke(&mut cache, true), 45);
    assert_eq!(downloads.get(), 2);
}
