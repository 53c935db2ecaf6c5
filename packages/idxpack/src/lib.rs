//! idxpack: search-index snapshot persistence.
//!
//! Turns an in-memory full-text index into one self-describing binary
//! artifact and rebuilds an equivalent index from it, streaming in bounded
//! chunks so peak memory follows the chunk size rather than the record
//! count.
//!
//! ```no_run
//! use idxpack::{persist_snapshot, restore_snapshot, Compression, MemoryIndex, SearchRecord, Snapshot};
//!
//! # fn main() -> idxpack::Result<()> {
//! let snapshot = Snapshot::new(1, 1_700_000_000_000, vec![
//!     SearchRecord::new().with("id", "a").with("text", "hello"),
//! ]);
//! persist_snapshot(&snapshot, "/var/lib/search/index.idx", Compression::Zstd)?;
//!
//! let restored = restore_snapshot("/var/lib/search/index.idx", Compression::Zstd, &MemoryIndex::new)?;
//! assert_eq!(restored.index.get("a").and_then(|r| r.get("text")?.as_str()), Some("hello"));
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod cache;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod index;
pub mod metrics;
pub mod record;
pub mod resource;
pub mod store;

pub use artifact::{
    inspect_artifact, persist_snapshot, persist_snapshot_with, restore_snapshot,
    restore_snapshot_with, verify_artifact, ArtifactInfo, ArtifactReader, ArtifactWriter,
    PersistStats, Persisted, RestoreState, RestoreStats, Restored,
};
pub use cache::{CacheStats, WarmCache};
pub use compression::Compression;
pub use config::EngineConfig;
pub use error::{Phase, Result, SnapshotError};
pub use index::{IndexError, IndexFactory, IndexSnapshot, MemoryIndex, SearchIndex};
pub use metrics::{Metrics, MetricsSnapshot, PhaseTimings};
pub use record::{FieldValue, SearchRecord, Snapshot, SnapshotMeta, SnapshotSource};
pub use store::{fetch_artifact, restore_from_store, ship_artifact, LocalDirStore, ObjectStore};
