//! Durable artifact: framing, streaming writer and reader, restore states.
//!
//! ```text
//! ┌────────────┬──────────────────────────────┬────────────┐
//! │ header 32B │ compress(encode(records))    │ footer 48B │
//! └────────────┴──────────────────────────────┴────────────┘
//! ```

pub mod format;
pub mod io;
pub mod reader;
pub mod state;
pub mod writer;

pub use format::{ArtifactFooter, ArtifactHeader, ArtifactInfo, FORMAT_VERSION, MAGIC};
pub use reader::{
    inspect_artifact, restore_snapshot, restore_snapshot_with, verify_artifact, ArtifactReader,
    RestoreStats, Restored,
};
pub use state::{RestoreState, StateTracker, Transition};
pub use writer::{persist_snapshot, persist_snapshot_with, ArtifactWriter, PersistStats, Persisted};
