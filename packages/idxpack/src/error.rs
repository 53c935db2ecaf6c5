//! Error types for snapshot persistence

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Pipeline phase a failure occurred in.
///
/// Persist runs Encode → Compress → Write, restore runs
/// Read → Decompress → Decode → Rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Read,
    Decompress,
    Decode,
    Rebuild,
    Encode,
    Compress,
    Write,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Read => "read",
            Phase::Decompress => "decompress",
            Phase::Decode => "decode",
            Phase::Rebuild => "rebuild",
            Phase::Encode => "encode",
            Phase::Compress => "compress",
            Phase::Write => "write",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Corrupt artifact ({phase} phase, byte {offset}): {reason}")]
    CorruptArtifact {
        phase: Phase,
        offset: u64,
        reason: String,
    },

    #[error("Memory ceiling exceeded ({phase} phase): {requested} bytes requested, ceiling is {ceiling}")]
    ResourceExhaustion {
        phase: Phase,
        requested: u64,
        ceiling: u64,
    },

    #[error("IO error ({phase} phase): {source}")]
    UpstreamIo {
        phase: Phase,
        #[source]
        source: std::io::Error,
    },

    #[error("Index engine rejected batch ({phase} phase): {message}")]
    Index { phase: Phase, message: String },
}

impl SnapshotError {
    pub fn corrupt(phase: Phase, offset: u64, reason: impl Into<String>) -> Self {
        SnapshotError::CorruptArtifact {
            phase,
            offset,
            reason: reason.into(),
        }
    }

    pub fn io(phase: Phase, source: std::io::Error) -> Self {
        SnapshotError::UpstreamIo { phase, source }
    }

    /// Phase the failure occurred in. Configuration errors happen before
    /// any phase starts.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SnapshotError::Configuration(_) => None,
            SnapshotError::CorruptArtifact { phase, .. }
            | SnapshotError::ResourceExhaustion { phase, .. }
            | SnapshotError::UpstreamIo { phase, .. }
            | SnapshotError::Index { phase, .. } => Some(*phase),
        }
    }

    /// Stable error code for callers that report failures across processes.
    pub fn code(&self) -> &'static str {
        match self {
            SnapshotError::Configuration(_) => "CONFIGURATION",
            SnapshotError::CorruptArtifact { .. } => "CORRUPT_ARTIFACT",
            SnapshotError::ResourceExhaustion { .. } => "RESOURCE_EXHAUSTION",
            SnapshotError::UpstreamIo { .. } => "UPSTREAM_IO",
            SnapshotError::Index { .. } => "INDEX_ENGINE",
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, SnapshotError::CorruptArtifact { .. })
    }
}
