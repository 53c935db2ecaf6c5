//! Engine configuration.
//!
//! Stored as JSON next to whatever the host process keeps its settings in.
//! Every field has a default, so a partial file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compression::Compression;
use crate::error::{Phase, Result, SnapshotError};
use crate::resource::ResourceManager;

const MB: usize = 1024 * 1024;

/// Records per batch handed to the compressor or the index engine.
pub const DEFAULT_BATCH_RECORDS: usize = 2048;

/// Target size of one in-flight encoded chunk.
pub const DEFAULT_CHUNK_BYTES: usize = 4 * MB;

/// Hard ceiling for any single chunk, record or length prefix.
pub const DEFAULT_MEMORY_CEILING_BYTES: usize = 64 * MB;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Codec used when persisting. Restores always follow the artifact tag.
    pub compression: Compression,
    /// Codec level; `None` uses the codec's default.
    pub compression_level: Option<u32>,
    pub batch_records: usize,
    pub chunk_bytes: usize,
    pub memory_ceiling_bytes: usize,
    /// fsync the artifact before it is renamed into place.
    pub fsync: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            compression_level: None,
            batch_records: DEFAULT_BATCH_RECORDS,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING_BYTES,
            fsync: true,
        }
    }
}

impl EngineConfig {
    /// Defaults with chunk size and memory ceiling derived from the host's
    /// available memory.
    pub fn auto_tuned() -> Self {
        let budget = ResourceManager::auto_tune();
        Self {
            batch_records: budget.batch_records,
            chunk_bytes: budget.chunk_bytes,
            memory_ceiling_bytes: budget.memory_ceiling_bytes,
            ..Self::default()
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self.compression_level = None;
        self
    }

    /// Effective level for the configured codec.
    pub fn level(&self) -> u32 {
        self.compression_level
            .unwrap_or_else(|| self.compression.default_level())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_records == 0 {
            return Err(SnapshotError::Configuration(
                "batch_records must be at least 1".into(),
            ));
        }
        if self.chunk_bytes == 0 {
            return Err(SnapshotError::Configuration(
                "chunk_bytes must be at least 1".into(),
            ));
        }
        if self.chunk_bytes > self.memory_ceiling_bytes {
            return Err(SnapshotError::Configuration(format!(
                "chunk_bytes ({}) exceeds memory_ceiling_bytes ({})",
                self.chunk_bytes, self.memory_ceiling_bytes
            )));
        }
        self.compression.validate_level(self.level())
    }

    /// Read config from a JSON file. Returns None if the file doesn't exist.
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| SnapshotError::io(Phase::Read, e))?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            SnapshotError::Configuration(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Write config as pretty JSON.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SnapshotError::Configuration(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, json).map_err(|e| SnapshotError::io(Phase::Write, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.level(), 6);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = EngineConfig::default();
        config.batch_records = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.chunk_bytes = config.memory_ceiling_bytes + 1;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default().with_compression(Compression::Zstd);
        config.compression_level = Some(40);
        assert!(matches!(
            config.validate().unwrap_err(),
            SnapshotError::Configuration(_)
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idxpack.json");

        assert!(EngineConfig::read_from(&path).unwrap().is_none());

        let config = EngineConfig {
            compression: Compression::Brotli,
            compression_level: Some(9),
            ..EngineConfig::default()
        };
        config.write_to(&path).unwrap();
        assert_eq!(EngineConfig::read_from(&path).unwrap(), Some(config));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idxpack.json");
        std::fs::write(&path, r#"{ "compression": "zstd" }"#).unwrap();

        let config = EngineConfig::read_from(&path).unwrap().unwrap();
        assert_eq!(config.compression, Compression::Zstd);
        assert_eq!(config.batch_records, DEFAULT_BATCH_RECORDS);
        assert!(config.fsync);
    }

    #[test]
    fn test_unknown_codec_in_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idxpack.json");
        std::fs::write(&path, r#"{ "compression": "lz4" }"#).unwrap();
        assert!(matches!(
            EngineConfig::read_from(&path).unwrap_err(),
            SnapshotError::Configuration(_)
        ));
    }

    #[test]
    fn test_auto_tuned_is_valid() {
        EngineConfig::auto_tuned().validate().unwrap();
    }
}
