//! Streaming artifact reader.
//!
//! Validates the fixed header and footer, then streams the payload through
//! decompress → decode → batch insert into a fresh index from the caller's
//! factory. The index is only handed out after the whole payload has been
//! consumed, its checksum matches the footer and the record count matches
//! the header. Any failure drops the half-built index.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::artifact::format::{
    artifact_checksum, ArtifactFooter, ArtifactHeader, ArtifactInfo, FOOTER_SIZE, HEADER_SIZE,
    MIN_ARTIFACT_SIZE,
};
use crate::artifact::io::{PayloadReader, TimedReader};
use crate::artifact::state::{RestoreState, StateTracker, Transition};
use crate::codec::RecordDecoder;
use crate::compression::Compression;
use crate::config::EngineConfig;
use crate::error::{Phase, Result, SnapshotError};
use crate::index::{IndexError, IndexFactory, SearchIndex};
use crate::metrics::PhaseTimings;
use crate::record::{SearchRecord, SnapshotMeta};

/// Buffer between the artifact file and the payload counter.
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Buffer between the decompressor and the record decoder.
const DECODE_BUFFER_SIZE: usize = 64 * 1024;

/// A rebuilt index plus what it took to build it.
#[derive(Debug)]
pub struct Restored<I> {
    pub index: I,
    pub stats: RestoreStats,
}

#[derive(Debug, Clone)]
pub struct RestoreStats {
    /// Codec read from the artifact header.
    pub compression: Compression,
    pub meta: SnapshotMeta,
    pub records: u64,
    pub compressed_bytes: u64,
    /// Size of the decoded record stream.
    pub decoded_bytes: u64,
    /// Batches handed to the index engine.
    pub batches: u64,
    pub timings: PhaseTimings,
    pub total_time: Duration,
    pub transitions: Vec<Transition>,
}

struct StreamTotals {
    records: u64,
    decoded_bytes: u64,
    batches: u64,
    /// Time inside the decompressor, including the file reads it triggered.
    decompressor_time: Duration,
    /// Time inside the decoder, including decompression.
    decoder_time: Duration,
    rebuild_time: Duration,
}

// ── ArtifactReader ─────────────────────────────────────────────────

/// Restores artifacts with a fixed configuration.
#[derive(Debug, Clone)]
pub struct ArtifactReader {
    config: EngineConfig,
    /// Codec the caller expects; only used to warn on a mismatch.
    expected: Option<Compression>,
}

impl ArtifactReader {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            expected: None,
        })
    }

    /// Warn when an artifact's codec is not `compression`. The artifact
    /// header is still authoritative.
    pub fn expecting(mut self, compression: Compression) -> Self {
        self.expected = Some(compression);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rebuild an index from the artifact at `source`.
    pub fn restore<F: IndexFactory>(&self, source: &Path, factory: &F) -> Result<Restored<F::Index>> {
        self.restore_tracked(source, factory, StateTracker::new())
    }

    /// Restore with a tracker that may already have moved past
    /// `Uninitialized` (e.g. while an object store downloaded the artifact).
    pub(crate) fn restore_tracked<F: IndexFactory>(
        &self,
        source: &Path,
        factory: &F,
        mut tracker: StateTracker,
    ) -> Result<Restored<F::Index>> {
        let started = Instant::now();
        tracing::info!(path = %source.display(), "restoring snapshot");

        let result = self
            .read_artifact(source, factory, &mut tracker)
            .and_then(|restored| {
                tracker.advance(RestoreState::Ready)?;
                Ok(restored)
            });

        match result {
            Ok(mut restored) => {
                let stats = &mut restored.stats;
                stats.total_time = started.elapsed();
                stats.transitions = tracker.into_transitions();
                tracing::info!(
                    path = %source.display(),
                    codec = %stats.compression,
                    records = stats.records,
                    compressed_bytes = stats.compressed_bytes,
                    decoded_bytes = stats.decoded_bytes,
                    read_ms = stats.timings.read.as_millis() as u64,
                    decompress_ms = stats.timings.decompress.as_millis() as u64,
                    decode_ms = stats.timings.decode.as_millis() as u64,
                    rebuild_ms = stats.timings.rebuild.as_millis() as u64,
                    elapsed_ms = stats.total_time.as_millis() as u64,
                    "snapshot restored"
                );
                Ok(restored)
            }
            Err(e) => {
                let reached = tracker.state();
                tracker.fail();
                tracing::error!(
                    path = %source.display(),
                    state = %reached,
                    phase = e.phase().map(|p| p.as_str()).unwrap_or("setup"),
                    code = e.code(),
                    error = %e,
                    "restore failed"
                );
                Err(e)
            }
        }
    }

    fn read_artifact<F: IndexFactory>(
        &self,
        source: &Path,
        factory: &F,
        tracker: &mut StateTracker,
    ) -> Result<Restored<F::Index>> {
        if !source.is_file() {
            return Err(SnapshotError::Configuration(format!(
                "artifact {} does not exist",
                source.display()
            )));
        }
        tracker.advance(RestoreState::Downloading)?;

        let frame_start = Instant::now();
        let mut file = File::open(source).map_err(read_err)?;
        let file_len = file.metadata().map_err(read_err)?.len();
        let frame = read_frame(&mut file, file_len)?;
        let (header, footer) = (frame.header, frame.footer);

        if let Some(expected) = self.expected {
            if expected != header.compression {
                tracing::warn!(
                    path = %source.display(),
                    expected = %expected,
                    embedded = %header.compression,
                    "codec mismatch, using the codec recorded in the artifact"
                );
            }
        }

        file.seek(SeekFrom::Start(HEADER_SIZE as u64))
            .map_err(read_err)?;
        let mut payload = PayloadReader::new(
            BufReader::with_capacity(READ_BUFFER_SIZE, file),
            footer.payload_len,
        );
        let frame_time = frame_start.elapsed();

        let mut index = factory.create();
        let totals = match stream_into(&mut payload, header.compression, &self.config, &mut index, tracker) {
            Ok(totals) => totals,
            Err(e) => return Err(classify_stream_error(e, &mut payload, &frame)),
        };

        let trailing = payload
            .drain()
            .map_err(|e| payload_read_error(&mut payload, e))?;
        if trailing > 0 {
            return Err(SnapshotError::corrupt(
                Phase::Decompress,
                footer.payload_len - trailing,
                format!("{} payload bytes after the end of the compressed stream", trailing),
            ));
        }
        verify_checksum(&payload, &frame)?;
        if totals.records != header.record_count {
            return Err(SnapshotError::corrupt(
                Phase::Decode,
                totals.decoded_bytes,
                format!(
                    "header declares {} records, payload holds {}",
                    header.record_count, totals.records
                ),
            ));
        }

        let io_time = payload.io_time();
        let timings = PhaseTimings {
            read: frame_time + io_time,
            decompress: totals.decompressor_time.saturating_sub(io_time),
            decode: totals.decoder_time.saturating_sub(totals.decompressor_time),
            rebuild: totals.rebuild_time,
        };

        Ok(Restored {
            index,
            stats: RestoreStats {
                compression: header.compression,
                meta: header.meta(),
                records: totals.records,
                compressed_bytes: payload.bytes_read(),
                decoded_bytes: totals.decoded_bytes,
                batches: totals.batches,
                timings,
                total_time: Duration::ZERO,
                transitions: Vec::new(),
            },
        })
    }
}

/// Header and footer of an artifact, plus the raw header bytes the footer
/// checksum covers.
struct Frame {
    header: ArtifactHeader,
    header_bytes: [u8; HEADER_SIZE],
    footer: ArtifactFooter,
}

/// Read and validate header and footer.
fn read_frame(file: &mut File, file_len: u64) -> Result<Frame> {
    if file_len < HEADER_SIZE as u64 {
        return Err(SnapshotError::corrupt(
            Phase::Read,
            file_len,
            format!("file is {} bytes, too small for an artifact header", file_len),
        ));
    }
    let mut header_bytes = [0u8; HEADER_SIZE];
    file.read_exact(&mut header_bytes).map_err(read_err)?;
    let header = ArtifactHeader::from_bytes(&header_bytes)?;

    if file_len < MIN_ARTIFACT_SIZE {
        return Err(SnapshotError::corrupt(
            Phase::Read,
            file_len,
            "artifact truncated before its footer",
        ));
    }
    let footer_offset = file_len - FOOTER_SIZE as u64;
    file.seek(SeekFrom::Start(footer_offset)).map_err(read_err)?;
    let mut footer_bytes = [0u8; FOOTER_SIZE];
    file.read_exact(&mut footer_bytes).map_err(read_err)?;
    let footer = ArtifactFooter::from_bytes(&footer_bytes, footer_offset)?;
    footer.validate_layout(file_len)?;

    Ok(Frame {
        header,
        header_bytes,
        footer,
    })
}

/// Decompress, decode and insert every record of the payload.
fn stream_into<R: Read, I: SearchIndex>(
    payload: &mut PayloadReader<R>,
    compression: Compression,
    config: &EngineConfig,
    index: &mut I,
    tracker: &mut StateTracker,
) -> Result<StreamTotals> {
    tracker.reach(RestoreState::Decompressing);
    let decompressor = compression
        .unwrap(payload)
        .map_err(|e| SnapshotError::io(Phase::Decompress, e))?;
    let mut timed = TimedReader::new(decompressor);
    let mut decoder = RecordDecoder::new(
        BufReader::with_capacity(DECODE_BUFFER_SIZE, &mut timed),
        config.memory_ceiling_bytes,
    );

    let ceiling = config.memory_ceiling_bytes as u64;
    let mut decoder_time = Duration::ZERO;
    let mut rebuild_time = Duration::ZERO;
    let mut batches = 0u64;

    loop {
        tracker.reach(RestoreState::Decoding);
        let t = Instant::now();
        let batch = decoder.next_batch(config.batch_records, config.chunk_bytes as u64)?;
        decoder_time += t.elapsed();
        let Some(batch) = batch else { break };

        if batch.bytes > ceiling {
            return Err(SnapshotError::ResourceExhaustion {
                phase: Phase::Decode,
                requested: batch.bytes,
                ceiling,
            });
        }

        tracker.reach(RestoreState::Rebuilding);
        let t = Instant::now();
        index
            .bulk_insert(batch.records)
            .map_err(|e| SnapshotError::Index {
                phase: Phase::Rebuild,
                message: e.to_string(),
            })?;
        rebuild_time += t.elapsed();
        batches += 1;
    }

    let records = decoder.records_decoded();
    let decoded_bytes = decoder.offset();
    drop(decoder);

    Ok(StreamTotals {
        records,
        decoded_bytes,
        batches,
        decompressor_time: timed.elapsed(),
        decoder_time,
        rebuild_time,
    })
}

/// Work out which layer a streaming failure really came from.
///
/// A failure of the file underneath is reported as such. Any other
/// failure on an artifact whose checksum does not match is reported as
/// checksum corruption, since the decoded bytes were garbage to begin with.
fn classify_stream_error<R: Read>(
    e: SnapshotError,
    payload: &mut PayloadReader<R>,
    frame: &Frame,
) -> SnapshotError {
    if let Some(io) = payload.take_error() {
        return latched_read_error(io, payload.bytes_read());
    }

    let e = match e {
        SnapshotError::UpstreamIo {
            phase: Phase::Decode,
            source,
        } => SnapshotError::corrupt(
            Phase::Decompress,
            payload.bytes_read(),
            format!("decompression failed: {}", source),
        ),
        other => other,
    };

    match payload.drain() {
        Ok(_) => match verify_checksum(payload, frame) {
            Err(mismatch) => mismatch,
            Ok(()) => e,
        },
        Err(io) => payload_read_error(payload, io),
    }
}

/// Compare the footer checksum with the header bytes as read and the
/// payload digest accumulated while streaming.
fn verify_checksum<R: Read>(payload: &PayloadReader<R>, frame: &Frame) -> Result<()> {
    let actual = artifact_checksum(&frame.header_bytes, &payload.digest());
    if actual != frame.footer.checksum {
        return Err(SnapshotError::corrupt(
            Phase::Read,
            0,
            "artifact checksum mismatch (header or payload damaged)",
        ));
    }
    Ok(())
}

fn payload_read_error<R: Read>(payload: &mut PayloadReader<R>, e: std::io::Error) -> SnapshotError {
    let offset = payload.bytes_read();
    latched_read_error(payload.take_error().unwrap_or(e), offset)
}

fn latched_read_error(e: std::io::Error, payload_offset: u64) -> SnapshotError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SnapshotError::corrupt(
            Phase::Read,
            HEADER_SIZE as u64 + payload_offset,
            "artifact ended inside its payload",
        )
    } else {
        read_err(e)
    }
}

fn read_err(e: std::io::Error) -> SnapshotError {
    SnapshotError::io(Phase::Read, e)
}

// ── Verification without an index ──────────────────────────────────

/// Counts records and drops them.
#[derive(Default)]
struct DiscardIndex {
    records: usize,
}

impl SearchIndex for DiscardIndex {
    fn bulk_insert(&mut self, records: Vec<SearchRecord>) -> std::result::Result<(), IndexError> {
        self.records += records.len();
        Ok(())
    }

    fn export(&self) -> Box<dyn Iterator<Item = SearchRecord> + '_> {
        Box::new(std::iter::empty())
    }

    fn len(&self) -> usize {
        self.records
    }
}

/// Header and footer of an artifact, without decoding the payload.
pub fn inspect_artifact(path: impl AsRef<Path>) -> Result<ArtifactInfo> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(SnapshotError::Configuration(format!(
            "artifact {} does not exist",
            path.display()
        )));
    }
    let mut file = File::open(path).map_err(read_err)?;
    let file_len = file.metadata().map_err(read_err)?.len();
    let frame = read_frame(&mut file, file_len)?;
    Ok(ArtifactInfo::new(&frame.header, &frame.footer, file_len))
}

/// Stream the whole artifact and check checksum, record structure and
/// record count without building an index.
pub fn verify_artifact(path: impl AsRef<Path>) -> Result<ArtifactInfo> {
    let path = path.as_ref();
    ArtifactReader::new(EngineConfig::default())?.restore(path, &DiscardIndex::default)?;
    inspect_artifact(path)
}

// ── Free functions ─────────────────────────────────────────────────

/// Restore with default settings. `compression` is what the caller
/// expects; the codec recorded in the artifact always wins.
pub fn restore_snapshot<F: IndexFactory>(
    source: impl AsRef<Path>,
    compression: Compression,
    factory: &F,
) -> Result<Restored<F::Index>> {
    ArtifactReader::new(EngineConfig::default())?
        .expecting(compression)
        .restore(source.as_ref(), factory)
}

pub fn restore_snapshot_with<F: IndexFactory>(
    source: impl AsRef<Path>,
    config: &EngineConfig,
    factory: &F,
) -> Result<Restored<F::Index>> {
    ArtifactReader::new(config.clone())?
        .expecting(config.compression)
        .restore(source.as_ref(), factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::writer::persist_snapshot;
    use crate::index::MemoryIndex;
    use crate::record::Snapshot;
    use tempfile::TempDir;

    fn snapshot(n: usize) -> Snapshot {
        let records = (0..n)
            .map(|i| {
                SearchRecord::new()
                    .with("id", format!("r{i}"))
                    .with("text", format!("record {i} about search engines"))
            })
            .collect();
        Snapshot::new(2, 1_000, records)
    }

    #[test]
    fn test_restore_reports_stats_and_states() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.idx");
        let persisted = persist_snapshot(&snapshot(300), &path, Compression::Gzip).unwrap();

        let restored = restore_snapshot(&path, Compression::Gzip, &MemoryIndex::new).unwrap();
        let stats = &restored.stats;
        assert_eq!(restored.index.len(), 300);
        assert_eq!(stats.records, 300);
        assert_eq!(stats.meta.schema_version, 2);
        assert_eq!(stats.compressed_bytes, persisted.stats.compressed_bytes);
        assert_eq!(stats.decoded_bytes, persisted.stats.raw_bytes);

        let states: Vec<_> = stats.transitions.iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![
                RestoreState::Downloading,
                RestoreState::Decompressing,
                RestoreState::Decoding,
                RestoreState::Rebuilding,
                RestoreState::Ready,
            ]
        );
    }

    #[test]
    fn test_batches_respect_batch_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.idx");
        persist_snapshot(&snapshot(50), &path, Compression::None).unwrap();

        let config = EngineConfig {
            batch_records: 8,
            ..EngineConfig::default()
        };
        let restored = restore_snapshot_with(&path, &config, &MemoryIndex::new).unwrap();
        assert_eq!(restored.stats.batches, 7);
    }

    #[test]
    fn test_missing_source_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = restore_snapshot(dir.path().join("nope.idx"), Compression::Gzip, &MemoryIndex::new)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Configuration(_)), "{err}");
    }

    #[test]
    fn test_index_rejection_surfaces_as_rebuild_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dup.idx");
        let dup = Snapshot::new(
            1,
            0,
            vec![
                SearchRecord::new().with("id", "same"),
                SearchRecord::new().with("id", "same"),
            ],
        );
        persist_snapshot(&dup, &path, Compression::Zstd).unwrap();

        let err = restore_snapshot(&path, Compression::Zstd, &MemoryIndex::new).unwrap_err();
        assert!(
            matches!(err, SnapshotError::Index { phase: Phase::Rebuild, .. }),
            "{err}"
        );
    }

    #[test]
    fn test_inspect_and_verify() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.idx");
        persist_snapshot(&snapshot(10), &path, Compression::Brotli).unwrap();

        let info = inspect_artifact(&path).unwrap();
        assert_eq!(info.compression, Compression::Brotli);
        assert_eq!(info.meta.record_count, 10);
        assert_eq!(info.file_len, std::fs::metadata(&path).unwrap().len());
        assert_eq!(info.checksum.len(), 64);

        assert_eq!(verify_artifact(&path).unwrap(), info);
    }

    #[test]
    fn test_record_count_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.idx");
        persist_snapshot(&snapshot(4), &path, Compression::None).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[16..24].copy_from_slice(&5u64.to_le_bytes());
        // Re-seal the footer so only the count disagrees.
        let footer_at = bytes.len() - FOOTER_SIZE;
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&bytes[..HEADER_SIZE]);
        let digest = *blake3::hash(&bytes[HEADER_SIZE..footer_at]).as_bytes();
        bytes[footer_at + 8..footer_at + 40].copy_from_slice(&artifact_checksum(&header, &digest));
        std::fs::write(&path, &bytes).unwrap();

        let err = verify_artifact(&path).unwrap_err();
        assert!(
            matches!(err, SnapshotError::CorruptArtifact { phase: Phase::Decode, .. }),
            "{err}"
        );
    }

    #[test]
    fn test_header_metadata_is_covered_by_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.idx");
        persist_snapshot(&snapshot(20), &path, Compression::Gzip).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        // schema_version, reserved byte, created_at_ms
        for (pos, mask) in [(8usize, 0x04u8), (13, 0x01), (24, 0xff)] {
            let mut damaged = bytes.clone();
            damaged[pos] ^= mask;
            std::fs::write(&path, &damaged).unwrap();

            match restore_snapshot(&path, Compression::Gzip, &MemoryIndex::new).unwrap_err() {
                SnapshotError::CorruptArtifact { phase, offset, .. } => {
                    assert_eq!(phase, Phase::Read, "byte {pos}");
                    assert_eq!(offset, 0, "byte {pos}");
                }
                other => panic!("byte {pos}: unexpected error: {other}"),
            }
        }
    }
}
