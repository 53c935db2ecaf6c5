//! Streaming artifact writer.
//!
//! Records are encoded one at a time into a bounded chunk buffer; full
//! chunks go to the compressor, whose output is counted and hashed on its
//! way to a temporary file next to the destination. The header's record
//! count is patched once the stream ends, the footer (whose checksum covers
//! the final header as well as the payload) is appended, and the
//! temporary file is renamed over the destination. A reader therefore sees
//! either the previous artifact or the complete new one.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::artifact::format::{
    artifact_checksum, ArtifactFooter, ArtifactHeader, FOOTER_SIZE, HEADER_SIZE,
    RECORD_COUNT_OFFSET,
};
use crate::artifact::io::PayloadWriter;
use crate::codec::RecordEncoder;
use crate::compression::Compression;
use crate::config::EngineConfig;
use crate::error::{Phase, Result, SnapshotError};
use crate::record::{SnapshotMeta, SnapshotSource};

/// File buffer between the payload counter and the temporary file.
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Chunk buffers start at most this large and grow on demand.
const CHUNK_PREALLOC: usize = 1024 * 1024;

/// Outcome of a successful persist.
#[derive(Debug, Clone)]
pub struct Persisted {
    pub path: PathBuf,
    pub stats: PersistStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistStats {
    pub compression: Compression,
    pub records: u64,
    /// Encoded (uncompressed) payload size.
    pub raw_bytes: u64,
    /// Compressed payload size.
    pub compressed_bytes: u64,
    /// Size of the finished artifact file.
    pub artifact_bytes: u64,
    /// Chunks handed to the compressor.
    pub chunks: u64,
    pub encode_time: Duration,
    pub compress_time: Duration,
    pub write_time: Duration,
    pub total_time: Duration,
}

impl PersistStats {
    /// Compressed payload size relative to the encoded size.
    pub fn ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            return 1.0;
        }
        self.compressed_bytes as f64 / self.raw_bytes as f64
    }
}

/// Totals from the encode/compress stream.
struct StreamTotals {
    records: u64,
    raw_bytes: u64,
    chunks: u64,
    encode_time: Duration,
    /// Time inside the compressor, including the file writes it triggered.
    compressor_time: Duration,
}

// ── ArtifactWriter ─────────────────────────────────────────────────

/// Persists snapshots with a fixed configuration.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    config: EngineConfig,
}

impl ArtifactWriter {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Write `source` as an artifact at `destination`, replacing any
    /// artifact already there.
    pub fn persist<S: SnapshotSource + ?Sized>(
        &self,
        source: &S,
        destination: &Path,
    ) -> Result<Persisted> {
        let started = Instant::now();
        tracing::info!(
            path = %destination.display(),
            codec = %self.config.compression,
            "persisting snapshot"
        );

        match self.write_artifact(source, destination, started) {
            Ok(persisted) => {
                let stats = &persisted.stats;
                tracing::info!(
                    path = %destination.display(),
                    codec = %stats.compression,
                    records = stats.records,
                    raw_bytes = stats.raw_bytes,
                    artifact_bytes = stats.artifact_bytes,
                    elapsed_ms = stats.total_time.as_millis() as u64,
                    "snapshot persisted"
                );
                Ok(persisted)
            }
            Err(e) => {
                tracing::error!(
                    path = %destination.display(),
                    phase = e.phase().map(|p| p.as_str()).unwrap_or("setup"),
                    code = e.code(),
                    error = %e,
                    "persist failed"
                );
                Err(e)
            }
        }
    }

    fn write_artifact<S: SnapshotSource + ?Sized>(
        &self,
        source: &S,
        destination: &Path,
        started: Instant,
    ) -> Result<Persisted> {
        let config = &self.config;
        let dir = destination_dir(destination)?;

        // Dropping the temp file on any early return deletes it.
        let mut tmp = tempfile::Builder::new()
            .prefix(".idxpack-")
            .suffix(".partial")
            .tempfile_in(dir)
            .map_err(|e| SnapshotError::io(Phase::Write, e))?;

        let meta = source.meta();
        let header = ArtifactHeader::new(
            config.compression,
            &SnapshotMeta {
                record_count: 0,
                ..meta
            },
        );

        let mut out = BufWriter::with_capacity(WRITE_BUFFER_SIZE, tmp.as_file_mut());
        header.write_to(&mut out).map_err(write_err)?;

        let mut payload = PayloadWriter::new(&mut out);
        let totals = match stream_records(source, config, &mut payload) {
            Ok(totals) => totals,
            Err(e) => return Err(classify_stream_error(e, &mut payload)),
        };
        // brotli reports write failures only through the sink.
        if let Some(e) = payload.take_error() {
            return Err(write_err(e));
        }

        let compressed_bytes = payload.bytes_written();
        let payload_digest = payload.digest();
        let payload_io = payload.io_time();
        drop(payload);

        let final_header = ArtifactHeader {
            record_count: totals.records,
            ..header
        };
        let finalize_start = Instant::now();
        ArtifactFooter {
            payload_len: compressed_bytes,
            checksum: artifact_checksum(&final_header.to_bytes(), &payload_digest),
        }
        .write_to(&mut out)
        .map_err(write_err)?;
        let file = out.into_inner().map_err(|e| write_err(e.into_error()))?;
        patch_record_count(file, totals.records)?;
        if config.fsync {
            file.sync_all().map_err(write_err)?;
        }

        if meta.record_count != 0 && meta.record_count != totals.records {
            tracing::warn!(
                declared = meta.record_count,
                written = totals.records,
                "snapshot record count differs from the records it produced"
            );
        }

        tmp.persist(destination).map_err(|e| write_err(e.error))?;
        let write_time = payload_io + finalize_start.elapsed();

        Ok(Persisted {
            path: destination.to_path_buf(),
            stats: PersistStats {
                compression: config.compression,
                records: totals.records,
                raw_bytes: totals.raw_bytes,
                compressed_bytes,
                artifact_bytes: (HEADER_SIZE + FOOTER_SIZE) as u64 + compressed_bytes,
                chunks: totals.chunks,
                encode_time: totals.encode_time,
                compress_time: totals.compressor_time.saturating_sub(payload_io),
                write_time,
                total_time: started.elapsed(),
            },
        })
    }
}

/// Encode every record into bounded chunks and push them through the
/// compressor into `payload`. Compressor IO failures come back as
/// `UpstreamIo { phase: Compress }`; the caller reclassifies them when the
/// file underneath was the one that failed.
fn stream_records<S, W>(
    source: &S,
    config: &EngineConfig,
    payload: &mut PayloadWriter<W>,
) -> Result<StreamTotals>
where
    S: SnapshotSource + ?Sized,
    W: Write,
{
    let mut compressor = config.compression.wrap(payload, config.level())?;
    let mut encoder = RecordEncoder::new(config.memory_ceiling_bytes);
    let mut chunk = Vec::with_capacity(config.chunk_bytes.min(CHUNK_PREALLOC));
    let mut record_buf = Vec::new();
    let mut chunk_records = 0usize;
    let mut chunks = 0u64;
    let mut encode_time = Duration::ZERO;
    let mut compressor_time = Duration::ZERO;

    for record in source.records() {
        let t = Instant::now();
        record_buf.clear();
        encoder.encode_into(&record, &mut record_buf)?;
        encode_time += t.elapsed();

        if !chunk.is_empty() && chunk.len() + record_buf.len() > config.chunk_bytes {
            compressor_time += flush_chunk(&mut compressor, &mut chunk)?;
            chunks += 1;
            chunk_records = 0;
        }
        chunk.extend_from_slice(&record_buf);
        chunk_records += 1;

        if chunk_records >= config.batch_records || chunk.len() >= config.chunk_bytes {
            compressor_time += flush_chunk(&mut compressor, &mut chunk)?;
            chunks += 1;
            chunk_records = 0;
        }
    }
    if !chunk.is_empty() {
        compressor_time += flush_chunk(&mut compressor, &mut chunk)?;
        chunks += 1;
    }

    let t = Instant::now();
    compressor
        .finish()
        .map_err(|e| SnapshotError::io(Phase::Compress, e))?;
    compressor_time += t.elapsed();

    Ok(StreamTotals {
        records: encoder.records_encoded(),
        raw_bytes: encoder.bytes_encoded(),
        chunks,
        encode_time,
        compressor_time,
    })
}

fn flush_chunk<W: Write>(compressor: &mut W, chunk: &mut Vec<u8>) -> Result<Duration> {
    let t = Instant::now();
    compressor
        .write_all(chunk)
        .map_err(|e| SnapshotError::io(Phase::Compress, e))?;
    chunk.clear();
    Ok(t.elapsed())
}

fn classify_stream_error<W: Write>(e: SnapshotError, payload: &mut PayloadWriter<W>) -> SnapshotError {
    match e {
        SnapshotError::UpstreamIo {
            phase: Phase::Compress,
            source,
        } => match payload.take_error() {
            Some(io) => write_err(io),
            None => SnapshotError::io(Phase::Compress, source),
        },
        other => other,
    }
}

fn patch_record_count(file: &mut File, records: u64) -> Result<()> {
    file.seek(SeekFrom::Start(RECORD_COUNT_OFFSET))
        .map_err(write_err)?;
    file.write_all(&records.to_le_bytes()).map_err(write_err)?;
    file.seek(SeekFrom::End(0)).map_err(write_err)?;
    Ok(())
}

/// Directory the artifact (and its temporary file) lives in.
fn destination_dir(destination: &Path) -> Result<&Path> {
    if destination.is_dir() {
        return Err(SnapshotError::Configuration(format!(
            "destination {} is a directory",
            destination.display()
        )));
    }
    let dir = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(SnapshotError::Configuration(format!(
            "destination directory {} does not exist",
            dir.display()
        )));
    }
    Ok(dir)
}

fn write_err(e: std::io::Error) -> SnapshotError {
    SnapshotError::io(Phase::Write, e)
}

// ── Free functions ─────────────────────────────────────────────────

/// Persist with default settings and the given codec.
pub fn persist_snapshot<S: SnapshotSource + ?Sized>(
    source: &S,
    destination: impl AsRef<Path>,
    compression: Compression,
) -> Result<Persisted> {
    persist_snapshot_with(
        source,
        destination,
        &EngineConfig::default().with_compression(compression),
    )
}

pub fn persist_snapshot_with<S: SnapshotSource + ?Sized>(
    source: &S,
    destination: impl AsRef<Path>,
    config: &EngineConfig,
) -> Result<Persisted> {
    ArtifactWriter::new(config.clone())?.persist(source, destination.as_ref())
}
