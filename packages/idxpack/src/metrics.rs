//! Persist/restore metrics.
//!
//! Per-invocation numbers live in `PersistStats` / `RestoreStats`. This
//! module adds the per-phase timing breakdown they share and a thread-safe
//! `Metrics` collector that a long-lived worker can keep behind an `Arc`
//! and feed with every invocation.
//!
//! # Example
//!
//! ```no_run
//! use idxpack::metrics::Metrics;
//!
//! let metrics = Metrics::new();
//! // after each restore: metrics.record_restore(&restored.stats);
//! let stats = metrics.snapshot();
//! println!("restore p95: {}ms", stats.restore_p95_ms);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::artifact::{PersistStats, RestoreStats};
use crate::error::{Phase, SnapshotError};

/// Number of restore latencies kept for percentile calculation.
const LATENCY_WINDOW_SIZE: usize = 256;

/// Restores slower than this are logged at warn level.
pub const SLOW_RESTORE_THRESHOLD_MS: u64 = 10_000;

// ── PhaseTimings ───────────────────────────────────────────────────

/// Wall time spent in each restore phase.
///
/// Phases interleave while streaming; each figure is the sum of the time
/// spent inside that layer only (decompress excludes the file reads it
/// triggered, decode excludes decompression).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    pub read: Duration,
    pub decompress: Duration,
    pub decode: Duration,
    pub rebuild: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.read + self.decompress + self.decode + self.rebuild
    }

    /// Phase with the largest share of the total.
    pub fn dominant(&self) -> Phase {
        let mut best = (Phase::Read, self.read);
        for candidate in [
            (Phase::Decompress, self.decompress),
            (Phase::Decode, self.decode),
            (Phase::Rebuild, self.rebuild),
        ] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        best.0
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// Thread-safe collector shared across invocations of one worker.
pub struct Metrics {
    persist_count: AtomicU64,
    restore_count: AtomicU64,
    records_persisted: AtomicU64,
    records_restored: AtomicU64,
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,

    /// Failures indexed by `phase_slot`.
    failures: [AtomicU64; 8],

    restore_latencies_ms: Mutex<VecDeque<u64>>,
    last_restore: Mutex<Option<PhaseTimings>>,

    started_at: Instant,
}

/// Point-in-time copy of the collector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub persist_count: u64,
    pub restore_count: u64,
    pub records_persisted: u64,
    pub records_restored: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub failures_read: u64,
    pub failures_decompress: u64,
    pub failures_decode: u64,
    pub failures_rebuild: u64,
    pub failures_write: u64,
    pub failures_configuration: u64,
    pub restore_p50_ms: u64,
    pub restore_p95_ms: u64,
    pub last_restore: Option<PhaseTimings>,
    pub uptime_secs: u64,
}

impl MetricsSnapshot {
    pub fn total_failures(&self) -> u64 {
        self.failures_read
            + self.failures_decompress
            + self.failures_decode
            + self.failures_rebuild
            + self.failures_write
            + self.failures_configuration
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            persist_count: AtomicU64::new(0),
            restore_count: AtomicU64::new(0),
            records_persisted: AtomicU64::new(0),
            records_restored: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            failures: Default::default(),
            restore_latencies_ms: Mutex::new(VecDeque::with_capacity(LATENCY_WINDOW_SIZE)),
            last_restore: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    pub fn record_persist(&self, stats: &PersistStats) {
        self.persist_count.fetch_add(1, Ordering::Relaxed);
        self.records_persisted.fetch_add(stats.records, Ordering::Relaxed);
        self.bytes_written.fetch_add(stats.artifact_bytes, Ordering::Relaxed);
    }

    pub fn record_restore(&self, stats: &RestoreStats) {
        self.restore_count.fetch_add(1, Ordering::Relaxed);
        self.records_restored.fetch_add(stats.records, Ordering::Relaxed);
        self.bytes_read.fetch_add(stats.compressed_bytes, Ordering::Relaxed);

        let total_ms = stats.total_time.as_millis() as u64;
        if total_ms >= SLOW_RESTORE_THRESHOLD_MS {
            tracing::warn!(
                total_ms,
                dominant = %stats.timings.dominant(),
                codec = %stats.compression,
                "slow restore"
            );
        }

        if let Ok(mut window) = self.restore_latencies_ms.lock() {
            if window.len() == LATENCY_WINDOW_SIZE {
                window.pop_front();
            }
            window.push_back(total_ms);
        }
        if let Ok(mut last) = self.last_restore.lock() {
            *last = Some(stats.timings);
        }
    }

    pub fn record_failure(&self, error: &SnapshotError) {
        self.failures[phase_slot(error.phase())].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (p50, p95) = match self.restore_latencies_ms.lock() {
            Ok(window) => {
                let mut sorted: Vec<u64> = window.iter().copied().collect();
                sorted.sort_unstable();
                (percentile(&sorted, 50), percentile(&sorted, 95))
            }
            Err(_) => (0, 0),
        };
        let last_restore = self.last_restore.lock().ok().and_then(|last| *last);
        let failures = |slot: usize| self.failures[slot].load(Ordering::Relaxed);

        MetricsSnapshot {
            persist_count: self.persist_count.load(Ordering::Relaxed),
            restore_count: self.restore_count.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            records_restored: self.records_restored.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            failures_read: failures(phase_slot(Some(Phase::Read))),
            failures_decompress: failures(phase_slot(Some(Phase::Decompress))),
            failures_decode: failures(phase_slot(Some(Phase::Decode))),
            failures_rebuild: failures(phase_slot(Some(Phase::Rebuild))),
            // Encode/compress/write all count as write-side failures.
            failures_write: failures(phase_slot(Some(Phase::Encode)))
                + failures(phase_slot(Some(Phase::Compress)))
                + failures(phase_slot(Some(Phase::Write))),
            failures_configuration: failures(phase_slot(None)),
            restore_p50_ms: p50,
            restore_p95_ms: p95,
            last_restore,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn phase_slot(phase: Option<Phase>) -> usize {
    match phase {
        None => 0,
        Some(Phase::Read) => 1,
        Some(Phase::Decompress) => 2,
        Some(Phase::Decode) => 3,
        Some(Phase::Rebuild) => 4,
        Some(Phase::Encode) => 5,
        Some(Phase::Compress) => 6,
        Some(Phase::Write) => 7,
    }
}

/// Nearest-rank percentile of a sorted slice.
fn percentile(sorted: &[u64], p: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}
