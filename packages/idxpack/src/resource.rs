//! System resource detection and memory budget tuning.
//!
//! Detects available RAM, then derives the memory ceiling and chunk size
//! used by the streaming writer and reader. Stateless: each call to
//! `ResourceManager::auto_tune()` samples the system again.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

// ── Constants ───────────────────────────────────────────────────────

const MB: usize = 1024 * 1024;

/// Ceiling floor (16 MB).
const CEILING_MIN: usize = 16 * MB;

/// Ceiling cap (512 MB). Larger chunks buy nothing for streaming codecs.
const CEILING_MAX: usize = 512 * MB;

/// Fraction of available memory one in-flight chunk may use.
const CEILING_FRACTION: f64 = 0.05;

/// Chunks are this fraction of the ceiling.
const CHUNK_DIVISOR: usize = 16;

/// Chunk size bounds.
const CHUNK_MIN: usize = MB;
const CHUNK_MAX: usize = 16 * MB;

/// Estimated encoded bytes per transcript segment record.
const BYTES_PER_RECORD: usize = 256;

// ── SystemResources ─────────────────────────────────────────────────

/// Snapshot of detected memory.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total physical RAM in bytes.
    pub total_memory_bytes: u64,
    /// Available (re-usable) RAM in bytes.
    pub available_memory_bytes: u64,
}

impl SystemResources {
    pub fn detect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
        }
    }

    /// Memory pressure indicator (0.0 = no pressure, 1.0 = critical).
    pub fn memory_pressure(&self) -> f64 {
        if self.total_memory_bytes == 0 {
            return 1.0;
        }
        let ratio = self.available_memory_bytes as f64 / self.total_memory_bytes as f64;
        (1.0 - ratio).clamp(0.0, 1.0)
    }
}

// ── MemoryBudget ────────────────────────────────────────────────────

/// Streaming limits computed from system resources.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBudget {
    pub memory_ceiling_bytes: usize,
    pub chunk_bytes: usize,
    pub batch_records: usize,
}

impl MemoryBudget {
    /// Heuristics:
    /// - `memory_ceiling_bytes`: `clamp(available * 0.05, 16 MB, 512 MB)`.
    /// - `chunk_bytes`: `clamp(ceiling / 16, 1 MB, 16 MB)`.
    /// - `batch_records`: `chunk_bytes / 256`.
    pub fn from_resources(res: &SystemResources) -> Self {
        let raw = (res.available_memory_bytes as f64 * CEILING_FRACTION) as usize;
        let memory_ceiling_bytes = raw.clamp(CEILING_MIN, CEILING_MAX);
        let chunk_bytes = (memory_ceiling_bytes / CHUNK_DIVISOR).clamp(CHUNK_MIN, CHUNK_MAX);

        Self {
            memory_ceiling_bytes,
            chunk_bytes,
            batch_records: chunk_bytes / BYTES_PER_RECORD,
        }
    }
}

// ── ResourceManager ─────────────────────────────────────────────────

pub struct ResourceManager;

impl ResourceManager {
    /// Probe the system and return a memory budget.
    pub fn auto_tune() -> MemoryBudget {
        let resources = SystemResources::detect();
        let budget = MemoryBudget::from_resources(&resources);
        tracing::debug!(
            available_mb = resources.available_memory_bytes / MB as u64,
            pressure = resources.memory_pressure(),
            ceiling_mb = budget.memory_ceiling_bytes / MB,
            chunk_mb = budget.chunk_bytes / MB,
            "memory budget"
        );
        budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    fn make_resources(total_gb: f64, available_gb: f64) -> SystemResources {
        SystemResources {
            total_memory_bytes: (total_gb * GB as f64) as u64,
            available_memory_bytes: (available_gb * GB as f64) as u64,
        }
    }

    #[test]
    fn test_system_resources_detection() {
        let res = SystemResources::detect();
        assert!(res.total_memory_bytes > 0, "total memory must be positive");
    }

    #[test]
    fn test_budget_small_worker() {
        // 1 GB available -> 5% = 51.2 MB ceiling, 3.2 MB chunks
        let budget = MemoryBudget::from_resources(&make_resources(2.0, 1.0));
        assert_eq!(budget.memory_ceiling_bytes, (GB as f64 * 0.05) as usize);
        assert_eq!(budget.chunk_bytes, budget.memory_ceiling_bytes / 16);
        assert_eq!(budget.batch_records, budget.chunk_bytes / 256);
    }

    #[test]
    fn test_budget_floor() {
        // 128 MB available -> 6.4 MB, floored at 16 MB
        let budget = MemoryBudget::from_resources(&make_resources(0.5, 0.125));
        assert_eq!(budget.memory_ceiling_bytes, 16 * MB);
        assert_eq!(budget.chunk_bytes, MB);
    }

    #[test]
    fn test_budget_cap() {
        let budget = MemoryBudget::from_resources(&make_resources(512.0, 256.0));
        assert_eq!(budget.memory_ceiling_bytes, 512 * MB);
        assert_eq!(budget.chunk_bytes, 16 * MB);
    }

    #[test]
    fn test_chunk_never_exceeds_ceiling() {
        for available in [0.01, 0.3, 1.0, 4.0, 64.0] {
            let budget = MemoryBudget::from_resources(&make_resources(128.0, available));
            assert!(budget.chunk_bytes <= budget.memory_ceiling_bytes);
            assert!(budget.batch_records > 0);
        }
    }

    #[test]
    fn test_memory_pressure() {
        let res = make_resources(1.0, 0.25);
        assert!((res.memory_pressure() - 0.75).abs() < 1e-9);
    }
}
