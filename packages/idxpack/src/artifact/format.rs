//! Artifact binary layout: fixed header, payload, fixed footer.
//!
//! The header alone determines how to decompress and decode the payload.
//! The footer carries the payload length and a BLAKE3 checksum that binds
//! the final header bytes to the compressed payload, so truncation and bit
//! rot in either are detected before a rebuilt index is handed out.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::compression::Compression;
use crate::error::{Phase, Result, SnapshotError};
use crate::record::SnapshotMeta;

// ── Constants ──────────────────────────────────────────────────────

/// Magic bytes at offset 0 of every artifact.
pub const MAGIC: [u8; 4] = *b"IDXP";

/// Artifact format version. Readers accept exactly this version.
pub const FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Footer magic (ASCII "IDXF").
pub const FOOTER_MAGIC: u32 = 0x4944_5846;

/// Footer size in bytes: u64 + 32-byte checksum + u32(size) + u32(magic).
pub const FOOTER_SIZE: usize = 48;

/// Byte offset of `record_count` inside the header (patched after streaming).
pub const RECORD_COUNT_OFFSET: u64 = 16;

/// Smallest possible artifact: header + empty payload + footer.
pub const MIN_ARTIFACT_SIZE: u64 = (HEADER_SIZE + FOOTER_SIZE) as u64;

// ── Header ─────────────────────────────────────────────────────────

/// Artifact header, exactly 32 bytes on disk.
///
/// ```text
/// Offset  Size  Field
/// 0       4     magic: b"IDXP"
/// 4       2     format_version: u16 = 1
/// 6       1     compression tag: u8
/// 7       1     reserved: 0x00
/// 8       4     schema_version: u32
/// 12      4     reserved: 0x00
/// 16      8     record_count: u64
/// 24      8     created_at_ms: u64
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub format_version: u16,
    pub compression: Compression,
    pub schema_version: u32,
    pub record_count: u64,
    pub created_at_ms: u64,
}

impl ArtifactHeader {
    pub fn new(compression: Compression, meta: &SnapshotMeta) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            compression,
            schema_version: meta.schema_version,
            record_count: meta.record_count,
            created_at_ms: meta.created_at_ms,
        }
    }

    /// Parse and validate a header from the first `HEADER_SIZE` bytes.
    ///
    /// Magic and version mismatches are corrupt artifacts (no migration);
    /// an unknown compression tag is a configuration error since the
    /// artifact may come from a newer writer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(SnapshotError::corrupt(
                Phase::Read,
                bytes.len() as u64,
                "file too small for artifact header",
            ));
        }
        if bytes[0..4] != MAGIC {
            return Err(SnapshotError::corrupt(
                Phase::Read,
                0,
                format!("not an artifact: expected IDXP, got {:?}", &bytes[0..4]),
            ));
        }
        let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if format_version != FORMAT_VERSION {
            return Err(SnapshotError::corrupt(
                Phase::Read,
                4,
                format!(
                    "unsupported format version {} (reader supports {})",
                    format_version, FORMAT_VERSION
                ),
            ));
        }
        let tag = bytes[6];
        let compression = Compression::from_tag(tag).ok_or_else(|| {
            SnapshotError::Configuration(format!("unknown compression tag {} in artifact header", tag))
        })?;

        Ok(Self {
            format_version,
            compression,
            schema_version: u32::from_le_bytes(le_array(&bytes[8..12])),
            record_count: u64::from_le_bytes(le_array(&bytes[16..24])),
            created_at_ms: u64::from_le_bytes(le_array(&bytes[24..32])),
        })
    }

    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        out[6] = self.compression.tag();
        out[8..12].copy_from_slice(&self.schema_version.to_le_bytes());
        out[16..24].copy_from_slice(&self.record_count.to_le_bytes());
        out[24..32].copy_from_slice(&self.created_at_ms.to_le_bytes());
        out
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            schema_version: self.schema_version,
            record_count: self.record_count,
            created_at_ms: self.created_at_ms,
        }
    }
}

// ── Footer ─────────────────────────────────────────────────────────

/// Artifact footer: the last `FOOTER_SIZE` bytes of the file.
///
/// ```text
/// Offset  Size  Field
/// +0      8     payload_len: u64
/// +8      32    checksum: BLAKE3(header bytes ++ BLAKE3(compressed payload))
/// +40     4     footer_size: u32 = 48
/// +44     4     magic: u32 = 0x49445846 ("IDXF")
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactFooter {
    pub payload_len: u64,
    pub checksum: [u8; 32],
}

impl ArtifactFooter {
    /// Parse the footer. `file_offset` is where the footer starts in the
    /// file and is only used for error reporting.
    pub fn from_bytes(bytes: &[u8], file_offset: u64) -> Result<Self> {
        if bytes.len() < FOOTER_SIZE {
            return Err(SnapshotError::corrupt(
                Phase::Read,
                file_offset,
                "artifact footer truncated",
            ));
        }
        let footer_size = u32::from_le_bytes(le_array(&bytes[40..44]));
        let magic = u32::from_le_bytes(le_array(&bytes[44..48]));
        if magic != FOOTER_MAGIC {
            return Err(SnapshotError::corrupt(
                Phase::Read,
                file_offset + 44,
                "invalid footer magic (artifact truncated or not finished)",
            ));
        }
        if footer_size as usize != FOOTER_SIZE {
            return Err(SnapshotError::corrupt(
                Phase::Read,
                file_offset + 40,
                format!("unexpected footer size {}", footer_size),
            ));
        }

        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[8..40]);
        Ok(Self {
            payload_len: u64::from_le_bytes(le_array(&bytes[0..8])),
            checksum,
        })
    }

    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut out = [0u8; FOOTER_SIZE];
        out[0..8].copy_from_slice(&self.payload_len.to_le_bytes());
        out[8..40].copy_from_slice(&self.checksum);
        out[40..44].copy_from_slice(&(FOOTER_SIZE as u32).to_le_bytes());
        out[44..48].copy_from_slice(&FOOTER_MAGIC.to_le_bytes());
        out
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Check that the footer's payload length matches the file size.
    pub fn validate_layout(&self, file_len: u64) -> Result<()> {
        let expected = MIN_ARTIFACT_SIZE + self.payload_len;
        if expected != file_len {
            return Err(SnapshotError::corrupt(
                Phase::Read,
                file_len,
                format!(
                    "artifact is {} bytes but header+payload+footer is {}",
                    file_len, expected
                ),
            ));
        }
        Ok(())
    }
}

/// Footer checksum for an artifact whose final header is `header` and whose
/// compressed payload hashes to `payload_digest`.
///
/// The payload is hashed while it streams and the header is only final once
/// the record count is patched, so the two are combined at the end.
pub fn artifact_checksum(header: &[u8; HEADER_SIZE], payload_digest: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(header);
    hasher.update(payload_digest);
    *hasher.finalize().as_bytes()
}

// ── ArtifactInfo ───────────────────────────────────────────────────

/// Header and footer fields of an artifact, without decoding the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub format_version: u16,
    pub compression: Compression,
    pub meta: SnapshotMeta,
    pub payload_len: u64,
    pub file_len: u64,
    /// Hex-encoded footer checksum (header and payload).
    pub checksum: String,
}

impl ArtifactInfo {
    pub fn new(header: &ArtifactHeader, footer: &ArtifactFooter, file_len: u64) -> Self {
        Self {
            format_version: header.format_version,
            compression: header.compression,
            meta: header.meta(),
            payload_len: footer.payload_len,
            file_len,
            checksum: blake3::Hash::from(footer.checksum).to_hex().to_string(),
        }
    }
}

/// Copy a slice of known length into a fixed array. Callers slice exactly
/// N bytes out of a buffer whose length was already checked.
fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
