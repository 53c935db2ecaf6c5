//! Compression multiplexer.
//!
//! One closed enum of codecs, one dispatch arm per codec in each direction.
//! The codec tag is stored in the artifact header, so adding a codec means
//! adding a variant with a new tag value and an arm in `wrap`/`unwrap`;
//! existing tags never change.
//!
//! | tag | codec  | crate    | notes                                  |
//! |-----|--------|----------|----------------------------------------|
//! | 0   | none   | -        | identity, largest artifact             |
//! | 1   | gzip   | flate2   | streaming both ways                    |
//! | 2   | brotli | brotli   | best ratio, slow to compress           |
//! | 3   | zstd   | zstd     | streaming frame with content checksum  |

use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::str::FromStr;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::GzBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapshotError};

/// Internal buffer size for the brotli encoder/decoder.
const BROTLI_BUFFER_SIZE: usize = 64 * 1024;

/// Brotli window size (log2). 22 is the format's default window.
const BROTLI_LGWIN: u32 = 22;

// ── Compression ────────────────────────────────────────────────────

/// Codec applied uniformly to an artifact's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    None = 0,
    #[default]
    Gzip = 1,
    Brotli = 2,
    Zstd = 3,
}

impl Compression {
    pub const ALL: [Compression; 4] = [
        Compression::None,
        Compression::Gzip,
        Compression::Brotli,
        Compression::Zstd,
    ];

    /// Header tag value.
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Gzip),
            2 => Some(Self::Brotli),
            3 => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Brotli => "brotli",
            Compression::Zstd => "zstd",
        }
    }

    /// Level used when the config does not set one.
    pub fn default_level(self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 6,
            Compression::Brotli => 11,
            Compression::Zstd => 3,
        }
    }

    /// Inclusive range of accepted levels.
    pub fn level_range(self) -> (u32, u32) {
        match self {
            Compression::None => (0, 0),
            Compression::Gzip => (0, 9),
            Compression::Brotli => (0, 11),
            Compression::Zstd => (1, 22),
        }
    }

    pub fn validate_level(self, level: u32) -> Result<()> {
        let (lo, hi) = self.level_range();
        if level < lo || level > hi {
            return Err(SnapshotError::Configuration(format!(
                "{} level {} out of range {}..={}",
                self, level, lo, hi
            )));
        }
        Ok(())
    }

    /// Wrap a raw byte sink in this codec's encoder.
    pub fn wrap<W: Write>(self, writer: W, level: u32) -> Result<CompressWriter<W>> {
        self.validate_level(level)?;
        let wrapped = match self {
            Compression::None => CompressWriter::None(writer),
            Compression::Gzip => CompressWriter::Gzip(
                GzBuilder::new()
                    .mtime(0)
                    .write(writer, flate2::Compression::new(level)),
            ),
            Compression::Brotli => CompressWriter::Brotli(Box::new(brotli::CompressorWriter::new(
                writer,
                BROTLI_BUFFER_SIZE,
                level,
                BROTLI_LGWIN,
            ))),
            Compression::Zstd => {
                let mut encoder = zstd::stream::write::Encoder::new(writer, level as i32)
                    .map_err(|e| SnapshotError::Configuration(format!("zstd encoder: {}", e)))?;
                encoder
                    .include_checksum(true)
                    .map_err(|e| SnapshotError::Configuration(format!("zstd encoder: {}", e)))?;
                CompressWriter::Zstd(encoder)
            }
        };
        Ok(wrapped)
    }

    /// Wrap a compressed byte source in this codec's decoder.
    pub fn unwrap<R: Read>(self, reader: R) -> io::Result<DecompressReader<R>> {
        let unwrapped = match self {
            Compression::None => DecompressReader::None(reader),
            Compression::Gzip => DecompressReader::Gzip(GzDecoder::new(reader)),
            Compression::Brotli => {
                DecompressReader::Brotli(Box::new(brotli::Decompressor::new(reader, BROTLI_BUFFER_SIZE)))
            }
            Compression::Zstd => DecompressReader::Zstd(zstd::stream::read::Decoder::new(reader)?),
        };
        Ok(unwrapped)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "brotli" | "br" => Ok(Self::Brotli),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(SnapshotError::Configuration(format!(
                "unknown compression codec: {:?}",
                other
            ))),
        }
    }
}

// ── CompressWriter ─────────────────────────────────────────────────

/// Encoder side of the multiplexer.
pub enum CompressWriter<W: Write> {
    None(W),
    Gzip(GzEncoder<W>),
    Brotli(Box<brotli::CompressorWriter<W>>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> CompressWriter<W> {
    pub fn compression(&self) -> Compression {
        match self {
            CompressWriter::None(_) => Compression::None,
            CompressWriter::Gzip(_) => Compression::Gzip,
            CompressWriter::Brotli(_) => Compression::Brotli,
            CompressWriter::Zstd(_) => Compression::Zstd,
        }
    }

    /// Terminate the compressed stream and hand back the sink.
    ///
    /// The brotli encoder finishes its stream inside `into_inner` and
    /// drops write errors there; callers detect them on the sink.
    pub fn finish(self) -> io::Result<W> {
        match self {
            CompressWriter::None(mut w) => {
                w.flush()?;
                Ok(w)
            }
            CompressWriter::Gzip(enc) => enc.finish(),
            CompressWriter::Brotli(enc) => Ok((*enc).into_inner()),
            CompressWriter::Zstd(enc) => enc.finish(),
        }
    }
}

impl<W: Write> Write for CompressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressWriter::None(w) => w.write(buf),
            CompressWriter::Gzip(w) => w.write(buf),
            CompressWriter::Brotli(w) => w.write(buf),
            CompressWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressWriter::None(w) => w.flush(),
            CompressWriter::Gzip(w) => w.flush(),
            CompressWriter::Brotli(w) => w.flush(),
            CompressWriter::Zstd(w) => w.flush(),
        }
    }
}

// ── DecompressReader ───────────────────────────────────────────────

/// Decoder side of the multiplexer.
pub enum DecompressReader<R: Read> {
    None(R),
    Gzip(GzDecoder<R>),
    Brotli(Box<brotli::Decompressor<R>>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Read for DecompressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DecompressReader::None(r) => r.read(buf),
            DecompressReader::Gzip(r) => r.read(buf),
            DecompressReader::Brotli(r) => r.read(buf),
            DecompressReader::Zstd(r) => r.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<u8> {
        let mut text = String::new();
        for i in 0..2_000 {
            text.push_str(&format!(
                "segment {} of the episode talks about rust, storage engines and podcasts. ",
                i
            ));
        }
        text.into_bytes()
    }

    fn compress(codec: Compression, data: &[u8]) -> Vec<u8> {
        let mut w = codec.wrap(Vec::new(), codec.default_level()).unwrap();
        w.write_all(data).unwrap();
        w.finish().unwrap()
    }

    fn decompress(codec: Compression, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        codec.unwrap(data)?.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_tag_roundtrip() {
        for codec in Compression::ALL {
            assert_eq!(Compression::from_tag(codec.tag()), Some(codec));
            assert_eq!(codec.name().parse::<Compression>().unwrap(), codec);
        }
        assert_eq!(Compression::from_tag(4), None);
        assert!("lz4".parse::<Compression>().is_err());
    }

    #[test]
    fn test_every_codec_restores_input() {
        let data = corpus();
        for codec in Compression::ALL {
            let packed = compress(codec, &data);
            assert_eq!(decompress(codec, &packed).unwrap(), data, "codec {codec}");
        }
    }

    #[test]
    fn test_none_is_identity() {
        let data = b"plain bytes".to_vec();
        assert_eq!(compress(Compression::None, &data), data);
    }

    #[test]
    fn test_output_is_deterministic() {
        let data = corpus();
        for codec in Compression::ALL {
            assert_eq!(compress(codec, &data), compress(codec, &data), "codec {codec}");
        }
    }

    #[test]
    fn test_real_codecs_shrink_text() {
        let data = corpus();
        for codec in [Compression::Gzip, Compression::Brotli, Compression::Zstd] {
            let packed = compress(codec, &data);
            assert!(packed.len() < data.len() / 4, "{codec}: {} bytes", packed.len());
        }
    }

    #[test]
    fn test_level_validation() {
        assert!(Compression::Gzip.validate_level(9).is_ok());
        assert!(Compression::Gzip.validate_level(10).is_err());
        assert!(Compression::Zstd.validate_level(0).is_err());
        assert!(Compression::Brotli.wrap(Vec::new(), 12).is_err());
    }

    #[test]
    fn test_garbage_fails_to_decompress() {
        let garbage = vec![0x5a; 256];
        for codec in [Compression::Gzip, Compression::Zstd] {
            assert!(decompress(codec, &garbage).is_err(), "codec {codec}");
        }
    }
}
