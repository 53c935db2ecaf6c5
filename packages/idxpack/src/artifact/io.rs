//! Byte-stream instrumentation for the artifact pipeline.
//!
//! `PayloadWriter` and `PayloadReader` sit between the compression codec
//! and the file. They count and checksum the compressed payload, measure
//! time spent in file IO, and latch the first IO error so the pipeline can
//! tell a filesystem failure apart from a codec failure after the fact.
//! `TimedReader` measures time spent inside an arbitrary reader.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

// ── PayloadWriter ──────────────────────────────────────────────────

pub struct PayloadWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    bytes: u64,
    io_time: Duration,
    error: Option<io::Error>,
}

impl<W: Write> PayloadWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            bytes: 0,
            io_time: Duration::ZERO,
            error: None,
        }
    }

    /// Compressed bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    pub fn io_time(&self) -> Duration {
        self.io_time
    }

    /// First IO error seen by the underlying sink, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    pub fn digest(&self) -> [u8; 32] {
        *self.hasher.finalize().as_bytes()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn latch(&mut self, e: io::Error) -> io::Error {
        let copy = io::Error::new(e.kind(), e.to_string());
        if self.error.is_none() {
            self.error = Some(e);
        }
        copy
    }
}

impl<W: Write> Write for PayloadWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(e) = &self.error {
            // Sink already failed; refuse further writes.
            return Err(io::Error::new(e.kind(), e.to_string()));
        }
        let start = Instant::now();
        let result = self.inner.write(buf);
        self.io_time += start.elapsed();
        match result {
            Ok(n) => {
                self.hasher.update(&buf[..n]);
                self.bytes += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => Err(self.latch(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let start = Instant::now();
        let result = self.inner.flush();
        self.io_time += start.elapsed();
        result.map_err(|e| self.latch(e))
    }
}

// ── PayloadReader ──────────────────────────────────────────────────

/// Reads at most `limit` bytes of compressed payload.
pub struct PayloadReader<R> {
    inner: R,
    remaining: u64,
    hasher: blake3::Hasher,
    bytes: u64,
    io_time: Duration,
    error: Option<io::Error>,
}

impl<R: Read> PayloadReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
            hasher: blake3::Hasher::new(),
            bytes: 0,
            io_time: Duration::ZERO,
            error: None,
        }
    }

    /// Compressed bytes handed out so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn io_time(&self) -> Duration {
        self.io_time
    }

    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Read and hash whatever is left of the payload. Returns the number
    /// of bytes that were still unread.
    pub fn drain(&mut self) -> io::Result<u64> {
        io::copy(self, &mut io::sink())
    }

    pub fn digest(&self) -> [u8; 32] {
        *self.hasher.finalize().as_bytes()
    }
}

impl<R: Read> Read for PayloadReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let start = Instant::now();
        let result = self.inner.read(&mut buf[..max]);
        self.io_time += start.elapsed();
        match result {
            Ok(0) => {
                // The footer promised more payload than the source holds.
                let e = io::Error::new(io::ErrorKind::UnexpectedEof, "payload shorter than footer length");
                let copy = io::Error::new(e.kind(), e.to_string());
                self.error.get_or_insert(e);
                Err(copy)
            }
            Ok(n) => {
                self.hasher.update(&buf[..n]);
                self.bytes += n as u64;
                self.remaining -= n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                let copy = io::Error::new(e.kind(), e.to_string());
                self.error.get_or_insert(e);
                Err(copy)
            }
        }
    }
}

// ── TimedReader ────────────────────────────────────────────────────

/// Accumulates wall time spent inside `read` of the wrapped reader.
pub struct TimedReader<R> {
    inner: R,
    elapsed: Duration,
    bytes: u64,
}

impl<R: Read> TimedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            elapsed: Duration::ZERO,
            bytes: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Bytes produced by the wrapped reader.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for TimedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = Instant::now();
        let result = self.inner.read(buf);
        self.elapsed += start.elapsed();
        if let Ok(n) = result {
            self.bytes += n as u64;
        }
        result
    }
}
