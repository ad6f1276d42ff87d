//! Streaming DEFLATE compressor and decompressor, each running a CRC-32 over
//! the uncompressed stream. STORED entries get the same interface as a
//! pass-through, so `OutputStream`/`InputStream` never have to special-case
//! the compression method beyond picking which `Deflater`/`Inflater` variant
//! to construct.
//!
//! Grounded in the teacher crate's `writer.rs` `CrcCountingWriter`, but
//! composed as a single writer/reader type rather than requiring the caller
//! to manually feed the hasher (see `StreamingZipWriter::write_data`, which
//! updated `entry.encoder.get_mut().crc` by hand).

use std::io::{self, Read, Write};

use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

/// Compression methods recognised by this crate. STORED and DEFLATED are
/// the only methods the core format supports (§1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
}

impl CompressionMethod {
    pub fn to_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(CompressionMethod::Stored),
            8 => Some(CompressionMethod::Deflated),
            _ => None,
        }
    }
}

/// Map a `compression_level` (-1 default, or 0..9) to a `flate2::Compression`.
pub fn flate2_level(level: i32) -> Compression {
    match level {
        ..=0 => Compression::default(),
        9 => Compression::best(),
        1 => Compression::fast(),
        lvl => Compression::new(lvl.clamp(0, 9) as u32),
    }
}

/// Bits 1-2 of `gp_flags`, set only for non-directory DEFLATED entries.
pub fn deflate_level_flag_bits(level: i32) -> u16 {
    match level {
        1 => 0b110, // super-fast, bits 1-2 = 11
        2 => 0b100, // fast, bits 1-2 = 10
        8 | 9 => 0b010, // maximum, bits 1-2 = 01
        _ => 0,
    }
}

struct CountingSink<W: Write> {
    inner: W,
    compressed_count: u64,
}

impl<W: Write> Write for CountingSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.compressed_count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum DeflaterBody<W: Write> {
    Stored(CountingSink<W>),
    Deflate(DeflateEncoder<CountingSink<W>>),
}

/// A single-entry compressor: caller writes uncompressed bytes in, the
/// chosen method's compressed bytes come out the other side, with a running
/// CRC-32 over the uncompressed stream.
pub struct Deflater<W: Write> {
    crc: Crc32,
    uncompressed_count: u64,
    inner: DeflaterBody<W>,
}

impl<W: Write> Deflater<W> {
    pub fn new(sink: W, method: CompressionMethod, level: i32) -> Self {
        let counting = CountingSink {
            inner: sink,
            compressed_count: 0,
        };
        let inner = match method {
            CompressionMethod::Stored => DeflaterBody::Stored(counting),
            CompressionMethod::Deflated => {
                DeflaterBody::Deflate(DeflateEncoder::new(counting, flate2_level(level)))
            }
        };
        Deflater {
            crc: Crc32::new(),
            uncompressed_count: 0,
            inner,
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.crc.update(buf);
        self.uncompressed_count += buf.len() as u64;
        match &mut self.inner {
            DeflaterBody::Stored(w) => w.write_all(buf),
            DeflaterBody::Deflate(w) => w.write_all(buf),
        }
    }

    /// Finish compression and hand back `(crc32, compressed_size,
    /// uncompressed_size, sink)` so the caller can keep using the
    /// underlying sink (e.g. to write a data descriptor).
    pub fn finish(self) -> io::Result<(u32, u64, u64, W)> {
        let crc = self.crc.finalize();
        let uncompressed_size = self.uncompressed_count;
        let counting = match self.inner {
            DeflaterBody::Stored(w) => w,
            DeflaterBody::Deflate(encoder) => encoder.finish()?,
        };
        Ok((crc, counting.compressed_count, uncompressed_size, counting.inner))
    }
}

enum InflaterBody<R: Read> {
    Stored(R),
    Deflate(DeflateDecoder<R>),
}

/// A single-entry decompressor bounded to an entry's compressed byte range,
/// running a CRC-32 over the uncompressed bytes it yields.
pub struct Inflater<R: Read> {
    crc: Crc32,
    uncompressed_count: u64,
    eof: bool,
    inner: InflaterBody<R>,
}

impl<R: Read> Inflater<R> {
    pub fn new(source: R, method: CompressionMethod) -> Self {
        let inner = match method {
            CompressionMethod::Stored => InflaterBody::Stored(source),
            CompressionMethod::Deflated => InflaterBody::Deflate(DeflateDecoder::new(source)),
        };
        Inflater {
            crc: Crc32::new(),
            uncompressed_count: 0,
            eof: false,
            inner,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn crc(&self) -> u32 {
        self.crc.clone().finalize()
    }

    pub fn uncompressed_read(&self) -> u64 {
        self.uncompressed_count
    }

    /// Unwrap back to the underlying source, discarding any buffered decoder
    /// state. Used by `InputStream` to reclaim ownership of the archive
    /// reader once an entry has been fully consumed.
    pub fn into_inner(self) -> R {
        match self.inner {
            InflaterBody::Stored(r) => r,
            InflaterBody::Deflate(d) => d.into_inner(),
        }
    }
}

impl<R: Read> Read for Inflater<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.inner {
            InflaterBody::Stored(r) => r.read(buf)?,
            InflaterBody::Deflate(r) => r.read(buf)?,
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.crc.update(&buf[..n]);
            self.uncompressed_count += n as u64;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stored_round_trip_preserves_bytes_and_crc() {
        let data = b"hello world in stored text";
        let mut sink = Vec::new();
        {
            let mut deflater = Deflater::new(&mut sink, CompressionMethod::Stored, -1);
            deflater.write_all(data).unwrap();
            let (crc, compressed_size, uncompressed_size, _) = deflater.finish().unwrap();
            assert_eq!(compressed_size, data.len() as u64);
            assert_eq!(uncompressed_size, data.len() as u64);
            assert_eq!(crc, crc32fast::hash(data));
        }
        assert_eq!(sink, data);

        let mut inflater = Inflater::new(Cursor::new(sink), CompressionMethod::Stored);
        let mut out = Vec::new();
        inflater.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(inflater.crc(), crc32fast::hash(data));
    }

    #[test]
    fn deflate_round_trip_preserves_bytes_and_crc() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let mut sink = Vec::new();
        {
            let mut deflater = Deflater::new(&mut sink, CompressionMethod::Deflated, -1);
            deflater.write_all(&data).unwrap();
            let (crc, compressed_size, uncompressed_size, _) = deflater.finish().unwrap();
            assert!(compressed_size < uncompressed_size);
            assert_eq!(uncompressed_size, data.len() as u64);
            assert_eq!(crc, crc32fast::hash(&data));
        }

        let mut inflater = Inflater::new(Cursor::new(sink), CompressionMethod::Deflated);
        let mut out = Vec::new();
        inflater.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(inflater.crc(), crc32fast::hash(&data));
    }

    #[test]
    fn level_to_flag_bits_mapping() {
        assert_eq!(deflate_level_flag_bits(1), 0b110);
        assert_eq!(deflate_level_flag_bits(2), 0b100);
        assert_eq!(deflate_level_flag_bits(8), 0b010);
        assert_eq!(deflate_level_flag_bits(9), 0b010);
        assert_eq!(deflate_level_flag_bits(-1), 0);
        assert_eq!(deflate_level_flag_bits(0), 0);
        assert_eq!(deflate_level_flag_bits(6), 0);
    }
}
