//! Forward-only streaming ZIP reader: scans Local File Headers in order
//! rather than indexing through the central directory. This is the
//! counterpart to `OutputStream` used while an archive is still being
//! produced (or when the caller only has a non-seekable source), and the
//! basis `Archive::get_input_stream` hands out for a single entry.
//!
//! Grounded in the teacher crate's `StreamingZipReader`, generalised from a
//! central-directory-indexed random-access reader onto the LFH-scanning
//! shape the container format's streaming half actually calls for; header
//! parsing itself is delegated to `Entry::read_local_entry` rather than
//! hand-unpacking each field.

use std::io::{self, Cursor, Read};

use flate2::{Decompress, FlushDecompress, Status};

use crate::byteio::read_u32;
use crate::codec::Inflater;
use crate::entry::{Entry, CENTRAL_DIRECTORY_SIGNATURE};
use crate::error::{Result, ZipError};

enum StreamPos<R: Read> {
    /// Between entries, holding the reader ready to parse the next LFH (or
    /// hit the central directory and stop).
    Between(R),
    /// Inside an entry whose compressed size was known at LFH time: bounded
    /// by an `io::Take`, read lazily through `Inflater`.
    Bounded {
        entry: Box<Entry>,
        inflater: Inflater<io::Take<R>>,
    },
    /// Inside an entry whose size was unknown at LFH time: already fully
    /// inflated (see `inflate_until_stream_end`, which can't safely stream
    /// without risking reading past the compressed stream's end), served
    /// from a buffer.
    Buffered { data: Cursor<Vec<u8>>, source: R },
    /// Taken momentarily while transitioning between the above states.
    Empty,
}

/// A forward-only reader over a ZIP byte stream: `get_next_entry` advances
/// past whatever is currently open and parses the next LFH; `read` pulls
/// inflated bytes from the entry `get_next_entry` last returned.
pub struct InputStream<R: Read> {
    pos: StreamPos<R>,
    finished: bool,
}

impl<R: Read> InputStream<R> {
    pub fn new(source: R) -> Self {
        InputStream {
            pos: StreamPos::Between(source),
            finished: false,
        }
    }

    /// Advance past any currently-open entry's remaining bytes (and its
    /// Data Descriptor, if present), then parse the next Local File Header.
    /// Returns `None` once the central directory signature is reached.
    pub fn get_next_entry(&mut self) -> Result<Option<Entry>> {
        if self.finished {
            return Ok(None);
        }

        let mut source = match std::mem::replace(&mut self.pos, StreamPos::Empty) {
            StreamPos::Between(r) => r,
            StreamPos::Bounded { entry, inflater } => reclaim_bounded(inflater, &entry)?,
            StreamPos::Buffered { source, .. } => source,
            StreamPos::Empty => unreachable!("InputStream left in transitional state"),
        };

        let signature = match read_u32(&mut source) {
            Ok(sig) => sig,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.finished = true;
                self.pos = StreamPos::Between(source);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if signature == CENTRAL_DIRECTORY_SIGNATURE {
            self.finished = true;
            self.pos = StreamPos::Between(source);
            return Ok(None);
        }

        let mut entry = Entry::new("placeholder")?;
        entry.read_local_entry_after_signature(&mut source, signature)?;
        let result = entry.clone();

        if entry.is_incomplete() {
            let (data, computed_crc) = inflate_until_stream_end(&mut source, entry.compression_method)?;
            let descriptor = consume_data_descriptor(&mut source)?;
            if descriptor.crc != computed_crc {
                return Err(ZipError::Decompression(format!(
                    "CRC mismatch for entry {:?}: data descriptor says {:#010x}, computed {:#010x}",
                    entry.name, descriptor.crc, computed_crc
                )));
            }
            self.pos = StreamPos::Buffered {
                data: Cursor::new(data),
                source,
            };
        } else {
            let bounded = source.take(entry.compressed_size);
            let inflater = Inflater::new(bounded, entry.compression_method);
            self.pos = StreamPos::Bounded {
                entry: Box::new(entry),
                inflater,
            };
        }

        Ok(Some(result))
    }

    /// Read inflated bytes from the entry most recently returned by
    /// `get_next_entry`. Returns `0` once that entry is exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.pos {
            StreamPos::Bounded { inflater, .. } => Ok(inflater.read(buf)?),
            StreamPos::Buffered { data, .. } => Ok(data.read(buf)?),
            _ => Ok(0),
        }
    }
}

impl<R: Read> Read for InputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        InputStream::read(self, buf).map_err(|e| match e {
            ZipError::Io(io_err) => io_err,
            other => io::Error::other(other.to_string()),
        })
    }
}

/// Finish draining a bounded entry's Inflater and hand back the underlying
/// source. Bounded entries always have a known size recorded in the LFH, so
/// there's never a trailing Data Descriptor to consume here.
fn reclaim_bounded<R: Read>(mut inflater: Inflater<io::Take<R>>, entry: &Entry) -> Result<R> {
    if !inflater.is_eof() {
        io::copy(&mut inflater, &mut io::sink())?;
    }
    if entry.crc != 0 && inflater.crc() != entry.crc {
        return Err(ZipError::Decompression(format!(
            "CRC mismatch for entry {:?}: expected {:#010x}, got {:#010x}",
            entry.name,
            entry.crc,
            inflater.crc()
        )));
    }
    Ok(inflater.into_inner().into_inner())
}

struct DataDescriptor {
    crc: u32,
}

/// Consume a trailing Data Descriptor: an optional signature, a CRC, then
/// sizes sized according to whether the entry needed ZIP64. The writer path
/// only ever emits 32-bit Data Descriptors for non-ZIP64 entries (§4.7).
fn consume_data_descriptor<R: Read>(source: &mut R) -> Result<DataDescriptor> {
    let mut word = [0u8; 4];
    source.read_exact(&mut word)?;
    let first = u32::from_le_bytes(word);

    let crc = if first == 0x0807_4b50 {
        let mut buf = [0u8; 4];
        source.read_exact(&mut buf)?;
        u32::from_le_bytes(buf)
    } else {
        first
    };

    let mut sizes = [0u8; 8];
    source.read_exact(&mut sizes)?;
    Ok(DataDescriptor { crc })
}

/// Inflate an entry whose compressed length wasn't known up front, one
/// compressed byte at a time, stopping exactly at the DEFLATE end-of-stream
/// marker. Reading a whole buffer's worth at a time (as `flate2::read`'s
/// decoder does internally) risks consuming bytes belonging to the trailing
/// Data Descriptor or the next record, since there is no framing to tell
/// the decoder where to stop other than the bitstream itself.
fn inflate_until_stream_end<R: Read>(
    source: &mut R,
    method: crate::codec::CompressionMethod,
) -> Result<(Vec<u8>, u32)> {
    use crate::codec::CompressionMethod;

    if method != CompressionMethod::Deflated {
        return Err(ZipError::Unsupported(
            "an entry with an unknown compressed size must use DEFLATED".into(),
        ));
    }

    let mut decompress = Decompress::new(false);
    let mut out = Vec::new();
    let mut out_buf = vec![0u8; 64 * 1024];
    let mut in_byte = [0u8; 1];

    loop {
        source.read_exact(&mut in_byte)?;
        loop {
            let in_before = decompress.total_in();
            let out_before = decompress.total_out();
            let status = decompress
                .decompress(&in_byte, &mut out_buf, FlushDecompress::None)
                .map_err(|e| ZipError::Decompression(e.to_string()))?;
            let produced = (decompress.total_out() - out_before) as usize;
            out.extend_from_slice(&out_buf[..produced]);

            if status == Status::StreamEnd {
                let crc = crc32fast::hash(&out);
                return Ok((out, crc));
            }
            if decompress.total_in() > in_before {
                break;
            }
            if produced == 0 {
                return Err(ZipError::Decompression(
                    "stalled while inflating an entry with unknown compressed size".into(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CompressionMethod;
    use crate::writer::write_buffer;
    use std::io::Cursor;

    #[test]
    fn reads_entries_in_order_with_matching_content() {
        let buf = write_buffer(Cursor::new(Vec::new()), |zos| {
            let mut a = Entry::new("a.txt")?;
            a.size = 5;
            zos.put_next_entry(a)?;
            zos.write(b"hello")?;

            let mut b = Entry::new("b.txt")?;
            b.compression_method = CompressionMethod::Deflated;
            b.size = 11;
            zos.put_next_entry(b)?;
            zos.write(b"world again")?;
            Ok(())
        })
        .unwrap();

        let mut cursor = buf;
        cursor.set_position(0);
        let mut input = InputStream::new(cursor);

        let e1 = input.get_next_entry().unwrap().unwrap();
        assert_eq!(e1.name, "a.txt");
        let mut out1 = Vec::new();
        input.read_to_end(&mut out1).unwrap();
        assert_eq!(out1, b"hello");

        let e2 = input.get_next_entry().unwrap().unwrap();
        assert_eq!(e2.name, "b.txt");
        let mut out2 = Vec::new();
        input.read_to_end(&mut out2).unwrap();
        assert_eq!(out2, b"world again");

        assert!(input.get_next_entry().unwrap().is_none());
    }

    #[test]
    fn handles_data_descriptor_entries_with_unknown_size() {
        let buf = write_buffer(Cursor::new(Vec::new()), |zos| {
            let entry = Entry::new("stream.bin")?;
            zos.put_next_entry(entry)?;
            zos.write(&[7u8; 10_000])?;
            Ok(())
        })
        .unwrap();

        let mut cursor = buf;
        cursor.set_position(0);
        let mut input = InputStream::new(cursor);
        let entry = input.get_next_entry().unwrap().unwrap();
        assert!(entry.is_incomplete());

        let mut out = Vec::new();
        input.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 10_000);
        assert!(out.iter().all(|&b| b == 7));

        assert!(input.get_next_entry().unwrap().is_none());
    }

    #[test]
    fn entries_after_a_data_descriptor_entry_are_still_reachable() {
        let buf = write_buffer(Cursor::new(Vec::new()), |zos| {
            let streamed = Entry::new("stream.bin")?;
            zos.put_next_entry(streamed)?;
            zos.write(&[3u8; 500])?;

            let mut known = Entry::new("known.txt")?;
            known.size = 5;
            zos.put_next_entry(known)?;
            zos.write(b"tail!")?;
            Ok(())
        })
        .unwrap();

        let mut cursor = buf;
        cursor.set_position(0);
        let mut input = InputStream::new(cursor);

        let first = input.get_next_entry().unwrap().unwrap();
        assert_eq!(first.name, "stream.bin");
        let mut discard = Vec::new();
        input.read_to_end(&mut discard).unwrap();

        let second = input.get_next_entry().unwrap().unwrap();
        assert_eq!(second.name, "known.txt");
        let mut out = Vec::new();
        input.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"tail!");

        assert!(input.get_next_entry().unwrap().is_none());
    }
}
