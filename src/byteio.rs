//! Little-endian primitive read/write over a seekable byte sink/source, plus
//! backward scanning for signatures.
//!
//! The on-disk ZIP format is entirely little-endian fixed-width integers
//! punctuated by variable-length name/extra/comment blobs. Every codec in
//! this crate bottoms out in the helpers here rather than hand-rolling byte
//! shuffling per call site, the way the teacher crate's `read_u16_le`-style
//! methods did per-struct.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{Result, ZipError};

/// Maximum size of the EOCD record's trailing comment field (a u16 length).
pub const MAX_COMMENT_LEN: u64 = 0xFFFF;

/// Fixed size of the EOCD record up to and including the comment length field.
pub const EOCD_FIXED_SIZE: u64 = 22;

/// Upper bound on how far back from the end of a stream the EOCD signature
/// can be: the fixed record plus the longest possible comment.
pub const EOCD_SEARCH_WINDOW: u64 = EOCD_FIXED_SIZE + MAX_COMMENT_LEN;

pub fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_exact_vec<R: Read>(r: &mut R, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Search backward from `search_end` (an absolute offset into `stream`) for
/// the last occurrence of `signature` within `window` bytes, and return its
/// absolute offset.
///
/// This is how the EOCD is located: it sits at the end of the archive, but a
/// variable-length (0..65535 byte) comment may follow it, so a forward scan
/// from a known offset isn't possible. The same routine finds the ZIP64 EOCD
/// locator, searching backward from the classic EOCD's offset instead of the
/// end of the file.
pub fn find_signature_backward<R: Read + Seek>(
    stream: &mut R,
    search_end: u64,
    window: u64,
    signature: [u8; 4],
) -> Result<u64> {
    let search_start = search_end.saturating_sub(window);
    stream.seek(SeekFrom::Start(search_start))?;

    let to_read = (search_end - search_start) as usize;
    let mut buffer = vec![0u8; to_read];
    stream.read_exact(&mut buffer)?;

    if buffer.len() >= 4 {
        for i in (0..=buffer.len() - 4).rev() {
            if buffer[i..i + 4] == signature {
                return Ok(search_start + i as u64);
            }
        }
    }

    Err(ZipError::malformed(format!(
        "signature {:02x}{:02x}{:02x}{:02x} not found within {} bytes of offset {}",
        signature[0], signature[1], signature[2], signature[3], window, search_end
    )))
}

/// Convenience wrapper: search for a signature within the last `window`
/// bytes of the entire stream.
pub fn find_signature_from_end<R: Read + Seek>(
    stream: &mut R,
    window: u64,
    signature: [u8; 4],
) -> Result<u64> {
    let len = stream.seek(SeekFrom::End(0))?;
    find_signature_backward(stream, len, window, signature)
}

/// Offset of the comment-length field within the fixed part of the EOCD
/// record, counted from the signature.
const EOCD_COMMENT_LEN_OFFSET: usize = 20;

/// Locate the real EOCD record, scanning backward like
/// `find_signature_backward` but rejecting any candidate whose declared
/// comment length doesn't land it exactly at the end of the stream.
///
/// The EOCD's trailing comment is attacker- or tool-controlled free text; it
/// can itself contain the 4 bytes `50 4b 05 06`. A plain backward signature
/// search would stop at that embedded match, which sits *after* the real
/// record, producing a bogus entry count and CD offset. Validating that
/// `candidate + EOCD_FIXED_SIZE + comment_len == len` rules that out: only
/// the genuine record's comment length is consistent with where the stream
/// actually ends.
pub fn find_eocd_backward<R: Read + Seek>(
    stream: &mut R,
    len: u64,
    window: u64,
    signature: [u8; 4],
) -> Result<u64> {
    let search_start = len.saturating_sub(window);
    stream.seek(SeekFrom::Start(search_start))?;

    let to_read = (len - search_start) as usize;
    let mut buffer = vec![0u8; to_read];
    stream.read_exact(&mut buffer)?;

    if buffer.len() >= 4 {
        for i in (0..=buffer.len() - 4).rev() {
            if buffer[i..i + 4] != signature {
                continue;
            }

            let comment_len_at = i + EOCD_COMMENT_LEN_OFFSET;
            let Some(comment_len_bytes) = buffer.get(comment_len_at..comment_len_at + 2) else {
                continue;
            };
            let comment_len = u16::from_le_bytes([comment_len_bytes[0], comment_len_bytes[1]]) as u64;

            let candidate = search_start + i as u64;
            if candidate + EOCD_FIXED_SIZE + comment_len == len {
                return Ok(candidate);
            }
        }
    }

    Err(ZipError::malformed(format!(
        "signature {:02x}{:02x}{:02x}{:02x} not found within {} bytes of offset {}",
        signature[0], signature[1], signature[2], signature[3], window, len
    )))
}
