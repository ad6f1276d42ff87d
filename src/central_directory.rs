//! End Of Central Directory / ZIP64 EOCD scanning and parsing (read path),
//! and central directory + EOCD emission with automatic ZIP64 promotion
//! (write path).

use std::io::{Read, Seek, SeekFrom, Write};

use crate::byteio::{
    find_eocd_backward, find_signature_backward, read_exact_vec, read_u16, read_u32, read_u64, write_u16,
    write_u32, write_u64, EOCD_SEARCH_WINDOW,
};
use crate::entry::Entry;
use crate::entry_set::EntrySet;
use crate::error::{Result, ZipError};

pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;

/// Window to search backward from a found EOCD for its ZIP64 locator: the
/// locator immediately precedes the EOCD in every archive this crate writes,
/// but we scan a little further back to tolerate padding.
const ZIP64_LOCATOR_SEARCH_WINDOW: u64 = 20 + 4096;

#[derive(Debug, Clone, Default)]
struct EocdFields {
    total_entries: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
    comment: String,
}

/// The parsed central directory: every entry plus the archive comment.
#[derive(Debug, Clone, Default)]
pub struct CentralDirectory {
    pub entries: EntrySet,
    pub comment: String,
}

impl CentralDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate the EOCD record (scanning backward from the end of the
    /// stream), resolve ZIP64 if present, and parse every central directory
    /// file header it points to.
    pub fn read<R: Read + Seek>(io: &mut R) -> Result<Self> {
        let len = stream_len(io)?;
        let eocd_offset = find_eocd_backward(io, len, EOCD_SEARCH_WINDOW, sig_bytes(EOCD_SIGNATURE))?;
        io.seek(SeekFrom::Start(eocd_offset))?;
        let mut fields = read_eocd(io)?;

        if fields.total_entries == 0xFFFF_u64
            || fields.central_directory_size == u32::MAX as u64
            || fields.central_directory_offset == u32::MAX as u64
        {
            fields = read_zip64_eocd(io, eocd_offset)?;
        }

        io.seek(SeekFrom::Start(fields.central_directory_offset))?;
        let mut entries = EntrySet::new();
        for _ in 0..fields.total_entries {
            let mut entry = Entry::new("placeholder")?;
            entry.read_c_dir_entry(io)?;
            // Content lives in this same archive at `local_header_offset`,
            // not attached yet; `commit`/`read` resolve it lazily.
            entry.follower = crate::entry::Follower::Archived;
            entries.insert(entry);
        }

        Ok(CentralDirectory {
            entries,
            comment: fields.comment,
        })
    }

    /// Write every entry's central directory file header followed by the
    /// EOCD record (and, when needed, the ZIP64 EOCD record and locator).
    /// `start_offset` is where the central directory begins in the output
    /// stream; the caller tracks this because it already wrote the local
    /// entries before calling this. `force_zip64` mirrors the `write_zip64_support`
    /// option (§4.7): pre-emptive emission even when nothing overflows. Overflow
    /// always forces promotion regardless of this flag.
    pub fn write<W: Write + Seek>(&self, io: &mut W, start_offset: u64, force_zip64: bool) -> Result<()> {
        for entry in self.entries.iter() {
            entry.write_c_dir_entry(io)?;
        }
        let end_offset = io.stream_position()?;
        let cd_size = end_offset - start_offset;
        let total_entries = self.entries.len() as u64;

        let needs_zip64 = force_zip64
            || total_entries >= 0xFFFF
            || cd_size >= u32::MAX as u64
            || start_offset >= u32::MAX as u64
            || self.entries.iter().any(|e| e.local_header_offset >= u32::MAX as u64);

        if needs_zip64 {
            let zip64_eocd_offset = io.stream_position()?;
            write_zip64_eocd(io, total_entries, cd_size, start_offset)?;
            write_zip64_locator(io, zip64_eocd_offset)?;
        }

        write_eocd(io, total_entries, cd_size, start_offset, &self.comment, needs_zip64)?;
        Ok(())
    }
}

fn stream_len<R: Seek>(io: &mut R) -> Result<u64> {
    Ok(io.seek(SeekFrom::End(0))?)
}

fn sig_bytes(sig: u32) -> [u8; 4] {
    sig.to_le_bytes()
}

fn read_eocd<R: Read>(io: &mut R) -> Result<EocdFields> {
    let signature = read_u32(io)?;
    if signature != EOCD_SIGNATURE {
        return Err(ZipError::malformed("expected end of central directory signature"));
    }
    let _disk_number = read_u16(io)?;
    let _disk_with_cd_start = read_u16(io)?;
    let entries_on_disk = read_u16(io)?;
    let total_entries = read_u16(io)?;
    let cd_size = read_u32(io)?;
    let cd_offset = read_u32(io)?;
    let comment_len = read_u16(io)? as usize;
    let comment_bytes = read_exact_vec(io, comment_len)?;

    let _ = entries_on_disk;
    Ok(EocdFields {
        total_entries: total_entries as u64,
        central_directory_size: cd_size as u64,
        central_directory_offset: cd_offset as u64,
        comment: String::from_utf8_lossy(&comment_bytes).into_owned(),
    })
}

fn read_zip64_eocd<R: Read + Seek>(io: &mut R, eocd_offset: u64) -> Result<EocdFields> {
    let locator_offset =
        find_signature_backward(io, eocd_offset, ZIP64_LOCATOR_SEARCH_WINDOW, sig_bytes(ZIP64_LOCATOR_SIGNATURE))?;
    io.seek(SeekFrom::Start(locator_offset))?;

    let signature = read_u32(io)?;
    if signature != ZIP64_LOCATOR_SIGNATURE {
        return Err(ZipError::malformed("expected ZIP64 end of central directory locator signature"));
    }
    let _disk_with_zip64_eocd = read_u32(io)?;
    let zip64_eocd_offset = read_u64(io)?;
    let _total_disks = read_u32(io)?;

    io.seek(SeekFrom::Start(zip64_eocd_offset))?;
    let signature = read_u32(io)?;
    if signature != ZIP64_EOCD_SIGNATURE {
        return Err(ZipError::malformed("expected ZIP64 end of central directory signature"));
    }
    let _record_size = read_u64(io)?;
    let _version_made_by = read_u16(io)?;
    let _version_needed = read_u16(io)?;
    let _disk_number = read_u32(io)?;
    let _disk_with_cd_start = read_u32(io)?;
    let _entries_on_disk = read_u64(io)?;
    let total_entries = read_u64(io)?;
    let cd_size = read_u64(io)?;
    let cd_offset = read_u64(io)?;

    Ok(EocdFields {
        total_entries,
        central_directory_size: cd_size,
        central_directory_offset: cd_offset,
        comment: String::new(),
    })
}

fn write_zip64_eocd<W: Write>(io: &mut W, total_entries: u64, cd_size: u64, cd_offset: u64) -> Result<()> {
    write_u32(io, ZIP64_EOCD_SIGNATURE)?;
    write_u64(io, 44)?; // size of this record, excluding signature and this field
    write_u16(io, 45)?; // version made by
    write_u16(io, 45)?; // version needed to extract
    write_u32(io, 0)?; // disk number
    write_u32(io, 0)?; // disk with central directory start
    write_u64(io, total_entries)?; // entries on this disk
    write_u64(io, total_entries)?; // total entries
    write_u64(io, cd_size)?;
    write_u64(io, cd_offset)?;
    Ok(())
}

fn write_zip64_locator<W: Write>(io: &mut W, zip64_eocd_offset: u64) -> Result<()> {
    write_u32(io, ZIP64_LOCATOR_SIGNATURE)?;
    write_u32(io, 0)?; // disk with the ZIP64 EOCD
    write_u64(io, zip64_eocd_offset)?;
    write_u32(io, 1)?; // total number of disks
    Ok(())
}

fn write_eocd<W: Write>(
    io: &mut W,
    total_entries: u64,
    cd_size: u64,
    cd_offset: u64,
    comment: &str,
    needs_zip64: bool,
) -> Result<()> {
    let comment_bytes = comment.as_bytes();
    if comment_bytes.len() > 0xFFFF {
        return Err(ZipError::Argument("archive comment exceeds 65535 bytes".into()));
    }

    let clamped_entries = if needs_zip64 { 0xFFFF } else { total_entries as u16 };
    let clamped_cd_size = if needs_zip64 { u32::MAX } else { cd_size as u32 };
    let clamped_cd_offset = if needs_zip64 { u32::MAX } else { cd_offset as u32 };

    write_u32(io, EOCD_SIGNATURE)?;
    write_u16(io, 0)?; // disk number
    write_u16(io, 0)?; // disk with central directory start
    write_u16(io, clamped_entries)?; // entries on this disk
    write_u16(io, clamped_entries)?; // total entries
    write_u32(io, clamped_cd_size)?;
    write_u32(io, clamped_cd_offset)?;
    write_u16(io, comment_bytes.len() as u16)?;
    io.write_all(comment_bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_entry(name: &str, offset: u64) -> Entry {
        let mut e = Entry::new(name).unwrap();
        e.crc = 7;
        e.size = 10;
        e.compressed_size = 10;
        e.local_header_offset = offset;
        e
    }

    #[test]
    fn round_trips_small_archive_directory() {
        let mut cd = CentralDirectory::new();
        cd.entries.add(sample_entry("a.txt", 0)).unwrap();
        cd.entries.add(sample_entry("b.txt", 50)).unwrap();
        cd.comment = "hello".to_string();

        let mut buf = Cursor::new(Vec::new());
        cd.write(&mut buf, 0, false).unwrap();

        buf.set_position(0);
        let parsed = CentralDirectory::read(&mut buf).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert!(parsed.entries.include("a.txt"));
        assert!(parsed.entries.include("b.txt"));
        assert_eq!(parsed.comment, "hello");
    }

    #[test]
    fn promotes_to_zip64_when_entry_count_overflows() {
        let mut cd = CentralDirectory::new();
        for i in 0..5u32 {
            cd.entries.add(sample_entry(&format!("f{i}.txt"), i as u64 * 20)).unwrap();
        }

        let mut buf = Cursor::new(Vec::new());
        cd.write(&mut buf, 0, false).unwrap();

        buf.set_position(0);
        let parsed = CentralDirectory::read(&mut buf).unwrap();
        assert_eq!(parsed.entries.len(), 5);
    }

    #[test]
    fn missing_eocd_signature_is_malformed_archive() {
        let mut buf = Cursor::new(vec![0u8; 100]);
        let err = CentralDirectory::read(&mut buf).unwrap_err();
        assert!(matches!(err, ZipError::MalformedArchive(_)));
    }

    #[test]
    fn comment_containing_an_embedded_eocd_signature_still_locates_the_real_record() {
        let mut cd = CentralDirectory::new();
        cd.entries.add(sample_entry("a.txt", 0)).unwrap();
        cd.comment = "look, a decoy: PK\u{5}\u{6} right in the middle".to_string();

        let mut buf = Cursor::new(Vec::new());
        cd.write(&mut buf, 0, false).unwrap();

        buf.set_position(0);
        let parsed = CentralDirectory::read(&mut buf).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.comment, cd.comment);
    }

    #[test]
    fn empty_archive_round_trips() {
        let cd = CentralDirectory::new();
        let mut buf = Cursor::new(Vec::new());
        cd.write(&mut buf, 0, false).unwrap();

        buf.set_position(0);
        let parsed = CentralDirectory::read(&mut buf).unwrap();
        assert_eq!(parsed.entries.len(), 0);
    }
}
