//! One archive entry: metadata, codec flags, LFH/CDFH encode/decode, and the
//! handle to wherever its content actually lives.

use std::cmp::Ordering;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::byteio::{read_exact_vec, read_u16, read_u32, write_u16, write_u32};
use crate::codec::{deflate_level_flag_bits, CompressionMethod, Inflater};
use crate::dos_time::DosTime;
use crate::error::{Result, ZipError};
use crate::extra_field::{ExtraField, ID_ZIP64};

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;

/// `gp_flags` bit 0: entry payload is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// `gp_flags` bits 1-2: DEFLATE level hint.
pub const FLAG_LEVEL_MASK: u16 = 0b110;
/// `gp_flags` bit 3: sizes/CRC are unknown at LFH time, a Data Descriptor follows.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

const VERSION_NEEDED_DEFAULT: u16 = 20; // 2.0
const VERSION_NEEDED_ZIP64: u16 = 45; // 4.5
const VERSION_MADE_BY_UNIX: u16 = (3 << 8) | VERSION_NEEDED_DEFAULT;
const VERSION_MADE_BY_DOS: u16 = VERSION_NEEDED_DEFAULT;

/// Where an entry's uncompressed bytes actually come from.
#[derive(Debug, Clone)]
pub enum Follower {
    /// No content has been attached yet.
    Empty,
    /// Content lives on the filesystem.
    Path(PathBuf),
    /// Content lives in memory.
    Bytes(Vec<u8>),
    /// Content is the compressed bytes already sitting in the source archive
    /// at `local_header_offset`; it will be spliced through unchanged rather
    /// than recompressed.
    Archived,
}

/// One archive member: a file or a directory marker.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub comment: String,
    pub extra: ExtraField,
    pub compression_method: CompressionMethod,
    pub compression_level: i32,
    pub gp_flags: u16,
    pub crc: u32,
    pub compressed_size: u64,
    pub size: u64,
    pub time: DosTime,
    pub unix_perms: Option<u32>,
    pub unix_uid: Option<u32>,
    pub unix_gid: Option<u32>,
    pub external_file_attributes: u32,
    pub version_needed_to_extract: u16,
    pub version_made_by: u16,
    pub local_header_offset: u64,
    pub dirty: bool,
    pub follower: Follower,
}

impl Entry {
    /// Construct a fresh entry. Fails if `name` starts with `/`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.starts_with('/') {
            return Err(ZipError::entry_name(name, "must not start with '/'"));
        }

        let is_dir = name.ends_with('/');
        Ok(Entry {
            name,
            comment: String::new(),
            extra: ExtraField::new(),
            compression_method: CompressionMethod::Stored,
            compression_level: -1,
            gp_flags: 0,
            crc: 0,
            compressed_size: 0,
            size: 0,
            time: DosTime::epoch(),
            unix_perms: None,
            unix_uid: None,
            unix_gid: None,
            external_file_attributes: if is_dir { 0o40755 << 16 } else { 0 },
            version_needed_to_extract: VERSION_NEEDED_DEFAULT,
            version_made_by: VERSION_MADE_BY_DOS,
            local_header_offset: 0,
            dirty: false,
            follower: Follower::Empty,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    /// The greatest prefix of `name` ending in `/`, not counting a trailing
    /// `/` that belongs to this entry itself. `None` for top-level entries.
    pub fn parent_as_string(&self) -> Option<String> {
        let trimmed = self.name.strip_suffix('/').unwrap_or(&self.name);
        trimmed.rfind('/').map(|idx| trimmed[..=idx].to_string())
    }

    pub fn is_encrypted(&self) -> bool {
        self.gp_flags & FLAG_ENCRYPTED != 0
    }

    pub fn is_incomplete(&self) -> bool {
        self.gp_flags & FLAG_DATA_DESCRIPTOR != 0
    }

    pub fn set_incomplete(&mut self, incomplete: bool) {
        if incomplete {
            self.gp_flags |= FLAG_DATA_DESCRIPTOR;
        } else {
            self.gp_flags &= !FLAG_DATA_DESCRIPTOR;
        }
    }

    /// Whether any field overflows 32 bits and therefore needs a ZIP64
    /// extra field and 0xFFFFFFFF sentinels in the fixed-width headers.
    pub fn needs_zip64(&self) -> bool {
        self.size >= u32::MAX as u64
            || self.compressed_size >= u32::MAX as u64
            || self.local_header_offset >= u32::MAX as u64
    }

    /// Recompute `gp_flags` bits 1-2 from `compression_level`, per the
    /// level-to-flag-bits table. Directories and STORED entries always clear
    /// the compression bits.
    pub fn sync_level_flag_bits(&mut self) {
        self.gp_flags &= !FLAG_LEVEL_MASK;
        if self.compression_method == CompressionMethod::Deflated && !self.is_directory() {
            self.gp_flags |= deflate_level_flag_bits(self.compression_level);
        }
    }

    /// Enforce the directory invariants: STORED, zero sizes/CRC, cleared
    /// compression bits.
    pub fn normalize_directory(&mut self) {
        if self.is_directory() {
            self.compression_method = CompressionMethod::Stored;
            self.compressed_size = 0;
            self.size = 0;
            self.crc = 0;
            self.gp_flags &= !FLAG_LEVEL_MASK;
        }
    }

    /// Stat a filesystem path and populate size/time/permissions from it.
    /// Marks the entry dirty: its content must be (re-)encoded on commit.
    pub fn gather_fileinfo_from_srcpath(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)?;
        self.size = metadata.len();
        self.dirty = true;
        self.follower = Follower::Path(path.to_path_buf());

        if let Ok(modified) = metadata.modified() {
            if let Ok(duration) = modified.duration_since(UNIX_EPOCH) {
                self.time = DosTime::at(duration.as_secs() as i64);
                let mut ts = self.extra.extended_timestamp().ok().flatten().unwrap_or_default();
                ts.mtime = Some(duration.as_secs() as i32);
                self.extra.set_extended_timestamp(&ts);
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let mode = metadata.mode();
            self.unix_perms = Some(mode & 0o7777);
            self.unix_uid = Some(metadata.uid());
            self.unix_gid = Some(metadata.gid());
            self.external_file_attributes = (mode as u32) << 16;
            self.version_made_by = VERSION_MADE_BY_UNIX;
            self.extra
                .set_unix_new(metadata.uid() as u16, metadata.gid() as u16);
        }

        Ok(())
    }

    /// Parse a Local File Header at the reader's current position.
    pub fn read_local_entry<R: Read + Seek>(&mut self, io: &mut R) -> Result<()> {
        let signature = read_u32(io)?;
        self.read_local_entry_after_signature(io, signature)
    }

    /// Parse a Local File Header whose signature word has already been read
    /// (and needed inspecting first, e.g. to distinguish it from a central
    /// directory signature in a forward scan).
    pub fn read_local_entry_after_signature<R: Read>(&mut self, io: &mut R, signature: u32) -> Result<()> {
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ZipError::malformed(format!(
                "expected local file header signature, found {signature:#010x}"
            )));
        }

        self.version_needed_to_extract = read_u16(io)?;
        self.gp_flags = read_u16(io)?;
        let method = read_u16(io)?;
        self.compression_method = CompressionMethod::from_u16(method)
            .ok_or_else(|| ZipError::Unsupported(format!("compression method {method}")))?;
        let mod_time = read_u16(io)?;
        let mod_date = read_u16(io)?;
        self.time = DosTime::from_packed(mod_date, mod_time);
        self.crc = read_u32(io)?;
        let compressed_size_32 = read_u32(io)?;
        let size_32 = read_u32(io)?;
        let name_len = read_u16(io)? as usize;
        let extra_len = read_u16(io)? as usize;

        let name_bytes = read_exact_vec(io, name_len)?;
        self.name = String::from_utf8_lossy(&name_bytes).into_owned();

        let extra_bytes = read_exact_vec(io, extra_len)?;
        self.extra = ExtraField::decode(&extra_bytes)?;

        self.compressed_size = compressed_size_32 as u64;
        self.size = size_32 as u64;
        self.apply_zip64_extra(compressed_size_32, size_32, None)?;

        Ok(())
    }

    /// Parse a Central Directory File Header at the reader's current position.
    pub fn read_c_dir_entry<R: Read + Seek>(&mut self, io: &mut R) -> Result<()> {
        let signature = read_u32(io)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(ZipError::malformed(format!(
                "expected central directory file header signature, found {signature:#010x}"
            )));
        }

        self.version_made_by = read_u16(io)?;
        self.version_needed_to_extract = read_u16(io)?;
        self.gp_flags = read_u16(io)?;
        let method = read_u16(io)?;
        self.compression_method = CompressionMethod::from_u16(method)
            .ok_or_else(|| ZipError::Unsupported(format!("compression method {method}")))?;
        let mod_time = read_u16(io)?;
        let mod_date = read_u16(io)?;
        self.time = DosTime::from_packed(mod_date, mod_time);
        self.crc = read_u32(io)?;
        let compressed_size_32 = read_u32(io)?;
        let size_32 = read_u32(io)?;
        let name_len = read_u16(io)? as usize;
        let extra_len = read_u16(io)? as usize;
        let comment_len = read_u16(io)? as usize;
        let _disk_number_start = read_u16(io)?;
        let _internal_file_attributes = read_u16(io)?;
        self.external_file_attributes = read_u32(io)?;
        let offset_32 = read_u32(io)?;

        let name_bytes = read_exact_vec(io, name_len)?;
        self.name = String::from_utf8_lossy(&name_bytes).into_owned();

        let extra_bytes = read_exact_vec(io, extra_len)?;
        self.extra = ExtraField::decode(&extra_bytes)?;

        let comment_bytes = read_exact_vec(io, comment_len)?;
        self.comment = String::from_utf8_lossy(&comment_bytes).into_owned();

        self.compressed_size = compressed_size_32 as u64;
        self.size = size_32 as u64;
        self.local_header_offset = offset_32 as u64;
        self.apply_zip64_extra(compressed_size_32, size_32, Some(offset_32))?;

        if let Some((uid, gid)) = self.extra.unix_new()? {
            self.unix_uid = Some(uid as u32);
            self.unix_gid = Some(gid as u32);
        }
        if self.version_made_by >> 8 == 3 {
            self.unix_perms = Some((self.external_file_attributes >> 16) & 0o7777);
        }

        Ok(())
    }

    fn apply_zip64_extra(&mut self, compressed_32: u32, size_32: u32, offset_32: Option<u32>) -> Result<()> {
        let want_size = size_32 == u32::MAX;
        let want_compressed = compressed_32 == u32::MAX;
        let want_offset = offset_32 == Some(u32::MAX);

        if want_size || want_compressed || want_offset {
            if let Some(z64) = self.extra.zip64(want_size, want_compressed, want_offset, false)? {
                if let Some(v) = z64.uncompressed_size {
                    self.size = v;
                }
                if let Some(v) = z64.compressed_size {
                    self.compressed_size = v;
                }
                if let Some(v) = z64.local_header_offset {
                    self.local_header_offset = v;
                }
            }
        }
        Ok(())
    }

    /// Emit the Local File Header (and name/extra) at the writer's current
    /// position. Sizes and CRC are zeroed when bit 3 is set; the real values
    /// follow in a Data Descriptor instead.
    pub fn write_local_entry<W: Write>(&self, io: &mut W) -> Result<()> {
        let mut extra = self.extra.clone();
        let incomplete = self.is_incomplete();

        if self.needs_zip64() && !incomplete {
            extra.set_zip64(&crate::extra_field::Zip64Field {
                uncompressed_size: Some(self.size),
                compressed_size: Some(self.compressed_size),
                local_header_offset: None,
                disk_number: None,
            });
        } else {
            extra.remove(ID_ZIP64);
        }

        let version_needed = if self.needs_zip64() {
            VERSION_NEEDED_ZIP64
        } else {
            self.version_needed_to_extract.max(VERSION_NEEDED_DEFAULT)
        };

        let extra_bytes = extra.encode();
        let name_bytes = self.name.as_bytes();

        write_u32(io, LOCAL_FILE_HEADER_SIGNATURE)?;
        write_u16(io, version_needed)?;
        write_u16(io, self.gp_flags)?;
        write_u16(io, self.compression_method.to_u16())?;
        write_u16(io, self.time.time)?;
        write_u16(io, self.time.date)?;

        if incomplete {
            write_u32(io, 0)?;
            write_u32(io, 0)?;
            write_u32(io, 0)?;
        } else {
            write_u32(io, self.crc)?;
            write_u32(io, clamp_u32(self.compressed_size))?;
            write_u32(io, clamp_u32(self.size))?;
        }

        write_u16(io, name_bytes.len() as u16)?;
        write_u16(io, extra_bytes.len() as u16)?;
        io.write_all(name_bytes)?;
        io.write_all(&extra_bytes)?;
        Ok(())
    }

    /// Emit the Central Directory File Header. Auto-inserts a ZIP64 extra
    /// field whenever any field overflows 32 bits.
    pub fn write_c_dir_entry<W: Write>(&self, io: &mut W) -> Result<()> {
        let mut extra = self.extra.clone();
        let needs_zip64 = self.needs_zip64();

        if needs_zip64 {
            extra.set_zip64(&crate::extra_field::Zip64Field {
                uncompressed_size: (self.size >= u32::MAX as u64).then_some(self.size),
                compressed_size: (self.compressed_size >= u32::MAX as u64).then_some(self.compressed_size),
                local_header_offset: (self.local_header_offset >= u32::MAX as u64)
                    .then_some(self.local_header_offset),
                disk_number: None,
            });
        } else {
            extra.remove(ID_ZIP64);
        }

        let version_needed = if needs_zip64 {
            VERSION_NEEDED_ZIP64
        } else {
            self.version_needed_to_extract.max(VERSION_NEEDED_DEFAULT)
        };
        let version_made_by = if needs_zip64 {
            (self.version_made_by & 0xFF00) | VERSION_NEEDED_ZIP64
        } else {
            self.version_made_by
        };

        let extra_bytes = extra.encode();
        let name_bytes = self.name.as_bytes();
        let comment_bytes = self.comment.as_bytes();

        write_u32(io, CENTRAL_DIRECTORY_SIGNATURE)?;
        write_u16(io, version_made_by)?;
        write_u16(io, version_needed)?;
        write_u16(io, self.gp_flags)?;
        write_u16(io, self.compression_method.to_u16())?;
        write_u16(io, self.time.time)?;
        write_u16(io, self.time.date)?;
        write_u32(io, self.crc)?;
        write_u32(io, clamp_u32(self.compressed_size))?;
        write_u32(io, clamp_u32(self.size))?;
        write_u16(io, name_bytes.len() as u16)?;
        write_u16(io, extra_bytes.len() as u16)?;
        write_u16(io, comment_bytes.len() as u16)?;
        write_u16(io, 0)?; // disk number start
        write_u16(io, 0)?; // internal file attributes
        write_u32(io, self.external_file_attributes)?;
        write_u32(io, clamp_u32(self.local_header_offset))?;
        io.write_all(name_bytes)?;
        io.write_all(&extra_bytes)?;
        io.write_all(comment_bytes)?;
        Ok(())
    }

    /// Seek `archive_io` to this entry's LFH, skip past it, and return an
    /// `Inflater` bounded to `compressed_size` that decodes this entry's
    /// content.
    pub fn open_reader<'a, R: Read + Seek>(
        &self,
        archive_io: &'a mut R,
    ) -> Result<Inflater<io::Take<&'a mut R>>> {
        if self.is_encrypted() {
            return Err(ZipError::Unsupported(format!(
                "entry {:?} is encrypted; decryption is not implemented",
                self.name
            )));
        }

        archive_io.seek(SeekFrom::Start(self.local_header_offset))?;
        let mut probe = Entry::new("placeholder")?;
        probe.read_local_entry(archive_io)?;

        let bounded = archive_io.take(self.compressed_size);
        Ok(Inflater::new(bounded, self.compression_method))
    }
}

fn clamp_u32(v: u64) -> u32 {
    if v >= u32::MAX as u64 {
        u32::MAX
    } else {
        v as u32
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.extra == other.extra
            && self.compressed_size == other.compressed_size
            && self.crc == other.crc
            && self.compression_method == other.compression_method
            && self.size == other.size
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}
