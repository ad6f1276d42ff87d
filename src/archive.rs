//! The user-facing façade: binds an `EntrySet` and `CentralDirectory` to a
//! file path (or an in-memory buffer), with a mutation-then-commit workflow.
//!
//! There is no single teacher file this is grounded on directly — the
//! teacher crate's `StreamingZipWriter`/`StreamingZipReader` each only cover
//! half of this lifecycle, write-only or read-only. `Archive` is the piece
//! that ties both together the way a real container library must: entries
//! added via `add`/`remove`/`rename` live only in memory until `commit`
//! replays them through an `OutputStream`, mirroring the write-temp-then-
//! rename pattern used throughout the corpus for atomic file replacement.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::central_directory::CentralDirectory;
use crate::codec::CompressionMethod;
use crate::entry::{Entry, Follower};
use crate::entry_set::EntrySet;
use crate::error::{Result, ZipError};
use crate::options::Options;
use crate::reader::InputStream;
use crate::writer::OutputStream;

/// Where an `Archive`'s bytes actually live.
#[derive(Debug)]
enum Backing {
    /// Backed by a path on disk; `None` until the first successful open or
    /// commit established that the file exists.
    Path(PathBuf),
    /// Backed by an in-memory buffer; never touches the filesystem.
    Memory,
}

/// A mutable view over a ZIP archive: enumerate, add, remove, rename, and
/// extract entries, then `commit` to serialise the result.
#[derive(Debug)]
pub struct Archive {
    backing: Backing,
    entries: EntrySet,
    stored_entries: EntrySet,
    comment: String,
    stored_comment: String,
    memory_buffer: Vec<u8>,
    created_fresh: bool,
    options: Options,
}

impl Archive {
    /// Open an existing archive at `path`, or start a fresh empty one if
    /// `create` is true and the path doesn't exist.
    pub fn open(path: impl AsRef<Path>, create: bool) -> Result<Self> {
        Self::open_with_options(path, create, Options::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, create: bool, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        match fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {
                let mut file = File::open(&path)?;
                let cd = CentralDirectory::read(&mut file)?;
                Ok(Archive {
                    backing: Backing::Path(path),
                    entries: cd.entries.dup(),
                    stored_entries: cd.entries,
                    stored_comment: cd.comment.clone(),
                    comment: cd.comment,
                    memory_buffer: Vec::new(),
                    created_fresh: false,
                    options,
                })
            }
            Ok(_) => Err(ZipError::Argument(format!(
                "{:?} exists but is empty; pass create=true to start a fresh archive at this path",
                path
            ))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if create {
                    Ok(Archive {
                        backing: Backing::Path(path),
                        entries: EntrySet::new(),
                        stored_entries: EntrySet::new(),
                        comment: String::new(),
                        stored_comment: String::new(),
                        memory_buffer: Vec::new(),
                        created_fresh: true,
                        options,
                    })
                } else {
                    Err(ZipError::NotFound {
                        name: path.display().to_string(),
                    })
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Construct an in-memory archive. `contents` is parsed as an existing
    /// archive if non-empty, otherwise the archive starts empty.
    pub fn from_buffer(contents: Vec<u8>) -> Result<Self> {
        Self::from_buffer_with_options(contents, Options::default())
    }

    pub fn from_buffer_with_options(contents: Vec<u8>, options: Options) -> Result<Self> {
        if contents.is_empty() {
            return Ok(Archive {
                backing: Backing::Memory,
                entries: EntrySet::new(),
                stored_entries: EntrySet::new(),
                comment: String::new(),
                stored_comment: String::new(),
                memory_buffer: Vec::new(),
                created_fresh: true,
                options,
            });
        }

        let mut cursor = Cursor::new(contents.clone());
        let cd = CentralDirectory::read(&mut cursor)?;
        Ok(Archive {
            backing: Backing::Memory,
            entries: cd.entries.dup(),
            stored_entries: cd.entries,
            stored_comment: cd.comment.clone(),
            comment: cd.comment,
            memory_buffer: contents,
            created_fresh: false,
            options,
        })
    }

    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(path, true)
    }

    pub fn create_with_options(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        Self::open_with_options(path, true, options)
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    pub fn find_entry(&self, name: &str) -> Option<&Entry> {
        self.entries.find_entry(name)
    }

    /// Like `find_entry`, but fails with `NotFoundError` instead of `None`.
    pub fn get_entry(&self, name: &str) -> Result<&Entry> {
        self.find_entry(name).ok_or_else(|| ZipError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn glob(&self, pattern: &str) -> Result<Vec<&Entry>> {
        self.entries.glob(pattern)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Whether `commit` would actually rewrite the backing store.
    pub fn commit_required(&self) -> bool {
        self.created_fresh
            || self.comment != self.stored_comment
            || self.entries.iter().any(|e| e.dirty)
            || self.entries != self.stored_entries
    }

    /// Read an entry's full decompressed content into memory.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self.get_entry(name)?.clone();
        let mut out = Vec::new();
        match &entry.follower {
            Follower::Bytes(bytes) => out = bytes.clone(),
            Follower::Path(path) => {
                out = fs::read(path)?;
            }
            Follower::Empty => {}
            Follower::Archived => {
                let mut source = self.open_backing_for_read()?;
                let mut inflater = entry.open_reader(&mut source)?;
                inflater.read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }

    /// Extract an entry's content to a filesystem path, optionally
    /// restoring permissions and timestamps per `self.options`.
    pub fn extract(&mut self, name: &str, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        let entry = self.get_entry(name)?.clone();

        if entry.is_directory() {
            fs::create_dir_all(dest)?;
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = self.read(name)?;
        fs::write(dest, &contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if self.options.restore_permissions {
                if let Some(mode) = entry.unix_perms {
                    fs::set_permissions(dest, fs::Permissions::from_mode(mode))?;
                }
            }
        }

        if self.options.restore_times {
            let unix_seconds = entry.time.to_datetime().and_utc().timestamp();
            if unix_seconds >= 0 {
                let mtime = filetime::FileTime::from_unix_time(unix_seconds, 0);
                let _ = filetime::set_file_mtime(dest, mtime);
            }
        }

        Ok(())
    }

    /// Add an entry whose content is read from a filesystem path.
    /// `conflict` is consulted if `name` already exists: returning `true`
    /// replaces the existing entry, `false` fails with `EntryExistsError`.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        src_path: impl AsRef<Path>,
        conflict: impl FnOnce(&Entry) -> bool,
    ) -> Result<()> {
        let name = name.into();
        self.resolve_conflict(&name, conflict)?;

        let mut entry = Entry::new(name)?;
        entry.compression_method = CompressionMethod::Deflated;
        entry.compression_level = self.options.default_compression;
        entry.gather_fileinfo_from_srcpath(src_path)?;
        entry.sync_level_flag_bits();
        self.entries.add(entry)?;
        Ok(())
    }

    /// Add an entry with in-memory bytes, always STORED (no compression).
    pub fn add_stored(
        &mut self,
        name: impl Into<String>,
        content: Vec<u8>,
        conflict: impl FnOnce(&Entry) -> bool,
    ) -> Result<()> {
        let name = name.into();
        self.resolve_conflict(&name, conflict)?;

        let mut entry = Entry::new(name)?;
        entry.compression_method = CompressionMethod::Stored;
        entry.size = content.len() as u64;
        entry.crc = crc32fast::hash(&content);
        entry.dirty = true;
        entry.follower = Follower::Bytes(content);
        self.entries.add(entry)?;
        Ok(())
    }

    fn resolve_conflict(&mut self, name: &str, conflict: impl FnOnce(&Entry) -> bool) -> Result<()> {
        if let Some(existing) = self.entries.find_entry(name) {
            if conflict(existing) {
                self.entries.delete(name);
            } else {
                return Err(ZipError::EntryExists { name: name.to_string() });
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Entry> {
        self.entries
            .delete(name)
            .ok_or_else(|| ZipError::NotFound { name: name.to_string() })
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.entries.rename(from, to)
    }

    /// Replace an existing entry's content in place, marking it dirty.
    pub fn replace(&mut self, name: &str, content: Vec<u8>) -> Result<()> {
        let entry = self
            .entries
            .find_entry_mut(name)
            .ok_or_else(|| ZipError::NotFound { name: name.to_string() })?;
        entry.size = content.len() as u64;
        entry.crc = crc32fast::hash(&content);
        entry.dirty = true;
        entry.follower = Follower::Bytes(content);
        Ok(())
    }

    /// Add a directory marker entry.
    pub fn mkdir(&mut self, name: impl Into<String>) -> Result<()> {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        let mut entry = Entry::new(name)?;
        entry.normalize_directory();
        entry.dirty = true;
        self.entries.add(entry)?;
        Ok(())
    }

    fn open_backing_for_read(&self) -> Result<Box<dyn ReadSeek>> {
        match &self.backing {
            Backing::Path(path) => Ok(Box::new(File::open(path)?)),
            Backing::Memory => Ok(Box::new(Cursor::new(self.memory_buffer.clone()))),
        }
    }

    /// A forward-only `InputStream` over this archive's raw bytes,
    /// independent of the parsed `EntrySet` (useful for scenario-style tests
    /// and tools that want to scan LFHs directly).
    pub fn get_input_stream(&self) -> Result<InputStream<Box<dyn ReadSeek>>> {
        Ok(InputStream::new(self.open_backing_for_read()?))
    }

    /// A single-pass `OutputStream` over this archive's backing, independent
    /// of the staged `EntrySet` the same way `get_input_stream` is
    /// independent of the parsed one — for tools that want to write LFHs
    /// directly rather than going through `add`/`commit`. For a path-backed
    /// archive this truncates and reopens the underlying file; for an
    /// in-memory archive it starts from a fresh empty buffer. Writes made
    /// through the returned stream bypass `commit`: callers that use this
    /// should not also stage changes via `add`/`remove`/`rename` on the same
    /// archive before calling `commit`, since `commit` would overwrite
    /// whatever was written here.
    pub fn get_output_stream(&mut self) -> Result<OutputStream<OutputSink>> {
        let sink = match &self.backing {
            Backing::Path(path) => OutputSink::Path(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?,
            ),
            Backing::Memory => OutputSink::Memory(Cursor::new(Vec::new())),
        };
        Ok(OutputStream::new(sink))
    }

    /// Whether `commit` needs to do anything, and if so, perform it:
    /// replay every entry through a fresh `OutputStream`, then atomically
    /// replace the backing file (or in-memory buffer).
    pub fn commit(&mut self) -> Result<()> {
        if !self.commit_required() {
            return Ok(());
        }

        match &self.backing {
            Backing::Memory => {
                let mut source = Cursor::new(self.memory_buffer.clone());
                let mut out = OutputStream::new(Cursor::new(Vec::new()));
                out.set_write_zip64_support(self.options.write_zip64_support);
                out.set_comment(self.comment.clone());
                write_all_entries(&mut out, &mut source, &self.entries)?;
                let written = out.close()?;
                self.memory_buffer = written.into_inner();
                self.refresh_after_commit()?;
                Ok(())
            }
            Backing::Path(path) => {
                let tmp_path = sibling_temp_path(path);
                let result = (|| -> Result<()> {
                    let mut source_file: Option<File> = File::open(path).ok();
                    let tmp_file = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(&tmp_path)?;
                    let mut out = OutputStream::new(tmp_file);
                    out.set_write_zip64_support(self.options.write_zip64_support);
                    out.set_comment(self.comment.clone());
                    match source_file.as_mut() {
                        Some(f) => write_all_entries(&mut out, f, &self.entries)?,
                        None => write_all_entries(&mut out, &mut Cursor::new(Vec::new()), &self.entries)?,
                    }
                    out.close()?;
                    Ok(())
                })();

                match result {
                    Ok(()) => {
                        fs::rename(&tmp_path, path)?;
                        self.refresh_after_commit()?;
                        Ok(())
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&tmp_path);
                        Err(e)
                    }
                }
            }
        }
    }

    /// Re-read the just-written archive so in-memory offsets match the new
    /// on-disk (or in-buffer) layout.
    fn refresh_after_commit(&mut self) -> Result<()> {
        let cd = match &self.backing {
            Backing::Path(path) => {
                let mut f = File::open(path)?;
                CentralDirectory::read(&mut f)?
            }
            Backing::Memory => {
                let mut cursor = Cursor::new(self.memory_buffer.clone());
                CentralDirectory::read(&mut cursor)?
            }
        };
        self.stored_entries = cd.entries.dup();
        self.entries = cd.entries;
        self.stored_comment = cd.comment.clone();
        self.comment = cd.comment;
        self.created_fresh = false;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.commit()
    }
}

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// The sink handed out by `Archive::get_output_stream`: a file for a
/// path-backed archive, an in-memory buffer otherwise. Unlike `Box<dyn
/// WriteSeek>` this stays readable too, so a caller (or a test) can rewind
/// and parse back what was just written without needing a second handle.
pub enum OutputSink {
    Path(File),
    Memory(Cursor<Vec<u8>>),
}

impl Read for OutputSink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            OutputSink::Path(f) => f.read(buf),
            OutputSink::Memory(c) => c.read(buf),
        }
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Path(f) => f.write(buf),
            OutputSink::Memory(c) => c.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::Path(f) => f.flush(),
            OutputSink::Memory(c) => c.flush(),
        }
    }
}

impl Seek for OutputSink {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        match self {
            OutputSink::Path(f) => f.seek(pos),
            OutputSink::Memory(c) => c.seek(pos),
        }
    }
}

/// Replay `entries` into `out`, splicing unchanged entries raw from `source`
/// and recompressing dirty ones from their follower.
fn write_all_entries<W: Write + Seek, R: Read + Seek>(
    out: &mut OutputStream<W>,
    source: &mut R,
    entries: &EntrySet,
) -> Result<()> {
    for entry in entries.iter() {
        match &entry.follower {
            Follower::Archived if !entry.dirty => {
                out.copy_raw_entry(source, entry)?;
            }
            Follower::Archived => {
                // Renamed (or otherwise metadata-touched) but content
                // unchanged: still safe to splice raw bytes.
                out.copy_raw_entry(source, entry)?;
            }
            Follower::Empty => {
                let mut fresh = entry.clone();
                fresh.size = 0;
                out.put_next_entry(fresh)?;
            }
            Follower::Bytes(bytes) => {
                let mut fresh = entry.clone();
                fresh.size = bytes.len() as u64;
                out.put_next_entry(fresh)?;
                out.write(bytes)?;
            }
            Follower::Path(path) => {
                let mut fresh = entry.clone();
                let mut file = File::open(path)?;
                out.put_next_entry(fresh.clone())?;
                let mut buf = [0u8; 64 * 1024];
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    out.write(&buf[..n])?;
                }
                let _ = &mut fresh;
            }
        }
    }
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}
