//! # zipcraft: streaming ZIP archive container engine
//!
//! Read, write, and edit PKWARE-compatible ZIP archives with ZIP64 support.
//! Entries are processed as a stream: content is compressed or decompressed
//! on the fly rather than buffered whole in memory.

pub mod archive;
pub mod byteio;
pub mod central_directory;
pub mod codec;
pub mod dos_time;
pub mod entry;
pub mod entry_set;
pub mod error;
pub mod extra_field;
pub mod options;
pub mod reader;
pub mod writer;

pub use archive::Archive;
pub use central_directory::CentralDirectory;
pub use codec::CompressionMethod;
pub use dos_time::DosTime;
pub use entry::Entry;
pub use entry_set::EntrySet;
pub use error::{Result, ZipError};
pub use extra_field::ExtraField;
pub use options::Options;
pub use reader::InputStream;
pub use writer::{write_buffer, OutputStream};
