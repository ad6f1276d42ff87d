//! Error types for zipcraft

use std::io;

/// Result type for zipcraft operations
pub type Result<T> = std::result::Result<T, ZipError>;

/// Error kinds produced by the archive model, codecs, and streams.
#[derive(Debug, thiserror::Error)]
pub enum ZipError {
    /// Underlying sink/source failure, or a write/read after close.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An entry name violates the naming constraints (e.g. a leading `/`).
    #[error("invalid entry name {name:?}: {reason}")]
    EntryName {
        /// The offending name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// Adding or renaming into an occupied slot, and the conflict predicate declined.
    #[error("entry already exists: {name:?}")]
    EntryExists {
        /// The name that already exists.
        name: String,
    },

    /// A bad signature, size mismatch, truncated record, or bogus extra field on read.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// CRC mismatch at end of entry, or a size mismatch between declared and actual.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// A request to read an encrypted entry, or an entry using an unknown compression method.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Calling conventions violated, e.g. an output stream requested for a directory entry.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Entry lookup by name failed.
    #[error("entry not found: {name:?}")]
    NotFound {
        /// The name that was not found.
        name: String,
    },
}

impl ZipError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ZipError::MalformedArchive(msg.into())
    }

    pub(crate) fn entry_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ZipError::EntryName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
