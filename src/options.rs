//! Library-level tunables threaded through `Archive` construction.
//!
//! The teacher's source exposed these as mutable process-wide globals on a
//! setup object; per §9's Design Notes this crate models them as an explicit,
//! non-global record instead, with a library-default instance.

/// Options governing how an `Archive` reads, writes, and restores entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Compression level used for new entries that don't specify their own
    /// (`-1` is zlib's "default").
    pub default_compression: i32,
    /// Pre-emptively emit ZIP64 records even when nothing overflows 32 bits.
    /// Overflow always forces promotion regardless of this flag.
    pub write_zip64_support: bool,
    /// Prefer UTF-8 general-purpose bit 11 for names containing non-ASCII
    /// bytes, per the Open Question in §9.
    pub unicode_names: bool,
    /// Verify CRC-32 and declared sizes against the decompressed stream.
    pub validate_entry_sizes: bool,
    /// Restore `unix_uid`/`unix_gid` on extract.
    pub restore_ownership: bool,
    /// Restore `unix_perms` on extract.
    pub restore_permissions: bool,
    /// Restore `time` (and Extended Timestamp atime/ctime, if present) on extract.
    pub restore_times: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            default_compression: -1,
            write_zip64_support: false,
            unicode_names: true,
            validate_entry_sizes: true,
            restore_ownership: false,
            restore_permissions: true,
            restore_times: true,
        }
    }
}
