//! Ordered id→payload map for the ZIP "extra field" machinery, plus typed
//! accessors for the record kinds this crate understands: ZIP64, Extended
//! Timestamp, the two Info-ZIP Unix variants, and NTFS times.
//!
//! Encoding concatenates `(id: u16, length: u16, payload)` records in
//! insertion order. Decoding is length-driven and stops at the declared
//! extra-field length; any id this crate doesn't recognise is kept as an
//! opaque blob and written back out unchanged.

use indexmap::IndexMap;

use crate::byteio::{read_u16, read_u32, read_u64};
use crate::error::{Result, ZipError};

/// ZIP64 extended information (id 0x0001).
pub const ID_ZIP64: u16 = 0x0001;
/// Extended Timestamp (id 0x5455).
pub const ID_EXTENDED_TIMESTAMP: u16 = 0x5455;
/// Info-ZIP Unix, type 2 (id 0x7855): 16-bit UID/GID only.
pub const ID_UNIX_NEW: u16 = 0x7855;
/// NTFS times (id 0x000A).
pub const ID_NTFS: u16 = 0x000A;
/// Info-ZIP Unix, original (id 0x5855): atime/mtime/uid/gid.
pub const ID_UNIX_OLD: u16 = 0x5855;

/// An ordered mapping from a 16-bit extra-field header id to its raw payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraField {
    records: IndexMap<u16, Vec<u8>>,
}

impl ExtraField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.records.contains_key(&id)
    }

    pub fn get_raw(&self, id: u16) -> Option<&[u8]> {
        self.records.get(&id).map(|v| v.as_slice())
    }

    pub fn insert_raw(&mut self, id: u16, payload: Vec<u8>) {
        self.records.insert(id, payload);
    }

    pub fn remove(&mut self, id: u16) -> Option<Vec<u8>> {
        self.records.shift_remove(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.records.keys().copied()
    }

    /// Concatenate all records as `(id, length, payload)` triples.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.records.values().map(|v| 4 + v.len()).sum());
        for (&id, payload) in &self.records {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            out.extend_from_slice(payload);
        }
        out
    }

    /// Parse the concatenated extra-field block. Stops at the declared
    /// length; a record whose length field runs past the end of `bytes` is a
    /// malformed archive.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut field = ExtraField::new();
        let mut cursor = bytes;

        while !cursor.is_empty() {
            if cursor.len() < 4 {
                return Err(ZipError::malformed(
                    "truncated extra field header (need 4 bytes for id+length)",
                ));
            }
            let id = read_u16(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
            let len = read_u16(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))? as usize;
            if cursor.len() < len {
                return Err(ZipError::malformed(format!(
                    "extra field {:#06x} declares {} bytes but only {} remain",
                    id,
                    len,
                    cursor.len()
                )));
            }
            let payload = cursor[..len].to_vec();
            cursor = &cursor[len..];
            field.records.insert(id, payload);
        }

        Ok(field)
    }

    // --- ZIP64 (0x0001) -------------------------------------------------

    pub fn set_zip64(&mut self, field: &Zip64Field) {
        self.insert_raw(ID_ZIP64, field.encode());
    }

    /// Decode the ZIP64 record, given which 32-bit header slots were the
    /// 0xFFFFFFFF/0xFFFF sentinel (and therefore which fields are expected to
    /// be present, per the fixed-but-optional field order in the APPNOTE).
    pub fn zip64(
        &self,
        want_uncompressed: bool,
        want_compressed: bool,
        want_offset: bool,
        want_disk: bool,
    ) -> Result<Option<Zip64Field>> {
        match self.get_raw(ID_ZIP64) {
            Some(payload) => Ok(Some(Zip64Field::decode(
                payload,
                want_uncompressed,
                want_compressed,
                want_offset,
                want_disk,
            )?)),
            None => Ok(None),
        }
    }

    // --- Extended Timestamp (0x5455) ------------------------------------

    pub fn set_extended_timestamp(&mut self, field: &ExtendedTimestamp) {
        self.insert_raw(ID_EXTENDED_TIMESTAMP, field.encode());
    }

    pub fn extended_timestamp(&self) -> Result<Option<ExtendedTimestamp>> {
        match self.get_raw(ID_EXTENDED_TIMESTAMP) {
            Some(payload) => Ok(Some(ExtendedTimestamp::decode(payload)?)),
            None => Ok(None),
        }
    }

    // --- Info-ZIP Unix, type 2 (0x7855) ----------------------------------

    pub fn set_unix_new(&mut self, uid: u16, gid: u16) {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&uid.to_le_bytes());
        payload.extend_from_slice(&gid.to_le_bytes());
        self.insert_raw(ID_UNIX_NEW, payload);
    }

    pub fn unix_new(&self) -> Result<Option<(u16, u16)>> {
        match self.get_raw(ID_UNIX_NEW) {
            Some(payload) => {
                if payload.len() < 4 {
                    return Err(ZipError::malformed("Info-ZIP Unix (new) extra field too short"));
                }
                let mut cursor = payload;
                let uid = read_u16(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
                let gid = read_u16(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
                Ok(Some((uid, gid)))
            }
            None => Ok(None),
        }
    }

    // --- Info-ZIP Unix, original (0x5855) --------------------------------

    pub fn set_unix_old(&mut self, field: &OldUnixField) {
        self.insert_raw(ID_UNIX_OLD, field.encode());
    }

    pub fn unix_old(&self) -> Result<Option<OldUnixField>> {
        match self.get_raw(ID_UNIX_OLD) {
            Some(payload) => Ok(Some(OldUnixField::decode(payload)?)),
            None => Ok(None),
        }
    }

    // --- NTFS times (0x000A) ---------------------------------------------

    pub fn set_ntfs(&mut self, field: &NtfsField) {
        self.insert_raw(ID_NTFS, field.encode());
    }

    pub fn ntfs(&self) -> Result<Option<NtfsField>> {
        match self.get_raw(ID_NTFS) {
            Some(payload) => Ok(Some(NtfsField::decode(payload)?)),
            None => Ok(None),
        }
    }
}

/// ZIP64 extended information extra field (0x0001). Per the APPNOTE, the
/// field order is fixed but each field is present only when its 32-bit
/// header slot held the overflow sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Field {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_number: Option<u32>,
}

impl Zip64Field {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(v) = self.uncompressed_size {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.compressed_size {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.local_header_offset {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.disk_number {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn decode(
        payload: &[u8],
        want_uncompressed: bool,
        want_compressed: bool,
        want_offset: bool,
        want_disk: bool,
    ) -> Result<Self> {
        let mut cursor = payload;
        let mut take_u64 = |name: &'static str| -> Result<u64> {
            read_u64(&mut cursor)
                .map_err(|_| ZipError::malformed(format!("ZIP64 extra field missing {name}")))
        };

        let uncompressed_size = want_uncompressed.then(|| take_u64("uncompressed size")).transpose()?;
        let compressed_size = want_compressed.then(|| take_u64("compressed size")).transpose()?;
        let local_header_offset = want_offset.then(|| take_u64("local header offset")).transpose()?;
        let disk_number = if want_disk {
            Some(
                read_u32(&mut cursor)
                    .map_err(|_| ZipError::malformed("ZIP64 extra field missing disk number"))?,
            )
        } else {
            None
        };

        Ok(Zip64Field {
            uncompressed_size,
            compressed_size,
            local_header_offset,
            disk_number,
        })
    }
}

/// Extended Timestamp extra field (0x5455): a one-byte presence flag
/// followed by whichever of mtime/atime/ctime (32-bit Unix seconds) are
/// marked present, in that order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedTimestamp {
    pub mtime: Option<i32>,
    pub atime: Option<i32>,
    pub ctime: Option<i32>,
}

impl ExtendedTimestamp {
    const FLAG_MTIME: u8 = 0b001;
    const FLAG_ATIME: u8 = 0b010;
    const FLAG_CTIME: u8 = 0b100;

    fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.mtime.is_some() {
            flags |= Self::FLAG_MTIME;
        }
        if self.atime.is_some() {
            flags |= Self::FLAG_ATIME;
        }
        if self.ctime.is_some() {
            flags |= Self::FLAG_CTIME;
        }

        let mut out = vec![flags];
        for v in [self.mtime, self.atime, self.ctime].into_iter().flatten() {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(ZipError::malformed("extended timestamp field has no flag byte"));
        }
        let flags = payload[0];
        let mut rest = &payload[1..];
        let mut read_if = |bit: u8| -> Result<Option<i32>> {
            if flags & bit == 0 || rest.len() < 4 {
                return Ok(None);
            }
            let v = read_u32(&mut rest).map_err(|e| ZipError::malformed(e.to_string()))? as i32;
            Ok(Some(v))
        };

        Ok(ExtendedTimestamp {
            mtime: read_if(Self::FLAG_MTIME)?,
            atime: read_if(Self::FLAG_ATIME)?,
            ctime: read_if(Self::FLAG_CTIME)?,
        })
    }
}

/// Info-ZIP Unix extra field, original layout (0x5855): atime, mtime
/// (32-bit Unix seconds), then 16-bit uid/gid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OldUnixField {
    pub atime: u32,
    pub mtime: u32,
    pub uid: u16,
    pub gid: u16,
}

impl OldUnixField {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&self.atime.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.uid.to_le_bytes());
        out.extend_from_slice(&self.gid.to_le_bytes());
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 12 {
            return Err(ZipError::malformed("Info-ZIP Unix (old) extra field too short"));
        }
        let mut cursor = payload;
        let atime = read_u32(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
        let mtime = read_u32(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
        let uid = read_u16(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
        let gid = read_u16(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
        Ok(OldUnixField { atime, mtime, uid, gid })
    }
}

/// NTFS times extra field (0x000A): a 4-byte reserved block followed by one
/// or more attribute tags. This crate only ever writes (and only needs to
/// read) attribute tag 0x0001, carrying mtime/atime/ctime as 64-bit Windows
/// FILETIME values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtfsField {
    pub mtime: u64,
    pub atime: u64,
    pub ctime: u64,
}

impl NtfsField {
    const ATTR_TAG_TIMES: u16 = 0x0001;
    const ATTR_TAG_SIZE: u16 = 24;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        out.extend_from_slice(&Self::ATTR_TAG_TIMES.to_le_bytes());
        out.extend_from_slice(&Self::ATTR_TAG_SIZE.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.atime.to_le_bytes());
        out.extend_from_slice(&self.ctime.to_le_bytes());
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(ZipError::malformed("NTFS extra field missing reserved header"));
        }
        let mut cursor = &payload[4..];
        while cursor.len() >= 4 {
            let tag = read_u16(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
            let size = read_u16(&mut cursor).map_err(|e| ZipError::malformed(e.to_string()))? as usize;
            if cursor.len() < size {
                return Err(ZipError::malformed("NTFS extra field attribute truncated"));
            }
            let attr = &cursor[..size];
            cursor = &cursor[size..];
            if tag == Self::ATTR_TAG_TIMES && size >= 24 {
                let mut attr_cursor = attr;
                let mtime = read_u64(&mut attr_cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
                let atime = read_u64(&mut attr_cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
                let ctime = read_u64(&mut attr_cursor).map_err(|e| ZipError::malformed(e.to_string()))?;
                return Ok(NtfsField { mtime, atime, ctime });
            }
        }
        Err(ZipError::malformed("NTFS extra field has no times attribute"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ids_round_trip_verbatim() {
        let mut field = ExtraField::new();
        field.insert_raw(0xBEEF, vec![1, 2, 3, 4, 5]);

        let encoded = field.encode();
        let decoded = ExtraField::decode(&encoded).unwrap();

        assert_eq!(decoded.get_raw(0xBEEF), Some(&[1, 2, 3, 4, 5][..]));
    }

    #[test]
    fn zip64_round_trips_only_requested_fields() {
        let mut field = ExtraField::new();
        let z64 = Zip64Field {
            uncompressed_size: Some(5_000_000_000),
            compressed_size: Some(4_000_000_000),
            local_header_offset: None,
            disk_number: None,
        };
        field.set_zip64(&z64);

        let encoded = field.encode();
        let decoded = ExtraField::decode(&encoded).unwrap();
        let parsed = decoded.zip64(true, true, false, false).unwrap().unwrap();

        assert_eq!(parsed.uncompressed_size, Some(5_000_000_000));
        assert_eq!(parsed.compressed_size, Some(4_000_000_000));
        assert_eq!(parsed.local_header_offset, None);
    }

    #[test]
    fn extended_timestamp_round_trip() {
        let mut field = ExtraField::new();
        let ts = ExtendedTimestamp {
            mtime: Some(1_700_000_000),
            atime: None,
            ctime: Some(1_600_000_000),
        };
        field.set_extended_timestamp(&ts);

        let decoded = ExtraField::decode(&field.encode()).unwrap();
        let parsed = decoded.extended_timestamp().unwrap().unwrap();

        assert_eq!(parsed.mtime, Some(1_700_000_000));
        assert_eq!(parsed.atime, None);
        assert_eq!(parsed.ctime, Some(1_600_000_000));
    }

    #[test]
    fn unix_new_round_trip() {
        let mut field = ExtraField::new();
        field.set_unix_new(1000, 1000);
        let decoded = ExtraField::decode(&field.encode()).unwrap();
        assert_eq!(decoded.unix_new().unwrap(), Some((1000, 1000)));
    }

    #[test]
    fn ntfs_round_trip() {
        let mut field = ExtraField::new();
        let ntfs = NtfsField {
            mtime: 133_500_000_000_000_000,
            atime: 133_400_000_000_000_000,
            ctime: 133_300_000_000_000_000,
        };
        field.set_ntfs(&ntfs);
        let decoded = ExtraField::decode(&field.encode()).unwrap();
        assert_eq!(decoded.ntfs().unwrap(), Some(ntfs));
    }

    #[test]
    fn truncated_extra_field_is_malformed_archive() {
        let bytes = [0x01, 0x00, 0xFF, 0xFF]; // declares 0xFFFF bytes of payload that don't exist
        let err = ExtraField::decode(&bytes).unwrap_err();
        assert!(matches!(err, ZipError::MalformedArchive(_)));
    }
}
