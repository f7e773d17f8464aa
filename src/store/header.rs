//! File header.
//!
//! Every store file begins with a fixed 80-byte header:
//!
//! ```text
//! offset  size  field
//! ------  ----  -----------------------------------------
//!      0    12  marker "ASL DB" followed by six NUL bytes
//!     12     4  format version
//!     16     8  offset of the first log record (0 = none)
//!     24     8  creation time, seconds since the epoch
//!     32     4  string cache size
//!     36     1  filter mask
//!     37     8  offset of the last log record (0 = none)
//!     45    35  reserved, zero
//! ```
//!
//! Only `first` and `last` are ever rewritten after creation.

use crate::encoding::{Decode, Encode, EncodingError};
use crate::{StoreConfig, StoreError};

use super::Offset;

/// Size of the header in bytes.
pub(crate) const HEADER_LEN: u64 = 80;

/// Position of the `first` field.
pub(crate) const HEADER_FIRST_AT: u64 = 16;

/// Position of the `last` field.
pub(crate) const HEADER_LAST_AT: u64 = 37;

/// File marker.
pub(crate) const MARKER: [u8; 12] = *b"ASL DB\0\0\0\0\0\0";

/// Format version written by this crate.
pub const CURRENT_VERSION: u32 = 2;

/// Legacy format version, readable only through a legacy reader.
pub const LEGACY_VERSION: u32 = 1;

const RESERVED_LEN: usize = 35;

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    marker: [u8; 12],

    /// Format version.
    pub version: u32,

    /// First log record of the chain.
    pub first: Offset,

    /// Creation time, seconds since the epoch.
    pub created: u64,

    /// String cache size the file was created with.
    pub string_cache_size: u32,

    /// Level filter mask the file was created with.
    pub filter_mask: u8,

    /// Last log record of the chain.
    pub last: Offset,
}

impl FileHeader {
    /// Header for a freshly created, empty store.
    pub(crate) fn new(created: u64, config: &StoreConfig) -> Self {
        Self {
            marker: MARKER,
            version: CURRENT_VERSION,
            first: Offset::NULL,
            created,
            string_cache_size: config.string_cache_size,
            filter_mask: config.filter_mask,
            last: Offset::NULL,
        }
    }

    /// Checks marker and version.
    ///
    /// Returns [`StoreError::LegacyFormat`] for a well-marked legacy file so
    /// callers can dispatch to a legacy reader.
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.marker != MARKER {
            return Err(StoreError::InvalidStore("bad file marker".into()));
        }
        match self.version {
            CURRENT_VERSION => Ok(()),
            LEGACY_VERSION => Err(StoreError::LegacyFormat {
                version: self.version,
            }),
            other => Err(StoreError::InvalidStore(format!(
                "unsupported format version {other}"
            ))),
        }
    }
}

impl Encode for FileHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.marker.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.first.encode_to(buf)?;
        self.created.encode_to(buf)?;
        self.string_cache_size.encode_to(buf)?;
        self.filter_mask.encode_to(buf)?;
        self.last.encode_to(buf)?;
        [0u8; RESERVED_LEN].encode_to(buf)?;
        Ok(())
    }
}

impl Decode for FileHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;

        let (marker, n) = <[u8; 12]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (first, n) = Offset::decode_from(&buf[off..])?;
        off += n;
        let (created, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (string_cache_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (filter_mask, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (last, n) = Offset::decode_from(&buf[off..])?;
        off += n;
        let (_reserved, n) = <[u8; RESERVED_LEN]>::decode_from(&buf[off..])?;
        off += n;

        Ok((
            Self {
                marker,
                version,
                first,
                created,
                string_cache_size,
                filter_mask,
                last,
            },
            off,
        ))
    }
}
