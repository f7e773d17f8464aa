//! Log Store Module
//!
//! This module implements a **single-file**, **append-only**, **self-indexing** store of
//! structured log records.  One [`Store`] handle owns one open file.
//!
//! ## Design Overview
//!
//! The file starts with a fixed-size header followed by a sequence of typed records.
//! Two record types exist: *string objects* (durable targets of string references that
//! are too long to inline) and *log records*.  Log records form a chain: every log
//! record carries a `next` offset and a `previous` offset, and the header anchors the
//! chain with `first` and `last`.
//!
//! Appending never rewrites existing data except the previous tail's `next` field and
//! the header's `first`/`last` fields, and those patches happen strictly *after* the new
//! record's bytes are on disk.  A crash in between leaves an unreachable record behind,
//! never a dangling pointer.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER 80B: marker(12) version(4) first(8) created(8) cache_size(4) filter(1) last(8) reserved(35)]
//! [TYPE(2)][LEN(4)][PAYLOAD(LEN)]      string object or log record
//! [TYPE(2)][LEN(4)][PAYLOAD(LEN)]
//! ...
//! ```
//!
//! All multi-byte integers are big-endian (see the `encoding` module).
//!
//! # Sub-modules
//!
//! - [`header`]: file header encoding and validation.
//! - [`strings`]: string references and the per-session string cache.
//! - [`codec`]: log record append and decode.
//! - [`cursor`]: chain navigation ([`Cursor`]).
//! - [`ids`]: record identifier allocation ([`IdAllocator`]).
//!
//! # Handles
//!
//! - A **write** handle owns a read/write [`File`] and reads/writes it positionally.
//! - A **read** handle owns a read-only memory map of the file as it was when opened.
//!   Data a concurrent writer appends later is simply not visible; partially linked
//!   tails are treated as "no record yet".
//!
//! Every dereference of an on-disk offset goes through `Store::read_exact_at`, which
//! bounds-checks against the current file size and reports [`StoreError::ReadFailed`]
//! instead of ever touching bytes past the end.

pub mod codec;
pub mod cursor;
pub mod header;
pub mod ids;
pub mod strings;

#[cfg(test)]
pub(crate) mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fmt,
    fs::{File, OpenOptions},
    os::unix::fs::{FileExt, OpenOptionsExt},
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use memmap2::Mmap;
use tracing::{debug, info, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::{StoreConfig, StoreError};

pub use cursor::{Cursor, Direction};
pub use header::FileHeader;
pub use ids::IdAllocator;
pub use strings::StringRef;

use header::{HEADER_LAST_AT, HEADER_LEN};
use strings::StringCache;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Type tag of a string object.
pub(crate) const TYPE_STRING: u16 = 1;

/// Type tag of a log record.
pub(crate) const TYPE_MESSAGE: u16 = 2;

/// Size of the `[TYPE u16][LEN u32]` prefix shared by every record.
pub(crate) const RECORD_PREFIX_LEN: u64 = 6;

// ------------------------------------------------------------------------------------------------
// Offset
// ------------------------------------------------------------------------------------------------

/// Byte position of a record inside a store file.
///
/// Offsets are plain integers on disk.  Wrapping them keeps them from being
/// mixed up with lengths or record identifiers, and [`Offset::NULL`] is the
/// "no record" value used by empty chains and chain ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(u64);

impl Offset {
    /// The "no record" offset.
    pub const NULL: Offset = Offset(0);

    /// Wraps a raw file position.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw file position.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns `true` for [`Offset::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `self + len`, or `None` on overflow.
    pub fn checked_add(self, len: u64) -> Option<Offset> {
        self.0.checked_add(len).map(Offset)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Encode for Offset {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for Offset {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (raw, n) = u64::decode_from(buf)?;
        Ok((Offset(raw), n))
    }
}

// ------------------------------------------------------------------------------------------------
// Handle state
// ------------------------------------------------------------------------------------------------

/// Whether a handle may append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Navigation and decoding only.
    Read,
    /// Navigation, decoding, and appending.
    Write,
}

/// Storage behind a handle.
enum Backing {
    File(File),
    Mapped(Mmap),
}

/// An open log store file.
///
/// See the [module-level documentation](self) for the format and the
/// append ordering guarantees.
pub struct Store {
    /// Path the store was opened from.
    path: PathBuf,

    /// Read or write handle.
    mode: AccessMode,

    /// Open file or map; `None` once closed.
    backing: Option<Backing>,

    /// Bytes addressable through this handle.
    file_size: u64,

    /// In-memory copy of the file header, kept in sync with every patch.
    header: FileHeader,

    /// Offset of the record under the cursor, [`Offset::NULL`] when unpositioned.
    cursor: Offset,

    /// Identifier of the record under the cursor.
    cursor_id: u64,

    /// Strings written during this session (write handles only).
    strings: StringCache,

    /// Reused serialization buffer for log records.
    scratch: Vec<u8>,

    /// Identifier source (write handles only).
    ids: Option<Arc<IdAllocator>>,

    /// `fsync` after every append.
    sync_writes: bool,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("file_size", &self.file_size)
            .field("first", &self.header.first)
            .field("last", &self.header.last)
            .field("closed", &self.backing.is_none())
            .finish_non_exhaustive()
    }
}

impl Store {
    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) a store for appending.
    ///
    /// A missing or empty file gets a fresh header.  For an existing file the
    /// header is validated, the chain tail is recovered (walking the chain
    /// when the recorded tail is inconsistent with the file), and `ids`
    /// observes the tail's identifier so new records keep increasing.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidArgument`] if `config` is invalid.
    /// - [`StoreError::InvalidStore`] on a bad marker or version, including
    ///   legacy files (they are read-only).
    pub fn open_for_write(
        path: impl AsRef<Path>,
        config: &StoreConfig,
        ids: Arc<IdAllocator>,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(config.file_mode)
            .open(path)?;
        let len = file.metadata()?.len();

        let mut store = Self {
            path: path.to_path_buf(),
            mode: AccessMode::Write,
            backing: Some(Backing::File(file)),
            file_size: len,
            header: FileHeader::new(now_seconds(), config),
            cursor: Offset::NULL,
            cursor_id: 0,
            strings: StringCache::new(config.string_cache_size, config.unlimited_string_cache),
            scratch: Vec::new(),
            ids: Some(ids),
            sync_writes: config.sync_writes,
        };

        if len == 0 {
            let header_bytes = encoding::encode_to_vec(&store.header)?;
            store.append_bytes(&header_bytes)?;
            store.sync_if_configured()?;
            info!(path = %path.display(), "created log store");
            return Ok(store);
        }

        if len < HEADER_LEN {
            return Err(StoreError::InvalidStore(format!(
                "file is {len} bytes, shorter than the {HEADER_LEN}-byte header"
            )));
        }

        let mut raw = [0u8; HEADER_LEN as usize];
        store.read_exact_at(Offset::NULL, &mut raw)?;
        let (header, _) = FileHeader::decode_from(&raw)?;
        match header.validate() {
            Ok(()) => {}
            Err(StoreError::LegacyFormat { version }) => {
                return Err(StoreError::InvalidStore(format!(
                    "legacy format version {version} is read-only"
                )));
            }
            Err(e) => return Err(e),
        }

        store.header = header;
        store.strings = StringCache::new(header.string_cache_size, config.unlimited_string_cache);
        store.recover_chain()?;

        info!(
            path = %path.display(),
            file_size = store.file_size,
            first = %store.header.first,
            last = %store.header.last,
            "opened log store for writing"
        );

        Ok(store)
    }

    /// Opens a version-2 store read-only.
    ///
    /// The file is memory-mapped; the handle sees the file as it was at this
    /// call.  Use [`Reader::open_with_legacy`](crate::Reader::open_with_legacy)
    /// to also accept legacy files.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidStore`] on a bad marker, unknown version, or a
    ///   file shorter than the header.
    /// - [`StoreError::LegacyFormat`] for a legacy (version 1) file.
    pub fn open_for_read(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(StoreError::InvalidStore(format!(
                "file is {len} bytes, shorter than the {HEADER_LEN}-byte header"
            )));
        }

        // SAFETY: the map is read-only and every access is bounds-checked
        // against its length.  Writers only append or patch fields in place.
        let map = unsafe { Mmap::map(&file)? };

        let (header, _) = FileHeader::decode_from(&map[..HEADER_LEN as usize])?;
        header.validate()?;

        let mut store = Self {
            path: path.to_path_buf(),
            mode: AccessMode::Read,
            file_size: map.len() as u64,
            backing: Some(Backing::Mapped(map)),
            header,
            cursor: Offset::NULL,
            cursor_id: 0,
            strings: StringCache::new(header.string_cache_size, false),
            scratch: Vec::new(),
            ids: None,
            sync_writes: false,
        };

        // A crash between linking a record and patching `last` leaves a
        // valid but stale tail.  Read handles cannot write the repair back.
        if !store.header.first.is_null() {
            let tail = store.find_tail()?;
            if tail != store.header.last {
                debug!(recorded = %store.header.last, tail = %tail, "using the chain tail in memory");
                store.header.last = tail;
            }
        }

        info!(
            path = %path.display(),
            file_size = store.file_size,
            "opened log store for reading"
        );

        Ok(store)
    }

    /// Releases the string cache and the file.
    ///
    /// Calling `close` more than once is harmless.  Every other operation on
    /// a closed handle returns [`StoreError::Closed`].
    pub fn close(&mut self) -> Result<(), StoreError> {
        let Some(backing) = self.backing.take() else {
            return Ok(());
        };

        self.strings.clear();
        self.scratch = Vec::new();
        self.cursor = Offset::NULL;
        self.cursor_id = 0;

        if let Backing::File(file) = &backing {
            if self.sync_writes {
                file.sync_all().map_err(StoreError::WriteFailed)?;
            }
        }
        drop(backing);

        info!(path = %self.path.display(), "closed log store");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------------------------------------

    /// Path the store was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read or write handle.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Bytes addressable through this handle.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Creation time of the file, in seconds since the UNIX epoch.
    pub fn creation_time(&self) -> u64 {
        self.header.created
    }

    /// The in-memory copy of the file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.backing.is_none()
    }

    /// Whether the header's filter mask admits records of `level`.
    ///
    /// Levels 0-7 map to mask bits 0-7; higher levels are always admitted.
    pub fn accepts_level(&self, level: u16) -> bool {
        level > 7 || self.header.filter_mask & (1u8 << level) != 0
    }

    /// Number of strings currently held by the session cache.
    pub fn cached_strings(&self) -> usize {
        self.strings.len()
    }

    // --------------------------------------------------------------------------------------------
    // Bounds-checked file access
    // --------------------------------------------------------------------------------------------

    /// Fills `buf` from `offset`, failing unless the whole range lies inside
    /// the file.  This is the only path through which stored bytes are read.
    pub(crate) fn read_exact_at(&self, offset: Offset, buf: &mut [u8]) -> Result<(), StoreError> {
        let end = offset
            .get()
            .checked_add(buf.len() as u64)
            .filter(|&end| end <= self.file_size)
            .ok_or_else(|| {
                StoreError::read_failed(
                    offset,
                    format!(
                        "{} bytes would run past the end of the file ({} bytes)",
                        buf.len(),
                        self.file_size
                    ),
                )
            })?;

        match self.backing()? {
            Backing::File(file) => file
                .read_exact_at(buf, offset.get())
                .map_err(|e| StoreError::read_failed(offset, e.to_string())),
            Backing::Mapped(map) => {
                let start = usize::try_from(offset.get())
                    .map_err(|_| StoreError::read_failed(offset, "offset not addressable"))?;
                let end = usize::try_from(end)
                    .map_err(|_| StoreError::read_failed(offset, "offset not addressable"))?;
                let src = map
                    .get(start..end)
                    .ok_or_else(|| StoreError::read_failed(offset, "range outside mapping"))?;
                buf.copy_from_slice(src);
                Ok(())
            }
        }
    }

    /// Reads `len` bytes at `offset` into a new buffer.
    ///
    /// The range is validated before anything is allocated, and the
    /// allocation itself is fallible so a corrupt length cannot abort the
    /// process.
    pub(crate) fn read_vec(&self, offset: Offset, len: usize) -> Result<Vec<u8>, StoreError> {
        let fits = offset
            .get()
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.file_size);
        if !fits {
            return Err(StoreError::read_failed(
                offset,
                format!("declared length {len} does not fit the file ({} bytes)", self.file_size),
            ));
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|_| StoreError::NoMemory(len))?;
        buf.resize(len, 0);
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Reads the `[TYPE u16][LEN u32]` prefix of the record at `offset`.
    pub(crate) fn read_prefix(&self, offset: Offset) -> Result<(u16, u32), StoreError> {
        let mut raw = [0u8; RECORD_PREFIX_LEN as usize];
        self.read_exact_at(offset, &mut raw)?;
        let (tag, n) =
            u16::decode_from(&raw).map_err(|e| StoreError::read_failed(offset, e.to_string()))?;
        let (len, _) = u32::decode_from(&raw[n..])
            .map_err(|e| StoreError::read_failed(offset, e.to_string()))?;
        Ok((tag, len))
    }

    /// Appends `bytes` at the end of the file and returns where they landed.
    pub(crate) fn append_bytes(&mut self, bytes: &[u8]) -> Result<Offset, StoreError> {
        let offset = Offset(self.file_size);
        self.write_at(offset, bytes)?;
        self.file_size += bytes.len() as u64;
        Ok(offset)
    }

    /// Overwrites an 8-byte big-endian field in place.
    pub(crate) fn patch_u64(&mut self, at: Offset, value: u64) -> Result<(), StoreError> {
        let fits = at.checked_add(8).is_some_and(|end| end.get() <= self.file_size);
        if !fits {
            return Err(StoreError::InvalidArgument(format!(
                "patch at {at} lies outside the file"
            )));
        }
        self.write_at(at, &value.to_be_bytes())
    }

    fn write_at(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), StoreError> {
        self.ensure_writable()?;
        match self.backing()? {
            Backing::File(file) => file
                .write_all_at(bytes, offset.get())
                .map_err(StoreError::WriteFailed),
            Backing::Mapped(_) => Err(StoreError::AccessDenied(
                "store is mapped read-only".into(),
            )),
        }
    }

    fn backing(&self) -> Result<&Backing, StoreError> {
        self.backing.as_ref().ok_or(StoreError::Closed)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), StoreError> {
        self.backing().map(|_| ())
    }

    pub(crate) fn ensure_writable(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.mode != AccessMode::Write {
            return Err(StoreError::AccessDenied(format!(
                "{} is open read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    pub(crate) fn sync_if_configured(&self) -> Result<(), StoreError> {
        if !self.sync_writes {
            return Ok(());
        }
        match self.backing()? {
            Backing::File(file) => file.sync_data().map_err(StoreError::WriteFailed),
            Backing::Mapped(_) => Ok(()),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Header maintenance
    // --------------------------------------------------------------------------------------------

    pub(crate) fn set_last(&mut self, last: Offset) -> Result<(), StoreError> {
        self.patch_u64(Offset(HEADER_LAST_AT), last.get())?;
        self.header.last = last;
        Ok(())
    }

    /// Re-derives the chain tail of an existing file before the first append.
    fn recover_chain(&mut self) -> Result<(), StoreError> {
        let first = self.header.first;
        if first.is_null() {
            if !self.header.last.is_null() {
                warn!(last = %self.header.last, "tail set on an empty chain; clearing it");
                self.set_last(Offset::NULL)?;
            }
            return Ok(());
        }

        if self.record_span(first)?.is_none() {
            return Err(StoreError::InvalidStore(format!(
                "head record at {first} does not fit the file"
            )));
        }

        let tail = self.find_tail()?;
        if tail != self.header.last {
            warn!(
                recorded = %self.header.last,
                recovered = %tail,
                "recorded tail is inconsistent with the chain; repairing header"
            );
            self.set_last(tail)?;
        }

        if let (Some(ids), Some(links)) = (&self.ids, self.read_links(tail)?) {
            ids.observe(links.id);
        }
        Ok(())
    }
}

/// Wall-clock seconds since the UNIX epoch (0 if the clock is before it).
pub(crate) fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
