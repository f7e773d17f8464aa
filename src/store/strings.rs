//! String references and the session string cache.
//!
//! Every string field of a log record is stored as an 8-byte reference:
//!
//! - **inline**: strings shorter than 8 bytes live inside the reference
//!   itself.  The first byte carries the high bit and the length (0-7);
//!   the string bytes follow, zero padded.
//! - **string object**: longer strings are written once as a separate
//!   `[TYPE=1][LEN][bytes NUL]` record and referenced by file offset.
//! - **absent**: the reference `0`.
//!
//! Within one write session, repeated long strings are deduplicated
//! through a recency-ordered cache of the string objects this session
//! wrote.  The cache starts empty on every open, so identical strings
//! written by different sessions are stored again.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::StoreError;
use crate::encoding::{self, Decode, Encode, EncodingError};

use super::{Offset, RECORD_PREFIX_LEN, Store, TYPE_STRING};

/// Longest string stored inline.
pub const INLINE_MAX: usize = 7;

const INLINE_FLAG: u8 = 0x80;

// ------------------------------------------------------------------------------------------------
// StringRef
// ------------------------------------------------------------------------------------------------

/// An 8-byte string reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StringRef(u64);

impl StringRef {
    /// The absent string.
    pub const NONE: StringRef = StringRef(0);

    /// Packs `bytes` inline, or returns `None` if they are too long.
    pub fn inline(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > INLINE_MAX {
            return None;
        }
        let mut raw = [0u8; 8];
        raw[0] = INLINE_FLAG | bytes.len() as u8;
        raw[1..=bytes.len()].copy_from_slice(bytes);
        Some(Self(u64::from_be_bytes(raw)))
    }

    /// Reference to the string object at `offset`.
    pub fn object(offset: Offset) -> Self {
        Self(offset.get())
    }

    /// Returns `true` for the absent string.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the string lives inside the reference.
    pub fn is_inline(self) -> bool {
        self.0.to_be_bytes()[0] & INLINE_FLAG != 0
    }

    /// Raw 8-byte value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Unpacks an inline reference.
    fn inline_bytes(self) -> Option<Vec<u8>> {
        let raw = self.0.to_be_bytes();
        let len = usize::from(raw[0] & !INLINE_FLAG);
        raw.get(1..=len).map(<[u8]>::to_vec)
    }
}

impl Encode for StringRef {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)
    }
}

impl Decode for StringRef {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (raw, n) = u64::decode_from(buf)?;
        Ok((Self(raw), n))
    }
}

// ------------------------------------------------------------------------------------------------
// Session cache
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct CachedString {
    hash: u32,
    offset: Offset,
    bytes: Box<[u8]>,
}

/// Most-recently-used-first list of string objects written this session.
#[derive(Debug)]
pub(crate) struct StringCache {
    entries: VecDeque<CachedString>,
    capacity: usize,
    unlimited: bool,
}

impl StringCache {
    pub(crate) fn new(capacity: u32, unlimited: bool) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity as usize,
            unlimited,
        }
    }

    /// Finds `bytes` and promotes it to most recently used.
    fn lookup(&mut self, hash: u32, bytes: &[u8]) -> Option<Offset> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.hash == hash && *e.bytes == *bytes)?;
        let entry = self.entries.remove(pos)?;
        let offset = entry.offset;
        self.entries.push_front(entry);
        Some(offset)
    }

    fn insert(&mut self, hash: u32, offset: Offset, bytes: &[u8]) {
        self.entries.push_front(CachedString {
            hash,
            offset,
            bytes: bytes.into(),
        });
        if self.unlimited {
            return;
        }
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                debug!(offset = %evicted.offset, "evicted string from cache");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

// ------------------------------------------------------------------------------------------------
// Store operations
// ------------------------------------------------------------------------------------------------

impl Store {
    /// Returns a reference for `value`, writing a string object if needed.
    ///
    /// Strings of up to [`INLINE_MAX`] bytes are packed inline and cause
    /// no I/O.  Longer strings already written in this session are
    /// returned from the cache.
    pub fn encode_string(&mut self, value: &str) -> Result<StringRef, StoreError> {
        self.ensure_writable()?;
        let bytes = value.as_bytes();
        if let Some(inline) = StringRef::inline(bytes) {
            return Ok(inline);
        }

        let hash = crc32fast::hash(bytes);
        if let Some(offset) = self.strings.lookup(hash, bytes) {
            trace!(offset = %offset, "string cache hit");
            return Ok(StringRef::object(offset));
        }

        let payload_len = encoding::len_to_u32(bytes.len() + 1)?;
        let mut buf = Vec::with_capacity(RECORD_PREFIX_LEN as usize + bytes.len() + 1);
        TYPE_STRING.encode_to(&mut buf)?;
        payload_len.encode_to(&mut buf)?;
        buf.extend_from_slice(bytes);
        buf.push(0);

        let offset = self.append_bytes(&buf)?;
        self.strings.insert(hash, offset, bytes);
        trace!(offset = %offset, len = bytes.len(), "wrote string object");
        Ok(StringRef::object(offset))
    }

    /// Resolves a reference.  Inline and absent references need no I/O.
    pub fn decode_string(&self, reference: StringRef) -> Result<Option<String>, StoreError> {
        if reference.is_none() {
            return Ok(None);
        }

        let offset = Offset::new(reference.raw());
        let bytes = if reference.is_inline() {
            reference
                .inline_bytes()
                .ok_or_else(|| StoreError::read_failed(offset, "inline length out of range"))?
        } else {
            self.read_string_object(offset)?
        };

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| StoreError::read_failed(offset, e.to_string()))
    }

    fn read_string_object(&self, offset: Offset) -> Result<Vec<u8>, StoreError> {
        let (tag, len) = self.read_prefix(offset)?;
        if tag != TYPE_STRING {
            return Err(StoreError::read_failed(
                offset,
                format!("expected a string object, found record type {tag}"),
            ));
        }

        let data = offset
            .checked_add(RECORD_PREFIX_LEN)
            .ok_or_else(|| StoreError::read_failed(offset, "offset overflow"))?;
        let mut bytes = self.read_vec(data, len as usize)?;
        if bytes.pop() != Some(0) {
            return Err(StoreError::read_failed(
                offset,
                "string object is not NUL terminated",
            ));
        }
        Ok(bytes)
    }
}
