//! # asldb
//!
//! A single-file, **append-only**, **self-indexing** store for structured
//! log records.  Each file holds a chain of records linked in both
//! directions, string values are deduplicated within a write session, and
//! records from many files can be merged and filtered in identifier order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use asldb::{
//!     Cursor, Direction, IdAllocator, LogRecord, MatchOptions, Query, Reader, Store,
//!     StoreConfig, keys, match_records,
//! };
//!
//! let ids = Arc::new(IdAllocator::new());
//! let mut store = Store::open_for_write("/tmp/system.asl", &StoreConfig::default(), ids).unwrap();
//!
//! for text in ["a", "b", "c"] {
//!     store.append(&LogRecord::new().with(keys::MESSAGE, text), false).unwrap();
//! }
//! store.close().unwrap();
//!
//! // Navigate
//! let mut reader = Reader::open("/tmp/system.asl").unwrap();
//! reader.to_first().unwrap();
//! assert_eq!(reader.read_current().unwrap().message(), Some("a"));
//! reader.seek(2).unwrap();
//! assert_eq!(reader.read_current().unwrap().message(), Some("b"));
//!
//! // Merge and filter, newest first
//! let options = MatchOptions {
//!     direction: Direction::Backward,
//!     start_id: u64::MAX,
//!     ..MatchOptions::default()
//! };
//! let outcome = match_records(&mut [reader], &[Query::new()], &options).unwrap();
//! let texts: Vec<_> = outcome.records.iter().filter_map(|r| r.message()).collect();
//! assert_eq!(texts, ["c", "b", "a"]);
//! ```
//!
//! ## Features
//!
//! - **Crash-safe appends**: a record is fully written before anything points at it.
//! - **String deduplication**: short strings are inlined, long ones written once per session.
//! - **Bidirectional cursors** with identifier seek.
//! - **K-way merge** across files with OR'd predicates, limits and time budgets.
//! - **Compaction** of a file's reachable records into a fresh file.
//! - **Legacy dispatch** to caller-supplied readers for version 1 files.

pub mod compaction;
pub(crate) mod encoding;
pub mod merge;
pub mod query;
pub mod reader;
pub mod record;
pub mod store;

use std::io;

use thiserror::Error;

pub use compaction::{CompactionStats, compact, compact_file};
pub use encoding::EncodingError;
pub use merge::{MatchOptions, MatchOutcome, MergeIter, match_records};
pub use query::{Condition, Op, Predicate, Query, matches_any};
pub use reader::{LegacyReader, Reader};
pub use record::{LogRecord, keys};
pub use store::{
    AccessMode, Cursor, Direction, FileHeader, IdAllocator, Offset, Store, StringRef,
};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for opening a store for writing.
///
/// The configuration is validated by [`Store::open_for_write`].  The cache
/// size and filter mask are recorded in the header of newly created files;
/// an existing file keeps the cache size it was created with.
///
/// # Example
///
/// ```rust
/// use asldb::StoreConfig;
///
/// let config = StoreConfig {
///     string_cache_size: 512,
///     sync_writes: true,
///     ..StoreConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum number of string objects remembered per write session.
    ///
    /// Default: 100. Must be ≥ 1 unless `unlimited_string_cache` is set.
    pub string_cache_size: u32,

    /// Never evict from the string cache.
    ///
    /// Default: `false`.
    pub unlimited_string_cache: bool,

    /// Level filter mask stored in new headers; bit `n` admits level `n`.
    ///
    /// Default: `0xff`.
    pub filter_mask: u8,

    /// Permission bits for newly created files.
    ///
    /// Default: `0o644`. Must fit in `0o7777`.
    pub file_mode: u32,

    /// `fsync` after every append and on close.
    ///
    /// Default: `false`.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            string_cache_size: 100,
            unlimited_string_cache: false,
            filter_mask: 0xff,
            file_mode: 0o644,
            sync_writes: false,
        }
    }
}

impl StoreConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.string_cache_size == 0 && !self.unlimited_string_cache {
            return Err(StoreError::InvalidArgument(
                "string_cache_size must be >= 1".into(),
            ));
        }
        if self.file_mode & !0o7777 != 0 {
            return Err(StoreError::InvalidArgument(format!(
                "file_mode {:o} has bits outside 0o7777",
                self.file_mode
            )));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by store, reader, and merge operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The file is not a store, or its header is unusable.
    #[error("invalid store: {0}")]
    InvalidStore(String),

    /// The file is a legacy store and no legacy reader was supplied.
    #[error("legacy store format version {version}")]
    LegacyFormat {
        /// Version found in the header.
        version: u32,
    },

    /// Stored bytes at `offset` are truncated or corrupt.
    #[error("read failed at offset {offset}: {reason}")]
    ReadFailed {
        /// Offset of the record or string being read.
        offset: Offset,
        /// What was wrong.
        reason: String,
    },

    /// Writing to the file failed.
    #[error("write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// A buffer for a stored length could not be allocated.
    #[error("cannot allocate {0} bytes")]
    NoMemory(usize),

    /// Caller-supplied input was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No record with this identifier exists.
    #[error("no record with id {0}")]
    NoSuchRecord(u64),

    /// Nothing to move to.
    #[error("no records")]
    NoRecords,

    /// The handle may not perform this operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The handle has been closed.
    #[error("store is closed")]
    Closed,

    /// A value could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Opening or inspecting the file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub(crate) fn read_failed(offset: Offset, reason: impl Into<String>) -> Self {
        Self::ReadFailed {
            offset,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_cache_needs_unlimited() {
        let config = StoreConfig {
            string_cache_size: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(StoreError::InvalidArgument(_))));

        let config = StoreConfig {
            string_cache_size: 0,
            unlimited_string_cache: true,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_mode_is_bounded() {
        let config = StoreConfig {
            file_mode: 0o10000,
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(StoreError::InvalidArgument(_))));
    }
}
