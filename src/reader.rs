//! Read-side dispatch between current and legacy files.
//!
//! The format version is checked once, at open.  Current files are read by
//! a read-mode [`Store`]; legacy files are handed to a caller-supplied
//! [`LegacyReader`].  Afterwards every [`Cursor`] call is a plain match on
//! the variant.

use std::path::Path;

use tracing::debug;

use crate::StoreError;
use crate::record::LogRecord;
use crate::store::{Cursor, Store};

/// A reader for legacy (version 1) files, supplied by the caller.
pub trait LegacyReader: Cursor + Send {}

/// A read handle over a current or legacy store file.
pub enum Reader {
    /// Version 2 file.
    Current(Store),
    /// Legacy file.
    Legacy(Box<dyn LegacyReader>),
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current(store) => f.debug_tuple("Current").field(store).finish(),
            Self::Legacy(_) => f.write_str("Legacy(..)"),
        }
    }
}

impl Reader {
    /// Opens a current-format file.
    ///
    /// Legacy files fail with [`StoreError::LegacyFormat`]; use
    /// [`open_with_legacy`](Self::open_with_legacy) to accept them.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Store::open_for_read(path).map(Self::Current)
    }

    /// Opens a file of either format, calling `opener` for legacy files.
    pub fn open_with_legacy<F>(path: impl AsRef<Path>, opener: F) -> Result<Self, StoreError>
    where
        F: FnOnce(&Path) -> Result<Box<dyn LegacyReader>, StoreError>,
    {
        let path = path.as_ref();
        match Store::open_for_read(path) {
            Ok(store) => Ok(Self::Current(store)),
            Err(StoreError::LegacyFormat { version }) => {
                debug!(path = %path.display(), version, "dispatching to legacy reader");
                opener(path).map(Self::Legacy)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns `true` for legacy files.
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    /// The underlying store of a current-format file.
    pub fn as_store(&self) -> Option<&Store> {
        match self {
            Self::Current(store) => Some(store),
            Self::Legacy(_) => None,
        }
    }

    /// Closes a current-format store.  Legacy readers close on drop.
    pub fn close(&mut self) -> Result<(), StoreError> {
        match self {
            Self::Current(store) => store.close(),
            Self::Legacy(_) => Ok(()),
        }
    }
}

impl From<Store> for Reader {
    fn from(store: Store) -> Self {
        Self::Current(store)
    }
}

impl Cursor for Reader {
    fn to_first(&mut self) -> Result<u64, StoreError> {
        match self {
            Self::Current(store) => store.to_first(),
            Self::Legacy(legacy) => legacy.to_first(),
        }
    }

    fn to_last(&mut self) -> Result<u64, StoreError> {
        match self {
            Self::Current(store) => store.to_last(),
            Self::Legacy(legacy) => legacy.to_last(),
        }
    }

    fn to_next(&mut self) -> Result<u64, StoreError> {
        match self {
            Self::Current(store) => store.to_next(),
            Self::Legacy(legacy) => legacy.to_next(),
        }
    }

    fn to_previous(&mut self) -> Result<u64, StoreError> {
        match self {
            Self::Current(store) => store.to_previous(),
            Self::Legacy(legacy) => legacy.to_previous(),
        }
    }

    fn cursor_id(&self) -> Option<u64> {
        match self {
            Self::Current(store) => store.cursor_id(),
            Self::Legacy(legacy) => legacy.cursor_id(),
        }
    }

    fn read_current(&mut self) -> Result<LogRecord, StoreError> {
        match self {
            Self::Current(store) => store.read_current(),
            Self::Legacy(legacy) => legacy.read_current(),
        }
    }
}
