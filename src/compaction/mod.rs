//! # Compaction Module
//!
//! Rewrites the reachable records of one store into another.
//!
//! Appends are never undone in place, so a long-lived file accumulates
//! bytes no chain pointer reaches:
//!
//! - records orphaned by a crash between writing and linking;
//! - string objects duplicated across write sessions (the string cache
//!   only spans one session).
//!
//! Compaction walks the source chain from the head and appends every record
//! to a fresh destination with its original identifier preserved, so the
//! copy is ordered and identified exactly like the source.  An optional
//! predicate drops unwanted records along the way.


use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::query::Predicate;
use crate::reader::Reader;
use crate::store::{Cursor, IdAllocator, Store};
use crate::{StoreConfig, StoreError};

/// Counters reported by [`compact`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Records appended to the destination.
    pub copied: usize,

    /// Records rejected by the filter.
    pub filtered: usize,

    /// Records skipped because they could not be decoded.
    pub unreadable: usize,
}

/// Copies every record reachable in `source` into `destination`.
///
/// Records rejected by `filter` are not copied.  A record that cannot be
/// decoded is counted and skipped; a failure to write the destination
/// aborts the copy.
pub fn compact<C>(
    source: &mut C,
    destination: &mut Store,
    filter: Option<&dyn Predicate>,
) -> Result<CompactionStats, StoreError>
where
    C: Cursor + ?Sized,
{
    let mut stats = CompactionStats::default();

    let mut step = source.to_first();
    loop {
        let id = match step {
            Ok(id) => id,
            Err(StoreError::NoRecords) => break,
            Err(e) => return Err(e),
        };

        match source.read_current() {
            Ok(record) => {
                if filter.is_none_or(|f| f.matches(&record)) {
                    destination.append(&record, true)?;
                    stats.copied += 1;
                } else {
                    stats.filtered += 1;
                }
            }
            Err(e) => {
                warn!(id, error = %e, "skipping unreadable record during compaction");
                stats.unreadable += 1;
            }
        }

        step = source.to_next();
    }

    info!(
        destination = %destination.path().display(),
        copied = stats.copied,
        filtered = stats.filtered,
        unreadable = stats.unreadable,
        "compaction finished"
    );

    Ok(stats)
}

/// Compacts the store at `source` into a new store at `destination`.
///
/// `destination` must not exist yet (or be empty).  Legacy sources are not
/// supported here; open them with
/// [`Reader::open_with_legacy`] and call [`compact`] directly.
pub fn compact_file(
    source: impl AsRef<Path>,
    destination: impl AsRef<Path>,
    config: &StoreConfig,
) -> Result<CompactionStats, StoreError> {
    let destination = destination.as_ref();
    if fs::metadata(destination).is_ok_and(|m| m.len() > 0) {
        return Err(StoreError::InvalidArgument(format!(
            "{} already exists",
            destination.display()
        )));
    }

    let mut reader = Reader::open(source)?;
    let mut output = Store::open_for_write(destination, config, Arc::new(IdAllocator::new()))?;

    let stats = compact(&mut reader, &mut output, None)?;

    output.close()?;
    reader.close()?;
    Ok(stats)
}
