//! Multi-file merge and match.
//!
//! [`MergeIter`] combines any number of [`Cursor`]s into one stream ordered
//! by record identifier, ascending or descending.  Each source contributes
//! at most one heap entry (its current position), so memory stays bounded
//! by the number of sources regardless of file sizes.
//!
//! [`match_records`] drives a [`MergeIter`], keeps the records that match
//! any of the given predicates, and stops at a result limit or after a
//! time budget.  The returned [`MatchOutcome`] carries the last identifier
//! examined so a paged query can resume where it stopped.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::StoreError;
use crate::query::{Predicate, matches_any};
use crate::record::LogRecord;
use crate::store::{Cursor, Direction};

// ------------------------------------------------------------------------------------------------
// MergeIter: heap-based k-way merge over cursors
// ------------------------------------------------------------------------------------------------

/// A heap-based merge over positioned cursors.
///
/// Yields `(id, record)` in identifier order for `direction`.  Equal
/// identifiers in different sources come out in source order.  A record
/// that cannot be decoded is yielded as an error and the merge carries on
/// with the next one.
pub struct MergeIter<'a, C: Cursor> {
    sources: &'a mut [C],
    heap: BinaryHeap<HeapEntry>,
    direction: Direction,
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    id: u64,
    source: usize,
    direction: Direction,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest entry.
        let by_id = match self.direction {
            Direction::Forward => other.id.cmp(&self.id),
            Direction::Backward => self.id.cmp(&other.id),
        };
        by_id.then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, C: Cursor> MergeIter<'a, C> {
    /// Positions every source at `start_id` and builds the heap.
    ///
    /// Sources with nothing at or beyond `start_id` are left out.
    pub fn new(
        sources: &'a mut [C],
        direction: Direction,
        start_id: u64,
    ) -> Result<Self, StoreError> {
        let mut heap = BinaryHeap::with_capacity(sources.len());

        for (source, cursor) in sources.iter_mut().enumerate() {
            match cursor.position_at(start_id, direction) {
                Ok(id) => heap.push(HeapEntry {
                    id,
                    source,
                    direction,
                }),
                Err(StoreError::NoRecords) => {
                    trace!(source, start_id, "source has no records in range");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            sources,
            heap,
            direction,
        })
    }

    /// Number of sources that still have records.
    pub fn live_sources(&self) -> usize {
        self.heap.len()
    }
}

impl<C: Cursor> Iterator for MergeIter<'_, C> {
    type Item = (u64, Result<LogRecord, StoreError>);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.heap.pop()?;
        let cursor = self.sources.get_mut(entry.source)?;

        let record = cursor.read_current();

        match cursor.advance(self.direction) {
            Ok(id) => self.heap.push(HeapEntry {
                id,
                source: entry.source,
                direction: self.direction,
            }),
            Err(StoreError::NoRecords) => {
                trace!(source = entry.source, "source exhausted");
            }
            Err(e) => {
                warn!(source = entry.source, error = %e, "dropping source after navigation error");
            }
        }

        Some((entry.id, record))
    }
}

// ------------------------------------------------------------------------------------------------
// match_records
// ------------------------------------------------------------------------------------------------

/// Parameters of a [`match_records`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOptions {
    /// Order of the results.
    pub direction: Direction,

    /// First identifier considered: records with `id >= start_id` going
    /// forward, `id <= start_id` going backward.
    pub start_id: u64,

    /// Stop after this many matches.
    pub limit: Option<usize>,

    /// Stop once this much time has passed.  Checked between records.
    pub budget: Option<Duration>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            direction: Direction::Forward,
            start_id: 0,
            limit: None,
            budget: None,
        }
    }
}

/// Result of a [`match_records`] call.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    /// Matching records in merge order.
    pub records: Vec<LogRecord>,

    /// Identifier of the last record examined, matching or not.
    pub last_id: Option<u64>,

    /// `true` if every source ran out before the limit or budget hit.
    pub exhausted: bool,
}

impl MatchOutcome {
    /// Start identifier for the next page in `direction`, or `None` when
    /// there is nothing left to read.
    pub fn resume_from(&self, direction: Direction) -> Option<u64> {
        if self.exhausted {
            return None;
        }
        match (self.last_id, direction) {
            (Some(id), Direction::Forward) => id.checked_add(1),
            (Some(id), Direction::Backward) => id.checked_sub(1),
            (None, _) => None,
        }
    }
}

/// Merges `sources` and collects the records matching any of `predicates`.
///
/// An empty predicate set matches every record.  Records that cannot be
/// decoded are skipped and logged.
///
/// # Errors
///
/// Only positioning failures other than "no records" are returned.
pub fn match_records<C, P>(
    sources: &mut [C],
    predicates: &[P],
    options: &MatchOptions,
) -> Result<MatchOutcome, StoreError>
where
    C: Cursor,
    P: Predicate,
{
    let started = Instant::now();
    let mut outcome = MatchOutcome::default();

    if options.limit == Some(0) {
        return Ok(outcome);
    }

    let mut merged = MergeIter::new(sources, options.direction, options.start_id)?;
    loop {
        let Some((id, decoded)) = merged.next() else {
            outcome.exhausted = true;
            break;
        };
        outcome.last_id = Some(id);

        match decoded {
            Ok(record) => {
                if matches_any(predicates, &record) {
                    outcome.records.push(record);
                    if options.limit.is_some_and(|limit| outcome.records.len() >= limit) {
                        break;
                    }
                }
            }
            Err(e) => warn!(id, error = %e, "skipping undecodable record"),
        }

        if options.budget.is_some_and(|budget| started.elapsed() >= budget) {
            debug!(id, matched = outcome.records.len(), "match budget spent");
            break;
        }
    }

    Ok(outcome)
}
