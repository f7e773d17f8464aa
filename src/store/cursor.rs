//! Chain navigation.
//!
//! A cursor is either *unpositioned* or sits on one log record (its offset
//! and identifier).  Navigation never trusts a stored pointer: every target
//! must move strictly away from the current record in the direction of
//! travel and its whole record must fit inside the file.  A pointer that
//! fails either check ends the chain at that point.
//!
//! [`Cursor`] is the seam shared by current-format stores and legacy
//! readers; the merge engine and compaction are written against it.

use std::cmp::Ordering;

use tracing::{debug, trace, warn};

use crate::StoreError;
use crate::encoding::{Decode, EncodingError};
use crate::record::LogRecord;

use super::codec::{MESSAGE_FIXED_LEN, NEXT_FIELD};
use super::header::HEADER_LEN;
use super::{Offset, RECORD_PREFIX_LEN, Store, TYPE_MESSAGE};

/// Direction of travel along the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Increasing identifiers, head to tail.
    Forward,
    /// Decreasing identifiers, tail to head.
    Backward,
}

/// Navigation over a chain of identified log records.
///
/// Positioning methods return the identifier of the record the cursor
/// landed on.  [`StoreError::NoRecords`] means there is nothing in that
/// direction and leaves the cursor unpositioned.
pub trait Cursor {
    /// Moves to the first record.
    fn to_first(&mut self) -> Result<u64, StoreError>;

    /// Moves to the last record.
    fn to_last(&mut self) -> Result<u64, StoreError>;

    /// Moves to the following record.
    fn to_next(&mut self) -> Result<u64, StoreError>;

    /// Moves to the preceding record.
    fn to_previous(&mut self) -> Result<u64, StoreError>;

    /// Identifier under the cursor, `None` when unpositioned.
    fn cursor_id(&self) -> Option<u64>;

    /// Decodes the record under the cursor.
    fn read_current(&mut self) -> Result<LogRecord, StoreError>;

    /// Moves one record in `direction`.
    fn advance(&mut self, direction: Direction) -> Result<u64, StoreError> {
        match direction {
            Direction::Forward => self.to_next(),
            Direction::Backward => self.to_previous(),
        }
    }

    /// Moves to the record with identifier `id`.
    ///
    /// Walks from the current record (or the head when unpositioned) toward
    /// `id`.  Fails with [`StoreError::NoSuchRecord`] when the walk passes
    /// over `id` or runs off the chain.
    fn seek(&mut self, id: u64) -> Result<(), StoreError> {
        let missing = |e: StoreError| match e {
            StoreError::NoRecords => StoreError::NoSuchRecord(id),
            other => other,
        };

        let mut current = match self.cursor_id() {
            Some(current) => current,
            None => self.to_first().map_err(missing)?,
        };

        loop {
            match current.cmp(&id) {
                Ordering::Equal => return Ok(()),
                Ordering::Less => {
                    current = self.to_next().map_err(missing)?;
                    if current > id {
                        return Err(StoreError::NoSuchRecord(id));
                    }
                }
                Ordering::Greater => {
                    current = self.to_previous().map_err(missing)?;
                    if current < id {
                        return Err(StoreError::NoSuchRecord(id));
                    }
                }
            }
        }
    }

    /// Positions on the first record at or beyond `start` in `direction`:
    /// the lowest id `>= start` going forward, the highest id `<= start`
    /// going backward.
    fn position_at(&mut self, start: u64, direction: Direction) -> Result<u64, StoreError> {
        match direction {
            Direction::Forward => {
                let mut id = self.to_first()?;
                while id < start {
                    id = self.to_next()?;
                }
                Ok(id)
            }
            Direction::Backward => {
                let mut id = self.to_last()?;
                while id > start {
                    id = self.to_previous()?;
                }
                Ok(id)
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Store navigation
// ------------------------------------------------------------------------------------------------

/// Pointers and identifier of one log record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Links {
    pub(crate) next: Offset,
    pub(crate) id: u64,
    pub(crate) previous: Offset,
}

impl Store {
    /// Payload length of the log record at `offset`, or `None` if no
    /// complete log record starts there.
    pub(crate) fn record_span(&self, offset: Offset) -> Result<Option<u32>, StoreError> {
        if offset.get() < HEADER_LEN {
            return Ok(None);
        }
        let Some(body) = offset.checked_add(RECORD_PREFIX_LEN) else {
            return Ok(None);
        };
        if body.get() > self.file_size {
            return Ok(None);
        }

        let (tag, len) = self.read_prefix(offset)?;
        if tag != TYPE_MESSAGE || len < MESSAGE_FIXED_LEN {
            return Ok(None);
        }
        match body.checked_add(u64::from(len)) {
            Some(end) if end.get() <= self.file_size => Ok(Some(len)),
            _ => Ok(None),
        }
    }

    /// Reads the chain pointers of the record at `offset`, or `None` if no
    /// complete log record starts there.
    pub(crate) fn read_links(&self, offset: Offset) -> Result<Option<Links>, StoreError> {
        let Some(len) = self.record_span(offset)? else {
            return Ok(None);
        };

        let mut head = [0u8; 16];
        self.read_exact_at(Offset::new(offset.get() + NEXT_FIELD), &mut head)?;
        let corrupt = |e: EncodingError| StoreError::read_failed(offset, e.to_string());
        let (next, n) = Offset::decode_from(&head).map_err(corrupt)?;
        let (id, _) = u64::decode_from(&head[n..]).map_err(corrupt)?;

        let mut tail = [0u8; 8];
        let previous_at = offset.get() + RECORD_PREFIX_LEN + u64::from(len) - 8;
        self.read_exact_at(Offset::new(previous_at), &mut tail)?;
        let (previous, _) = Offset::decode_from(&tail).map_err(corrupt)?;

        Ok(Some(Links { next, id, previous }))
    }

    /// Last reachable record, starting from the recorded tail when it is a
    /// complete record and from the head otherwise.  [`Offset::NULL`] if
    /// neither is usable.
    pub(crate) fn find_tail(&self) -> Result<Offset, StoreError> {
        let start = if self.record_span(self.header.last)?.is_some() {
            self.header.last
        } else {
            self.header.first
        };
        let Some(mut links) = self.read_links(start)? else {
            return Ok(Offset::NULL);
        };

        let mut tail = start;
        while !links.next.is_null() && links.next > tail {
            match self.read_links(links.next)? {
                Some(next_links) => {
                    tail = links.next;
                    links = next_links;
                }
                None => break,
            }
        }
        Ok(tail)
    }

    /// Offset of the record under the cursor.
    pub fn cursor_offset(&self) -> Offset {
        self.cursor
    }

    fn land(&mut self, offset: Offset, id: u64) -> u64 {
        self.cursor = offset;
        self.cursor_id = id;
        trace!(offset = %offset, id, "cursor moved");
        id
    }

    fn unposition(&mut self) -> StoreError {
        self.cursor = Offset::NULL;
        self.cursor_id = 0;
        StoreError::NoRecords
    }

    /// Lands on `offset` if it holds a complete record, else unpositions.
    fn land_checked(&mut self, offset: Offset) -> Result<u64, StoreError> {
        match self.read_links(offset)? {
            Some(links) => Ok(self.land(offset, links.id)),
            None => Err(self.unposition()),
        }
    }

    /// Follows one chain pointer from the record under the cursor.
    fn step(&mut self, direction: Direction) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let from = self.cursor;
        if from.is_null() {
            return Err(StoreError::NoRecords);
        }
        let Some(links) = self.read_links(from)? else {
            warn!(offset = %from, "record under the cursor no longer fits the file");
            return Err(self.unposition());
        };

        let (to, moves_away) = match direction {
            Direction::Forward => (links.next, links.next > from),
            Direction::Backward => (links.previous, links.previous < from),
        };
        if to.is_null() {
            return Err(self.unposition());
        }
        if !moves_away {
            warn!(from = %from, to = %to, ?direction, "chain pointer does not advance");
            return Err(self.unposition());
        }

        match self.read_links(to)? {
            Some(target) => Ok(self.land(to, target.id)),
            None => {
                warn!(from = %from, to = %to, ?direction, "chain pointer targets an incomplete record");
                Err(self.unposition())
            }
        }
    }
}

impl Cursor for Store {
    fn to_first(&mut self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let head = self.header.first;
        if head.is_null() {
            return Err(self.unposition());
        }
        self.land_checked(head).inspect_err(|_| {
            warn!(offset = %head, "head record does not fit the file");
        })
    }

    fn to_last(&mut self) -> Result<u64, StoreError> {
        self.ensure_open()?;
        if self.header.first.is_null() {
            return Err(self.unposition());
        }

        let mut tail = self.header.last;
        if self.record_span(tail)?.is_none() {
            debug!(recorded = %tail, "recorded tail is unusable; walking the chain");
            tail = self.find_tail()?;
        }
        if tail.is_null() {
            return Err(self.unposition());
        }
        self.land_checked(tail)
    }

    fn to_next(&mut self) -> Result<u64, StoreError> {
        self.step(Direction::Forward)
    }

    fn to_previous(&mut self) -> Result<u64, StoreError> {
        self.step(Direction::Backward)
    }

    fn cursor_id(&self) -> Option<u64> {
        (!self.cursor.is_null()).then_some(self.cursor_id)
    }

    fn read_current(&mut self) -> Result<LogRecord, StoreError> {
        if self.cursor.is_null() {
            return Err(StoreError::NoRecords);
        }
        self.fetch(self.cursor)
    }
}
