//! Log record codec.
//!
//! ## Log record layout
//!
//! ```text
//! [TYPE=2 u16][LEN u32]
//! [next u64][id u64][time u64][nano u32][level u16][flags u16]
//! [pid u32][uid u32][gid u32][read_uid u32][read_gid u32][ref_pid u32]
//! [kv_count u32]
//! [host][sender][facility][message][ref_proc][session]     6 string refs
//! [key ref][value ref] * (kv_count / 2)
//! [previous u64]
//! ```
//!
//! `LEN` counts everything after the prefix: `116 + 8 * kv_count`.
//! Integer fields hold all-ones when unset and are left out when decoding.
//!
//! ## Append ordering
//!
//! 1. String objects for every field are written.
//! 2. The record is written at the end of the file with `next = 0` and
//!    `previous` = the current tail.
//! 3. The old tail's `next` (or the header's `first`) is patched.
//! 4. The header's `last` is patched.
//!
//! A crash before step 3 leaves an unreachable record; the chain stays valid.

use std::fmt::Display;
use std::str::FromStr;

use tracing::trace;

use crate::StoreError;
use crate::encoding::{Decode, Encode, EncodingError};
use crate::record::{LogRecord, keys};

use super::header::{HEADER_FIRST_AT, HEADER_LAST_AT};
use super::{Offset, RECORD_PREFIX_LEN, Store, StringRef, TYPE_MESSAGE, now_seconds};

/// Payload length of a log record without custom pairs.
pub(crate) const MESSAGE_FIXED_LEN: u32 = 116;

/// Position of `next` relative to the record start.
pub(crate) const NEXT_FIELD: u64 = RECORD_PREFIX_LEN;

/// `ReadUID` is present.
pub const FLAG_READ_UID_SET: u16 = 0x0001;

/// `ReadGID` is present.
pub const FLAG_READ_GID_SET: u16 = 0x0002;

const UNSET_U32: u32 = u32::MAX;
const UNSET_LEVEL: u16 = u16::MAX;
const UNSET_ID: u64 = 0;

// ------------------------------------------------------------------------------------------------
// Fixed fields
// ------------------------------------------------------------------------------------------------

/// Fixed portion of a log record payload, everything before the pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MessageFields {
    next: Offset,
    id: u64,
    time: u64,
    nano: u32,
    level: u16,
    flags: u16,
    pid: u32,
    uid: u32,
    gid: u32,
    read_uid: u32,
    read_gid: u32,
    ref_pid: u32,
    kv_count: u32,
    host: StringRef,
    sender: StringRef,
    facility: StringRef,
    message: StringRef,
    ref_proc: StringRef,
    session: StringRef,
}

impl Encode for MessageFields {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.next.encode_to(buf)?;
        self.id.encode_to(buf)?;
        self.time.encode_to(buf)?;
        self.nano.encode_to(buf)?;
        self.level.encode_to(buf)?;
        self.flags.encode_to(buf)?;
        self.pid.encode_to(buf)?;
        self.uid.encode_to(buf)?;
        self.gid.encode_to(buf)?;
        self.read_uid.encode_to(buf)?;
        self.read_gid.encode_to(buf)?;
        self.ref_pid.encode_to(buf)?;
        self.kv_count.encode_to(buf)?;
        self.host.encode_to(buf)?;
        self.sender.encode_to(buf)?;
        self.facility.encode_to(buf)?;
        self.message.encode_to(buf)?;
        self.ref_proc.encode_to(buf)?;
        self.session.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for MessageFields {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;

        let (next, n) = Offset::decode_from(&buf[off..])?;
        off += n;
        let (id, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (time, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (nano, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (level, n) = u16::decode_from(&buf[off..])?;
        off += n;
        let (flags, n) = u16::decode_from(&buf[off..])?;
        off += n;
        let (pid, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (uid, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (gid, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (read_uid, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (read_gid, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (ref_pid, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (kv_count, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (host, n) = StringRef::decode_from(&buf[off..])?;
        off += n;
        let (sender, n) = StringRef::decode_from(&buf[off..])?;
        off += n;
        let (facility, n) = StringRef::decode_from(&buf[off..])?;
        off += n;
        let (message, n) = StringRef::decode_from(&buf[off..])?;
        off += n;
        let (ref_proc, n) = StringRef::decode_from(&buf[off..])?;
        off += n;
        let (session, n) = StringRef::decode_from(&buf[off..])?;
        off += n;

        Ok((
            Self {
                next,
                id,
                time,
                nano,
                level,
                flags,
                pid,
                uid,
                gid,
                read_uid,
                read_gid,
                ref_pid,
                kv_count,
                host,
                sender,
                facility,
                message,
                ref_proc,
                session,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Record -> fields
// ------------------------------------------------------------------------------------------------

/// Recognised values pulled out of a [`LogRecord`], plus everything else.
#[derive(Debug, Default)]
struct Claimed<'a> {
    id: Option<u64>,
    time: Option<u64>,
    nano: Option<u32>,
    level: Option<u16>,
    pid: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    read_uid: Option<u32>,
    read_gid: Option<u32>,
    ref_pid: Option<u32>,
    host: Option<&'a str>,
    sender: Option<&'a str>,
    facility: Option<&'a str>,
    message: Option<&'a str>,
    ref_proc: Option<&'a str>,
    session: Option<&'a str>,
    custom: Vec<(&'a str, &'a str)>,
}

impl<'a> Claimed<'a> {
    /// Only the first occurrence of a well-known key can fill its fixed
    /// field.  If that occurrence is not claimable, it and every later
    /// occurrence stay pairs, so values keep their relative order.
    /// `ASLMessageID` is never kept as a pair.
    fn from_record(record: &'a LogRecord, preserve_id: bool) -> Result<Self, StoreError> {
        let mut c = Self::default();
        let mut seen: Vec<&'a str> = Vec::new();
        for (key, value) in record.iter() {
            if key.is_empty() {
                return Err(StoreError::InvalidArgument("record key is empty".into()));
            }
            let first = !seen.contains(&key);
            let claimed = match key {
                keys::MSG_ID => {
                    if preserve_id && first {
                        claim_number(&mut c.id, value, UNSET_ID);
                    }
                    Some(true)
                }
                keys::TIME => Some(first && claim_number(&mut c.time, value, u64::MAX)),
                keys::TIME_NANOSEC => Some(first && claim_number(&mut c.nano, value, UNSET_U32)),
                keys::LEVEL => Some(first && claim_number(&mut c.level, value, UNSET_LEVEL)),
                keys::PID => Some(first && claim_number(&mut c.pid, value, UNSET_U32)),
                keys::UID => Some(first && claim_number(&mut c.uid, value, UNSET_U32)),
                keys::GID => Some(first && claim_number(&mut c.gid, value, UNSET_U32)),
                keys::READ_UID => Some(first && claim_number(&mut c.read_uid, value, UNSET_U32)),
                keys::READ_GID => Some(first && claim_number(&mut c.read_gid, value, UNSET_U32)),
                keys::REF_PID => Some(first && claim_number(&mut c.ref_pid, value, UNSET_U32)),
                keys::HOST => Some(first && claim_str(&mut c.host, value)),
                keys::SENDER => Some(first && claim_str(&mut c.sender, value)),
                keys::FACILITY => Some(first && claim_str(&mut c.facility, value)),
                keys::MESSAGE => Some(first && claim_str(&mut c.message, value)),
                keys::REF_PROC => Some(first && claim_str(&mut c.ref_proc, value)),
                keys::SESSION => Some(first && claim_str(&mut c.session, value)),
                _ => None,
            };
            if claimed.is_some() && first {
                seen.push(key);
            }
            if claimed != Some(true) {
                c.custom.push((key, value));
            }
        }
        Ok(c)
    }
}

/// Fills `slot` from `value` if `value` is the canonical rendering of a
/// number and that number is not the unset sentinel.
fn claim_number<T>(slot: &mut Option<T>, value: &str, unset: T) -> bool
where
    T: FromStr + PartialEq + Display,
{
    match value.parse::<T>() {
        Ok(n) if n != unset && n.to_string() == value => {
            *slot = Some(n);
            true
        }
        _ => false,
    }
}

fn claim_str<'a>(slot: &mut Option<&'a str>, value: &'a str) -> bool {
    *slot = Some(value);
    true
}

// ------------------------------------------------------------------------------------------------
// Store operations
// ------------------------------------------------------------------------------------------------

impl Store {
    /// Appends `record` and returns its identifier.
    ///
    /// With `preserve_id`, a canonical `ASLMessageID` value in the record is
    /// kept (and observed by the allocator); otherwise a fresh identifier is
    /// allocated.  Records without a usable `Time` are stamped with the
    /// current time.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AccessDenied`] on a read handle.
    /// - [`StoreError::InvalidArgument`] if any key is empty.
    /// - [`StoreError::WriteFailed`] if the file cannot be written.
    pub fn append(&mut self, record: &LogRecord, preserve_id: bool) -> Result<u64, StoreError> {
        self.ensure_writable()?;
        let claimed = Claimed::from_record(record, preserve_id)?;

        let kv_count = claimed
            .custom
            .len()
            .checked_mul(2)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|&n| n <= (u32::MAX - MESSAGE_FIXED_LEN) / 8)
            .ok_or_else(|| StoreError::InvalidArgument("too many key/value pairs".into()))?;

        let host = self.encode_optional(claimed.host)?;
        let sender = self.encode_optional(claimed.sender)?;
        let facility = self.encode_optional(claimed.facility)?;
        let message = self.encode_optional(claimed.message)?;
        let ref_proc = self.encode_optional(claimed.ref_proc)?;
        let session = self.encode_optional(claimed.session)?;

        let mut pairs = Vec::with_capacity(claimed.custom.len());
        for (key, value) in &claimed.custom {
            pairs.push((self.encode_string(key)?, self.encode_string(value)?));
        }

        let ids = self
            .ids
            .clone()
            .ok_or_else(|| StoreError::AccessDenied("handle has no identifier source".into()))?;
        let id = match claimed.id {
            Some(id) => {
                ids.observe(id);
                id
            }
            None => ids.allocate(),
        };

        let mut flags = 0;
        if claimed.read_uid.is_some() {
            flags |= FLAG_READ_UID_SET;
        }
        if claimed.read_gid.is_some() {
            flags |= FLAG_READ_GID_SET;
        }

        let fields = MessageFields {
            next: Offset::NULL,
            id,
            time: claimed.time.unwrap_or_else(now_seconds),
            nano: claimed.nano.unwrap_or(UNSET_U32),
            level: claimed.level.unwrap_or(UNSET_LEVEL),
            flags,
            pid: claimed.pid.unwrap_or(UNSET_U32),
            uid: claimed.uid.unwrap_or(UNSET_U32),
            gid: claimed.gid.unwrap_or(UNSET_U32),
            read_uid: claimed.read_uid.unwrap_or(UNSET_U32),
            read_gid: claimed.read_gid.unwrap_or(UNSET_U32),
            ref_pid: claimed.ref_pid.unwrap_or(UNSET_U32),
            kv_count,
            host,
            sender,
            facility,
            message,
            ref_proc,
            session,
        };
        let previous = self.header.last;

        let mut buf = std::mem::take(&mut self.scratch);
        buf.clear();
        let written = serialize_message(&mut buf, &fields, &pairs, previous)
            .map_err(StoreError::from)
            .and_then(|()| self.append_bytes(&buf));
        self.scratch = buf;
        let offset = written?;

        self.link_tail(previous, offset)?;
        self.sync_if_configured()?;

        trace!(id, offset = %offset, "appended log record");
        Ok(id)
    }

    /// Decodes the log record at `offset`.
    ///
    /// Either the whole record is returned or [`StoreError::ReadFailed`];
    /// partially decoded records never escape.
    pub fn fetch(&self, offset: Offset) -> Result<LogRecord, StoreError> {
        self.ensure_open()?;
        let (tag, len) = self.read_prefix(offset)?;
        if tag != TYPE_MESSAGE {
            return Err(StoreError::read_failed(
                offset,
                format!("expected a log record, found record type {tag}"),
            ));
        }
        if len < MESSAGE_FIXED_LEN {
            return Err(StoreError::read_failed(
                offset,
                format!("log record length {len} is below the fixed size"),
            ));
        }

        let body_at = offset
            .checked_add(RECORD_PREFIX_LEN)
            .ok_or_else(|| StoreError::read_failed(offset, "offset overflow"))?;
        let body = self.read_vec(body_at, len as usize)?;
        let corrupt = |e: EncodingError| StoreError::read_failed(offset, e.to_string());

        let (fields, mut off) = MessageFields::decode_from(&body).map_err(corrupt)?;
        if fields.kv_count % 2 != 0 {
            return Err(StoreError::read_failed(
                offset,
                format!("odd key/value count {}", fields.kv_count),
            ));
        }
        let expected = u64::from(MESSAGE_FIXED_LEN) + 8 * u64::from(fields.kv_count);
        if expected != u64::from(len) {
            return Err(StoreError::read_failed(
                offset,
                format!(
                    "declared length {len} does not match {} key/value references",
                    fields.kv_count
                ),
            ));
        }

        let mut record = LogRecord::new();
        record.push(keys::MSG_ID, fields.id.to_string());
        record.push(keys::TIME, fields.time.to_string());
        if fields.nano != UNSET_U32 {
            record.push(keys::TIME_NANOSEC, fields.nano.to_string());
        }
        self.push_string(&mut record, keys::HOST, fields.host)?;
        self.push_string(&mut record, keys::SENDER, fields.sender)?;
        self.push_string(&mut record, keys::FACILITY, fields.facility)?;
        push_number(&mut record, keys::PID, fields.pid);
        push_number(&mut record, keys::UID, fields.uid);
        push_number(&mut record, keys::GID, fields.gid);
        if fields.level != UNSET_LEVEL {
            record.push(keys::LEVEL, fields.level.to_string());
        }
        self.push_string(&mut record, keys::MESSAGE, fields.message)?;
        if fields.flags & FLAG_READ_UID_SET != 0 {
            push_number(&mut record, keys::READ_UID, fields.read_uid);
        }
        if fields.flags & FLAG_READ_GID_SET != 0 {
            push_number(&mut record, keys::READ_GID, fields.read_gid);
        }
        self.push_string(&mut record, keys::SESSION, fields.session)?;
        push_number(&mut record, keys::REF_PID, fields.ref_pid);
        self.push_string(&mut record, keys::REF_PROC, fields.ref_proc)?;

        for _ in 0..fields.kv_count / 2 {
            let (key_ref, n) = StringRef::decode_from(&body[off..]).map_err(corrupt)?;
            off += n;
            let (value_ref, n) = StringRef::decode_from(&body[off..]).map_err(corrupt)?;
            off += n;

            let key = self
                .decode_string(key_ref)?
                .ok_or_else(|| StoreError::read_failed(offset, "null key reference"))?;
            let value = self.decode_string(value_ref)?.unwrap_or_default();
            record.push(key, value);
        }

        Ok(record)
    }

    /// Links the record at `offset` after `previous` (or as the head) and
    /// makes it the tail.  The in-memory header changes only once both
    /// patches are on disk, so a failed link is retried by the next append.
    pub(crate) fn link_tail(&mut self, previous: Offset, offset: Offset) -> Result<(), StoreError> {
        let mut header = self.header;
        if previous.is_null() {
            self.patch_u64(Offset::new(HEADER_FIRST_AT), offset.get())?;
            header.first = offset;
        } else {
            let next_at = previous
                .checked_add(NEXT_FIELD)
                .ok_or_else(|| StoreError::InvalidStore(format!("tail offset {previous} overflows")))?;
            self.patch_u64(next_at, offset.get())?;
        }
        self.patch_u64(Offset::new(HEADER_LAST_AT), offset.get())?;
        header.last = offset;
        self.header = header;
        Ok(())
    }

    fn encode_optional(&mut self, value: Option<&str>) -> Result<StringRef, StoreError> {
        match value {
            Some(v) => self.encode_string(v),
            None => Ok(StringRef::NONE),
        }
    }

    fn push_string(
        &self,
        record: &mut LogRecord,
        key: &str,
        reference: StringRef,
    ) -> Result<(), StoreError> {
        if let Some(value) = self.decode_string(reference)? {
            record.push(key, value);
        }
        Ok(())
    }
}

fn push_number(record: &mut LogRecord, key: &str, value: u32) {
    if value != UNSET_U32 {
        record.push(key, value.to_string());
    }
}

fn serialize_message(
    buf: &mut Vec<u8>,
    fields: &MessageFields,
    pairs: &[(StringRef, StringRef)],
    previous: Offset,
) -> Result<(), EncodingError> {
    let len = MESSAGE_FIXED_LEN + 8 * fields.kv_count;
    TYPE_MESSAGE.encode_to(buf)?;
    len.encode_to(buf)?;
    fields.encode_to(buf)?;
    for (key, value) in pairs {
        key.encode_to(buf)?;
        value.encode_to(buf)?;
    }
    previous.encode_to(buf)?;
    Ok(())
}
