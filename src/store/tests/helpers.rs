use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::record::{LogRecord, keys};
use crate::store::header::HEADER_LEN;
use crate::store::{Cursor, IdAllocator, Store};
use crate::{StoreConfig, StoreError};

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Write handle with the default config and a fresh allocator.
pub fn open_writer(path: &Path) -> Store {
    open_writer_with(path, &StoreConfig::default())
}

pub fn open_writer_with(path: &Path, config: &StoreConfig) -> Store {
    init_tracing();
    Store::open_for_write(path, config, Arc::new(IdAllocator::new())).expect("open for write")
}

pub fn open_reader(path: &Path) -> Store {
    init_tracing();
    Store::open_for_read(path).expect("open for read")
}

/// A record with a fixed timestamp and the given message text.
pub fn message(text: &str) -> LogRecord {
    LogRecord::new()
        .with(keys::TIME, "1700000000")
        .with(keys::MESSAGE, text)
}

/// Creates a store holding one record per text and returns their ids.
pub fn write_messages(path: &Path, texts: &[&str]) -> Vec<u64> {
    let mut store = open_writer(path);
    let ids = texts
        .iter()
        .map(|t| store.append(&message(t), false).expect("append"))
        .collect();
    store.close().expect("close");
    ids
}

/// Identifiers visited walking head to tail.
pub fn ids_forward(cursor: &mut impl Cursor) -> Vec<u64> {
    let mut ids = Vec::new();
    let mut step = cursor.to_first();
    while let Ok(id) = step {
        ids.push(id);
        step = cursor.to_next();
    }
    assert!(matches!(step, Err(StoreError::NoRecords)), "walk ended with {step:?}");
    ids
}

/// Identifiers visited walking tail to head.
pub fn ids_backward(cursor: &mut impl Cursor) -> Vec<u64> {
    let mut ids = Vec::new();
    let mut step = cursor.to_last();
    while let Ok(id) = step {
        ids.push(id);
        step = cursor.to_previous();
    }
    assert!(matches!(step, Err(StoreError::NoRecords)), "walk ended with {step:?}");
    ids
}

/// `(offset, type, payload length)` of every record physically present in
/// the file, reachable or not.
pub fn physical_records(path: &Path) -> Vec<(u64, u16, u32)> {
    let bytes = fs::read(path).expect("read file");
    let mut out = Vec::new();
    let mut off = HEADER_LEN as usize;
    while off + 6 <= bytes.len() {
        let tag = u16::from_be_bytes([bytes[off], bytes[off + 1]]);
        let len = u32::from_be_bytes([bytes[off + 2], bytes[off + 3], bytes[off + 4], bytes[off + 5]]);
        out.push((off as u64, tag, len));
        off += 6 + len as usize;
    }
    out
}

/// Number of string objects physically present in the file.
pub fn string_objects(path: &Path) -> usize {
    physical_records(path)
        .iter()
        .filter(|(_, tag, _)| *tag == 1)
        .count()
}

/// Overwrites bytes in place.
pub fn patch(path: &Path, at: u64, bytes: &[u8]) {
    let file = OpenOptions::new().write(true).open(path).expect("open for patch");
    file.write_all_at(bytes, at).expect("patch");
}

pub fn patch_u64(path: &Path, at: u64, value: u64) {
    patch(path, at, &value.to_be_bytes());
}

pub fn patch_u32(path: &Path, at: u64, value: u32) {
    patch(path, at, &value.to_be_bytes());
}
