//! Store lifecycle tests: create, reopen, validation, close.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::store::header::{HEADER_LEN, MARKER};
    use crate::store::tests::helpers::*;
    use crate::store::{AccessMode, Cursor, IdAllocator, Store};
    use crate::{StoreConfig, StoreError};
    use tempfile::TempDir;

    // ================================================================
    // 1. Creation
    // ================================================================

    #[test]
    fn create_writes_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.asl");

        let before = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        let store = open_writer(&path);
        let after = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();

        assert_eq!(store.mode(), AccessMode::Write);
        assert_eq!(store.file_size(), HEADER_LEN);
        assert!((before..=after).contains(&store.creation_time()));
        assert!(store.header().first.is_null());
        assert!(store.header().last.is_null());

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN as usize);
        assert_eq!(&bytes[..12], &MARKER);
        assert_eq!(&bytes[12..16], &2u32.to_be_bytes());
        assert_eq!(bytes[36], 0xff);
        assert!(bytes[45..].iter().all(|&b| b == 0));
    }

    #[test]
    fn create_applies_file_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mode.asl");
        let config = StoreConfig {
            file_mode: 0o600,
            ..StoreConfig::default()
        };
        open_writer_with(&path, &config);

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            string_cache_size: 0,
            ..StoreConfig::default()
        };
        let err = Store::open_for_write(
            dir.path().join("x.asl"),
            &config,
            Arc::new(IdAllocator::new()),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)), "{err:?}");
    }

    #[test]
    fn header_keeps_creation_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.asl");
        let config = StoreConfig {
            string_cache_size: 5,
            filter_mask: 0b0000_0111,
            ..StoreConfig::default()
        };
        open_writer_with(&path, &config).close().unwrap();

        let store = open_writer(&path);
        assert_eq!(store.header().string_cache_size, 5);
        assert_eq!(store.header().filter_mask, 0b0000_0111);
        assert!(store.accepts_level(0));
        assert!(store.accepts_level(2));
        assert!(!store.accepts_level(3));
        assert!(!store.accepts_level(7));
    }

    // ================================================================
    // 2. Reopen
    // ================================================================

    #[test]
    fn reopen_continues_after_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("re.asl");
        write_messages(&path, &["a", "b", "c"]);

        let mut store = open_writer(&path);
        assert_eq!(store.append(&message("d"), false).unwrap(), 4);
        store.close().unwrap();

        let mut reader = open_reader(&path);
        assert_eq!(ids_forward(&mut reader), [1, 2, 3, 4]);
        assert_eq!(reader.to_last().unwrap(), 4);
        assert_eq!(reader.read_current().unwrap().message(), Some("d"));
    }

    #[test]
    fn reopen_with_clock_allocator_stays_monotonic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clock.asl");
        write_messages(&path, &["a"]);

        let mut store = Store::open_for_write(
            &path,
            &StoreConfig::default(),
            Arc::new(IdAllocator::seeded_from_clock()),
        )
        .unwrap();
        let id = store.append(&message("b"), false).unwrap();
        assert!(id > 1);
    }

    #[test]
    fn read_handle_reports_mode_and_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.asl");
        write_messages(&path, &["a"]);

        let reader = open_reader(&path);
        assert_eq!(reader.mode(), AccessMode::Read);
        assert_eq!(reader.file_size(), fs::metadata(&path).unwrap().len());
        assert_eq!(reader.path(), path.as_path());
    }

    // ================================================================
    // 3. Validation
    // ================================================================

    #[test]
    fn bad_marker_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.asl");
        write_messages(&path, &["a"]);
        patch(&path, 0, b"NOT A STORE!");

        assert!(matches!(Store::open_for_read(&path), Err(StoreError::InvalidStore(_))));
        let err = Store::open_for_write(&path, &StoreConfig::default(), Arc::new(IdAllocator::new()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidStore(_)), "{err:?}");
    }

    #[test]
    fn unknown_version_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v7.asl");
        write_messages(&path, &["a"]);
        patch_u32(&path, 12, 7);

        assert!(matches!(Store::open_for_read(&path), Err(StoreError::InvalidStore(_))));
    }

    #[test]
    fn legacy_version_is_read_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v1.asl");
        write_messages(&path, &["a"]);
        patch_u32(&path, 12, 1);

        assert!(matches!(
            Store::open_for_read(&path),
            Err(StoreError::LegacyFormat { version: 1 })
        ));
        let err = Store::open_for_write(&path, &StoreConfig::default(), Arc::new(IdAllocator::new()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidStore(_)), "{err:?}");
    }

    #[test]
    fn file_shorter_than_header_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.asl");
        fs::write(&path, &MARKER).unwrap();

        assert!(matches!(Store::open_for_read(&path), Err(StoreError::InvalidStore(_))));
        let err = Store::open_for_write(&path, &StoreConfig::default(), Arc::new(IdAllocator::new()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidStore(_)), "{err:?}");
    }

    #[test]
    fn missing_file_for_read_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = Store::open_for_read(dir.path().join("absent.asl")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)), "{err:?}");
    }

    #[test]
    fn head_out_of_bounds_rejected_for_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("head.asl");
        write_messages(&path, &["a"]);
        patch_u64(&path, 16, 1 << 40);

        let err = Store::open_for_write(&path, &StoreConfig::default(), Arc::new(IdAllocator::new()))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidStore(_)), "{err:?}");
    }

    // ================================================================
    // 4. Close
    // ================================================================

    #[test]
    fn close_is_idempotent_and_final() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("close.asl");
        let mut store = open_writer(&path);
        store.append(&message("a"), false).unwrap();

        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());

        assert!(matches!(store.append(&message("b"), false), Err(StoreError::Closed)));
        assert!(matches!(store.to_first(), Err(StoreError::Closed)));
        assert!(matches!(store.fetch(store.header().first), Err(StoreError::Closed)));
    }

    #[test]
    fn sync_writes_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.asl");
        let config = StoreConfig {
            sync_writes: true,
            ..StoreConfig::default()
        };
        let mut store = open_writer_with(&path, &config);
        store.append(&message("durable"), false).unwrap();
        store.close().unwrap();

        let mut reader = open_reader(&path);
        reader.to_first().unwrap();
        assert_eq!(reader.read_current().unwrap().message(), Some("durable"));
    }
}
