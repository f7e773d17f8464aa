//! `MergeIter` ordering tests.
//!
//! ## Coverage
//! - k files with interleaved identifiers merge into one ordered stream,
//!   forward and backward
//! - equal identifiers come out in source order
//! - the iterator is lazy and drops exhausted sources

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use rand::Rng;
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    use crate::merge::MergeIter;
    use crate::record::{LogRecord, keys};
    use crate::store::{Direction, IdAllocator, Store};
    use crate::{Reader, StoreConfig};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// Spreads `total` records randomly over `files` stores sharing one
    /// allocator, so identifiers are disjoint and interleaved.
    fn interleaved(dir: &Path, files: usize, total: usize) -> Vec<PathBuf> {
        init_tracing();
        let ids = Arc::new(IdAllocator::new());
        let paths: Vec<PathBuf> = (0..files).map(|i| dir.join(format!("f{i}.asl"))).collect();
        let mut stores: Vec<Store> = paths
            .iter()
            .map(|p| Store::open_for_write(p, &StoreConfig::default(), ids.clone()).unwrap())
            .collect();

        let mut rng = rand::rng();
        for i in 0..total {
            let target = rng.random_range(0..files);
            let record = LogRecord::new()
                .with(keys::MESSAGE, format!("record {i}"))
                .with("File", target.to_string());
            stores[target].append(&record, false).unwrap();
        }
        for store in &mut stores {
            store.close().unwrap();
        }
        paths
    }

    fn open_all(paths: &[PathBuf]) -> Vec<Reader> {
        paths.iter().map(|p| Reader::open(p).unwrap()).collect()
    }

    #[test]
    fn forward_merge_is_ascending() {
        let dir = TempDir::new().unwrap();
        let paths = interleaved(dir.path(), 5, 300);
        let mut readers = open_all(&paths);

        let ids: Vec<u64> = MergeIter::new(&mut readers, Direction::Forward, 0)
            .unwrap()
            .map(|(id, record)| {
                assert_eq!(record.unwrap().id(), Some(id));
                id
            })
            .collect();

        assert_eq!(ids, (1..=300).collect::<Vec<_>>());
    }

    #[test]
    fn backward_merge_is_descending() {
        let dir = TempDir::new().unwrap();
        let paths = interleaved(dir.path(), 4, 200);
        let mut readers = open_all(&paths);

        let ids: Vec<u64> = MergeIter::new(&mut readers, Direction::Backward, u64::MAX)
            .unwrap()
            .map(|(id, _)| id)
            .collect();

        assert_eq!(ids, (1..=200).rev().collect::<Vec<_>>());
    }

    /// # Scenario
    /// Two files holding the same identifiers (a copy of a file merged
    /// with its original).
    ///
    /// # Expected behavior
    /// Each identifier appears twice, the first file's record first, in
    /// both directions.
    #[test]
    fn ties_break_by_source_order() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for name in ["left", "right"] {
            let path = dir.path().join(format!("{name}.asl"));
            let mut store = Store::open_for_write(
                &path,
                &StoreConfig::default(),
                Arc::new(IdAllocator::new()),
            )
            .unwrap();
            for _ in 0..3 {
                store
                    .append(&LogRecord::new().with(keys::SENDER, name), false)
                    .unwrap();
            }
            store.close().unwrap();
            paths.push(path);
        }

        for (direction, start) in [(Direction::Forward, 0), (Direction::Backward, u64::MAX)] {
            let mut readers = open_all(&paths);
            let seen: Vec<(u64, String)> = MergeIter::new(&mut readers, direction, start)
                .unwrap()
                .map(|(id, r)| (id, r.unwrap().get(keys::SENDER).unwrap().to_string()))
                .collect();

            let mut expected_ids = vec![1, 1, 2, 2, 3, 3];
            if direction == Direction::Backward {
                expected_ids.reverse();
            }
            assert_eq!(seen.iter().map(|(id, _)| *id).collect::<Vec<_>>(), expected_ids);
            for pair in seen.chunks(2) {
                assert_eq!(pair[0].1, "left");
                assert_eq!(pair[1].1, "right");
            }
        }
    }

    #[test]
    fn lazy_iteration_and_exhausted_sources() {
        let dir = TempDir::new().unwrap();
        let paths = interleaved(dir.path(), 3, 30);
        let mut readers = open_all(&paths);

        let mut merged = MergeIter::new(&mut readers, Direction::Forward, 0).unwrap();
        let first_two: Vec<u64> = merged.by_ref().take(2).map(|(id, _)| id).collect();
        assert_eq!(first_two, [1, 2]);

        assert_eq!(merged.by_ref().count(), 28);
        assert_eq!(merged.live_sources(), 0);
    }

    #[test]
    fn sources_without_records_in_range_are_skipped() {
        let dir = TempDir::new().unwrap();
        let paths = interleaved(dir.path(), 3, 30);
        let empty = dir.path().join("empty.asl");
        Store::open_for_write(&empty, &StoreConfig::default(), Arc::new(IdAllocator::new()))
            .unwrap()
            .close()
            .unwrap();

        let mut all = paths.clone();
        all.push(empty);
        let mut readers = open_all(&all);

        let merged = MergeIter::new(&mut readers, Direction::Forward, 25).unwrap();
        assert!(merged.live_sources() <= 3);
        assert_eq!(merged.map(|(id, _)| id).collect::<Vec<_>>(), [25, 26, 27, 28, 29, 30]);
    }
}
