use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::Mutex;

use super::{active_file_name, rotated_file_name, FileSystem, LogWriter, OsFileSystem, SnapshotStore};
use crate::config::DiskStorageSection;
use crate::error::{Error, Result};
use crate::sample::unix_nanos_of;

struct LogCursor {
    path: PathBuf,
    created: u128,
    file: LogWriter,
    size: u64,
}

impl LogCursor {
    fn append(&mut self, record: &[u8]) -> Result<()> {
        let mut line = Vec::with_capacity(record.len() + 1);
        line.extend_from_slice(record);
        line.push(b'\n');

        // Counted even on failure so a broken file still rotates away.
        self.size += line.len() as u64;
        let written = self.file.write_all(&line).and_then(|()| self.file.flush());
        written.map_err(|err| Error::storage(&self.path, err))
    }
}

/// Size-rotated, append-only snapshot log
pub struct RotatingLog<F = OsFileSystem> {
    dir: PathBuf,
    max_size: u64,
    fs: F,
    cursor: Mutex<Option<LogCursor>>,
}

impl RotatingLog<OsFileSystem> {
    pub fn new(dir: impl Into<PathBuf>, max_size: u64) -> Self {
        Self::with_file_system(dir, max_size, OsFileSystem)
    }

    pub fn from_config(config: &DiskStorageSection) -> Self {
        Self::new(&config.snapshots_storage_path, config.maximum_size_of_snapshot_file)
    }
}

impl<F: FileSystem> RotatingLog<F> {
    pub fn with_file_system(dir: impl Into<PathBuf>, max_size: u64, fs: F) -> Self {
        Self { dir: dir.into(), max_size: max_size.max(1), fs, cursor: Mutex::new(None) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file the next record goes to, if one is open
    pub fn current_path(&self) -> Option<PathBuf> {
        self.cursor.lock().as_ref().map(|cursor| cursor.path.clone())
    }

    fn open(&self, created: u128) -> Result<LogCursor> {
        self.fs.create_dir_all(&self.dir).map_err(|err| Error::storage(&self.dir, err))?;

        let path = self.dir.join(active_file_name(created));
        let (file, size) = self.fs.open_append(&path).map_err(|err| Error::storage(&path, err))?;
        tracing::debug!(path = %path.display(), size, "snapshot file opened");
        Ok(LogCursor { path, created, file, size })
    }

    fn rename_rotated(&self, cursor: &LogCursor, rotated: u128) -> Result<()> {
        let target = self.dir.join(rotated_file_name(cursor.created, rotated));
        self.fs.rename(&cursor.path, &target).map_err(|err| Error::storage(&cursor.path, err))?;
        tracing::info!(
            from = %cursor.path.display(),
            to = %target.display(),
            size = cursor.size,
            "snapshot file rotated"
        );
        Ok(())
    }
}

impl<F: FileSystem> SnapshotStore for RotatingLog<F> {
    fn save(&self, record: &[u8], timestamp: SystemTime) -> Result<()> {
        let nanos = unix_nanos_of(timestamp);
        let mut cursor = self.cursor.lock();

        let mut current = match cursor.take() {
            Some(full) if full.size >= self.max_size => {
                if let Err(err) = self.rename_rotated(&full, nanos) {
                    *cursor = Some(full);
                    return Err(err);
                }
                drop(full);
                self.open(nanos)?
            },
            Some(open) => open,
            None => self.open(nanos)?,
        };

        let written = current.append(record);
        *cursor = Some(current);
        written
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::Path;
    use std::time::{Duration, UNIX_EPOCH};

    use mockall::predicate::*;

    use super::*;
    use crate::storage::{created_at, MockFileSystem};

    fn at(nanos: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(nanos)
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort_by_key(|name| created_at(name));
        names
    }

    #[test]
    fn test_first_save_creates_directory_and_file() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("snapshots");
        let log = RotatingLog::new(&dir, 1024);
        assert_eq!(log.current_path(), None);

        log.save(b"{\"samples\":1}", at(100)).unwrap();

        assert_eq!(log.current_path(), Some(dir.join("snapshots-100")));
        assert_eq!(std::fs::read_to_string(dir.join("snapshots-100")).unwrap(), "{\"samples\":1}\n");
    }

    #[test]
    fn test_one_rotation_per_threshold_crossing() {
        let dir = tempfile::tempdir().unwrap();
        let log = RotatingLog::new(dir.path(), 20);

        // Every line is exactly 10 bytes.
        for i in 1..=5u64 {
            log.save(format!("record-{i:02}").as_bytes(), at(i)).unwrap();
        }

        assert_eq!(file_names(dir.path()), vec!["snapshots-1-3", "snapshots-3-5", "snapshots-5"]);
        assert_eq!(log.current_path(), Some(dir.path().join("snapshots-5")));
    }

    #[test]
    fn test_records_survive_rotation_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = RotatingLog::new(dir.path(), 64);

        let records: Vec<String> = (0..50).map(|i| format!("{{\"samples\":{i}}}")).collect();
        for (i, record) in records.iter().enumerate() {
            log.save(record.as_bytes(), at(1_000 + i as u64)).unwrap();
        }

        let names = file_names(dir.path());
        assert!(names.len() > 1);

        let mut recovered = Vec::new();
        for name in names {
            let contents = std::fs::read_to_string(dir.path().join(name)).unwrap();
            recovered.extend(contents.lines().map(str::to_string));
        }
        assert_eq!(recovered, records);
    }

    #[test]
    fn test_existing_file_size_counts_towards_rotation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("snapshots-7"), vec![b'x'; 32]).unwrap();
        let log = RotatingLog::new(dir.path(), 32);

        log.save(b"a", at(7)).unwrap();
        log.save(b"b", at(8)).unwrap();

        assert_eq!(file_names(dir.path()), vec!["snapshots-7-8", "snapshots-8"]);
    }

    #[test]
    fn test_directory_failure_is_reported_and_retried() {
        let mut fs = MockFileSystem::new();
        let mut calls = 0;
        fs.expect_create_dir_all().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            } else {
                Ok(())
            }
        });
        fs.expect_open_append().times(1).returning(|_| Ok((Box::new(io::sink()) as LogWriter, 0)));

        let log = RotatingLog::with_file_system("/data", 100, fs);
        let err = log.save(b"lost", at(1)).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        assert_eq!(log.current_path(), None);

        log.save(b"kept", at(2)).unwrap();
        assert_eq!(log.current_path(), Some(PathBuf::from("/data/snapshots-2")));
    }

    #[test]
    fn test_failed_rename_keeps_current_file() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_open_append()
            .with(eq(PathBuf::from("/data/snapshots-1")))
            .times(1)
            .returning(|_| Ok((Box::new(io::sink()) as LogWriter, 0)));
        fs.expect_rename()
            .with(eq(PathBuf::from("/data/snapshots-1")), eq(PathBuf::from("/data/snapshots-1-2")))
            .times(1)
            .returning(|_, _| Err(io::Error::from(io::ErrorKind::Other)));

        let log = RotatingLog::with_file_system("/data", 4, fs);
        log.save(b"full", at(1)).unwrap();

        assert!(log.save(b"next", at(2)).is_err());
        assert_eq!(log.current_path(), Some(PathBuf::from("/data/snapshots-1")));
    }

    #[test]
    fn test_failed_open_after_rotation_starts_over() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_rename().times(1).returning(|_, _| Ok(()));
        let mut opened = 0;
        fs.expect_open_append().times(3).returning(move |_| {
            opened += 1;
            if opened == 2 {
                Err(io::Error::from(io::ErrorKind::Other))
            } else {
                Ok((Box::new(io::sink()) as LogWriter, 0))
            }
        });

        let log = RotatingLog::with_file_system("/data", 1, fs);
        log.save(b"one", at(1)).unwrap();
        assert!(log.save(b"two", at(2)).is_err());
        assert_eq!(log.current_path(), None);

        log.save(b"three", at(3)).unwrap();
        assert_eq!(log.current_path(), Some(PathBuf::from("/data/snapshots-3")));
    }
}
