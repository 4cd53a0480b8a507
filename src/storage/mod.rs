//! Durable snapshot persistence.
//!
//! Snapshots are appended as newline-terminated records to a file in the
//! storage directory. The file is named `snapshots-<unix-nanos>` after the
//! timestamp of the record that created it. Once it reaches the configured
//! size it is renamed to `snapshots-<created-nanos>-<rotated-nanos>` and a new
//! file is started, so sorting by creation timestamp restores record order.
//!
//! Filesystem access goes through the [`FileSystem`] trait so rotation can be
//! exercised without touching a disk.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

mod rotating;

pub use rotating::RotatingLog;

/// Prefix shared by every snapshot file name
pub const FILE_PREFIX: &str = "snapshots";

/// Open file handle of the log
pub type LogWriter = Box<dyn Write + Send>;

/// Append-only destination of serialized snapshots
pub trait SnapshotStore: Send + Sync {
    /// Appends one record, stamped with `timestamp`.
    ///
    /// # Arguments
    ///
    /// * `record` - serialized snapshot, without trailing newline
    /// * `timestamp` - time used to name a file created by this call
    ///
    /// # Returns
    ///
    /// An error on any filesystem failure. The record is not retried.
    fn save(&self, record: &[u8], timestamp: SystemTime) -> Result<()>;
}

/// Filesystem operations used by the log store
#[cfg_attr(test, automock)]
pub trait FileSystem: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Opens `path` for appending, creating it if needed, and returns the
    /// handle with the current file size.
    fn open_append(&self, path: &Path) -> io::Result<(LogWriter, u64)>;
}

/// [`FileSystem`] backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn open_append(&self, path: &Path) -> io::Result<(LogWriter, u64)> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        Ok((Box::new(file), size))
    }
}

/// Name of a freshly created snapshot file
pub fn active_file_name(created: u128) -> String {
    format!("{FILE_PREFIX}-{created}")
}

/// Name of a snapshot file after rotation
pub fn rotated_file_name(created: u128, rotated: u128) -> String {
    format!("{FILE_PREFIX}-{created}-{rotated}")
}

/// Creation timestamp encoded in a snapshot file name, if it is one
pub fn created_at(file_name: &str) -> Option<u128> {
    let rest = file_name.strip_prefix(FILE_PREFIX)?.strip_prefix('-')?;
    rest.split('-').next()?.parse().ok()
}
