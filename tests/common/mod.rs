#![allow(dead_code, unused_imports)]

pub mod builders;
pub mod mocks;

use std::path::Path;

use sys_exporter::sample::Snapshot;
use sys_exporter::storage::created_at;

pub use builders::config::TestConfigBuilder;
pub use mocks::source::{FixedSource, FlakySource};

/// Reads every record of a snapshot directory, files in creation order
pub fn read_snapshot_log(dir: &Path) -> Vec<Snapshot> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| created_at(name).is_some())
        .collect();
    names.sort_by_key(|name| created_at(name));

    names
        .iter()
        .flat_map(|name| {
            let contents = std::fs::read_to_string(dir.join(name)).unwrap();
            contents.lines().map(|line| serde_json::from_str(line).unwrap()).collect::<Vec<Snapshot>>()
        })
        .collect()
}

/// Counts complete records across a snapshot directory without parsing them
pub fn count_records(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| std::fs::read(entry.ok()?.path()).ok())
            .map(|contents| contents.iter().filter(|byte| **byte == b'\n').count())
            .sum(),
        Err(_) => 0,
    }
}
