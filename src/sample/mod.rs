//! Metric samples and the averaged snapshots built from them.
//!
//! A [`Sample`] is one raw reading produced per scrape tick. Every metric group
//! it carries is optional: a group is `None` when its collector is disabled or
//! failed for that tick. A [`Snapshot`] has the same shape but holds the
//! window average and is stamped with the time it was emitted.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

pub mod types;

pub use types::{
    CpuUsage, DiskUsage, FileSystemInfo, FileSystemUsage, LoadAverage, NetworkTalker, NetworkTopTalkers,
    TOP_TALKERS_LIMIT,
};

/// Identifies one metric group of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    LoadAverage,
    CpuUsage,
    DiskUsage,
    NetworkTopTalkers,
    FileSystemInfo,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 5] = [
        MetricGroup::LoadAverage,
        MetricGroup::CpuUsage,
        MetricGroup::DiskUsage,
        MetricGroup::NetworkTopTalkers,
        MetricGroup::FileSystemInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricGroup::LoadAverage => "load average",
            MetricGroup::CpuUsage => "cpu usage",
            MetricGroup::DiskUsage => "disk usage",
            MetricGroup::NetworkTopTalkers => "network top talkers",
            MetricGroup::FileSystemInfo => "file system info",
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of metric groups carried by a sample or a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricGroups {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_average: Option<LoadAverage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<CpuUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_usage: Option<DiskUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_talkers: Option<NetworkTopTalkers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystems: Option<FileSystemInfo>,
}

impl MetricGroups {
    /// Whether the given group is present
    pub fn has(&self, group: MetricGroup) -> bool {
        match group {
            MetricGroup::LoadAverage => self.load_average.is_some(),
            MetricGroup::CpuUsage => self.cpu_usage.is_some(),
            MetricGroup::DiskUsage => self.disk_usage.is_some(),
            MetricGroup::NetworkTopTalkers => self.network_talkers.is_some(),
            MetricGroup::FileSystemInfo => self.filesystems.is_some(),
        }
    }

    /// Whether no group is present at all
    pub fn is_empty(&self) -> bool {
        MetricGroup::ALL.iter().all(|group| !self.has(*group))
    }
}

/// One raw reading produced per scrape tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the scrape was started
    #[serde(with = "unix_nanos")]
    pub timestamp: SystemTime,
    /// Collected metric groups
    #[serde(flatten)]
    pub metrics: MetricGroups,
}

impl Sample {
    /// Creates an empty sample for a scrape started at `timestamp`
    pub fn new(timestamp: SystemTime) -> Self {
        Self { timestamp, metrics: MetricGroups::default() }
    }

    pub fn with_load_average(mut self, load_average: LoadAverage) -> Self {
        self.metrics.load_average = Some(load_average);
        self
    }

    pub fn with_cpu_usage(mut self, cpu_usage: CpuUsage) -> Self {
        self.metrics.cpu_usage = Some(cpu_usage);
        self
    }

    pub fn with_disk_usage(mut self, disk_usage: DiskUsage) -> Self {
        self.metrics.disk_usage = Some(disk_usage);
        self
    }

    pub fn with_network_talkers(mut self, talkers: NetworkTopTalkers) -> Self {
        self.metrics.network_talkers = Some(talkers);
        self
    }

    pub fn with_filesystems(mut self, filesystems: FileSystemInfo) -> Self {
        self.metrics.filesystems = Some(filesystems);
        self
    }
}

/// Averaged metrics of one aggregation window.
///
/// Snapshots are shared between every downstream consumer behind an `Arc` and
/// are never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Emission time of the snapshot
    #[serde(with = "unix_nanos")]
    pub timestamp: SystemTime,
    /// Number of samples folded into this snapshot
    pub samples: u64,
    /// Window averages
    #[serde(flatten)]
    pub metrics: MetricGroups,
}

impl Snapshot {
    /// Serializes the snapshot into one JSON record without trailing newline
    pub fn to_record(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Nanoseconds since the unix epoch for a point in time, zero before the epoch
pub fn unix_nanos_of(time: SystemTime) -> u128 {
    time.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default()
}

/// Serde helper encoding a `SystemTime` as integer unix nanoseconds
pub(crate) mod unix_nanos {
    use std::time::{Duration, SystemTime};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = u64::try_from(super::unix_nanos_of(*time)).map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(SystemTime::UNIX_EPOCH + Duration::from_nanos(nanos))
    }
}
