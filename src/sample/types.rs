use serde::{Deserialize, Serialize};

/// Maximum number of entries kept in each top-talkers list
pub const TOP_TALKERS_LIMIT: usize = 5;

/// System load average over the usual 1, 5 and 15 minute windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    /// Load average over the last minute
    pub one: f64,
    /// Load average over the last 5 minutes
    pub five: f64,
    /// Load average over the last 15 minutes
    pub fifteen: f64,
}

impl LoadAverage {
    pub fn new(one: f64, five: f64, fifteen: f64) -> Self {
        Self { one, five, fifteen }
    }
}

/// Global CPU usage split into busy and idle time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Percentage of CPU time spent doing work
    pub busy_percent: f64,
    /// Percentage of CPU time spent idle
    pub idle_percent: f64,
}

impl CpuUsage {
    /// Builds a usage record from the busy percentage, deriving idle time
    pub fn from_busy(busy_percent: f64) -> Self {
        let busy_percent = busy_percent.clamp(0.0, 100.0);
        Self { busy_percent, idle_percent: 100.0 - busy_percent }
    }
}

/// Block device transfer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    /// Average size of one transfer in kilobytes
    pub kb_per_transfer: f64,
    /// Throughput in megabytes per second
    pub mb_per_second: f64,
    /// Transfers issued per second
    pub transfers_per_second: f64,
}

/// One entry of a network top-talkers list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTalker {
    /// Name of the talker (interface or process)
    pub name: String,
    /// Bytes received since the previous scrape
    pub bytes_in: u64,
    /// Bytes sent since the previous scrape
    pub bytes_out: u64,
}

/// Heaviest network talkers, ranked by inbound and by outbound traffic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTopTalkers {
    pub by_bytes_in: Vec<NetworkTalker>,
    pub by_bytes_out: Vec<NetworkTalker>,
}

impl NetworkTopTalkers {
    /// Ranks the given talkers in both directions, keeping at most
    /// [`TOP_TALKERS_LIMIT`] entries per list
    pub fn rank(talkers: Vec<NetworkTalker>) -> Self {
        let mut by_bytes_in = talkers.clone();
        by_bytes_in.sort_by(|a, b| b.bytes_in.cmp(&a.bytes_in).then_with(|| a.name.cmp(&b.name)));
        by_bytes_in.truncate(TOP_TALKERS_LIMIT);

        let mut by_bytes_out = talkers;
        by_bytes_out.sort_by(|a, b| b.bytes_out.cmp(&a.bytes_out).then_with(|| a.name.cmp(&b.name)));
        by_bytes_out.truncate(TOP_TALKERS_LIMIT);

        Self { by_bytes_in, by_bytes_out }
    }
}

/// Space usage of one mounted filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemUsage {
    pub mount_point: String,
    pub file_system: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl FileSystemUsage {
    /// Used space as a percentage of the total
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Mounted filesystems at scrape time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemInfo {
    pub filesystems: Vec<FileSystemUsage>,
}
