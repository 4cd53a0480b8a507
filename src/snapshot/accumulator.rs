use std::time::SystemTime;

use crate::sample::{
    CpuUsage, DiskUsage, FileSystemInfo, LoadAverage, MetricGroups, NetworkTopTalkers, Sample, Snapshot,
};

/// Running sum of one numeric metric group and the number of samples that
/// carried it
#[derive(Debug, Clone, Copy, PartialEq)]
struct GroupSum<const N: usize> {
    sums: [f64; N],
    count: u64,
}

impl<const N: usize> Default for GroupSum<N> {
    fn default() -> Self {
        Self { sums: [0.0; N], count: 0 }
    }
}

impl<const N: usize> GroupSum<N> {
    fn add(&mut self, values: [f64; N]) {
        for (sum, value) in self.sums.iter_mut().zip(values) {
            *sum += value;
        }
        self.count += 1;
    }

    fn mean(&self) -> Option<[f64; N]> {
        if self.count == 0 {
            return None;
        }
        let count = self.count as f64;
        Some(self.sums.map(|sum| sum / count))
    }
}

/// Window state of the aggregator.
///
/// Numeric groups are summed and later divided by the number of samples that
/// carried each group. Top talkers and filesystem info are not averageable and
/// keep the last value seen in the window.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    load_average: GroupSum<3>,
    cpu_usage: GroupSum<2>,
    disk_usage: GroupSum<3>,
    network_talkers: Option<NetworkTopTalkers>,
    filesystems: Option<FileSystemInfo>,
    count: u64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds every present group of `sample` into the window
    pub fn fold(&mut self, sample: &Sample) {
        let metrics = &sample.metrics;
        if let Some(load) = metrics.load_average {
            self.load_average.add([load.one, load.five, load.fifteen]);
        }
        if let Some(cpu) = metrics.cpu_usage {
            self.cpu_usage.add([cpu.busy_percent, cpu.idle_percent]);
        }
        if let Some(disk) = metrics.disk_usage {
            self.disk_usage.add([disk.kb_per_transfer, disk.mb_per_second, disk.transfers_per_second]);
        }
        if let Some(talkers) = &metrics.network_talkers {
            self.network_talkers = Some(talkers.clone());
        }
        if let Some(filesystems) = &metrics.filesystems {
            self.filesystems = Some(filesystems.clone());
        }
        self.count += 1;
    }

    /// Number of samples folded since the last reset
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Averages the window into a snapshot stamped `at`, or `None` when no
    /// sample was folded
    pub fn mean(&self, at: SystemTime) -> Option<Snapshot> {
        if self.is_empty() {
            return None;
        }

        let metrics = MetricGroups {
            load_average: self.load_average.mean().map(|[one, five, fifteen]| LoadAverage { one, five, fifteen }),
            cpu_usage: self.cpu_usage.mean().map(|[busy, idle]| CpuUsage { busy_percent: busy, idle_percent: idle }),
            disk_usage: self.disk_usage.mean().map(|[kb_per_transfer, mb_per_second, transfers_per_second]| DiskUsage {
                kb_per_transfer,
                mb_per_second,
                transfers_per_second,
            }),
            network_talkers: self.network_talkers.clone(),
            filesystems: self.filesystems.clone(),
        };

        Some(Snapshot { timestamp: at, samples: self.count, metrics })
    }

    /// Computes the window snapshot and resets the window in one step.
    ///
    /// The window is only reset when a snapshot is produced; an empty window is
    /// already zeroed.
    pub fn take(&mut self, at: SystemTime) -> Option<Snapshot> {
        let snapshot = self.mean(at)?;
        *self = Self::default();
        Some(snapshot)
    }
}
