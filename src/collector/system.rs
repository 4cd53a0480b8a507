//! Host metric collection through `sysinfo`.
//!
//! Each enabled metric group is gathered on the blocking thread pool so that a
//! slow group does not hold back the others, and a failing group only removes
//! itself from the sample.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Disks, Networks, System};

use super::{export_outcome, MetricFailure, PartialExport, SampleSource};
use crate::config::CollectorSection;
use crate::sample::{
    CpuUsage, FileSystemInfo, FileSystemUsage, LoadAverage, MetricGroup, NetworkTalker, NetworkTopTalkers, Sample,
};

/// Groups this collector knows how to read
const SUPPORTED_GROUPS: [MetricGroup; 4] =
    [MetricGroup::LoadAverage, MetricGroup::CpuUsage, MetricGroup::NetworkTopTalkers, MetricGroup::FileSystemInfo];

/// Reading of a single metric group
#[derive(Debug)]
enum Reading {
    LoadAverage(LoadAverage),
    CpuUsage(CpuUsage),
    NetworkTalkers(NetworkTopTalkers),
    FileSystems(FileSystemInfo),
}

impl Reading {
    fn apply(self, sample: &mut Sample) {
        match self {
            Reading::LoadAverage(value) => sample.metrics.load_average = Some(value),
            Reading::CpuUsage(value) => sample.metrics.cpu_usage = Some(value),
            Reading::NetworkTalkers(value) => sample.metrics.network_talkers = Some(value),
            Reading::FileSystems(value) => sample.metrics.filesystems = Some(value),
        }
    }
}

/// Refreshable sysinfo handles kept between scrapes.
///
/// CPU usage and network traffic are computed from the difference between two
/// refreshes, so the handles must outlive a single scrape.
struct HostState {
    system: Mutex<System>,
    networks: Mutex<Networks>,
}

/// [`SampleSource`] reading the local host through `sysinfo`
pub struct SystemCollector {
    groups: Vec<MetricGroup>,
    state: Arc<HostState>,
}

impl SystemCollector {
    /// Creates a collector for every group enabled in `config`.
    ///
    /// Enabled groups this platform cannot provide are reported once here and
    /// then skipped on every scrape.
    pub fn new(config: &CollectorSection) -> Self {
        let mut groups = Vec::new();
        for group in config.enabled_groups() {
            if SUPPORTED_GROUPS.contains(&group) {
                tracing::debug!(%group, "collector will gather metric group");
                groups.push(group);
            } else {
                tracing::warn!(%group, "metric group is not supported on this platform yet");
            }
        }

        let mut system = System::new();
        system.refresh_cpu_usage();

        let state = Arc::new(HostState {
            system: Mutex::new(system),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        });

        Self { groups, state }
    }

    /// Groups gathered on every scrape
    pub fn groups(&self) -> &[MetricGroup] {
        &self.groups
    }

    fn collect(state: &HostState, group: MetricGroup) -> Result<Reading, String> {
        match group {
            MetricGroup::LoadAverage => {
                if !sysinfo::IS_SUPPORTED_SYSTEM {
                    return Err("platform is not supported by sysinfo".to_string());
                }
                let load = System::load_average();
                Ok(Reading::LoadAverage(LoadAverage::new(load.one, load.five, load.fifteen)))
            },
            MetricGroup::CpuUsage => {
                let mut system = state.system.lock();
                system.refresh_cpu_usage();
                if system.cpus().is_empty() {
                    return Err("no cpus reported".to_string());
                }
                Ok(Reading::CpuUsage(CpuUsage::from_busy(f64::from(system.global_cpu_usage()))))
            },
            MetricGroup::NetworkTopTalkers => {
                let mut networks = state.networks.lock();
                networks.refresh(true);
                let talkers = networks
                    .list()
                    .iter()
                    .map(|(name, data)| NetworkTalker {
                        name: name.clone(),
                        bytes_in: data.received(),
                        bytes_out: data.transmitted(),
                    })
                    .collect();
                Ok(Reading::NetworkTalkers(NetworkTopTalkers::rank(talkers)))
            },
            MetricGroup::FileSystemInfo => {
                let disks = Disks::new_with_refreshed_list();
                let filesystems: Vec<_> = disks
                    .list()
                    .iter()
                    .map(|disk| FileSystemUsage {
                        mount_point: disk.mount_point().display().to_string(),
                        file_system: disk.file_system().to_string_lossy().into_owned(),
                        total_bytes: disk.total_space(),
                        available_bytes: disk.available_space(),
                    })
                    .collect();
                if filesystems.is_empty() {
                    return Err("no mounted filesystems found".to_string());
                }
                Ok(Reading::FileSystems(FileSystemInfo { filesystems }))
            },
            MetricGroup::DiskUsage => Err("disk transfer statistics are not supported".to_string()),
        }
    }
}

#[async_trait]
impl SampleSource for SystemCollector {
    async fn export(&self, now: SystemTime) -> Result<Sample, PartialExport> {
        tracing::debug!("start exporting data");

        let tasks = self.groups.iter().map(|group| {
            let state = Arc::clone(&self.state);
            let group = *group;
            tokio::task::spawn_blocking(move || Self::collect(&state, group))
        });
        let results = futures::future::join_all(tasks).await;

        let mut sample = Sample::new(now);
        let mut failures = Vec::new();
        for (group, joined) in self.groups.iter().zip(results) {
            match joined {
                Ok(Ok(reading)) => reading.apply(&mut sample),
                Ok(Err(reason)) => failures.push(MetricFailure::new(*group, reason)),
                Err(err) => failures.push(MetricFailure::new(*group, format!("collector task failed: {err}"))),
            }
        }

        if failures.is_empty() {
            tracing::debug!("all information successfully exported");
        }
        export_outcome(sample, failures)
    }
}
