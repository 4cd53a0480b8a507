use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use sys_exporter::collector::{export_outcome, MetricFailure, PartialExport, SampleSource};
use sys_exporter::sample::{CpuUsage, LoadAverage, MetricGroup, Sample};

/// Source returning the same load average on every scrape
pub struct FixedSource {
    load: LoadAverage,
    exports: AtomicU64,
}

impl FixedSource {
    pub fn new(one: f64, five: f64, fifteen: f64) -> Self {
        Self { load: LoadAverage::new(one, five, fifteen), exports: AtomicU64::new(0) }
    }

    pub fn exports(&self) -> u64 {
        self.exports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SampleSource for FixedSource {
    async fn export(&self, now: SystemTime) -> Result<Sample, PartialExport> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        Ok(Sample::new(now).with_load_average(self.load))
    }
}

/// Source whose CPU group fails on every other scrape
#[derive(Default)]
pub struct FlakySource {
    exports: AtomicU64,
}

#[async_trait]
impl SampleSource for FlakySource {
    async fn export(&self, now: SystemTime) -> Result<Sample, PartialExport> {
        let n = self.exports.fetch_add(1, Ordering::SeqCst);
        let sample = Sample::new(now).with_load_average(LoadAverage::new(1.0, 1.0, 1.0));
        if n % 2 == 0 {
            export_outcome(sample.with_cpu_usage(CpuUsage::from_busy(40.0)), Vec::new())
        } else {
            export_outcome(sample, vec![MetricFailure::new(MetricGroup::CpuUsage, "cpu counters unavailable")])
        }
    }
}
