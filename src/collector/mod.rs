//! Sample sources feeding the pipeline.
//!
//! The pipeline only depends on [`SampleSource`]: one call per scrape tick that
//! returns a [`Sample`]. A source may fail for some metric groups and still
//! produce the others, which is reported as a [`PartialExport`] carrying both
//! the partial sample and the list of failed groups.

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::sample::{MetricGroup, Sample};

#[cfg(feature = "system-collector")]
pub mod system;

#[cfg(feature = "system-collector")]
pub use system::SystemCollector;

/// Failure of a single metric group during one scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFailure {
    /// Group that could not be collected
    pub group: MetricGroup,
    /// Human readable reason
    pub reason: String,
}

impl MetricFailure {
    pub fn new(group: MetricGroup, reason: impl Into<String>) -> Self {
        Self { group, reason: reason.into() }
    }
}

impl fmt::Display for MetricFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.group, self.reason)
    }
}

/// A scrape that produced only part of the requested metric groups
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to get full information, {} group(s) failed: {}", .failures.len(), join_failures(.failures))]
pub struct PartialExport {
    /// Whatever could be collected; failed groups are `None`
    pub sample: Sample,
    /// One entry per failed group
    pub failures: Vec<MetricFailure>,
}

impl PartialExport {
    /// Returns the sample regardless of failures
    pub fn into_sample(self) -> Sample {
        self.sample
    }
}

fn join_failures(failures: &[MetricFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Produces one metric sample per scrape tick
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Collects a sample for the scrape started at `now`.
    ///
    /// A collection failure never aborts the tick: the error variant still
    /// carries the partial sample that the pipeline folds as-is.
    async fn export(&self, now: SystemTime) -> std::result::Result<Sample, PartialExport>;
}

/// Builds the outcome of a scrape from the collected sample and failures
pub fn export_outcome(sample: Sample, failures: Vec<MetricFailure>) -> std::result::Result<Sample, PartialExport> {
    if failures.is_empty() {
        Ok(sample)
    } else {
        Err(PartialExport { sample, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::LoadAverage;

    #[test]
    fn test_outcome_without_failures_is_ok() {
        let sample = Sample::new(SystemTime::UNIX_EPOCH).with_load_average(LoadAverage::new(1.0, 1.0, 1.0));
        assert_eq!(export_outcome(sample.clone(), Vec::new()), Ok(sample));
    }

    #[test]
    fn test_partial_export_keeps_sample_and_lists_groups() {
        let sample = Sample::new(SystemTime::UNIX_EPOCH).with_load_average(LoadAverage::new(1.0, 1.0, 1.0));
        let failures = vec![
            MetricFailure::new(MetricGroup::CpuUsage, "no cpus reported"),
            MetricFailure::new(MetricGroup::FileSystemInfo, "no mounted filesystems"),
        ];

        let partial = export_outcome(sample.clone(), failures).unwrap_err();
        let message = partial.to_string();
        assert!(message.contains("2 group(s) failed"));
        assert!(message.contains("cpu usage - no cpus reported"));
        assert_eq!(partial.into_sample(), sample);
    }

    #[tokio::test]
    async fn test_mock_source() {
        let mut source = MockSampleSource::new();
        source.expect_export().times(1).returning(|now| Ok(Sample::new(now)));

        let now = SystemTime::now();
        let sample = source.export(now).await.unwrap();
        assert_eq!(sample.timestamp, now);
    }
}
