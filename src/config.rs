//! Exporter configuration.
//!
//! Configuration is read from a YAML file, then individual keys can be
//! overridden from the environment with the `EXPORTER_` prefix. Every key has a
//! default, so both a missing file and a partial file are valid. Durations are
//! written in human readable form (`"2s"`, `"500ms"`, `"1m 30s"`).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sample::MetricGroup;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "EXPORTER_";

/// Logging setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerSection {
    /// Default level filter, overridden by `RUST_LOG` when set
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LoggerSection {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

/// Scrape cadence and shutdown behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterSection {
    /// How often metrics are taken from the system
    #[serde(with = "humantime_duration")]
    pub scrape_interval: Duration,
    /// How long in-flight snapshots may keep draining after a stop signal
    #[serde(with = "humantime_duration")]
    pub graceful_shutdown_timeout: Duration,
}

impl Default for ExporterSection {
    fn default() -> Self {
        Self { scrape_interval: Duration::from_secs(1), graceful_shutdown_timeout: Duration::from_secs(3) }
    }
}

/// Aggregation windows and delivery buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotsSection {
    /// Length of the first window after startup
    #[serde(with = "humantime_duration")]
    pub warmup_interval: Duration,
    /// Length of every following window
    #[serde(with = "humantime_duration")]
    pub snapshot_interval: Duration,
    /// Capacity of each streaming subscriber channel
    pub subscriber_buffer: usize,
    /// Capacity of each fan-out branch channel
    pub branch_buffer: usize,
    /// Give up on a subscriber that does not accept a snapshot within this
    /// time. Unset means block until it does.
    #[serde(default, with = "humantime_duration::option")]
    pub delivery_timeout: Option<Duration>,
}

impl Default for SnapshotsSection {
    fn default() -> Self {
        Self {
            warmup_interval: Duration::from_secs(5),
            snapshot_interval: Duration::from_secs(2),
            subscriber_buffer: 16,
            branch_buffer: 1,
            delivery_timeout: None,
        }
    }
}

/// Rotating snapshot log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskStorageSection {
    /// Directory holding the snapshot files
    pub snapshots_storage_path: PathBuf,
    /// Size in bytes after which a new snapshot file is started
    pub maximum_size_of_snapshot_file: u64,
}

impl Default for DiskStorageSection {
    fn default() -> Self {
        Self { snapshots_storage_path: PathBuf::from("/tmp/sys-exporter"), maximum_size_of_snapshot_file: 1_000_000 }
    }
}

/// Streaming listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub address: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { address: "127.0.0.1:8000".to_string() }
    }
}

/// Metric groups that must not be collected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisableMetrics {
    pub load_average: bool,
    pub cpu_usage: bool,
    pub disk_usage: bool,
    pub network_top_talkers: bool,
    pub file_system_info: bool,
}

impl DisableMetrics {
    pub fn is_disabled(&self, group: MetricGroup) -> bool {
        match group {
            MetricGroup::LoadAverage => self.load_average,
            MetricGroup::CpuUsage => self.cpu_usage,
            MetricGroup::DiskUsage => self.disk_usage,
            MetricGroup::NetworkTopTalkers => self.network_top_talkers,
            MetricGroup::FileSystemInfo => self.file_system_info,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSection {
    pub disable: DisableMetrics,
}

impl CollectorSection {
    /// Groups that are not disabled, in their canonical order
    pub fn enabled_groups(&self) -> Vec<MetricGroup> {
        MetricGroup::ALL.iter().copied().filter(|group| !self.disable.is_disabled(*group)).collect()
    }
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// The file was missing and every key took its default
    Defaults,
}

/// Full exporter configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logger: LoggerSection,
    pub exporter: ExporterSection,
    pub snapshots: SnapshotsSection,
    pub disk_storage: DiskStorageSection,
    pub server: ServerSection,
    pub collector: CollectorSection,
}

impl Config {
    /// Loads the configuration from `path`, applies environment overrides and
    /// validates the result.
    ///
    /// A missing file is not an error: defaults are used and the returned
    /// [`ConfigSource`] says so, so the caller can report it once logging is
    /// up.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, ConfigSource)> {
        let path = path.as_ref();
        let (mut config, source) = match std::fs::read_to_string(path) {
            Ok(contents) => (Self::from_yaml(&contents)?, ConfigSource::File),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => (Self::default(), ConfigSource::Defaults),
            Err(err) => return Err(Error::Io(err)),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok((config, source))
    }

    /// Parses a YAML document; absent keys keep their defaults
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|err| Error::config(format!("invalid YAML: {err}")))
    }

    /// Applies `EXPORTER_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("LOG_LEVEL") {
            self.logger.level = value;
        }
        if let Some(value) = var("LOG_JSON") {
            self.logger.json = parse_value("LOG_JSON", &value)?;
        }
        if let Some(value) = var("SCRAPE_INTERVAL") {
            self.exporter.scrape_interval = parse_duration("SCRAPE_INTERVAL", &value)?;
        }
        if let Some(value) = var("GRACEFULLY_SHUTDOWN_TIMEOUT") {
            self.exporter.graceful_shutdown_timeout = parse_duration("GRACEFULLY_SHUTDOWN_TIMEOUT", &value)?;
        }
        if let Some(value) = var("WARMUP_INTERVAL") {
            self.snapshots.warmup_interval = parse_duration("WARMUP_INTERVAL", &value)?;
        }
        if let Some(value) = var("SNAPSHOT_INTERVAL") {
            self.snapshots.snapshot_interval = parse_duration("SNAPSHOT_INTERVAL", &value)?;
        }
        if let Some(value) = var("SUBSCRIBER_BUFFER") {
            self.snapshots.subscriber_buffer = parse_value("SUBSCRIBER_BUFFER", &value)?;
        }
        if let Some(value) = var("BRANCH_BUFFER") {
            self.snapshots.branch_buffer = parse_value("BRANCH_BUFFER", &value)?;
        }
        if let Some(value) = var("DELIVERY_TIMEOUT") {
            self.snapshots.delivery_timeout = Some(parse_duration("DELIVERY_TIMEOUT", &value)?);
        }
        if let Some(value) = var("SNAPSHOTS_STORAGE_PATH") {
            self.disk_storage.snapshots_storage_path = PathBuf::from(value);
        }
        if let Some(value) = var("MAXIMUM_SIZE_OF_SNAPSHOT_FILE") {
            self.disk_storage.maximum_size_of_snapshot_file = parse_value("MAXIMUM_SIZE_OF_SNAPSHOT_FILE", &value)?;
        }
        if let Some(value) = var("ADDRESS") {
            self.server.address = value;
        }

        let disable = &mut self.collector.disable;
        for (name, flag) in [
            ("DISABLE_LOAD_AVERAGE", &mut disable.load_average),
            ("DISABLE_CPU_USAGE", &mut disable.cpu_usage),
            ("DISABLE_DISK_USAGE", &mut disable.disk_usage),
            ("DISABLE_NETWORK_TOP_TALKERS", &mut disable.network_top_talkers),
            ("DISABLE_FILE_SYSTEM_INFO", &mut disable.file_system_info),
        ] {
            if let Some(value) = var(name) {
                *flag = parse_value(name, &value)?;
            }
        }

        Ok(())
    }

    /// Rejects values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("exporter.scrape_interval", self.exporter.scrape_interval),
            ("snapshots.warmup_interval", self.snapshots.warmup_interval),
            ("snapshots.snapshot_interval", self.snapshots.snapshot_interval),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                return Err(Error::config(format!("{key} must be greater than zero")));
            }
        }
        if self.snapshots.subscriber_buffer == 0 {
            return Err(Error::config("snapshots.subscriber_buffer must be greater than zero"));
        }
        if self.snapshots.branch_buffer == 0 {
            return Err(Error::config("snapshots.branch_buffer must be greater than zero"));
        }
        if self.disk_storage.maximum_size_of_snapshot_file == 0 {
            return Err(Error::config("disk_storage.maximum_size_of_snapshot_file must be greater than zero"));
        }
        if self.server.address.trim().is_empty() {
            return Err(Error::config("server.address must not be empty"));
        }
        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|err| Error::config(format!("{ENV_PREFIX}{key}: invalid duration {value:?}: {err}")))
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err| Error::config(format!("{ENV_PREFIX}{key}: invalid value {value:?}: {err}")))
}

/// Serde helper for human readable durations
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(value.trim()).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|value| humantime::parse_duration(value.trim()).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
