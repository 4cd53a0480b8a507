use std::path::Path;
use std::time::Duration;

use sys_exporter::config::Config;

/// Builds configurations with windows short enough for tests
pub struct TestConfigBuilder {
    config: Config,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.exporter.scrape_interval = Duration::from_millis(5);
        config.exporter.graceful_shutdown_timeout = Duration::from_millis(500);
        config.snapshots.warmup_interval = Duration::from_millis(30);
        config.snapshots.snapshot_interval = Duration::from_millis(20);
        config.server.address = "127.0.0.1:0".to_string();
        Self { config }
    }

    pub fn storage(mut self, dir: &Path, max_size: u64) -> Self {
        self.config.disk_storage.snapshots_storage_path = dir.to_path_buf();
        self.config.disk_storage.maximum_size_of_snapshot_file = max_size;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.config.exporter.graceful_shutdown_timeout = grace;
        self
    }

    pub fn build(self) -> Config {
        self.config.validate().unwrap();
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
