//! Sys Exporter - a host telemetry pipeline
//!
//! This crate periodically samples host metrics, averages the samples over
//! time windows and distributes each resulting snapshot to a rotating log on
//! disk and to any number of live streaming subscribers.
//!
//! # Features
//!
//! - **Snapshot Aggregation**: windowed averaging with a warmup window followed by steady windows
//! - **Fan-out**: every snapshot is replicated, in order, to a storage and a streaming branch
//! - **Live Streaming**: per-client bounded channels that can attach and detach at any time
//! - **Rotating Log**: newline-delimited JSON records, rotated once a size threshold is reached
//! - **Graceful Shutdown**: in-flight snapshots drain within a bounded grace period
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sys_exporter::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (config, _source) = Config::load(".exporter.yaml")?;
//!
//!     let exporter = Arc::new(Exporter::new(
//!         config.clone(),
//!         Arc::new(SystemCollector::new(&config.collector)),
//!         Arc::new(RotatingLog::from_config(&config.disk_storage)),
//!         Box::new(TcpTransport::from_config(&config.server)),
//!     ));
//!
//!     let handle = Arc::clone(&exporter);
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.stop();
//!     });
//!
//!     let report = exporter.run().await?;
//!     println!("abandoned stages: {:?}", report.abandoned);
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Every fallible operation returns the crate [`Result`]. Only a failure to
//! bind the streaming listener is fatal:
//!
//! ```rust
//! use sys_exporter::Error;
//!
//! let err = Error::DuplicateBranch("storage".to_string());
//! assert!(!err.is_fatal());
//! ```
//!
//! # Thread Safety
//!
//! The aggregator, the subscriber registry and the log store are shared
//! behind `Arc` and guard their state with a single lock each. Snapshots are
//! immutable once emitted and travel the pipeline as `Arc<Snapshot>`.

pub mod collector;
pub mod config;
pub mod error;
pub mod fanout;
pub mod logging;
pub mod pipeline;
pub mod sample;
pub mod server;
pub mod snapshot;
pub mod storage;
pub mod subscribers;

pub use error::{Error, Result};

/// Re-export common types for convenience
pub mod prelude {
    #[cfg(feature = "system-collector")]
    pub use crate::collector::SystemCollector;
    pub use crate::collector::{PartialExport, SampleSource};
    pub use crate::config::Config;
    pub use crate::pipeline::{Exporter, PipelineState, ShutdownReport, Stage};
    pub use crate::sample::{Sample, Snapshot};
    pub use crate::server::{StreamingTransport, TcpTransport};
    pub use crate::snapshot::Aggregator;
    pub use crate::storage::{RotatingLog, SnapshotStore};
    pub use crate::subscribers::{DeliveryPolicy, SnapshotSink, SubscriberRegistry};
    pub use crate::{Error, Result};
}
