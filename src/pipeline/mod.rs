//! # Exporter pipeline
//!
//! Wires the pipeline together and drives it:
//!
//! ```text
//! SampleSource -> Aggregator -> FanOut -+-> storage   -> SnapshotStore
//!                                       +-> streaming -> SubscriberRegistry -> peers
//! ```
//!
//! A scrape tick starts an export without waiting for the previous one, and
//! every resulting sample is pushed into the aggregator. Snapshots leave the
//! aggregator on one channel and are replicated to the two branches.
//!
//! ## Shutdown
//!
//! [`Exporter::stop`] cancels a shared token. The scrape loop stops at once,
//! the aggregator closes its output, and each branch consumer keeps draining
//! for at most `graceful_shutdown_timeout` after it observed the token. A
//! consumer still busy when that time is over is abandoned with one warning
//! and reported in the [`ShutdownReport`].

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use scopeguard::defer;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::collector::SampleSource;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fanout::{FanOut, STORAGE_BRANCH, STREAMING_BRANCH};
use crate::sample::Snapshot;
use crate::server::StreamingTransport;
use crate::snapshot::Aggregator;
use crate::storage::SnapshotStore;
use crate::subscribers::{SnapshotSink, SubscriberRegistry};

mod grace;

use grace::{drain, Outcome};


/// Lifecycle of an [`Exporter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Consumer stage that drains on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Storage,
    Streaming,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Storage => f.write_str(STORAGE_BRANCH),
            Stage::Streaming => f.write_str(STREAMING_BRANCH),
        }
    }
}

/// What happened to in-flight work during shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Stages whose grace period elapsed before they drained
    pub abandoned: Vec<Stage>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// The orchestrator of the snapshot pipeline
pub struct Exporter {
    config: Config,
    source: Arc<dyn SampleSource>,
    store: Arc<dyn SnapshotStore>,
    registry: Arc<SubscriberRegistry>,
    transport: Mutex<Option<Box<dyn StreamingTransport>>>,
    shutdown: CancellationToken,
    state: Mutex<PipelineState>,
}

impl Exporter {
    /// Creates an exporter from its collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - validated configuration
    /// * `source` - where samples come from
    /// * `store` - destination of the storage branch
    /// * `transport` - serves the subscribers of the streaming branch
    pub fn new(
        config: Config,
        source: Arc<dyn SampleSource>,
        store: Arc<dyn SnapshotStore>,
        transport: Box<dyn StreamingTransport>,
    ) -> Self {
        let registry = Arc::new(SubscriberRegistry::from_config(&config.snapshots));
        Self {
            config,
            source,
            store,
            registry,
            transport: Mutex::new(Some(transport)),
            shutdown: CancellationToken::new(),
            state: Mutex::new(PipelineState::Idle),
        }
    }

    /// Replaces the subscriber registry served by the transport
    pub fn with_registry(mut self, registry: Arc<SubscriberRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    fn set_state(&self, state: PipelineState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "exporter state changed");
        }
    }

    /// Signals shutdown and returns immediately
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("stop requested, shutting down exporter");
        }
        self.shutdown.cancel();
    }

    /// Runs the pipeline until [`Exporter::stop`] is called and every stage
    /// drained or was abandoned.
    ///
    /// # Returns
    ///
    /// The shutdown report, or an error right away if the streaming transport
    /// cannot be bound or fails while serving.
    pub async fn run(&self) -> Result<ShutdownReport> {
        let Some(mut transport) = self.transport.lock().take() else {
            return Err(Error::AlreadyStarted);
        };
        defer! {
            self.set_state(PipelineState::Stopped);
        }

        let address = transport.bind().await?;
        let mut serving = tokio::spawn(transport.serve(Arc::clone(&self.registry), self.shutdown.clone()));
        self.set_state(PipelineState::Running);
        tracing::info!(%address, "exporter started");

        let aggregator = Arc::new(Aggregator::from_config(&self.config.snapshots));
        let (snapshots, aggregating) = aggregator.spawn(self.config.snapshots.branch_buffer, self.shutdown.clone());

        let mut fan_out = FanOut::new(self.config.snapshots.branch_buffer);
        let storage_input = fan_out.branch(STORAGE_BRANCH)?;
        let streaming_input = fan_out.branch(STREAMING_BRANCH)?;
        let fanning = fan_out.spawn(snapshots);

        let grace = self.config.exporter.graceful_shutdown_timeout;
        let store = Arc::clone(&self.store);
        let storing = tokio::spawn(drain(Stage::Storage, storage_input, self.shutdown.clone(), grace, move |snapshot| {
            persist(Arc::clone(&store), snapshot)
        }));

        let sink: Arc<dyn SnapshotSink> = self.registry.clone();
        let shutdown = self.shutdown.clone();
        let streaming = tokio::spawn(async move {
            let outcome = drain(Stage::Streaming, streaming_input, shutdown, grace, |snapshot| {
                let sink = Arc::clone(&sink);
                async move { sink.broadcast_snapshot(snapshot).await }
            })
            .await;
            sink.stop_all().await;
            outcome
        });

        if let Err(err) = self.scrape(&aggregator, &mut serving).await {
            self.shutdown.cancel();
            return Err(err);
        }

        self.set_state(PipelineState::Draining);
        let mut report = ShutdownReport::default();
        for (stage, handle) in [(Stage::Storage, storing), (Stage::Streaming, streaming)] {
            match handle.await {
                Ok(Outcome::Drained) => {},
                Ok(Outcome::Abandoned) => report.abandoned.push(stage),
                Err(err) => {
                    tracing::error!(%stage, error = %err, "stage task failed");
                    report.abandoned.push(stage);
                },
            }
        }
        for (task, handle) in [("aggregator", aggregating), ("fan-out", fanning)] {
            if let Err(err) = handle.await {
                tracing::error!(task, error = %err, "pipeline task failed");
            }
        }

        tracing::info!(abandoned = report.abandoned.len(), "exporter stopped");
        Ok(report)
    }

    /// Starts an export on every scrape tick until shutdown.
    ///
    /// Returns an error if the transport fails while serving.
    async fn scrape(
        &self,
        aggregator: &Arc<Aggregator>,
        serving: &mut tokio::task::JoinHandle<Result<()>>,
    ) -> Result<()> {
        let period = self.config.exporter.scrape_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut exports = JoinSet::new();
        let mut transport_running = true;

        tracing::debug!(?period, "start collecting metrics");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                served = &mut *serving, if transport_running => {
                    transport_running = false;
                    match served {
                        Ok(Ok(())) if self.shutdown.is_cancelled() => break,
                        Ok(Ok(())) => tracing::warn!("streaming transport stopped, snapshots are only stored"),
                        Ok(Err(err)) => {
                            tracing::error!(error = %err, "streaming transport failed");
                            exports.abort_all();
                            return Err(err);
                        },
                        Err(err) => tracing::error!(error = %err, "streaming transport task failed"),
                    }
                },

                _ = ticker.tick() => {
                    let source = Arc::clone(&self.source);
                    let aggregator = Arc::clone(aggregator);
                    exports.spawn(async move {
                        let sample = match source.export(SystemTime::now()).await {
                            Ok(sample) => sample,
                            Err(partial) => {
                                for failure in &partial.failures {
                                    tracing::warn!(
                                        group = %failure.group,
                                        reason = %failure.reason,
                                        "failed to collect metric group"
                                    );
                                }
                                partial.into_sample()
                            },
                        };
                        aggregator.push(&sample);
                    });
                },

                Some(joined) = exports.join_next(), if !exports.is_empty() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            tracing::error!(error = %err, "export task panicked");
                        }
                    }
                },
            }
        }

        exports.abort_all();
        tracing::info!("collecting metrics is stopped");
        Ok(())
    }
}

async fn persist(store: Arc<dyn SnapshotStore>, snapshot: Arc<Snapshot>) {
    let record = match snapshot.to_record() {
        Ok(record) => record,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize snapshot");
            return;
        },
    };
    let timestamp = snapshot.timestamp;

    match tokio::task::spawn_blocking(move || store.save(&record, timestamp)).await {
        Ok(Ok(())) => tracing::trace!(samples = snapshot.samples, "snapshot saved"),
        Ok(Err(err)) => tracing::error!(error = %err, "failed to save snapshot"),
        Err(err) => tracing::error!(error = %err, "snapshot save task failed"),
    }
}
