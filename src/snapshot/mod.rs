//! # Snapshot Aggregator
//!
//! Folds raw samples into an averaging window and emits one [`Snapshot`] per
//! window on a single output channel.
//!
//! ## Windows
//!
//! The first window after start is the *warmup* window. It lasts
//! `warmup_interval` and is repeated until it produces a snapshot, after which
//! the aggregator switches for good to *steady* windows of
//! `snapshot_interval`. A window in which no sample arrived emits nothing.
//!
//! ## Concurrency
//!
//! [`Aggregator::push`] may be called from any number of tasks. It only takes
//! the accumulator lock and never touches the output channel, so a stalled
//! consumer delays snapshot emission but never the scrapers. Reading and
//! resetting a window happen under the same lock.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::{Duration, SystemTime};
//!
//! use sys_exporter::sample::{LoadAverage, Sample};
//! use sys_exporter::snapshot::Aggregator;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let aggregator = Arc::new(Aggregator::new(Duration::from_secs(5), Duration::from_secs(2)));
//!     let shutdown = CancellationToken::new();
//!     let (mut snapshots, _task) = aggregator.spawn(1, shutdown.clone());
//!
//!     aggregator.push(&Sample::new(SystemTime::now()).with_load_average(LoadAverage::new(0.5, 0.4, 0.3)));
//!
//!     if let Some(snapshot) = snapshots.recv().await {
//!         println!("averaged {} samples", snapshot.samples);
//!     }
//!     shutdown.cancel();
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SnapshotsSection;
use crate::sample::{Sample, Snapshot};

mod accumulator;

pub use accumulator::Accumulator;

#[cfg(test)]
mod tests;

/// Timing phase of the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    /// Waiting for the first snapshot
    Warmup,
    /// Emitting a snapshot every steady interval
    Steady,
}

impl fmt::Display for WindowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowPhase::Warmup => f.write_str("warmup"),
            WindowPhase::Steady => f.write_str("steady"),
        }
    }
}

/// Windowed averaging of samples into snapshots
pub struct Aggregator {
    accumulator: Mutex<Accumulator>,
    steady: AtomicBool,
    warmup_interval: Duration,
    snapshot_interval: Duration,
}

impl Aggregator {
    /// Creates an aggregator with the given warmup and steady window lengths
    pub fn new(warmup_interval: Duration, snapshot_interval: Duration) -> Self {
        Self {
            accumulator: Mutex::new(Accumulator::new()),
            steady: AtomicBool::new(false),
            warmup_interval,
            snapshot_interval,
        }
    }

    pub fn from_config(config: &SnapshotsSection) -> Self {
        Self::new(config.warmup_interval, config.snapshot_interval)
    }

    /// Folds a sample into the current window.
    ///
    /// Missing groups are simply not added. Never blocks on the output side.
    pub fn push(&self, sample: &Sample) {
        let mut accumulator = self.accumulator.lock();
        accumulator.fold(sample);
        tracing::trace!(pending = accumulator.count(), "sample folded into window");
    }

    /// Number of samples folded into the open window
    pub fn pending(&self) -> u64 {
        self.accumulator.lock().count()
    }

    pub fn phase(&self) -> WindowPhase {
        if self.steady.load(Ordering::Acquire) {
            WindowPhase::Steady
        } else {
            WindowPhase::Warmup
        }
    }

    /// Closes the current window, returning its snapshot if it saw any sample
    fn close_window(&self) -> Option<Snapshot> {
        self.accumulator.lock().take(SystemTime::now())
    }

    fn window_length(&self, phase: WindowPhase) -> Duration {
        match phase {
            WindowPhase::Warmup => self.warmup_interval,
            WindowPhase::Steady => self.snapshot_interval,
        }
    }

    /// Runs the window timer until `shutdown` is cancelled or the output
    /// receiver goes away.
    ///
    /// Each snapshot is sent with a blocking send, so back-pressure from the
    /// consumer delays the next window. `output` is dropped on return, which
    /// closes the channel.
    pub async fn run(&self, output: mpsc::Sender<Arc<Snapshot>>, shutdown: CancellationToken) {
        let mut phase = self.phase();
        let timer = tokio::time::sleep(self.window_length(phase));
        tokio::pin!(timer);

        tracing::debug!(%phase, "start creating snapshots");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = &mut timer => {
                    match self.close_window() {
                        Some(snapshot) => {
                            tracing::debug!(samples = snapshot.samples, %phase, "snapshot calculated");
                            tokio::select! {
                                biased;

                                _ = shutdown.cancelled() => break,

                                sent = output.send(Arc::new(snapshot)) => if sent.is_err() {
                                    tracing::warn!("snapshot receiver dropped, stopping aggregator");
                                    break;
                                },
                            }
                            if phase == WindowPhase::Warmup {
                                phase = WindowPhase::Steady;
                                self.steady.store(true, Ordering::Release);
                                tracing::debug!(
                                    interval = ?self.snapshot_interval,
                                    "warmup is over, calculating snapshots on the steady interval"
                                );
                            }
                        },
                        None => {
                            tracing::debug!(%phase, "no samples received during the last window, skipping snapshot");
                        },
                    }
                    let next = timer.deadline() + self.window_length(phase);
                    timer.as_mut().reset(next);
                }
            }
        }

        drop(output);
        tracing::info!("creating snapshots is stopped");
    }

    /// Spawns [`Aggregator::run`] on a channel of the given capacity
    pub fn spawn(
        self: &Arc<Self>,
        buffer: usize,
        shutdown: CancellationToken,
    ) -> (mpsc::Receiver<Arc<Snapshot>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let aggregator = Arc::clone(self);
        let handle = tokio::spawn(async move { aggregator.run(tx, shutdown).await });
        (rx, handle)
    }
}
