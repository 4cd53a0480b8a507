use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Stage;
use crate::sample::Snapshot;

/// How a consumer stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// The input closed and every snapshot was handled
    Drained,
    /// The grace period elapsed first
    Abandoned,
}

/// Feeds every snapshot of `input` to `handle` until the input closes.
///
/// The grace timer starts the first time `shutdown` is observed. Once it
/// fires, the snapshot being handled and everything still buffered are
/// dropped and a single warning names the stage. The stage only counts as
/// drained when its input is closed and empty: an open input may still have
/// snapshots queued upstream that would be lost with the receiver.
pub(crate) async fn drain<F, Fut>(
    stage: Stage,
    mut input: mpsc::Receiver<Arc<Snapshot>>,
    shutdown: CancellationToken,
    grace: Duration,
    mut handle: F,
) -> Outcome
where
    F: FnMut(Arc<Snapshot>) -> Fut,
    Fut: Future<Output = ()>,
{
    let deadline = async {
        shutdown.cancelled().await;
        tracing::debug!(%stage, ?grace, "shutdown observed, draining in-flight snapshots");
        tokio::time::sleep(grace).await;
    };
    tokio::pin!(deadline);

    let in_flight = loop {
        let snapshot = tokio::select! {
            biased;

            _ = &mut deadline => {
                if input.is_empty() && input.is_closed() {
                    tracing::debug!(%stage, "grace period over with nothing in flight");
                    return Outcome::Drained;
                }
                break false;
            },

            received = input.recv() => match received {
                Some(snapshot) => snapshot,
                None => {
                    tracing::debug!(%stage, "input closed, stage drained");
                    return Outcome::Drained;
                },
            },
        };

        tokio::select! {
            biased;

            _ = &mut deadline => break true,

            _ = handle(snapshot) => {},
        }
    };

    let upstream_open = !input.is_closed();
    input.close();
    let mut dropped = usize::from(in_flight);
    while input.try_recv().is_ok() {
        dropped += 1;
    }
    tracing::warn!(
        %stage,
        ?grace,
        dropped,
        upstream_open,
        "graceful shutdown time is over, abandoning in-flight snapshots"
    );
    Outcome::Abandoned
}
