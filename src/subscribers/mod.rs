//! Subscriber registry for live snapshot streaming.
//!
//! Every streaming client gets its own bounded channel, registered under an id
//! that is unique for the lifetime of the registry. Snapshots are broadcast by
//! iterating the registered channels under the registry lock.
//!
//! With [`DeliveryPolicy::Block`] (the default) the broadcast waits for every
//! subscriber to accept the snapshot, so all subscribers observe the same
//! sequence but the slowest one sets the pace for everybody.
//! [`DeliveryPolicy::DropAfter`] bounds that wait per subscriber: a subscriber
//! that does not accept the snapshot in time misses it.
//!
//! Closing a channel always happens together with removing its id from the
//! map, under the same lock, so no sender to a closed channel is ever left
//! registered.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};

use crate::config::SnapshotsSection;
use crate::sample::Snapshot;


/// Opaque identifier of a registered subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Receiving side handed to a streaming client
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Arc<Snapshot>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next snapshot, or `None` once the subscription was closed
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        self.receiver.recv().await
    }
}

/// What a broadcast does with a subscriber whose buffer is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Wait until the subscriber makes room
    #[default]
    Block,
    /// Wait at most this long, then skip the snapshot for that subscriber
    DropAfter(Duration),
}

impl DeliveryPolicy {
    pub fn from_config(config: &SnapshotsSection) -> Self {
        config.delivery_timeout.map_or(DeliveryPolicy::Block, DeliveryPolicy::DropAfter)
    }
}

/// Destination of the streaming branch
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// Delivers one snapshot to every attached subscriber
    async fn broadcast_snapshot(&self, snapshot: Arc<Snapshot>);

    /// Closes every subscription; called once the snapshot source is exhausted
    async fn stop_all(&self);
}

#[derive(Debug, Default)]
struct Channels {
    senders: BTreeMap<SubscriptionId, mpsc::Sender<Arc<Snapshot>>>,
    stopped: bool,
}

/// Registry of per-client snapshot channels
#[derive(Debug)]
pub struct SubscriberRegistry {
    buffer: usize,
    policy: DeliveryPolicy,
    next_id: AtomicU64,
    channels: Mutex<Channels>,
}

impl SubscriberRegistry {
    /// Creates a registry whose subscriber channels hold `buffer` snapshots
    pub fn new(buffer: usize, policy: DeliveryPolicy) -> Self {
        Self { buffer: buffer.max(1), policy, next_id: AtomicU64::new(1), channels: Mutex::new(Channels::default()) }
    }

    pub fn from_config(config: &SnapshotsSection) -> Self {
        Self::new(config.subscriber_buffer, DeliveryPolicy::from_config(config))
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    /// Attaches a new subscriber.
    ///
    /// After [`SnapshotSink::stop_all`] the returned subscription is already
    /// closed.
    pub async fn create_channel(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.buffer);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut channels = self.channels.lock().await;
        if channels.stopped {
            tracing::debug!(%id, "snapshot source exhausted, subscription starts closed");
        } else {
            channels.senders.insert(id, tx);
            tracing::debug!(%id, subscribers = channels.senders.len(), "subscriber attached");
        }
        Subscription { id, receiver }
    }

    /// Detaches a subscriber, closing its channel.
    ///
    /// Returns whether the id was still registered; removing twice is fine.
    pub async fn remove_snapshot_chan(&self, id: SubscriptionId) -> bool {
        let mut channels = self.channels.lock().await;
        let removed = channels.senders.remove(&id).is_some();
        if removed {
            tracing::debug!(%id, subscribers = channels.senders.len(), "subscriber detached");
        }
        removed
    }

    /// Number of attached subscribers
    pub async fn len(&self) -> usize {
        self.channels.lock().await.senders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SnapshotSink for SubscriberRegistry {
    async fn broadcast_snapshot(&self, snapshot: Arc<Snapshot>) {
        let mut channels = self.channels.lock().await;
        let mut disconnected = Vec::new();

        for (id, tx) in channels.senders.iter() {
            let delivered = match self.policy {
                DeliveryPolicy::Block => tx.send(Arc::clone(&snapshot)).await.is_ok(),
                DeliveryPolicy::DropAfter(timeout) => match tx.send_timeout(Arc::clone(&snapshot), timeout).await {
                    Ok(()) => true,
                    Err(SendTimeoutError::Timeout(_)) => {
                        tracing::warn!(%id, ?timeout, "subscriber did not accept snapshot in time, skipping it");
                        true
                    },
                    Err(SendTimeoutError::Closed(_)) => false,
                },
            };
            if !delivered {
                disconnected.push(*id);
            }
        }

        for id in disconnected {
            channels.senders.remove(&id);
            tracing::debug!(%id, "subscriber channel closed unexpectedly, removed");
        }
    }

    async fn stop_all(&self) {
        let mut channels = self.channels.lock().await;
        let count = channels.senders.len();
        channels.senders.clear();
        channels.stopped = true;
        tracing::info!(subscribers = count, "all snapshot subscriptions closed");
    }
}
