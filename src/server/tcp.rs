use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::StreamingTransport;
use crate::config::ServerSection;
use crate::error::{Error, Result};
use crate::subscribers::{SubscriberRegistry, Subscription};

/// Streams snapshots to TCP peers as newline-delimited JSON.
///
/// Every accepted connection becomes one subscriber. Anything the peer sends
/// is ignored; end of stream or a failed write detaches it.
#[derive(Debug)]
pub struct TcpTransport {
    address: String,
    listener: Option<TcpListener>,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), listener: None }
    }

    pub fn from_config(config: &ServerSection) -> Self {
        Self::new(config.address.clone())
    }

    async fn accept_loop(listener: TcpListener, registry: Arc<SubscriberRegistry>, shutdown: CancellationToken) {
        let mut peers = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    tracing::info!("streaming listener stopped accepting peers");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let subscription = registry.create_channel().await;
                        tracing::info!(%peer, subscriber = %subscription.id(), "streaming peer connected");
                        peers.spawn(stream_to_peer(stream, peer, subscription, Arc::clone(&registry)));
                    },
                    Err(err) => {
                        tracing::error!(error = %err, "failed to accept streaming peer");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    },
                },

                Some(_) = peers.join_next(), if !peers.is_empty() => {},
            }
        }

        // Remaining peers end once the registry closes their subscriptions.
        peers.detach_all();
    }
}

#[async_trait]
impl StreamingTransport for TcpTransport {
    async fn bind(&mut self) -> Result<String> {
        if let Some(listener) = &self.listener {
            let local = listener.local_addr().map_err(|err| Error::bind(&self.address, err))?;
            return Ok(local.to_string());
        }
        let listener = TcpListener::bind(&self.address).await.map_err(|err| Error::bind(&self.address, err))?;
        let local = listener.local_addr().map_err(|err| Error::bind(&self.address, err))?;
        self.listener = Some(listener);
        tracing::info!(address = %local, "streaming listener bound");
        Ok(local.to_string())
    }

    async fn serve(self: Box<Self>, registry: Arc<SubscriberRegistry>, shutdown: CancellationToken) -> Result<()> {
        let mut transport = *self;
        if transport.listener.is_none() {
            transport.bind().await?;
        }
        if let Some(listener) = transport.listener.take() {
            Self::accept_loop(listener, registry, shutdown).await;
        }
        Ok(())
    }
}

async fn stream_to_peer(
    stream: TcpStream,
    peer: SocketAddr,
    mut subscription: Subscription,
    registry: Arc<SubscriberRegistry>,
) {
    let id = subscription.id();
    let (mut reader, mut writer) = stream.into_split();
    let mut discard = [0u8; 512];

    loop {
        tokio::select! {
            read = reader.read(&mut discard) => match read {
                Ok(0) | Err(_) => {
                    tracing::info!(%peer, subscriber = %id, "streaming peer disconnected");
                    break;
                },
                Ok(_) => {},
            },

            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else {
                    tracing::debug!(%peer, subscriber = %id, "subscription closed, ending stream");
                    let _ = writer.shutdown().await;
                    break;
                };
                let mut line = match snapshot.to_record() {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::error!(subscriber = %id, error = %err, "failed to serialize snapshot");
                        continue;
                    },
                };
                line.push(b'\n');
                if let Err(err) = writer.write_all(&line).await {
                    tracing::warn!(%peer, subscriber = %id, error = %err, "failed to send snapshot, detaching peer");
                    break;
                }
            },
        }
    }

    // A broadcast blocked on this peer holds the registry lock until the
    // receiver is gone.
    drop(subscription);
    registry.remove_snapshot_chan(id).await;
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;
    use crate::sample::{LoadAverage, MetricGroups, Snapshot};
    use crate::subscribers::{DeliveryPolicy, SnapshotSink};

    async fn wait_for_subscribers(registry: &SubscriberRegistry, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.len().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_peer_receives_snapshots_as_json_lines() {
        let registry = Arc::new(SubscriberRegistry::new(4, DeliveryPolicy::Block));
        let shutdown = CancellationToken::new();
        let mut transport = Box::new(TcpTransport::new("127.0.0.1:0"));
        let address = transport.bind().await.unwrap();
        let server = tokio::spawn(transport.serve(Arc::clone(&registry), shutdown.clone()));

        let client = TcpStream::connect(&address).await.unwrap();
        wait_for_subscribers(&registry, 1).await;

        let metrics = MetricGroups { load_average: Some(LoadAverage::new(1.0, 2.0, 3.0)), ..Default::default() };
        registry.broadcast_snapshot(Arc::new(Snapshot { timestamp: SystemTime::now(), samples: 3, metrics })).await;

        let mut lines = BufReader::new(client).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["samples"], 3);
        assert_eq!(value["load_average"]["five"], 2.0);

        shutdown.cancel();
        server.await.unwrap().unwrap();

        registry.stop_all().await;
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disconnected_peer_is_detached() {
        let registry = Arc::new(SubscriberRegistry::new(4, DeliveryPolicy::Block));
        let shutdown = CancellationToken::new();
        let mut transport = Box::new(TcpTransport::new("127.0.0.1:0"));
        let address = transport.bind().await.unwrap();
        let _server = tokio::spawn(transport.serve(Arc::clone(&registry), shutdown.clone()));

        let client = TcpStream::connect(&address).await.unwrap();
        wait_for_subscribers(&registry, 1).await;
        drop(client);
        wait_for_subscribers(&registry, 0).await;

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();

        let mut transport = TcpTransport::new(address.clone());
        let err = transport.bind().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains(&address));
    }
}
